//! Scenario 4: a peer writing into the owner's past forces a rollback.

use knhk_chronos::event::{EventKind, Priority};
use knhk_chronos::{Executive, SimTime, TracedValue};

#[test]
fn past_write_rolls_the_owner_back_and_lands_as_the_new_tail() {
    let owner = Executive::new("owner", SimTime::ZERO);
    let tv = TracedValue::new(owner.clone(), 0i32);

    {
        let tv = tv.clone();
        let owner_ref = owner.clone();
        owner
            .request_event(SimTime::new(200.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                tv.set(1, &owner_ref).unwrap();
            })
            .unwrap();
    }
    owner.start().unwrap();
    owner.join();
    assert_eq!(owner.now(), SimTime::new(200.0));
    assert_eq!(tv.history_len(), 2); // initial (0,0) + (200,1)

    let peer = Executive::new("peer", SimTime::new(150.0));
    tv.set(5, &peer).unwrap();

    assert_eq!(owner.now(), SimTime::new(150.0));
    let audit = tv.history_audit();
    assert_eq!(audit.len(), 2); // initial (0,0) survives, (200,1) is gone
    assert_eq!(audit.last().unwrap().when, SimTime::new(150.0));
    assert_eq!(audit.last().unwrap().value, 5);
    assert_eq!(tv.get(&peer).unwrap(), 5);
}

#[test]
fn rollback_to_the_caller_time_overwrites_a_tail_entry_at_that_exact_time() {
    let owner = Executive::new("owner", SimTime::ZERO);
    let tv = TracedValue::new(owner.clone(), 0i32);

    {
        let tv = tv.clone();
        let owner_ref = owner.clone();
        owner
            .request_event(SimTime::new(150.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                tv.set(1, &owner_ref).unwrap();
            })
            .unwrap();
    }
    {
        let tv = tv.clone();
        let owner_ref = owner.clone();
        owner
            .request_event(SimTime::new(200.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                tv.set(2, &owner_ref).unwrap();
            })
            .unwrap();
    }
    owner.start().unwrap();
    owner.join();

    let peer = Executive::new("peer", SimTime::new(150.0));
    tv.set(99, &peer).unwrap();

    let audit = tv.history_audit();
    assert_eq!(audit.len(), 2); // (0,0) initial, (150,99) overwritten in place
    assert_eq!(audit.last().unwrap().when, SimTime::new(150.0));
    assert_eq!(audit.last().unwrap().value, 99);
}
