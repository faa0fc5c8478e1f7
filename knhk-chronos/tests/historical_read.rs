//! Scenario 2: historical reads across executives at different times.

use std::sync::Arc;

use parking_lot::Mutex;

use knhk_chronos::event::{EventKind, Priority};
use knhk_chronos::{Executive, SimTime, TracedValue};

#[test]
fn peer_reads_see_the_value_as_of_their_own_clock() {
    let owner = Executive::new("owner", SimTime::ZERO);
    let tv = TracedValue::new(owner.clone(), 0i32);

    {
        let tv = tv.clone();
        let owner_ref = owner.clone();
        owner
            .request_event(SimTime::new(10.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                tv.set(42, &owner_ref).unwrap();
            })
            .unwrap();
    }
    {
        let tv = tv.clone();
        let owner_ref = owner.clone();
        owner
            .request_event(SimTime::new(20.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                tv.set(99, &owner_ref).unwrap();
            })
            .unwrap();
    }
    // Advance the owner further than its last write so the scenario's
    // "owner is at t=30" framing holds for the second peer read.
    owner
        .request_event(SimTime::new(30.0), Priority::DEFAULT, EventKind::Synchronous, || {})
        .unwrap();

    owner.start().unwrap();
    owner.join();
    assert_eq!(owner.now(), SimTime::new(30.0));

    let early_peer = Executive::new("peer-early", SimTime::ZERO);
    let early_result = Arc::new(Mutex::new(None));
    {
        let tv = tv.clone();
        let early_peer_ref = early_peer.clone();
        let early_result = early_result.clone();
        early_peer
            .request_event(SimTime::new(15.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                *early_result.lock() = Some(tv.get(&early_peer_ref).unwrap());
            })
            .unwrap();
    }
    early_peer.start().unwrap();
    early_peer.join();
    assert_eq!(*early_result.lock(), Some(42));

    let late_peer = Executive::new("peer-late", SimTime::ZERO);
    let late_result = Arc::new(Mutex::new(None));
    {
        let tv = tv.clone();
        let late_peer_ref = late_peer.clone();
        let late_result = late_result.clone();
        late_peer
            .request_event(SimTime::new(25.0), Priority::DEFAULT, EventKind::Synchronous, move || {
                *late_result.lock() = Some(tv.get(&late_peer_ref).unwrap());
            })
            .unwrap();
    }
    late_peer.start().unwrap();
    late_peer.join();
    assert_eq!(*late_result.lock(), Some(99));
}

#[test]
fn read_before_any_write_returns_initial_value() {
    let owner = Executive::new("owner", SimTime::new(5.0));
    let tv = TracedValue::new(owner.clone(), "initial".to_string());

    let peer = Executive::new("peer", SimTime::new(5.0));
    assert_eq!(tv.get(&peer).unwrap(), "initial");
}
