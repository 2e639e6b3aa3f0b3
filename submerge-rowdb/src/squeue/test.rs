use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use test_log::test;

use super::*;

#[test]
fn tickets_run_in_reservation_order() {
    let fanout = Arc::new(QueueFanout::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    let t0 = fanout.reserve();
    let t1 = fanout.reserve();
    let t2 = fanout.reserve();

    let mut handles = Vec::new();
    for (ticket, id) in [(t2, 2), (t1, 1), (t0, 0)] {
        let fanout = fanout.clone();
        let order = order.clone();
        handles.push(thread::spawn(move || {
            let interruptor = Interruptor::never();
            fanout
                .enter(ticket, &interruptor, || {
                    order.lock().unwrap().push(id);
                    Ok(())
                })
                .unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn emergency_entry_still_respects_the_line() {
    let fanout = QueueFanout::new();
    let interruptor = Interruptor::never();
    let seen = Mutex::new(Vec::new());

    fanout
        .enter_emergency(&interruptor, || {
            seen.lock().unwrap().push("first");
            Ok(())
        })
        .unwrap();
    fanout
        .enter_emergency(&interruptor, || {
            seen.lock().unwrap().push("second");
            Ok(())
        })
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn interrupted_waiter_is_withdrawn_and_does_not_block_the_line() {
    let fanout = Arc::new(QueueFanout::new());
    let t0 = fanout.reserve();
    let t1 = fanout.reserve();

    let blocking = Interruptor::new();
    let fanout2 = fanout.clone();
    let blocking2 = blocking.clone();
    let handle = thread::spawn(move || fanout2.enter(t1, &blocking2, || Ok(())));

    thread::sleep(Duration::from_millis(20));
    blocking.interrupt();
    let result: Result<()> = handle.join().unwrap();
    assert!(matches!(result, Err(StoreError::Interrupted)));

    let never = Interruptor::never();
    fanout.enter(t0, &never, || Ok(())).unwrap();
}
