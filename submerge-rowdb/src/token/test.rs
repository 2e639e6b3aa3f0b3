use std::sync::Arc;
use std::thread;
use std::time::Duration;

use test_log::test;

use super::*;

#[test]
fn reads_do_not_block_each_other() {
    let seq = TokenSequencer::new();
    let t0 = seq.enter_read();
    let t1 = seq.enter_read();
    let interruptor = Interruptor::never();
    seq.wait_read(t1, &interruptor).unwrap();
    seq.wait_read(t0, &interruptor).unwrap();
}

#[test]
fn write_blocks_until_earlier_read_is_admitted() {
    let seq = Arc::new(TokenSequencer::new());
    let read = seq.enter_read();
    let write = seq.enter_write();
    let interruptor = Interruptor::never();

    let seq2 = seq.clone();
    let handle = thread::spawn(move || {
        let interruptor = Interruptor::never();
        seq2.wait_write(write, &interruptor).unwrap()
    });

    thread::sleep(Duration::from_millis(30));
    assert!(!handle.is_finished());

    seq.wait_read(read, &interruptor).unwrap();
    let guard = handle.join().unwrap();
    guard.release();
}

#[test]
fn write_guard_release_unblocks_next_write() {
    let seq = Arc::new(TokenSequencer::new());
    let w0 = seq.enter_write();
    let w1 = seq.enter_write();
    let interruptor = Interruptor::never();

    let guard0 = seq.wait_write(w0, &interruptor).unwrap();

    let seq2 = seq.clone();
    let handle = thread::spawn(move || {
        let interruptor = Interruptor::never();
        seq2.wait_write(w1, &interruptor).unwrap()
    });

    thread::sleep(Duration::from_millis(30));
    assert!(!handle.is_finished());

    guard0.release();
    let guard1 = handle.join().unwrap();
    guard1.release();
}

#[test]
fn interrupt_withdraws_token_without_stranding_successors() {
    let seq = Arc::new(TokenSequencer::new());
    let w0 = seq.enter_write();
    let w1 = seq.enter_write();

    let blocking = Interruptor::new();
    let seq2 = seq.clone();
    let blocking2 = blocking.clone();
    let handle = thread::spawn(move || seq2.wait_write(w0, &blocking2));

    thread::sleep(Duration::from_millis(20));
    blocking.interrupt();
    let result = handle.join().unwrap();
    assert!(matches!(result, Err(StoreError::Interrupted)));

    let never = Interruptor::never();
    let guard1 = seq.wait_write(w1, &never).unwrap();
    guard1.release();
}
