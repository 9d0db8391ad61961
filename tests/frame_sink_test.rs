//! Integration tests for the frame sink hand-off
//!
//! These tests drive the producer half from a plain thread, the way a camera
//! delivery thread does, and check the capacity, reset and lease-release
//! guarantees from the consumer side.

use interf_daq::data::frame_sink::FrameSink;
use interf_daq::hardware::mock::MockLease;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_sink_never_exceeds_capacity() {
    let releases = Arc::new(AtomicU64::new(0));
    let (mut sink, mut handler) = FrameSink::new(8, None);
    sink.start();

    let producer_releases = Arc::clone(&releases);
    let producer = thread::spawn(move || {
        for i in 0..500u32 {
            handler.handle(MockLease::uniform(4, 4, (i % 255) as u8, Arc::clone(&producer_releases)));
        }
        handler
    });

    for _ in 0..200 {
        assert!(sink.len() <= sink.capacity());
        thread::sleep(Duration::from_micros(50));
    }
    let _handler = producer.join().unwrap();

    assert_eq!(sink.len(), 8);
    assert!(sink.is_ready());
    assert_eq!(sink.dropped_frames(), 500 - 8);
    assert_eq!(sink.delivered_frames(), 500);
    assert_eq!(releases.load(Ordering::SeqCst), 500);
}

#[test]
fn test_sink_keeps_first_frames_in_arrival_order() {
    let releases = Arc::new(AtomicU64::new(0));
    let (mut sink, mut handler) = FrameSink::new(3, None);
    sink.start();

    for value in [1u8, 2, 3, 4, 5] {
        handler.handle(MockLease::uniform(2, 2, value, Arc::clone(&releases)));
    }

    let totals: Vec<u64> = sink.drain().iter().map(|f| f.total_intensity()).collect();
    assert_eq!(totals, vec![4, 8, 12]);
    assert!(sink.is_empty());
}

#[test]
fn test_disarmed_sink_buffers_nothing() {
    let releases = Arc::new(AtomicU64::new(0));
    let (sink, mut handler) = FrameSink::new(4, None);

    for _ in 0..10 {
        handler.handle(MockLease::uniform(2, 2, 9, Arc::clone(&releases)));
    }

    assert!(sink.is_empty());
    assert!(!sink.is_ready());
    // Idle frames are not overruns
    assert_eq!(sink.dropped_frames(), 0);
    assert_eq!(releases.load(Ordering::SeqCst), 10);
    assert!(sink.try_latest_frame().is_some());
}

#[test]
fn test_reset_then_start_collects_a_fresh_batch() {
    let releases = Arc::new(AtomicU64::new(0));
    let (mut sink, mut handler) = FrameSink::new(2, None);
    sink.start();
    handler.handle(MockLease::uniform(2, 2, 1, Arc::clone(&releases)));
    handler.handle(MockLease::uniform(2, 2, 1, Arc::clone(&releases)));
    assert!(sink.is_ready());

    sink.reset();
    assert!(sink.is_empty());
    assert!(!sink.is_started());

    handler.handle(MockLease::uniform(2, 2, 1, Arc::clone(&releases)));
    assert!(sink.is_empty());

    sink.start();
    handler.handle(MockLease::uniform(2, 2, 7, Arc::clone(&releases)));
    handler.handle(MockLease::uniform(2, 2, 7, Arc::clone(&releases)));
    let frames = sink.drain();
    assert_eq!(frames.len(), 2);
    assert!(frames.iter().all(|f| f.total_intensity() == 28));
}

#[test]
fn test_arm_handle_opens_capture_window() {
    let releases = Arc::new(AtomicU64::new(0));
    let (mut sink, mut handler) = FrameSink::new(2, None);
    sink.reset();
    let arm = sink.arm_handle();

    handler.handle(MockLease::uniform(2, 2, 3, Arc::clone(&releases)));
    assert!(sink.is_empty());

    thread::spawn(move || arm.arm()).join().unwrap();
    assert!(sink.is_started());

    handler.handle(MockLease::uniform(2, 2, 3, Arc::clone(&releases)));
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_short_buffer_is_discarded_but_released() {
    let releases = Arc::new(AtomicU64::new(0));
    let (mut sink, mut handler) = FrameSink::new(2, None);
    sink.start();

    handler.handle(MockLease::new(4, 4, vec![0; 3], Arc::clone(&releases)));

    assert!(sink.is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
