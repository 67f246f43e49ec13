//! Timeout wait strategy surfaced through the barrier and the processor.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gyre::{
    BatchEventProcessorBuilder, EventHandler, GyreError, Result, RingBuffer,
    TimeoutBlockingWaitStrategy,
};

#[test]
fn barrier_wait_fails_with_timeout_after_the_deadline() {
    let ring = RingBuffer::single_producer(
        || 0i64,
        8,
        Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(500))),
    )
    .unwrap();
    let barrier = ring.new_barrier(Vec::new());

    // Park the cursor at 5, then ask for 6.
    for _ in 0..6 {
        ring.publish_event(|slot: &mut i64, _| *slot = 0);
    }

    let started = Instant::now();
    let result = barrier.wait_for(6);
    assert!(matches!(result, Err(GyreError::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[test]
fn processor_reports_timeout_and_keeps_running() {
    let ring = RingBuffer::single_producer(
        || 0i64,
        8,
        Arc::new(TimeoutBlockingWaitStrategy::new(Duration::from_millis(50))),
    )
    .unwrap();
    let barrier = Arc::new(ring.new_barrier(Vec::new()));

    struct TimeoutAware {
        timeouts: Arc<AtomicI64>,
        last_timeout_sequence: Arc<AtomicI64>,
    }

    impl EventHandler<i64> for TimeoutAware {
        fn on_event(&mut self, _event: &mut i64, _sequence: i64, _end: bool) -> Result<()> {
            Ok(())
        }

        fn on_timeout(&mut self, sequence: i64) -> Result<()> {
            self.last_timeout_sequence.store(sequence, Ordering::Release);
            self.timeouts.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }
    }

    let timeouts = Arc::new(AtomicI64::new(0));
    let last_timeout_sequence = Arc::new(AtomicI64::new(i64::MIN));

    let mut processor = BatchEventProcessorBuilder::new()
        .build(
            ring.clone(),
            barrier,
            Box::new(TimeoutAware {
                timeouts: timeouts.clone(),
                last_timeout_sequence: last_timeout_sequence.clone(),
            }),
        )
        .unwrap();
    ring.add_gating_sequences(&[processor.sequence()]);

    for _ in 0..6 {
        ring.publish_event(|slot: &mut i64, _| *slot = 0);
    }

    let sequence = processor.sequence();
    let handle = processor.handle();
    let worker = std::thread::spawn(move || processor.run());

    // The consumer drains 0..=5, then its wait for 6 times out.
    let started = Instant::now();
    while timeouts.load(Ordering::Acquire) < 2 {
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "timeout hook never fired"
        );
        std::thread::yield_now();
    }
    assert_eq!(sequence.get(), 5);
    assert_eq!(last_timeout_sequence.load(Ordering::Acquire), 5);

    // The loop survived the timeouts; later events still flow.
    ring.publish_event(|slot: &mut i64, _| *slot = 0);
    while sequence.get() < 6 {
        assert!(started.elapsed() < Duration::from_secs(10));
        std::thread::yield_now();
    }

    handle.halt();
    worker.join().unwrap().unwrap();
}
