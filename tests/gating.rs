//! Producer gating against slow consumers.

use std::sync::Arc;

use gyre::{BusySpinWaitStrategy, GyreError, ProducerType, RingBuffer, Sequence};

#[test]
fn full_ring_rejects_claims_until_the_consumer_moves() {
    let ring =
        RingBuffer::single_producer(|| 0u32, 4, Arc::new(BusySpinWaitStrategy::new())).unwrap();
    let consumer = Arc::new(Sequence::default());
    ring.add_gating_sequences(&[consumer.clone()]);

    for _ in 0..4 {
        let sequence = ring.try_next().unwrap();
        ring.publish(sequence);
    }

    // Buffer of four is full while the consumer sits at -1.
    assert!(matches!(
        ring.try_next(),
        Err(GyreError::InsufficientCapacity)
    ));
    assert_eq!(ring.remaining_capacity(), 0);

    // One consumed event frees exactly one slot, immediately.
    consumer.set(0);
    let sequence = ring.next();
    assert_eq!(sequence, 4);
    ring.publish(sequence);
}

#[test]
fn gating_invariant_holds_for_every_successful_claim() {
    for producer_type in [ProducerType::Single, ProducerType::Multi] {
        let ring = RingBuffer::new(
            producer_type,
            || 0u32,
            8,
            Arc::new(BusySpinWaitStrategy::new()),
        )
        .unwrap();
        let consumer = Arc::new(Sequence::default());
        ring.add_gating_sequences(&[consumer.clone()]);

        let mut claimed = -1i64;
        for round in 0..64 {
            match ring.try_next() {
                Ok(sequence) => {
                    claimed = sequence;
                    ring.publish(sequence);
                    // No claim may wrap over the unconsumed window.
                    assert!(ring.minimum_gating_sequence() >= claimed - 8);
                }
                Err(GyreError::InsufficientCapacity) => {
                    // Drain a little and keep claiming.
                    consumer.set(consumer.get().max(claimed - (round % 4)));
                }
                Err(other) => panic!("unexpected claim failure: {other}"),
            }
        }
    }
}

#[test]
fn removing_the_gate_unblocks_producers() {
    let ring =
        RingBuffer::multi_producer(|| 0u32, 4, Arc::new(BusySpinWaitStrategy::new())).unwrap();
    let consumer = Arc::new(Sequence::default());
    ring.add_gating_sequences(&[consumer.clone()]);

    for _ in 0..4 {
        let sequence = ring.try_next().unwrap();
        ring.publish(sequence);
    }
    assert!(ring.try_next().is_err());

    assert!(ring.remove_gating_sequence(&consumer));
    assert!(ring.try_next().is_ok());
}
