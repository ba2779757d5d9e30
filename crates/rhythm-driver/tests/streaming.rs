//! Broadcast streaming against the simulated board

use rhythm_driver::backends::{SimulatedBoard, SimulatedChip, SimulatedFactory};
use rhythm_driver::prelude::*;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn stream(board: SimulatedBoard, batch_size: usize) -> BatchStream {
    let config = BoardConfig::default()
        .with_batch_size(batch_size)
        .with_poll_limit(100_000);
    BatchStream::new(Arc::new(SimulatedFactory::new(board)), config)
}

#[test]
fn test_batches_have_exact_size() {
    let s = stream(SimulatedBoard::new(), 256);
    let sub = s.subscribe().unwrap();
    for item in sub.iter().take(4) {
        let batch = item.unwrap();
        assert_eq!(batch.len(), 256);
        assert_eq!(batch.streams(), 0);
        assert!(batch.amplifier_rows() >= 1);
        assert_eq!(batch.timestamps().len(), 256);
    }
    println!("✅ Four batches of 256 samples with no chips attached");
}

#[test]
fn test_samples_are_contiguous_across_batches() {
    let board = SimulatedBoard::new().with_chip(1, SimulatedChip::new(ChipKind::Rhd2132, 1.0));
    let s = stream(board, 100);
    let sub = s.subscribe().unwrap();
    let batches: Vec<_> = sub.iter().take(3).map(|item| item.unwrap()).collect();

    let stamps: Vec<u32> = batches.iter().flat_map(|b| b.timestamps().iter().copied()).collect();
    assert!(stamps.windows(2).all(|w| w[1] == w[0] + 1));
    let first = &batches[0];
    assert_eq!(first.streams(), 1);
    assert_eq!(first.amplifier_rows(), 32);
    let ts = first.timestamps()[5];
    let expected = SimulatedBoard::amplifier_value(ts, DataSource::PortA2, 7);
    assert_eq!(first.amplifier(7).unwrap()[5], expected);
}

#[test]
fn test_subscribers_see_identical_batches() {
    let s = stream(SimulatedBoard::new(), 64);
    let a = s.subscribe().unwrap();
    let b = s.subscribe().unwrap();
    assert_eq!(s.subscriber_count(), 2);

    // A joined first and may hold a backlog of up to one queue.
    let depth = BoardConfig::default().queue_depth;
    let reader_a = thread::spawn(move || {
        let seen: Vec<_> = a.iter().take(depth + 12).map(|item| item.unwrap()).collect();
        seen
    });
    let reader_b = thread::spawn(move || {
        let seen: Vec<_> = b.iter().take(5).map(|item| item.unwrap()).collect();
        seen
    });
    let from_b = reader_b.join().unwrap();
    let from_a = reader_a.join().unwrap();

    let start = from_a
        .iter()
        .position(|batch| Arc::ptr_eq(batch, &from_b[0]))
        .expect("first batch of B also reaches A");
    for (x, y) in from_a[start..].iter().zip(&from_b) {
        assert!(Arc::ptr_eq(x, y));
    }
    assert_eq!(s.subscriber_count(), 0);
    assert!(s.status().is_none());
}

#[test]
fn test_corrupt_header_ends_stream() {
    let board = SimulatedBoard::new().with_corrupt_header_at(600);
    let s = stream(board, 256);
    let sub = s.subscribe().unwrap();

    assert!(sub.recv().unwrap().is_ok());
    assert!(sub.recv().unwrap().is_ok());
    let err = sub.recv().unwrap().unwrap_err();
    assert!(matches!(*err, RhythmError::HeaderMismatch { sample: 600, .. }));
    assert!(err.is_session_fatal());
    assert!(sub.recv().is_none());
    assert!(matches!(
        sub.recv_timeout(Duration::from_millis(50)),
        Err(RhythmError::InvalidState { .. })
    ));
    println!("✅ Header corruption at sample 600 ended the stream");
}

#[test]
fn test_iteration_finishes_after_terminal_error() {
    let board = SimulatedBoard::new().with_corrupt_header_at(10);
    let s = stream(board, 32);
    let sub = s.subscribe().unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let reader = thread::spawn(move || {
        let items: Vec<_> = sub.iter().collect();
        let _ = done_tx.send(());
        items
    });
    assert!(
        done_rx.recv_timeout(Duration::from_secs(10)).is_ok(),
        "iteration still blocked after the header error"
    );
    let items = reader.join().unwrap();
    assert_eq!(items.len(), 1);
    assert!(matches!(*items[0].clone().unwrap_err(), RhythmError::HeaderMismatch { sample: 10, .. }));
}

#[test]
fn test_resubscribe_after_failure_restarts() {
    let board = SimulatedBoard::new().with_corrupt_header_at(10);
    let s = stream(board, 32);
    let first = s.subscribe().unwrap();
    assert!(first.recv().unwrap().is_err());

    // Restarts with the counter reset, so the same frame fails again.
    let second = s.subscribe().unwrap();
    assert_eq!(s.subscriber_count(), 1);
    assert!(second.recv().unwrap().is_err());
    drop(first);
    assert_eq!(s.subscriber_count(), 1);
}

#[test]
fn test_last_unsubscribe_closes_board() {
    let s = stream(SimulatedBoard::new(), 32);
    let sub = s.subscribe().unwrap();
    assert!(sub.recv().unwrap().is_ok());
    let status = s.status().unwrap();
    assert_eq!(status.acquisition, rhythm_driver::AcquisitionState::Running);
    drop(sub);
    assert!(s.status().is_none());

    let again = s.subscribe().unwrap();
    assert!(again.recv().unwrap().is_ok());
}
