//! Shared batch stream
//!
//! One board feeds any number of subscribers. The first [`subscribe`]
//! opens, calibrates and starts the board; dropping the last
//! [`Subscription`] stops acquisition and closes it. Every subscriber gets
//! the same `Arc<SampleBatch>` values in the same order through its own
//! bounded queue. A full queue blocks the producer, so a slow subscriber
//! slows everyone rather than losing samples. When acquisition ends every
//! queue is disconnected; subscribers drain what is buffered and then see
//! the end of the stream.
//!
//! [`subscribe`]: BatchStream::subscribe

use crate::acquisition::{BatchResult, BatchSink};
use crate::board::{BoardDriver, BoardStatus};
use crate::commands::{CommandCompiler, StaticCommandCompiler};
use crate::config::BoardConfig;
use crate::error::{Result, RhythmError};
use crate::transport::TransportFactory;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fan-out of one producer to many bounded queues
#[derive(Debug, Default)]
struct Fanout {
    senders: Mutex<Vec<(u64, Sender<BatchResult>)>>,
}

impl Fanout {
    fn add(&self, id: u64, tx: Sender<BatchResult>) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.push((id, tx));
        }
    }

    fn remove(&self, id: u64) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|(i, _)| *i != id);
        }
    }

    fn clear(&self) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.clear();
        }
    }
}

impl BatchSink for Fanout {
    fn publish(&self, item: BatchResult) -> bool {
        // Send outside the lock so subscribers can come and go while the
        // producer is blocked on a full queue.
        let senders = match self.senders.lock() {
            Ok(senders) => senders.clone(),
            Err(_) => return false,
        };
        let gone: Vec<u64> = senders
            .iter()
            .filter(|(_, tx)| tx.send(item.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        if !gone.is_empty() {
            debug!("Dropping {} disconnected subscribers", gone.len());
            if let Ok(mut current) = self.senders.lock() {
                current.retain(|(id, _)| !gone.contains(id));
            }
        }
        gone.len() < senders.len()
    }

    fn close(&self) {
        debug!("Producer finished, disconnecting subscribers");
        self.clear();
    }
}

#[derive(Debug, Default)]
struct StreamState {
    driver: Option<BoardDriver>,
    subscribers: usize,
    next_id: u64,
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    factory: Arc<dyn TransportFactory>,
    compiler: Arc<dyn CommandCompiler>,
    config: BoardConfig,
    fanout: Arc<Fanout>,
    state: Mutex<StreamState>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, StreamState>> {
        self.state
            .lock()
            .map_err(|_| RhythmError::invalid_state("stream state poisoned"))
    }
}

/// Reference-counted broadcast of one board's batches
#[derive(Debug, Clone)]
pub struct BatchStream {
    shared: Arc<Shared>,
}

impl BatchStream {
    /// Stream of board `config.board_index`; nothing is opened yet
    pub fn new(factory: Arc<dyn TransportFactory>, config: BoardConfig) -> Self {
        Self::with_compiler(factory, Arc::new(StaticCommandCompiler), config)
    }

    /// Stream using a custom [`CommandCompiler`]
    pub fn with_compiler(
        factory: Arc<dyn TransportFactory>,
        compiler: Arc<dyn CommandCompiler>,
        config: BoardConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory,
                compiler,
                config,
                fanout: Arc::new(Fanout::default()),
                state: Mutex::new(StreamState::default()),
            }),
        }
    }

    /// Join the stream, starting the board if this is the first subscriber
    ///
    /// A stream that ended on an error is torn down and restarted; earlier
    /// subscribers keep only what they already received.
    ///
    /// # Errors
    ///
    /// Any open, calibration or start failure. No subscription is held then.
    pub fn subscribe(&self) -> Result<Subscription> {
        let shared = &self.shared;
        let mut state = shared.lock()?;

        let ended = state
            .driver
            .as_ref()
            .is_some_and(|d| d.acquisition_state() != crate::acquisition::AcquisitionState::Running);
        if ended {
            warn!("Board stream ended, restarting");
            shared.fanout.clear();
            if let Some(driver) = state.driver.take() {
                if let Err(e) = driver.close() {
                    warn!("Closing ended stream: {e}");
                }
            }
            state.subscribers = 0;
            state.generation += 1;
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = bounded(shared.config.queue_depth);
        shared.fanout.add(id, tx);

        if state.driver.is_none() {
            match Self::start_board(shared) {
                Ok(driver) => state.driver = Some(driver),
                Err(e) => {
                    shared.fanout.remove(id);
                    return Err(e);
                }
            }
        }
        state.subscribers += 1;
        debug!("Subscriber {id} joined ({} total)", state.subscribers);
        Ok(Subscription {
            id,
            generation: state.generation,
            receiver: Some(rx),
            shared: Arc::clone(shared),
        })
    }

    fn start_board(shared: &Shared) -> Result<BoardDriver> {
        let mut driver = BoardDriver::open_with(
            shared.factory.as_ref(),
            Arc::clone(&shared.compiler),
            shared.config.clone(),
        )?;
        let sink: Arc<dyn BatchSink> = shared.fanout.clone();
        driver.start(sink)?;
        info!("Board stream started");
        Ok(driver)
    }

    /// Live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().map_or(0, |s| s.subscribers)
    }

    /// Board status while the stream is open
    pub fn status(&self) -> Option<BoardStatus> {
        let state = self.shared.lock().ok()?;
        state.driver.as_ref().map(BoardDriver::status)
    }
}

/// One subscriber's view of a [`BatchStream`]
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    generation: u64,
    receiver: Option<Receiver<BatchResult>>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Next batch, blocking; `None` once the stream is gone
    pub fn recv(&self) -> Option<BatchResult> {
        self.receiver.as_ref()?.recv().ok()
    }

    /// Next batch, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// `Timeout` when nothing arrived, `InvalidState` once the stream is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<BatchResult> {
        let rx = self
            .receiver
            .as_ref()
            .ok_or_else(|| RhythmError::invalid_state("unsubscribed"))?;
        rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => RhythmError::Timeout { reads: 1 },
            RecvTimeoutError::Disconnected => RhythmError::invalid_state("stream closed"),
        })
    }

    /// Blocking iterator over batches until the stream ends
    pub fn iter(&self) -> impl Iterator<Item = BatchResult> + '_ {
        std::iter::from_fn(move || self.recv())
    }

    /// Raw receiver, for `select!`
    pub fn receiver(&self) -> Option<&Receiver<BatchResult>> {
        self.receiver.as_ref()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Disconnect first so a producer blocked on this queue wakes up.
        drop(self.receiver.take());
        self.shared.fanout.remove(self.id);

        let Ok(mut state) = self.shared.lock() else {
            return;
        };
        if state.generation != self.generation {
            return;
        }
        state.subscribers = state.subscribers.saturating_sub(1);
        debug!("Subscriber {} left ({} remaining)", self.id, state.subscribers);
        if state.subscribers > 0 {
            return;
        }
        if let Some(driver) = state.driver.take() {
            match driver.close() {
                Ok(()) => info!("Board stream closed"),
                Err(e) => warn!("Closing board stream: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::{SimulatedBoard, SimulatedFactory};

    fn stream(board: SimulatedBoard, batch: usize) -> BatchStream {
        let config = BoardConfig::default().with_batch_size(batch).with_poll_limit(10_000);
        BatchStream::new(Arc::new(SimulatedFactory::new(board)), config)
    }

    #[test]
    fn test_fanout_drops_disconnected() {
        let fanout = Fanout::default();
        let (tx1, rx1) = bounded(4);
        let (tx2, rx2) = bounded(4);
        fanout.add(1, tx1);
        fanout.add(2, tx2);
        drop(rx2);
        let err: BatchResult = Err(Arc::new(RhythmError::invalid_state("x")));
        assert!(fanout.publish(err.clone()));
        assert!(rx1.try_recv().is_ok());
        drop(rx1);
        assert!(!fanout.publish(err));
    }

    #[test]
    fn test_fanout_close_disconnects_after_backlog() {
        let fanout = Fanout::default();
        let (tx, rx) = bounded(4);
        fanout.add(1, tx);
        assert!(fanout.publish(Err(Arc::new(RhythmError::invalid_state("x")))));
        fanout.close();
        assert!(rx.recv().unwrap().is_err());
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_refcount_opens_and_closes() {
        let s = stream(SimulatedBoard::new(), 64);
        assert!(s.status().is_none());
        let a = s.subscribe().unwrap();
        let b = s.subscribe().unwrap();
        assert_eq!(s.subscriber_count(), 2);
        assert!(s.status().is_some());
        drop(a);
        assert!(s.status().is_some());
        drop(b);
        assert_eq!(s.subscriber_count(), 0);
        assert!(s.status().is_none());
    }

    #[test]
    fn test_open_failure_leaves_no_subscription() {
        let s = BatchStream::new(Arc::new(SimulatedFactory::unavailable()), BoardConfig::default());
        assert!(matches!(s.subscribe(), Err(RhythmError::TransportUnavailable { .. })));
        assert_eq!(s.subscriber_count(), 0);
    }

    #[test]
    fn test_first_batch_arrives() {
        let s = stream(SimulatedBoard::new(), 16);
        let sub = s.subscribe().unwrap();
        assert!(sub.recv_timeout(Duration::from_secs(5)).unwrap().is_ok());
        drop(sub);
    }
}
