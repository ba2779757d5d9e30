//! Acquisition loop
//!
//! A dedicated worker thread owns the [`BoardSession`] while streaming. It
//! reads frames, decodes Rhythm samples into fixed-size batches, tracks the
//! board buffer fill level from memory-monitor frames and hands every
//! complete batch to a [`BatchSink`]. Stopping clears the running flag and
//! joins the worker, which stops the hardware and returns the session.
//!
//! The thread is spawned before the hardware is armed and parks until the
//! session is handed over, so a failed spawn never leaves a board running.

use crate::decoder::{FrameDecoder, SampleBatch};
use crate::error::{Result, RhythmError};
use crate::session::BoardSession;
use crate::transport::{Frame, FRAME_WAIT};
use crossbeam_channel::{bounded, Receiver, Sender};
use rhythm_gateware::devices::FrameSource;
use rhythm_gateware::regs;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Name of the acquisition thread.
pub const WORKER_NAME: &str = "rhythm-acquisition";

/// What subscribers receive: a batch, or the error that ended the stream
pub type BatchResult = std::result::Result<Arc<SampleBatch>, Arc<RhythmError>>;

/// Destination of assembled batches
pub trait BatchSink: Send + Sync {
    /// Deliver one item, blocking while receivers are full
    ///
    /// Returns `false` once nobody is listening.
    fn publish(&self, item: BatchResult) -> bool;

    /// The producer has finished; release every receiver
    fn close(&self);
}

/// Lifecycle of the acquisition loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// No worker
    Stopped,
    /// Hardware being armed
    Starting,
    /// Worker reading frames
    Running,
    /// Worker exiting, not yet joined
    Stopping,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Turns a frame sequence into fixed-size sample batches
#[derive(Debug)]
pub struct BatchAssembler {
    decoder: FrameDecoder,
    batch_size: usize,
    batch: SampleBatch,
    filled: usize,
    samples_seen: u64,
    memory_total: u32,
    fullness: f64,
}

impl BatchAssembler {
    /// Assembler for `streams` enabled streams
    ///
    /// `memory_total` is the board memory size in words, used to turn
    /// buffer-usage reports into a percentage.
    pub fn new(streams: usize, batch_size: usize, memory_total: u32) -> Self {
        let decoder = FrameDecoder::new(streams);
        Self {
            batch: decoder.new_batch(batch_size),
            decoder,
            batch_size,
            filled: 0,
            samples_seen: 0,
            memory_total,
            fullness: 0.0,
        }
    }

    /// Samples decoded so far
    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Last reported buffer fill level, percent
    pub fn fullness(&self) -> f64 {
        self.fullness
    }

    /// Feed one frame, returning a batch when it completes one
    ///
    /// # Errors
    ///
    /// `HeaderMismatch` (with `sample` counted from the start of the run) or
    /// `FrameLength` from the decoder.
    pub fn push(&mut self, frame: &Frame) -> Result<Option<SampleBatch>> {
        match FrameSource::from_device_id(frame.device) {
            FrameSource::MemoryMonitor => {
                if let Some(used) = frame.word_u32(regs::memory::FRAME_USED_WORD) {
                    self.fullness = percent_full(used, self.memory_total);
                    trace!("Board buffer {:.1}% full", self.fullness);
                }
                Ok(None)
            }
            FrameSource::Rhythm => self.push_sample(frame),
            FrameSource::Other(device) => {
                trace!("Ignoring frame from device {device:#06x}");
                Ok(None)
            }
        }
    }

    fn push_sample(&mut self, frame: &Frame) -> Result<Option<SampleBatch>> {
        let sample = self.samples_seen;
        self.decoder
            .decode_into(&frame.payload, &mut self.batch, self.filled)
            .map_err(|e| match e {
                RhythmError::HeaderMismatch { found, .. } => RhythmError::HeaderMismatch { found, sample },
                other => other,
            })?;
        self.filled += 1;
        self.samples_seen += 1;
        if self.filled < self.batch_size {
            return Ok(None);
        }
        self.filled = 0;
        let mut done = std::mem::replace(&mut self.batch, self.decoder.new_batch(self.batch_size));
        done.set_buffer_fullness(self.fullness);
        Ok(Some(done))
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent_full(used: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * f64::from(used) / f64::from(total)
}

/// How a worker run ended
#[derive(Debug, Default)]
pub struct AcquisitionReport {
    /// Samples decoded
    pub samples: u64,
    /// Batches published
    pub batches: u64,
    /// Error that ended the run, if any
    pub error: Option<Arc<RhythmError>>,
}

/// Arm the hardware for continuous acquisition
///
/// Configures the memory monitor for `batch_size` and starts a continuous
/// run with the sample counter reset. Returns the board memory size.
///
/// # Errors
///
/// Propagates register I/O errors.
pub fn arm(session: &mut BoardSession, batch_size: usize) -> Result<u32> {
    let total = session.configure_memory_monitor(batch_size)?;
    session.set_continuous_run_mode(true)?;
    session.run()?;
    Ok(total)
}

type Handoff = (BoardSession, BatchAssembler);

/// Acquisition worker thread
pub struct Acquisition {
    running: Arc<AtomicBool>,
    handoff: Option<Sender<Handoff>>,
    handle: Option<JoinHandle<Option<(BoardSession, AcquisitionReport)>>>,
}

impl fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquisition")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Acquisition {
    /// Spawn a worker that waits for [`begin`](Self::begin)
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the thread cannot be spawned.
    pub fn spawn(sink: Arc<dyn BatchSink>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let (handoff, parked) = bounded::<Handoff>(1);
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_string())
            .spawn(move || park(&parked, &flag, sink.as_ref()))
            .map_err(|e| RhythmError::invalid_state(format!("cannot spawn {WORKER_NAME}: {e}")))?;
        Ok(Self {
            running,
            handoff: Some(handoff),
            handle: Some(handle),
        })
    }

    /// Hand an armed session to the worker
    ///
    /// # Errors
    ///
    /// Gives the session back if the worker is gone or already has one.
    pub fn begin(&mut self, session: BoardSession, assembler: BatchAssembler) -> std::result::Result<(), BoardSession> {
        let Some(handoff) = self.handoff.take() else {
            return Err(session);
        };
        handoff.send((session, assembler)).map_err(|e| e.into_inner().0)?;
        info!("Acquisition started");
        Ok(())
    }

    /// Current state
    pub fn state(&self) -> AcquisitionState {
        match &self.handle {
            None => AcquisitionState::Stopped,
            Some(_) if self.handoff.is_some() => AcquisitionState::Starting,
            Some(_) if self.running.load(Ordering::Acquire) => AcquisitionState::Running,
            Some(_) => AcquisitionState::Stopping,
        }
    }

    /// Signal the worker, wait for it, and take the session back
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the worker was already joined, panicked or
    /// never received a session.
    pub fn stop(&mut self) -> Result<(BoardSession, AcquisitionReport)> {
        self.running.store(false, Ordering::Release);
        drop(self.handoff.take());
        let handle = self
            .handle
            .take()
            .ok_or_else(|| RhythmError::invalid_state("acquisition already stopped"))?;
        let (session, report) = handle
            .join()
            .map_err(|_| RhythmError::invalid_state(format!("{WORKER_NAME} panicked")))?
            .ok_or_else(|| RhythmError::invalid_state("acquisition never started"))?;
        info!("Acquisition stopped after {} samples", report.samples);
        Ok((session, report))
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        let parked = self.handoff.is_some();
        if let Err(e) = self.stop() {
            if !parked {
                warn!("Acquisition shutdown: {e}");
            }
        }
    }
}

fn park(
    parked: &Receiver<Handoff>,
    running: &AtomicBool,
    sink: &dyn BatchSink,
) -> Option<(BoardSession, AcquisitionReport)> {
    let Ok((session, assembler)) = parked.recv() else {
        debug!("Acquisition abandoned before start");
        return None;
    };
    Some(worker(session, assembler, running, sink))
}

fn worker(
    mut session: BoardSession,
    mut assembler: BatchAssembler,
    running: &AtomicBool,
    sink: &dyn BatchSink,
) -> (BoardSession, AcquisitionReport) {
    let mut report = AcquisitionReport::default();
    let outcome = frame_loop(&mut session, &mut assembler, running, sink, &mut report);
    running.store(false, Ordering::Release);
    report.samples = assembler.samples_seen();

    if let Err(e) = outcome {
        warn!("Acquisition ended: {e}");
        let e = Arc::new(e);
        report.error = Some(Arc::clone(&e));
        sink.publish(Err(e));
    }
    sink.close();
    if let Err(e) = session.stop() {
        warn!("Hardware stop failed: {e}");
    }
    (session, report)
}

fn frame_loop(
    session: &mut BoardSession,
    assembler: &mut BatchAssembler,
    running: &AtomicBool,
    sink: &dyn BatchSink,
    report: &mut AcquisitionReport,
) -> Result<()> {
    while running.load(Ordering::Acquire) {
        let Some(frame) = session.read_frame(FRAME_WAIT)? else {
            continue;
        };
        if let Some(batch) = assembler.push(&frame)? {
            report.batches += 1;
            if !sink.publish(Ok(Arc::new(batch))) {
                debug!("No receivers left, leaving frame loop");
                break;
            }
        }
    }
    Ok(())
}
