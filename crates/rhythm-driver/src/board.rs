//! Board driver
//!
//! Composes the pieces into the board lifecycle:
//!
//! ```text
//! open ──▶ Open ──calibrate──▶ Calibrated ──start──▶ Streaming
//!            ▲                     ▲                    │
//!            └── configure(rate) ──┴────── stop ◀───────┘
//! ```
//!
//! Configuration and direct register access are refused while streaming,
//! because the session lives on the acquisition thread.

use crate::acquisition::{self, Acquisition, AcquisitionReport, AcquisitionState, BatchAssembler, BatchSink};
use crate::calibration::{self, CalibrationResult};
use crate::commands::{CommandCompiler, StaticCommandCompiler};
use crate::config::BoardConfig;
use crate::error::{Result, RhythmError};
use crate::session::BoardSession;
use crate::transport::{TransportFactory, TransportKind};
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::rhd::{ChipKind, DataSource};
use rhythm_gateware::PORT_COUNT;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Initialised, not calibrated
    Open,
    /// Chips discovered, streams allocated
    Calibrated,
    /// Acquisition thread owns the session
    Streaming,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Calibrated => write!(f, "calibrated"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Snapshot of the board
#[derive(Debug, Clone, PartialEq)]
pub struct BoardStatus {
    /// Lifecycle state
    pub state: DriverState,
    /// Acquisition loop state
    pub acquisition: AcquisitionState,
    /// Transport in use
    pub transport: TransportKind,
    /// Gateware version word read at open
    pub gateware_version: u32,
    /// Acquisition sample rate
    pub sample_rate: SampleRate,
    /// Enabled streams after calibration
    pub enabled_streams: usize,
    /// Programmed per-port delays, once calibrated
    pub cable_delays: Option<[u8; PORT_COUNT]>,
    /// Detected chips
    pub chips: Vec<(DataSource, ChipKind)>,
}

/// One opened board
#[derive(Debug)]
pub struct BoardDriver {
    config: BoardConfig,
    compiler: Arc<dyn CommandCompiler>,
    session: Option<BoardSession>,
    acquisition: Option<Acquisition>,
    calibration: Option<CalibrationResult>,
    transport: TransportKind,
    gateware_version: u32,
}

impl BoardDriver {
    /// Open board `config.board_index` with the built-in command compiler
    ///
    /// # Errors
    ///
    /// `ArgumentOutOfRange` for a bad configuration, `TransportUnavailable`
    /// when the board cannot be opened, or register I/O errors during
    /// bring-up.
    pub fn open(factory: &dyn TransportFactory, config: BoardConfig) -> Result<Self> {
        Self::open_with(factory, Arc::new(StaticCommandCompiler), config)
    }

    /// Open with a custom [`CommandCompiler`]
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with(
        factory: &dyn TransportFactory,
        compiler: Arc<dyn CommandCompiler>,
        config: BoardConfig,
    ) -> Result<Self> {
        config.validate()?;
        let transport = factory.open(config.board_index)?;
        let kind = transport.kind();
        let mut session = BoardSession::new(transport, config.poll_limit);
        session.initialize()?;
        session.set_leds(config.leds)?;
        let gateware_version = session.gateware_version()?;
        info!(
            "Opened board {} over {kind} transport, gateware {gateware_version:#010x}",
            config.board_index
        );
        Ok(Self {
            config,
            compiler,
            session: Some(session),
            acquisition: None,
            calibration: None,
            transport: kind,
            gateware_version,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        if self.acquisition.is_some() {
            DriverState::Streaming
        } else if self.calibration.is_some() {
            DriverState::Calibrated
        } else {
            DriverState::Open
        }
    }

    /// Active configuration
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// Last calibration outcome
    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.calibration.as_ref()
    }

    fn idle_session(&mut self) -> Result<&mut BoardSession> {
        if self.acquisition.is_some() {
            return Err(RhythmError::invalid_state(DriverState::Streaming.to_string()));
        }
        self.session
            .as_mut()
            .ok_or_else(|| RhythmError::invalid_state("closed"))
    }

    /// Register-level access while not streaming
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while streaming.
    pub fn session_mut(&mut self) -> Result<&mut BoardSession> {
        self.idle_session()
    }

    /// Replace the configuration
    ///
    /// A new sample rate, amplifier setting or delay override invalidates the
    /// calibration; the next [`start`](Self::start) recalibrates.
    ///
    /// # Errors
    ///
    /// `InvalidState` while streaming, `ArgumentOutOfRange` for a bad config.
    pub fn configure(&mut self, config: BoardConfig) -> Result<()> {
        self.idle_session()?;
        config.validate()?;
        if config.board_index != self.config.board_index {
            return Err(RhythmError::invalid_state("board index is fixed once open"));
        }
        let recalibrate = config.sample_rate != self.config.sample_rate
            || config.amplifier != self.config.amplifier
            || config.cable_delay_overrides != self.config.cable_delay_overrides
            || config.fast_settle != self.config.fast_settle;
        let session = self.idle_session()?;
        session.set_leds(config.leds)?;
        if recalibrate && self.calibration.take().is_some() {
            info!("Configuration changed, calibration discarded");
        }
        self.config = config;
        Ok(())
    }

    /// Discover chips and program delays and streams
    ///
    /// # Errors
    ///
    /// `InvalidState` while streaming, `CapacityExceeded` for too many chips,
    /// or link failures.
    pub fn calibrate(&mut self) -> Result<&CalibrationResult> {
        let compiler = Arc::clone(&self.compiler);
        let config = self.config.clone();
        let session = self.idle_session()?;
        let result = calibration::run(session, compiler.as_ref(), &config)?;
        Ok(self.calibration.insert(result))
    }

    /// Start streaming batches into `sink`, calibrating first if needed
    ///
    /// # Errors
    ///
    /// `InvalidState` when already streaming, or any calibration or register
    /// error.
    pub fn start(&mut self, sink: Arc<dyn BatchSink>) -> Result<()> {
        self.idle_session()?;
        if self.calibration.is_none() {
            self.calibrate()?;
        }
        let batch_size = self.config.batch_size;
        let mut acquisition = Acquisition::spawn(sink)?;
        let mut session = self
            .session
            .take()
            .ok_or_else(|| RhythmError::invalid_state("closed"))?;
        let total = match acquisition::arm(&mut session, batch_size) {
            Ok(total) => total,
            Err(e) => {
                self.session = Some(session);
                return Err(e);
            }
        };
        let assembler = BatchAssembler::new(session.enabled_stream_count(), batch_size, total);
        info!(
            "Streaming {} streams at {}, {batch_size} samples per batch",
            session.enabled_stream_count(),
            session.sample_rate()
        );
        if let Err(mut session) = acquisition.begin(session, assembler) {
            if let Err(e) = session.stop() {
                warn!("Hardware stop failed: {e}");
            }
            self.session = Some(session);
            return Err(RhythmError::invalid_state("acquisition worker exited before start"));
        }
        self.acquisition = Some(acquisition);
        Ok(())
    }

    /// Stop streaming and take the session back
    ///
    /// # Errors
    ///
    /// `InvalidState` when not streaming or if the worker panicked.
    pub fn stop(&mut self) -> Result<AcquisitionReport> {
        let mut acquisition = self
            .acquisition
            .take()
            .ok_or_else(|| RhythmError::invalid_state(self.state().to_string()))?;
        let (session, report) = acquisition.stop()?;
        self.session = Some(session);
        Ok(report)
    }

    /// Acquisition loop state
    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition
            .as_ref()
            .map_or(AcquisitionState::Stopped, Acquisition::state)
    }

    /// Snapshot of the board
    pub fn status(&self) -> BoardStatus {
        let (sample_rate, enabled_streams) = self.session.as_ref().map_or_else(
            || {
                let streams = self.calibration.as_ref().map_or(0, |c| c.allocation.stream_count());
                (self.config.sample_rate, streams)
            },
            |s| (s.sample_rate(), s.enabled_stream_count()),
        );
        let calibration = self.calibration.as_ref();
        BoardStatus {
            state: self.state(),
            acquisition: self.acquisition_state(),
            transport: self.transport,
            gateware_version: self.gateware_version,
            sample_rate,
            enabled_streams,
            cable_delays: calibration.map(|c| c.ports.map(|p| p.delay)),
            chips: calibration.map(|c| c.chips().collect()).unwrap_or_default(),
        }
    }

    /// Stop if streaming and release the transport
    ///
    /// # Errors
    ///
    /// Propagates the stop or close failure.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.acquisition.is_some() {
            self.stop()?;
        }
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

impl Drop for BoardDriver {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Closing board {}: {e}", self.config.board_index);
        }
    }
}
