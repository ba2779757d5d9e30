//! Driver for the Rhythm FPGA neural acquisition board.
//!
//! Speaks the board's register protocol, finds the RHD2000 amplifier chips on
//! the four SPI ports, decodes the binary sample frames and broadcasts
//! fixed-size sample batches to any number of subscribers.
//!
//! # Layers
//!
//! ```text
//! BatchStream      ref-counted broadcast, first subscriber opens the board
//!   BoardDriver    open → calibrate → stream lifecycle
//!     Acquisition  worker thread: frames → SampleBatch
//!     calibration  delay sweep, ROM signature, stream allocation
//!     BoardSession typed register operations
//!       RegisterBus     read / write / masked write / busy poll
//!         Transport     link to the board (USB or SimulatedBoard)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use rhythm_driver::prelude::*;
//! use rhythm_driver::backends::{SimulatedBoard, SimulatedFactory};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let factory = Arc::new(SimulatedFactory::new(SimulatedBoard::new()));
//! let stream = BatchStream::new(factory, BoardConfig::default().with_batch_size(256));
//!
//! let sub = stream.subscribe()?;
//! for item in sub.iter().take(10) {
//!     let batch = item.map_err(|e| RhythmError::invalid_state(e.to_string()))?;
//!     println!("{} samples, buffer {:.1}% full", batch.len(), batch.buffer_fullness());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod acquisition;
pub mod backends;
mod board;
mod bus;
pub mod calibration;
pub mod commands;
mod config;
mod dac;
mod decoder;
mod error;
mod session;
mod stream;
mod transport;

pub use acquisition::{Acquisition, AcquisitionReport, AcquisitionState, BatchAssembler, BatchResult, BatchSink};
pub use board::{BoardDriver, BoardStatus, DriverState};
pub use bus::RegisterBus;
pub use calibration::{CalibrationResult, DelayTracker, PortCalibration, PositionReport, StreamAllocation};
pub use commands::{AuxSlot, CommandCompiler, CommandList, RegisterConfigMode, StaticCommandCompiler};
pub use config::{AmplifierSettings, BoardConfig, ENV_BATCH_SIZE, ENV_BOARD_INDEX, MAX_BATCH_SIZE};
pub use dac::{highpass_coefficient, pack_ttl_lines, DAC_COUNT, MAX_DAC_STREAM};
pub use decoder::{FrameDecoder, SampleBatch};
pub use error::{Result, RhythmError};
pub use session::{BoardSession, StreamMap, StreamSlot, DEFAULT_CABLE_FEET};
pub use stream::{BatchStream, Subscription};
pub use transport::{Frame, Transport, TransportFactory, TransportKind};

/// Gateware model (re-exported from rhythm-gateware).
pub use rhythm_gateware as gateware;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BatchStream, BoardConfig, BoardDriver, BoardSession, CalibrationResult, Frame, Result,
        RhythmError, SampleBatch, Subscription, Transport, TransportFactory,
    };
    pub use rhythm_gateware::rate::SampleRate;
    pub use rhythm_gateware::rhd::{ChipKind, DataSource, Port};
}
