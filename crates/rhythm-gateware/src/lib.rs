//! Gateware model for the Rhythm neural acquisition board.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what lives on the FPGA and at the end of the headstage
//! cables: device addresses, register offsets, the per-sample frame layout,
//! RHD2000 chip identification, the sample-rate clock table and the cable
//! propagation model used to pick MISO sampling delays.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`devices`] | Device ids on the link (Rhythm core, TTL, DAC, memory monitor, hub) |
//! | [`regs`] | Register offsets, bit fields and the symbolic name → offset maps |
//! | [`frame`] | Rhythm sample frame layout and the 64-bit header magic |
//! | [`rhd`] | RHD2000 chip ids, ports, data sources and the ROM signature |
//! | [`rate`] | The 15 supported per-channel sample rates and their clock words |
//! | [`timing`] | Cable length ↔ MISO delay model |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod devices;
pub mod frame;
pub mod rate;
pub mod regs;
pub mod rhd;
pub mod timing;

/// Maximum number of hardware data streams the gateware can interleave.
pub const MAX_STREAMS: usize = 16;

/// Amplifier channels carried by one data stream.
pub const CHANNELS_PER_STREAM: usize = 32;

/// Largest channel count the board can deliver (16 streams × 32 channels).
pub const MAX_CHANNELS: usize = MAX_STREAMS * CHANNELS_PER_STREAM;

/// Number of SPI ports (A–D) on the board.
pub const PORT_COUNT: usize = 4;

/// Chip positions probed during discovery (two per port).
pub const CHIP_POSITIONS: usize = 2 * PORT_COUNT;
