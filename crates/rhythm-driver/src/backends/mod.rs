//! Transport implementations
//!
//! Only the simulated board lives in this crate. A USB transport plugs in
//! through [`crate::TransportFactory`] without touching anything above the
//! transport layer.

pub mod simulated;

pub use simulated::{SimulatedBoard, SimulatedChip, SimulatedFactory};
