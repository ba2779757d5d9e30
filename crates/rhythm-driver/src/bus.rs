//! Addressed register access over a transport
//!
//! Adds the two idioms the gateware needs on top of plain reads and writes:
//! masked read-modify-write for packed fields, and busy-polling of status
//! registers. Neither is atomic on the wire; the bus assumes it is the only
//! writer, which holds because it is owned by a single session.

use crate::error::{RhythmError, Result};
use crate::transport::{Frame, Transport, TransportKind};
use std::time::Duration;
use tracing::trace;

/// Register bus owning the board transport
#[derive(Debug)]
pub struct RegisterBus {
    transport: Box<dyn Transport>,
}

impl RegisterBus {
    /// Wrap an open transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Read a register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on link failure.
    pub fn read(&mut self, device: u16, offset: u16) -> Result<u32> {
        let value = self.transport.read_register(device, offset)?;
        trace!("rd {device:#06x}:{offset:#06x} -> {value:#010x}");
        Ok(value)
    }

    /// Write a register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on link failure.
    pub fn write(&mut self, device: u16, offset: u16, value: u32) -> Result<()> {
        trace!("wr {device:#06x}:{offset:#06x} <- {value:#010x}");
        self.transport.write_register(device, offset, value)
    }

    /// Replace only the bits selected by `mask`
    ///
    /// Reads the current value and writes `(current & !mask) | (value & mask)`.
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on link failure.
    pub fn write_masked(&mut self, device: u16, offset: u16, value: u32, mask: u32) -> Result<()> {
        let current = self.read(device, offset)?;
        self.write(device, offset, (current & !mask) | (value & mask))
    }

    /// Read until `register & mask == 0`
    ///
    /// `limit = None` polls without bound. Returns the number of reads made.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` once `limit` reads all saw busy bits, or `RegisterIo`.
    pub fn poll_until_clear(
        &mut self,
        device: u16,
        offset: u16,
        mask: u32,
        limit: Option<u32>,
    ) -> Result<u32> {
        let mut reads = 0u32;
        loop {
            if limit.is_some_and(|max| reads >= max) {
                return Err(RhythmError::Timeout { reads });
            }
            let value = self.transport.read_register(device, offset)?;
            reads = reads.saturating_add(1);
            if value & mask == 0 {
                trace!("{device:#06x}:{offset:#06x} clear after {reads} reads");
                return Ok(reads);
            }
            std::thread::yield_now();
        }
    }

    /// Write raw words to an output device
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` on link failure.
    pub fn write_data(&mut self, device: u16, words: &[u32]) -> Result<()> {
        trace!("data {device:#06x} <- {} words", words.len());
        self.transport.write_data(device, words)
    }

    /// Next frame from the link
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        self.transport.read_frame(timeout)
    }

    /// Direct access to the transport for run control
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Kind of the underlying transport
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Give the transport back
    pub fn into_transport(self) -> Box<dyn Transport> {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::SimulatedBoard;
    use rhythm_gateware::{devices, regs};

    fn bus() -> RegisterBus {
        RegisterBus::new(Box::new(SimulatedBoard::new()))
    }

    #[test]
    fn masked_write_keeps_other_bits() {
        let mut bus = bus();
        bus.write(devices::RHYTHM, regs::rhythm::DAC_CTL, 0xFFFF_0000).unwrap();
        bus.write_masked(devices::RHYTHM, regs::rhythm::DAC_CTL, 0x0000_00AB, 0x0000_00FF)
            .unwrap();
        assert_eq!(bus.read(devices::RHYTHM, regs::rhythm::DAC_CTL).unwrap(), 0xFFFF_00AB);
    }

    #[test]
    fn bounded_poll_times_out() {
        let mut bus = bus();
        // Register 1 on the TTL block never clears in the model.
        bus.write(devices::TTL, 1, 1).unwrap();
        let err = bus.poll_until_clear(devices::TTL, 1, 1, Some(5)).unwrap_err();
        assert!(matches!(err, RhythmError::Timeout { reads: 5 }));
    }

    #[test]
    fn poll_returns_when_clear() {
        let mut bus = bus();
        let reads = bus
            .poll_until_clear(devices::HUB_MANAGER, regs::hub::CLOCK_BUSY, u32::MAX, None)
            .unwrap();
        assert_eq!(reads, 1);
    }
}
