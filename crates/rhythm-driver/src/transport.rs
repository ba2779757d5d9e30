//! Link abstraction between the driver and the board
//!
//! The board is reached over an ONI-style context: addressed 32-bit registers,
//! raw data writes to output devices, and a queue of device-tagged frames.
//! Everything above this module talks to a `Transport` and never to USB.

use crate::error::Result;
use bytes::Bytes;
use std::fmt::Debug;
use std::time::Duration;

/// How long frame readers wait before re-checking for cancellation.
pub const FRAME_WAIT: Duration = Duration::from_millis(10);

/// One frame read from the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Device that produced the frame
    pub device: u16,
    /// Raw payload, little-endian
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(device: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            device,
            payload: payload.into(),
        }
    }

    /// Payload as 16-bit little-endian words
    pub fn words_u16(&self) -> impl Iterator<Item = u16> + '_ {
        self.payload
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
    }

    /// 32-bit little-endian word `index` of the payload, if present
    pub fn word_u32(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(4)?;
        let bytes = self.payload.get(start..start.checked_add(4)?)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Board link - register access plus a frame queue
///
/// Implementations are owned by exactly one thread at a time; the driver
/// moves the transport into its acquisition worker while streaming.
pub trait Transport: Debug + Send {
    /// Read a 32-bit register
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the link fails.
    fn read_register(&mut self, device: u16, offset: u16) -> Result<u32>;

    /// Write a 32-bit register. The board sends no acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the link fails.
    fn write_register(&mut self, device: u16, offset: u16, value: u32) -> Result<()>;

    /// Write raw words to an output device (TTL lines, manual DAC)
    ///
    /// # Errors
    ///
    /// Returns `RegisterIo` if the link fails.
    fn write_data(&mut self, device: u16, words: &[u32]) -> Result<()>;

    /// Next frame, blocking for at most `timeout`
    ///
    /// Returns `None` if nothing arrived in time. A zero timeout never blocks.
    ///
    /// # Errors
    ///
    /// Returns error if the link fails.
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Start acquisition, optionally resetting the sample counter
    ///
    /// # Errors
    ///
    /// Returns error if the link refuses to start.
    fn start(&mut self, reset_counters: bool) -> Result<()>;

    /// Stop acquisition and drop queued frames
    ///
    /// # Errors
    ///
    /// Returns error if the link fails.
    fn stop(&mut self) -> Result<()>;

    /// Re-read the device table after a frame size change
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be re-established.
    fn reset(&mut self) -> Result<()>;

    /// Release the link. Further calls fail.
    ///
    /// # Errors
    ///
    /// Returns error if the link reports a failure while closing.
    fn close(&mut self) -> Result<()>;

    /// Transport kind for logs
    fn kind(&self) -> TransportKind;
}

/// Opens transports by board index
pub trait TransportFactory: Debug + Send + Sync {
    /// Open board `index`
    ///
    /// # Errors
    ///
    /// Returns `TransportUnavailable` if the board cannot be opened.
    fn open(&self, index: u32) -> Result<Box<dyn Transport>>;
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// FT600 USB 3 link
    Usb,

    /// In-process gateware model - no hardware required
    Simulated,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usb => write!(f, "USB (FT600)"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_word_views() {
        let f = Frame::new(0x0001, vec![1, 0, 2, 0, 0x34, 0x12, 0, 0, 9, 0, 0, 0]);
        let words: Vec<u16> = f.words_u16().collect();
        assert_eq!(words, vec![1, 2, 0x1234, 0, 9, 0]);
        assert_eq!(f.word_u32(1), Some(0x1234));
        assert_eq!(f.word_u32(2), Some(9));
        assert_eq!(f.word_u32(3), None);
        assert_eq!(f.word_u32(usize::MAX), None);
    }
}
