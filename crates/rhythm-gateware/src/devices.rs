//! Device addresses on the acquisition link.
//!
//! Every register and every streamed frame is tagged with a 16-bit device id.
//! The values below are fixed by the gateware image and must match it
//! bit-for-bit.

/// Rhythm SPI core: amplifier control registers and sample frames.
pub const RHYTHM: u16 = 0x0101;

/// Digital TTL output block (also carries the manual DAC words).
pub const TTL: u16 = 0x0102;

/// Analog DAC block.
pub const DAC: u16 = 0x0103;

/// Hardware buffer usage monitor. Emits periodic frames with the number of
/// words currently queued in board memory.
pub const MEMORY_MONITOR: u16 = 0x0001;

/// Hub manager. Owns the sample clock PLL selection.
pub const HUB_MANAGER: u16 = 0x01FE;

/// Gateware information block (version words).
pub const GATEWARE_INFO: u16 = 0x00FE;

/// All device ids the driver addresses, in link order.
pub const ALL: &[u16] = &[MEMORY_MONITOR, GATEWARE_INFO, RHYTHM, TTL, DAC, HUB_MANAGER];

/// Frame-producing device kinds, identified from a frame's device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSource {
    /// One interleaved amplifier sample from the Rhythm core.
    Rhythm,
    /// A buffer-usage report from the memory monitor.
    MemoryMonitor,
    /// Anything else on the link. Ignored by the acquisition loop.
    Other(u16),
}

impl FrameSource {
    /// Classify a frame by its device id.
    #[must_use]
    pub const fn from_device_id(id: u16) -> Self {
        match id {
            RHYTHM => Self::Rhythm,
            MEMORY_MONITOR => Self::MemoryMonitor,
            other => Self::Other(other),
        }
    }
}

/// Human-readable name of a device id, for logs and the CLI.
#[must_use]
pub const fn name(id: u16) -> &'static str {
    match id {
        RHYTHM => "rhythm",
        TTL => "ttl",
        DAC => "dac",
        MEMORY_MONITOR => "memory-monitor",
        HUB_MANAGER => "hub-manager",
        GATEWARE_INFO => "gateware-info",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_source_classification() {
        assert_eq!(FrameSource::from_device_id(0x0101), FrameSource::Rhythm);
        assert_eq!(FrameSource::from_device_id(0x0001), FrameSource::MemoryMonitor);
        assert_eq!(FrameSource::from_device_id(0x0102), FrameSource::Other(0x0102));
    }

    #[test]
    fn device_ids_are_distinct() {
        for (i, a) in ALL.iter().enumerate() {
            for b in &ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
