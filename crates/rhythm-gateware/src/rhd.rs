//! RHD2000 amplifier chips as seen from the board.
//!
//! Chips hang off the four SPI ports (A–D). Each port carries two MISO lines,
//! giving eight *chip positions*. A dual-die RHD2164 additionally delivers its
//! second die on the DDR edge of the same line, which the gateware exposes as
//! a separate data source (`PortA1Ddr` … `PortD2Ddr`).
//!
//! Identification reads the chip's ROM through aux command slot 2. The probe
//! list places the ROM results at fixed sample indices; the board link delays
//! everything by one sample, so the decoder must look one sample later.

use std::fmt;

// ── Chip ids ─────────────────────────────────────────────────────────────────

/// Chip ids stored in ROM register 63.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipKind {
    /// 32 amplifiers, one stream.
    Rhd2132,
    /// 16 differential amplifiers, one stream.
    Rhd2216,
    /// 64 amplifiers on two dies, two streams.
    Rhd2164,
}

impl ChipKind {
    /// Decode a chip id. Unknown ids yield `None`.
    #[must_use]
    pub const fn from_id(id: u16) -> Option<Self> {
        match id {
            1 => Some(Self::Rhd2132),
            2 => Some(Self::Rhd2216),
            4 => Some(Self::Rhd2164),
            _ => None,
        }
    }

    /// ROM chip id.
    #[must_use]
    pub const fn id(self) -> u16 {
        match self {
            Self::Rhd2132 => 1,
            Self::Rhd2216 => 2,
            Self::Rhd2164 => 4,
        }
    }

    /// Data streams the chip occupies.
    #[must_use]
    pub const fn streams(self) -> usize {
        match self {
            Self::Rhd2132 | Self::Rhd2216 => 1,
            Self::Rhd2164 => 2,
        }
    }

    /// Amplifier channels actually wired on the chip.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Rhd2132 => 32,
            Self::Rhd2216 => 16,
            Self::Rhd2164 => 64,
        }
    }
}

impl fmt::Display for ChipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rhd2132 => write!(f, "RHD2132"),
            Self::Rhd2216 => write!(f, "RHD2216"),
            Self::Rhd2164 => write!(f, "RHD2164"),
        }
    }
}

// ── Ports and data sources ───────────────────────────────────────────────────

/// SPI port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    /// Port A.
    A,
    /// Port B.
    B,
    /// Port C.
    C,
    /// Port D.
    D,
}

impl Port {
    /// Every port in register order.
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Zero-based index (A = 0).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Port from a zero-based index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::A),
            1 => Some(Self::B),
            2 => Some(Self::C),
            3 => Some(Self::D),
            _ => None,
        }
    }

    /// Bit position of this port's nibble in per-port registers.
    #[must_use]
    pub const fn nibble_shift(self) -> u32 {
        4 * self as u32
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        };
        write!(f, "{c}")
    }
}

/// Gateware data source code, as written into the stream select registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum DataSource {
    PortA1 = 0,
    PortA2 = 1,
    PortB1 = 2,
    PortB2 = 3,
    PortC1 = 4,
    PortC2 = 5,
    PortD1 = 6,
    PortD2 = 7,
    PortA1Ddr = 8,
    PortA2Ddr = 9,
    PortB1Ddr = 10,
    PortB2Ddr = 11,
    PortC1Ddr = 12,
    PortC2Ddr = 13,
    PortD1Ddr = 14,
    PortD2Ddr = 15,
}

impl DataSource {
    /// All sources in code order.
    pub const ALL: [Self; 16] = [
        Self::PortA1,
        Self::PortA2,
        Self::PortB1,
        Self::PortB2,
        Self::PortC1,
        Self::PortC2,
        Self::PortD1,
        Self::PortD2,
        Self::PortA1Ddr,
        Self::PortA2Ddr,
        Self::PortB1Ddr,
        Self::PortB2Ddr,
        Self::PortC1Ddr,
        Self::PortC2Ddr,
        Self::PortD1Ddr,
        Self::PortD2Ddr,
    ];

    /// Source from its 4-bit code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        if (code as usize) < Self::ALL.len() {
            Some(Self::ALL[code as usize])
        } else {
            None
        }
    }

    /// 4-bit register code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Source of chip position `position` (0..8, A1 A2 B1 …).
    #[must_use]
    pub const fn for_position(position: usize) -> Option<Self> {
        if position < crate::CHIP_POSITIONS {
            Some(Self::ALL[position])
        } else {
            None
        }
    }

    /// Chip position 0..8 this source belongs to (DDR twins map to their line).
    #[must_use]
    pub const fn position(self) -> usize {
        (self as usize) % crate::CHIP_POSITIONS
    }

    /// Port carrying this source.
    #[must_use]
    pub const fn port(self) -> Port {
        match self.position() / 2 {
            0 => Port::A,
            1 => Port::B,
            2 => Port::C,
            _ => Port::D,
        }
    }

    /// Whether this is the DDR (second die) source.
    #[must_use]
    pub const fn is_ddr(self) -> bool {
        (self as usize) >= crate::CHIP_POSITIONS
    }

    /// Second-die twin of a primary source. DDR sources return themselves.
    #[must_use]
    pub const fn ddr_twin(self) -> Self {
        if self.is_ddr() {
            self
        } else {
            Self::ALL[self as usize + crate::CHIP_POSITIONS]
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let half = self.position() % 2 + 1;
        let ddr = if self.is_ddr() { "Ddr" } else { "" };
        write!(f, "{}{half}{ddr}", self.port())
    }
}

/// Source map programmed at bring-up: A1 B1 C1 D1 A2 B2 C2 D2, twice.
pub const DEFAULT_SOURCE_MAP: [DataSource; crate::MAX_STREAMS] = [
    DataSource::PortA1,
    DataSource::PortB1,
    DataSource::PortC1,
    DataSource::PortD1,
    DataSource::PortA2,
    DataSource::PortB2,
    DataSource::PortC2,
    DataSource::PortD2,
    DataSource::PortA1,
    DataSource::PortB1,
    DataSource::PortC1,
    DataSource::PortD1,
    DataSource::PortA2,
    DataSource::PortB2,
    DataSource::PortC2,
    DataSource::PortD2,
];

// ── ROM signature ────────────────────────────────────────────────────────────

/// Aux command slot that runs the ROM probe.
pub const AUX_ROM_SLOT: usize = 2;

/// Extra sample delay introduced by the board link.
pub const ROM_SAMPLE_SHIFT: usize = 1;

/// The RHD2000 returns the result of command `n` while clocking in `n + 2`.
pub const SPI_PIPELINE_DEPTH: usize = 2;

/// Probe sample holding ROM register 63 (chip id).
pub const CHIP_ID_SAMPLE: usize = 19;

/// Probe sample holding ROM register 59 (MISO status).
pub const MISO_STATUS_SAMPLE: usize = 23;

/// Probe samples holding "RHD".
pub const RHD_SAMPLES: [usize; 3] = [24, 25, 26];

/// Probe samples holding "INTAN".
pub const INTAN_SAMPLES: [usize; 5] = [32, 33, 34, 35, 36];

/// Expected ASCII at [`RHD_SAMPLES`].
pub const RHD_SIGNATURE: &[u8; 3] = b"RHD";

/// Expected ASCII at [`INTAN_SAMPLES`].
pub const INTAN_SIGNATURE: &[u8; 5] = b"INTAN";

/// ROM registers read by the probe, paired with the probe sample they land at.
pub const ROM_PROBE: [(u8, usize); 10] = [
    (63, CHIP_ID_SAMPLE),
    (59, MISO_STATUS_SAMPLE),
    (48, 24),
    (49, 25),
    (50, 26),
    (40, 32),
    (41, 33),
    (42, 34),
    (43, 35),
    (44, 36),
];

/// ROM register contents of a chip, for simulation and tests.
#[must_use]
pub fn rom_register(kind: ChipKind, register: u8) -> u16 {
    match register {
        40..=44 => u16::from(INTAN_SIGNATURE[usize::from(register - 40)]),
        48..=50 => u16::from(RHD_SIGNATURE[usize::from(register - 48)]),
        59 => 0,
        63 => kind.id(),
        _ => 0,
    }
}

// ── RHD2000 SPI commands ─────────────────────────────────────────────────────

/// RHD2000 SPI command words.
pub mod command {
    /// `CONVERT(channel)`: sample one amplifier.
    #[must_use]
    pub const fn convert(channel: u8) -> u16 {
        ((channel & 0x3F) as u16) << 8
    }

    /// `CALIBRATE`: start ADC self-calibration.
    pub const CALIBRATE: u16 = 0x5500;

    /// `CLEAR`: clear ADC calibration.
    pub const CLEAR: u16 = 0x6A00;

    /// `WRITE(register, data)`.
    #[must_use]
    pub const fn write(register: u8, data: u8) -> u16 {
        0x8000 | (((register & 0x3F) as u16) << 8) | data as u16
    }

    /// `READ(register)`.
    #[must_use]
    pub const fn read(register: u8) -> u16 {
        0xC000 | (((register & 0x3F) as u16) << 8)
    }

    /// Register addressed by a READ command, if `word` is one.
    #[must_use]
    pub const fn read_target(word: u16) -> Option<u8> {
        if word & 0xC000 == 0xC000 {
            Some(((word >> 8) & 0x3F) as u8)
        } else {
            None
        }
    }
}
