//! Register map for the Rhythm gateware.
//!
//! Offsets are per device (see [`crate::devices`]). The Rhythm core exposes a
//! flat bank of 41 control registers followed by the auxiliary command RAM at
//! `0x4000`. Several registers pack four 4-bit per-port fields (bank select,
//! cable delay) or eight 4-bit per-stream fields (data source select).
//!
//! ```text
//! device  offset   register
//! 0x0101  0..=40   Rhythm control (ENABLE … SPI_RUNNING)
//! 0x0101  0x4000+  aux command RAM: base | bank << 10 | slot << 14 | index
//! 0x01FE  0x2000   hub clock select   (divider << 3 | clock << 1 | divide_en)
//! 0x01FE  0x2001   hub clock busy     (non-zero while the PLL switches)
//! 0x0001  0..=3    memory monitor (ENABLE, CLK_DIV, CLK_HZ, TOTAL_MEM)
//! 0x00FE  2        gateware version
//! ```

use crate::devices;

// ── Rhythm core ──────────────────────────────────────────────────────────────

/// Rhythm core register offsets (device [`devices::RHYTHM`]).
pub mod rhythm {
    /// Core enable.
    pub const ENABLE: u16 = 0;
    /// Mode bits, see [`super::mode`].
    pub const MODE: u16 = 1;
    /// Sample count after which a bounded run stops.
    pub const MAX_TIMESTEP: u16 = 2;
    /// Four 4-bit MISO sampling delays, port A in bits 0..4.
    pub const CABLE_DELAY: u16 = 3;
    /// Bank select for AuxCmd1, four 4-bit per-port fields.
    pub const AUXCMD_BANK_1: u16 = 4;
    /// Bank select for AuxCmd2.
    pub const AUXCMD_BANK_2: u16 = 5;
    /// Bank select for AuxCmd3.
    pub const AUXCMD_BANK_3: u16 = 6;
    /// Last command index for AuxCmd1.
    pub const MAX_AUXCMD_INDEX_1: u16 = 7;
    /// Last command index for AuxCmd2.
    pub const MAX_AUXCMD_INDEX_2: u16 = 8;
    /// Last command index for AuxCmd3.
    pub const MAX_AUXCMD_INDEX_3: u16 = 9;
    /// Loop-back index for AuxCmd1.
    pub const LOOP_AUXCMD_INDEX_1: u16 = 10;
    /// Loop-back index for AuxCmd2.
    pub const LOOP_AUXCMD_INDEX_2: u16 = 11;
    /// Loop-back index for AuxCmd3.
    pub const LOOP_AUXCMD_INDEX_3: u16 = 12;
    /// Data source select for streams 0–7 (4 bits each).
    pub const DATA_STREAM_1_8_SEL: u16 = 13;
    /// Data source select for streams 8–15 (4 bits each).
    pub const DATA_STREAM_9_16_SEL: u16 = 14;
    /// One enable bit per stream.
    pub const DATA_STREAM_EN: u16 = 15;
    /// External fast settle: bit 4 enable, bits 0..4 TTL input channel.
    pub const EXTERNAL_FAST_SETTLE: u16 = 16;
    /// External auxout control for port A (B–D follow).
    pub const EXTERNAL_DIGOUT_A: u16 = 17;
    /// External auxout control for port B.
    pub const EXTERNAL_DIGOUT_B: u16 = 18;
    /// External auxout control for port C.
    pub const EXTERNAL_DIGOUT_C: u16 = 19;
    /// External auxout control for port D.
    pub const EXTERNAL_DIGOUT_D: u16 = 20;
    /// Sync clock output divider.
    pub const SYNC_CLKOUT_DIVIDE: u16 = 21;
    /// DAC gain (bits 7..10) and audio noise suppression (bits 0..7).
    pub const DAC_CTL: u16 = 22;
    /// DAC 1 source select (8 consecutive registers).
    pub const DAC_SEL_1: u16 = 23;
    /// DAC 1 threshold (8 consecutive registers).
    pub const DAC_THRESH_1: u16 = 31;
    /// DAC high-pass filter: bit 16 enable, bits 0..16 coefficient.
    pub const HPF: u16 = 39;
    /// Non-zero while the SPI engine is running.
    pub const SPI_RUNNING: u16 = 40;

    /// Base of the auxiliary command RAM.
    pub const COMMAND_RAM_BASE: u16 = 0x4000;
    /// Bit position of the bank number inside a command RAM address.
    pub const COMMAND_RAM_BANK_SHIFT: u16 = 10;
    /// Bit position of the aux slot inside a command RAM address.
    pub const COMMAND_RAM_SLOT_SHIFT: u16 = 14;
    /// Commands per bank.
    pub const COMMAND_RAM_BANK_SIZE: usize = 1024;
}

/// Bit numbers inside [`rhythm::MODE`].
pub mod mode {
    /// Run continuously once started instead of stopping at MAX_TIMESTEP.
    pub const SPI_RUN_CONTINUOUS: u32 = 1;
    /// Enable DSP settle on CONVERT commands.
    pub const DSP_SETTLE: u32 = 2;
    /// TTL out mode: 1 routes DAC comparators onto outputs 0–7.
    pub const TTL_OUT_MODE: u32 = 3;
    /// Board LEDs.
    pub const LED_ENABLE: u32 = 4;
}

/// Field masks shared by several Rhythm registers.
pub mod fields {
    /// A 4-bit nibble (per-port bank, delay, data source).
    pub const NIBBLE: u32 = 0x000F;
    /// DAC enable bit inside DAC_SEL_n.
    pub const DAC_ENABLE: u32 = 0x0400;
    /// DAC stream select inside DAC_SEL_n (bits 5..10).
    pub const DAC_STREAM_SHIFT: u32 = 5;
    /// Width mask of the DAC stream and channel fields.
    pub const DAC_SELECT_MASK: u32 = 0x1F;
    /// DAC gain field position inside DAC_CTL.
    pub const DAC_GAIN_SHIFT: u32 = 7;
    /// DAC gain width mask.
    pub const DAC_GAIN_MASK: u32 = 0x07;
    /// Audio noise suppression mask inside DAC_CTL.
    pub const NOISE_SUPPRESS_MASK: u32 = 0x7F;
    /// Enable bit used by the external fast settle / digout registers.
    pub const EXTERNAL_ENABLE: u32 = 1 << 4;
    /// HPF enable bit.
    pub const HPF_ENABLE: u32 = 1 << 16;
    /// HPF coefficient mask.
    pub const HPF_COEFFICIENT: u32 = 0xFFFF;
    /// Threshold polarity bit inside DAC_THRESH_n.
    pub const THRESHOLD_POLARITY_SHIFT: u32 = 16;
}

// ── Hub manager ──────────────────────────────────────────────────────────────

/// Hub manager register offsets (device [`devices::HUB_MANAGER`]).
pub mod hub {
    /// Sample clock select word.
    pub const CLOCK_SEL: u16 = 0x2000;
    /// Non-zero while a clock change is in progress.
    pub const CLOCK_BUSY: u16 = 0x2001;
}

// ── Memory monitor ───────────────────────────────────────────────────────────

/// Memory monitor register offsets (device [`devices::MEMORY_MONITOR`]).
pub mod memory {
    /// Enable periodic usage frames.
    pub const ENABLE: u16 = 0;
    /// Divider of CLK_HZ giving the report rate.
    pub const CLK_DIV: u16 = 1;
    /// Monitor clock in Hz (read only).
    pub const CLK_HZ: u16 = 2;
    /// Board memory size in 32-bit words (read only).
    pub const TOTAL_MEM: u16 = 3;
    /// Index of the used-words counter inside a monitor frame (u32 words).
    pub const FRAME_USED_WORD: usize = 2;
}

/// Gateware info register offsets (device [`devices::GATEWARE_INFO`]).
pub mod info {
    /// Gateware version word.
    pub const VERSION: u16 = 2;
}

// ── Symbolic map ─────────────────────────────────────────────────────────────

/// Symbolic register table for one device.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    /// Device id the table belongs to.
    pub device: u16,
    /// `(name, offset)` pairs in offset order.
    pub entries: &'static [(&'static str, u16)],
}

impl RegisterMap {
    /// Offset of `name`, if the device has such a register.
    #[must_use]
    pub fn offset(&self, name: &str) -> Option<u16> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, off)| off)
    }

    /// Name of the register at `offset`, if any.
    #[must_use]
    pub fn name(&self, offset: u16) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|&&(_, off)| off == offset)
            .map(|&(n, _)| n)
    }
}

/// Rhythm core register names.
pub const RHYTHM_MAP: RegisterMap = RegisterMap {
    device: devices::RHYTHM,
    entries: &[
        ("ENABLE", rhythm::ENABLE),
        ("MODE", rhythm::MODE),
        ("MAX_TIMESTEP", rhythm::MAX_TIMESTEP),
        ("CABLE_DELAY", rhythm::CABLE_DELAY),
        ("AUXCMD_BANK_1", rhythm::AUXCMD_BANK_1),
        ("AUXCMD_BANK_2", rhythm::AUXCMD_BANK_2),
        ("AUXCMD_BANK_3", rhythm::AUXCMD_BANK_3),
        ("MAX_AUXCMD_INDEX_1", rhythm::MAX_AUXCMD_INDEX_1),
        ("MAX_AUXCMD_INDEX_2", rhythm::MAX_AUXCMD_INDEX_2),
        ("MAX_AUXCMD_INDEX_3", rhythm::MAX_AUXCMD_INDEX_3),
        ("LOOP_AUXCMD_INDEX_1", rhythm::LOOP_AUXCMD_INDEX_1),
        ("LOOP_AUXCMD_INDEX_2", rhythm::LOOP_AUXCMD_INDEX_2),
        ("LOOP_AUXCMD_INDEX_3", rhythm::LOOP_AUXCMD_INDEX_3),
        ("DATA_STREAM_1_8_SEL", rhythm::DATA_STREAM_1_8_SEL),
        ("DATA_STREAM_9_16_SEL", rhythm::DATA_STREAM_9_16_SEL),
        ("DATA_STREAM_EN", rhythm::DATA_STREAM_EN),
        ("EXTERNAL_FAST_SETTLE", rhythm::EXTERNAL_FAST_SETTLE),
        ("EXTERNAL_DIGOUT_A", rhythm::EXTERNAL_DIGOUT_A),
        ("EXTERNAL_DIGOUT_B", rhythm::EXTERNAL_DIGOUT_B),
        ("EXTERNAL_DIGOUT_C", rhythm::EXTERNAL_DIGOUT_C),
        ("EXTERNAL_DIGOUT_D", rhythm::EXTERNAL_DIGOUT_D),
        ("SYNC_CLKOUT_DIVIDE", rhythm::SYNC_CLKOUT_DIVIDE),
        ("DAC_CTL", rhythm::DAC_CTL),
        ("DAC_SEL_1", 23),
        ("DAC_SEL_2", 24),
        ("DAC_SEL_3", 25),
        ("DAC_SEL_4", 26),
        ("DAC_SEL_5", 27),
        ("DAC_SEL_6", 28),
        ("DAC_SEL_7", 29),
        ("DAC_SEL_8", 30),
        ("DAC_THRESH_1", 31),
        ("DAC_THRESH_2", 32),
        ("DAC_THRESH_3", 33),
        ("DAC_THRESH_4", 34),
        ("DAC_THRESH_5", 35),
        ("DAC_THRESH_6", 36),
        ("DAC_THRESH_7", 37),
        ("DAC_THRESH_8", 38),
        ("HPF", rhythm::HPF),
        ("SPI_RUNNING", rhythm::SPI_RUNNING),
    ],
};

/// Hub manager register names.
pub const HUB_MAP: RegisterMap = RegisterMap {
    device: devices::HUB_MANAGER,
    entries: &[("CLOCK_SEL", hub::CLOCK_SEL), ("CLOCK_BUSY", hub::CLOCK_BUSY)],
};

/// Memory monitor register names.
pub const MEMORY_MAP: RegisterMap = RegisterMap {
    device: devices::MEMORY_MONITOR,
    entries: &[
        ("ENABLE", memory::ENABLE),
        ("CLK_DIV", memory::CLK_DIV),
        ("CLK_HZ", memory::CLK_HZ),
        ("TOTAL_MEM", memory::TOTAL_MEM),
    ],
};

/// Gateware info register names.
pub const INFO_MAP: RegisterMap = RegisterMap {
    device: devices::GATEWARE_INFO,
    entries: &[("VERSION", info::VERSION)],
};

/// Every symbolic table, one per device.
pub const ALL_MAPS: &[RegisterMap] = &[RHYTHM_MAP, HUB_MAP, MEMORY_MAP, INFO_MAP];

/// Look up the symbolic table of a device.
#[must_use]
pub fn map_for(device: u16) -> Option<&'static RegisterMap> {
    ALL_MAPS.iter().find(|m| m.device == device)
}

/// Resolve `(device, name)` to a register offset.
#[must_use]
pub fn lookup(device: u16, name: &str) -> Option<u16> {
    map_for(device).and_then(|m| m.offset(name))
}

/// Address of command `index` of `bank` in aux command `slot` (0-based).
#[must_use]
pub const fn command_ram_address(slot: u16, bank: u16, index: u16) -> u16 {
    rhythm::COMMAND_RAM_BASE
        + (bank << rhythm::COMMAND_RAM_BANK_SHIFT)
        + (slot << rhythm::COMMAND_RAM_SLOT_SHIFT)
        + index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rhythm_offsets_match_gateware() {
        assert_eq!(rhythm::DATA_STREAM_EN, 15);
        assert_eq!(rhythm::HPF, 39);
        assert_eq!(rhythm::SPI_RUNNING, 40);
        assert_eq!(hub::CLOCK_SEL, 0x2000);
        assert_eq!(memory::TOTAL_MEM, 3);
    }

    #[test]
    fn symbolic_lookup() {
        assert_eq!(lookup(devices::RHYTHM, "cable_delay"), Some(3));
        assert_eq!(lookup(devices::RHYTHM, "DAC_THRESH_8"), Some(38));
        assert_eq!(lookup(devices::HUB_MANAGER, "CLOCK_BUSY"), Some(0x2001));
        assert_eq!(lookup(devices::TTL, "ENABLE"), None);
        assert_eq!(RHYTHM_MAP.name(40), Some("SPI_RUNNING"));
    }

    #[test]
    fn rhythm_map_is_dense_and_ordered() {
        for (i, &(_, off)) in RHYTHM_MAP.entries.iter().enumerate() {
            assert_eq!(usize::from(off), i);
        }
    }

    #[test]
    fn command_ram_addressing() {
        assert_eq!(command_ram_address(0, 0, 0), 0x4000);
        assert_eq!(command_ram_address(2, 1, 5), 0x4000 + 0x0400 + 0x8000 + 5);
        assert_eq!(command_ram_address(2, 15, 1023), 0xFFFF);
    }
}
