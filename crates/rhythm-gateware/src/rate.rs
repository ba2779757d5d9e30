//! Per-channel sample rates.
//!
//! The hub derives the sample clock from one of three base clocks, optionally
//! divided. The select word written to the hub clock register is
//!
//! ```text
//! bits 3..7  divider
//! bits 1..3  clock select
//! bit  0     divide enable
//! ```

use std::fmt;

/// Supported per-channel sample rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum SampleRate {
    Hz1000,
    Hz1250,
    Hz1500,
    Hz2000,
    Hz2500,
    Hz3000,
    Hz3333,
    Hz5000,
    Hz6250,
    Hz10000,
    Hz12500,
    Hz15000,
    Hz20000,
    Hz25000,
    Hz30000,
}

/// Hub clock parameters for one rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSelect {
    /// Divide the selected base clock.
    pub divide_enable: bool,
    /// Base clock (0, 1 or 2).
    pub clock: u8,
    /// Divider value (0–15).
    pub divider: u8,
}

impl ClockSelect {
    /// Packed select word.
    #[must_use]
    pub const fn word(self) -> u32 {
        (((self.divider & 0xF) as u32) << 3) + (((self.clock & 0x3) as u32) << 1) + self.divide_enable as u32
    }
}

impl SampleRate {
    /// All rates, ascending.
    pub const ALL: [Self; 15] = [
        Self::Hz1000,
        Self::Hz1250,
        Self::Hz1500,
        Self::Hz2000,
        Self::Hz2500,
        Self::Hz3000,
        Self::Hz3333,
        Self::Hz5000,
        Self::Hz6250,
        Self::Hz10000,
        Self::Hz12500,
        Self::Hz15000,
        Self::Hz20000,
        Self::Hz25000,
        Self::Hz30000,
    ];

    /// Exact rate in Hz. 3333 is really 10000/3.
    #[must_use]
    pub fn hz(self) -> f64 {
        match self {
            Self::Hz1000 => 1000.0,
            Self::Hz1250 => 1250.0,
            Self::Hz1500 => 1500.0,
            Self::Hz2000 => 2000.0,
            Self::Hz2500 => 2500.0,
            Self::Hz3000 => 3000.0,
            Self::Hz3333 => 10000.0 / 3.0,
            Self::Hz5000 => 5000.0,
            Self::Hz6250 => 6250.0,
            Self::Hz10000 => 10000.0,
            Self::Hz12500 => 12500.0,
            Self::Hz15000 => 15000.0,
            Self::Hz20000 => 20000.0,
            Self::Hz25000 => 25000.0,
            Self::Hz30000 => 30000.0,
        }
    }

    /// Nominal integer rate.
    #[must_use]
    pub const fn nominal(self) -> u32 {
        match self {
            Self::Hz1000 => 1000,
            Self::Hz1250 => 1250,
            Self::Hz1500 => 1500,
            Self::Hz2000 => 2000,
            Self::Hz2500 => 2500,
            Self::Hz3000 => 3000,
            Self::Hz3333 => 3333,
            Self::Hz5000 => 5000,
            Self::Hz6250 => 6250,
            Self::Hz10000 => 10000,
            Self::Hz12500 => 12500,
            Self::Hz15000 => 15000,
            Self::Hz20000 => 20000,
            Self::Hz25000 => 25000,
            Self::Hz30000 => 30000,
        }
    }

    /// Rate from its nominal value.
    #[must_use]
    pub fn from_nominal(hz: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.nominal() == hz)
    }

    /// Hub clock parameters.
    #[must_use]
    pub const fn clock_select(self) -> ClockSelect {
        let (divide_enable, clock, divider) = match self {
            Self::Hz1000 => (true, 2, 9),
            Self::Hz1250 => (true, 1, 9),
            Self::Hz1500 => (true, 0, 9),
            Self::Hz2000 => (true, 2, 4),
            Self::Hz2500 => (true, 1, 4),
            Self::Hz3000 => (true, 0, 4),
            Self::Hz3333 => (true, 2, 2),
            Self::Hz5000 => (true, 2, 1),
            Self::Hz6250 => (true, 1, 1),
            Self::Hz10000 => (true, 2, 0),
            Self::Hz12500 => (true, 1, 0),
            Self::Hz15000 => (true, 0, 0),
            Self::Hz20000 => (false, 2, 0),
            Self::Hz25000 => (false, 1, 0),
            Self::Hz30000 => (false, 0, 0),
        };
        ClockSelect {
            divide_enable,
            clock,
            divider,
        }
    }

    /// Packed hub clock word.
    #[must_use]
    pub const fn clock_word(self) -> u32 {
        self.clock_select().word()
    }

    /// Rate whose clock word is `word`.
    #[must_use]
    pub fn from_clock_word(word: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.clock_word() == word)
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz30000
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.nominal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_words() {
        assert_eq!(SampleRate::Hz30000.clock_word(), 0);
        assert_eq!(SampleRate::Hz20000.clock_word(), 4);
        assert_eq!(SampleRate::Hz1000.clock_word(), (9 << 3) + (2 << 1) + 1);
        assert_eq!(SampleRate::Hz15000.clock_word(), 1);
    }

    #[test]
    fn clock_words_are_unique() {
        for r in SampleRate::ALL {
            assert_eq!(SampleRate::from_clock_word(r.clock_word()), Some(r));
        }
    }

    #[test]
    fn nominal_lookup() {
        assert_eq!(SampleRate::from_nominal(3333), Some(SampleRate::Hz3333));
        assert_eq!(SampleRate::from_nominal(44100), None);
        assert!((SampleRate::Hz3333.hz() - 3333.333).abs() < 0.001);
    }
}
