//! Auxiliary command lists
//!
//! Each data stream runs three looping command lists alongside the amplifier
//! conversions: AuxCmd1 drives the headstage digital outputs, AuxCmd2 samples
//! the aux inputs, AuxCmd3 (re)configures the chip registers and reads its
//! ROM. The lists come from a [`CommandCompiler`]; the driver only uploads
//! them and picks banks.

use crate::config::AmplifierSettings;
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::regs::rhythm::COMMAND_RAM_BANK_SIZE;
use rhythm_gateware::rhd::{self, command};
use std::fmt::Debug;

/// Commands in each list produced by [`StaticCommandCompiler`].
pub const LIST_LENGTH: usize = 60;

/// Aux command slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxSlot {
    /// AuxCmd1, digital outputs
    DigitalOut,
    /// AuxCmd2, aux input sampling
    AuxSampling,
    /// AuxCmd3, register configuration and ROM reads
    RegisterConfig,
}

impl AuxSlot {
    /// All slots in register order.
    pub const ALL: [Self; 3] = [Self::DigitalOut, Self::AuxSampling, Self::RegisterConfig];

    /// Zero-based slot index.
    pub const fn index(self) -> usize {
        match self {
            Self::DigitalOut => 0,
            Self::AuxSampling => 1,
            Self::RegisterConfig => 2,
        }
    }
}

/// Variant of the AuxCmd3 register configuration list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterConfigMode {
    /// Configure and run ADC self-calibration
    Calibrate,
    /// Configure only
    Configure,
    /// Configure with amplifier fast settle held on
    FastSettle,
}

impl RegisterConfigMode {
    /// Command RAM bank the list is uploaded to.
    pub const fn bank(self) -> u8 {
        match self {
            Self::Calibrate => 0,
            Self::Configure => 1,
            Self::FastSettle => 2,
        }
    }
}

/// An opaque list of RHD2000 command words
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandList {
    words: Vec<u16>,
}

impl CommandList {
    /// Wrap command words.
    pub fn new(words: Vec<u16>) -> Self {
        Self { words }
    }

    /// The command words.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Whether the list fits one command RAM bank.
    pub fn fits_bank(&self) -> bool {
        self.len() <= COMMAND_RAM_BANK_SIZE
    }
}

/// Produces the aux command lists for a configuration
pub trait CommandCompiler: Debug + Send + Sync {
    /// AuxCmd3 list configuring the amplifier registers for `settings`
    fn register_config(
        &self,
        rate: SampleRate,
        settings: &AmplifierSettings,
        mode: RegisterConfigMode,
    ) -> CommandList;

    /// AuxCmd1 list refreshing the headstage digital output
    fn digital_out_update(&self) -> CommandList;

    /// AuxCmd2 list sampling the aux inputs
    fn aux_sampling(&self, rate: SampleRate) -> CommandList;
}

/// DSP high-pass cutoff as a fraction of the sample rate, for codes 1–15.
const DSP_CUTOFF_RATIO: [f64; 15] = [
    0.1103, 0.045_79, 0.021_25, 0.010_27, 0.005_053, 0.002_506, 0.001_248, 0.000_622_9, 0.000_311_2,
    0.000_155_5, 0.000_077_73, 0.000_038_86, 0.000_019_43, 0.000_009_714, 0.000_004_857,
];

/// Closest DSP cutoff code for `hz` at `rate`, with the cutoff it yields.
pub fn dsp_cutoff_code(rate: SampleRate, hz: f64) -> (u8, f64) {
    let target = hz.max(f64::MIN_POSITIVE).ln();
    let distance = |f: f64| (f.ln() - target).abs();
    let mut best = (1u8, DSP_CUTOFF_RATIO[0] * rate.hz());
    for (code, ratio) in (1u8..).zip(DSP_CUTOFF_RATIO) {
        let f = ratio * rate.hz();
        if distance(f) < distance(best.1) {
            best = (code, f);
        }
    }
    best
}

/// Model compiler producing fixed-length lists
///
/// The register writes are a coarse model of the chip configuration; the
/// ROM reads are placed so their results land at the sample indices that
/// chip discovery inspects.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticCommandCompiler;

impl StaticCommandCompiler {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn register_values(rate: SampleRate, settings: &AmplifierSettings, fast_settle: bool) -> [u8; 18] {
        let mut r = [0u8; 18];
        // ADC reference and comparator bias, amp fast settle in bit 5.
        r[0] = 0xDE | if fast_settle { 0x20 } else { 0 };
        r[1] = if rate.hz() > 20_000.0 { 0x02 } else { 0x04 };
        r[2] = 0x04;
        r[3] = 0x00;
        let (code, _) = dsp_cutoff_code(rate, settings.dsp_cutoff_hz);
        r[4] = 0x80 | if settings.dsp_enabled { 0x10 | code } else { 0 };
        r[5] = 0x00;
        r[6] = 0x80;
        r[7] = 0x00;
        let upper = settings.upper_bandwidth_hz.clamp(100.0, 20_000.0) / 100.0;
        r[8] = (upper as u32 & 0x3F) as u8;
        r[9] = ((upper as u32 >> 6) & 0x1F) as u8;
        let lower = (settings.lower_bandwidth_hz.clamp(0.1, 500.0) * 10.0) as u32;
        r[12] = (lower & 0x7F) as u8;
        r[13] = ((lower >> 7) & 0x3F) as u8;
        r[14..].fill(0xFF);
        r
    }
}

impl CommandCompiler for StaticCommandCompiler {
    #[allow(clippy::cast_possible_truncation)]
    fn register_config(
        &self,
        rate: SampleRate,
        settings: &AmplifierSettings,
        mode: RegisterConfigMode,
    ) -> CommandList {
        let mut words = vec![command::read(63); LIST_LENGTH];
        let values = Self::register_values(rate, settings, mode == RegisterConfigMode::FastSettle);
        let mut writes = values.iter().enumerate().map(|(reg, &v)| command::write(reg as u8, v));

        // ROM reads first so the register writes fill the gaps around them.
        let mut reserved = [false; LIST_LENGTH];
        for (register, sample) in rhd::ROM_PROBE {
            let at = sample - rhd::SPI_PIPELINE_DEPTH;
            words[at] = command::read(register);
            reserved[at] = true;
        }
        for (reg, at) in (51u8..=55).zip(25..=29) {
            words[at] = command::read(reg);
            reserved[at] = true;
        }
        let free = (0..LIST_LENGTH).filter(|&i| !reserved[i]);
        for (at, w) in free.zip(&mut writes) {
            words[at] = w;
        }

        let tail = rhd::INTAN_SAMPLES[4] - rhd::SPI_PIPELINE_DEPTH + 1;
        match mode {
            RegisterConfigMode::Calibrate => words[tail] = command::CALIBRATE,
            RegisterConfigMode::Configure | RegisterConfigMode::FastSettle => {}
        }
        CommandList::new(words)
    }

    fn digital_out_update(&self) -> CommandList {
        CommandList::new(vec![command::write(3, 0); LIST_LENGTH])
    }

    fn aux_sampling(&self, _rate: SampleRate) -> CommandList {
        // Temperature sensor, then aux inputs 1-3 (accelerometer x, y, z).
        let round = [command::convert(49), command::convert(32), command::convert(33), command::convert(34)];
        CommandList::new(round.iter().copied().cycle().take(LIST_LENGTH).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_config_places_rom_reads() {
        let c = StaticCommandCompiler;
        let list = c.register_config(SampleRate::Hz30000, &AmplifierSettings::default(), RegisterConfigMode::Configure);
        assert_eq!(list.len(), LIST_LENGTH);
        for (register, sample) in rhd::ROM_PROBE {
            assert_eq!(
                command::read_target(list.words()[sample - rhd::SPI_PIPELINE_DEPTH]),
                Some(register)
            );
        }
        // All 18 configuration registers are written.
        let writes = list.words().iter().filter(|w| *w & 0xC000 == 0x8000).count();
        assert_eq!(writes, 18);
    }

    #[test]
    fn calibrate_variant_contains_calibrate() {
        let c = StaticCommandCompiler;
        let s = AmplifierSettings::default();
        let cal = c.register_config(SampleRate::Hz30000, &s, RegisterConfigMode::Calibrate);
        let plain = c.register_config(SampleRate::Hz30000, &s, RegisterConfigMode::Configure);
        assert!(cal.words().contains(&command::CALIBRATE));
        assert!(!plain.words().contains(&command::CALIBRATE));
        assert_eq!(RegisterConfigMode::FastSettle.bank(), 2);
    }

    #[test]
    fn aux_sampling_round_robin() {
        let list = StaticCommandCompiler.aux_sampling(SampleRate::Hz20000);
        assert_eq!(list.words()[1], command::convert(32));
        assert_eq!(list.words()[5], command::convert(32));
        assert!(list.fits_bank());
    }

    #[test]
    fn dsp_cutoff_nearest_code() {
        // 1 Hz at 30 kHz: ratio 3.3e-5 is closest to code 12 (3.886e-5).
        let (code, hz) = dsp_cutoff_code(SampleRate::Hz30000, 1.0);
        assert_eq!(code, 12);
        assert!((hz - 1.1658).abs() < 1e-3);
    }
}
