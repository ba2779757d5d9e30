//! Board configuration
//!
//! Plain data with builder-style setters. Nothing is persisted; a config is
//! validated once when the driver opens the board and again on every change
//! made while the board is open.

use crate::error::{check_index, check_range, Result, RhythmError};
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::timing::MAX_DELAY;
use rhythm_gateware::PORT_COUNT;
use tracing::warn;

/// Largest batch the acquisition loop will assemble.
pub const MAX_BATCH_SIZE: usize = 1 << 16;

/// Environment variable overriding [`BoardConfig::board_index`].
pub const ENV_BOARD_INDEX: &str = "RHYTHM_BOARD_INDEX";

/// Environment variable overriding [`BoardConfig::batch_size`].
pub const ENV_BATCH_SIZE: &str = "RHYTHM_BATCH_SIZE";

/// Amplifier filter settings compiled into the register configuration list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplifierSettings {
    /// Lower analog bandwidth, Hz
    pub lower_bandwidth_hz: f64,
    /// Upper analog bandwidth, Hz
    pub upper_bandwidth_hz: f64,
    /// DSP offset-removal high-pass cutoff, Hz
    pub dsp_cutoff_hz: f64,
    /// Enable the DSP high-pass
    pub dsp_enabled: bool,
}

impl Default for AmplifierSettings {
    fn default() -> Self {
        Self {
            lower_bandwidth_hz: 0.1,
            upper_bandwidth_hz: 7500.0,
            dsp_cutoff_hz: 1.0,
            dsp_enabled: true,
        }
    }
}

impl AmplifierSettings {
    /// Check the bandwidth bounds.
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for non-positive or inverted bounds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn validate(&self) -> Result<()> {
        let hz = |v: f64| v.round() as i64;
        if !(self.upper_bandwidth_hz > 0.0 && self.upper_bandwidth_hz <= 20_000.0) {
            return Err(RhythmError::out_of_range("upper_bandwidth_hz", hz(self.upper_bandwidth_hz), 20_000));
        }
        if !(self.lower_bandwidth_hz > 0.0 && self.lower_bandwidth_hz < self.upper_bandwidth_hz) {
            return Err(RhythmError::out_of_range(
                "lower_bandwidth_hz",
                hz(self.lower_bandwidth_hz),
                hz(self.upper_bandwidth_hz),
            ));
        }
        if self.dsp_enabled && !(self.dsp_cutoff_hz > 0.0) {
            return Err(RhythmError::out_of_range("dsp_cutoff_hz", hz(self.dsp_cutoff_hz), 20_000));
        }
        Ok(())
    }
}

/// Everything the driver needs to bring a board up
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    /// Board to open
    pub board_index: u32,
    /// Per-channel sample rate used for acquisition
    pub sample_rate: SampleRate,
    /// Amplifier filter settings
    pub amplifier: AmplifierSettings,
    /// Hold all amplifiers in fast settle after calibration
    pub fast_settle: bool,
    /// Let a TTL input hold all amplifiers in fast settle
    pub external_fast_settle: bool,
    /// TTL input (0–15) driving external fast settle
    pub fast_settle_channel: u8,
    /// Per-port cable delays that bypass auto-detection
    pub cable_delay_overrides: [Option<u8>; PORT_COUNT],
    /// Samples per emitted batch
    pub batch_size: usize,
    /// Board LEDs on while open
    pub leds: bool,
    /// Bound on status busy-polls (`None` polls forever)
    pub poll_limit: Option<u32>,
    /// Batches queued per subscriber before the producer blocks
    pub queue_depth: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            board_index: 0,
            sample_rate: SampleRate::Hz30000,
            amplifier: AmplifierSettings::default(),
            fast_settle: false,
            external_fast_settle: false,
            fast_settle_channel: 0,
            cable_delay_overrides: [None; PORT_COUNT],
            batch_size: 256,
            leds: true,
            poll_limit: None,
            queue_depth: 16,
        }
    }
}

impl BoardConfig {
    /// Defaults with environment overrides applied
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `RHYTHM_BOARD_INDEX` / `RHYTHM_BATCH_SIZE` if set
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_BOARD_INDEX) {
            match raw.trim().parse() {
                Ok(index) => self.board_index = index,
                Err(e) => warn!("Ignoring {ENV_BOARD_INDEX}={raw:?}: {e}"),
            }
        }
        if let Some(raw) = lookup(ENV_BATCH_SIZE) {
            match raw.trim().parse() {
                Ok(size) => self.batch_size = size,
                Err(e) => warn!("Ignoring {ENV_BATCH_SIZE}={raw:?}: {e}"),
            }
        }
        self
    }

    /// Set the board index
    pub fn with_board_index(mut self, index: u32) -> Self {
        self.board_index = index;
        self
    }

    /// Set the sample rate
    pub fn with_sample_rate(mut self, rate: SampleRate) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the amplifier settings
    pub fn with_amplifier(mut self, amplifier: AmplifierSettings) -> Self {
        self.amplifier = amplifier;
        self
    }

    /// Hold amplifiers in fast settle
    pub fn with_fast_settle(mut self, on: bool) -> Self {
        self.fast_settle = on;
        self
    }

    /// Enable external fast settle on TTL input `channel`
    pub fn with_external_fast_settle(mut self, channel: u8) -> Self {
        self.external_fast_settle = true;
        self.fast_settle_channel = channel;
        self
    }

    /// Fix the cable delay of `port_index` (0 = A) instead of detecting it
    pub fn with_cable_delay_override(mut self, port_index: usize, delay: u8) -> Self {
        if let Some(slot) = self.cable_delay_overrides.get_mut(port_index) {
            *slot = Some(delay);
        }
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, samples: usize) -> Self {
        self.batch_size = samples;
        self
    }

    /// Turn the board LEDs on or off
    pub fn with_leds(mut self, on: bool) -> Self {
        self.leds = on;
        self
    }

    /// Bound busy-polls to `reads`
    pub fn with_poll_limit(mut self, reads: u32) -> Self {
        self.poll_limit = Some(reads);
        self
    }

    /// Set the per-subscriber queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Check every field
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RhythmError::out_of_range("batch_size", 0, 0));
        }
        check_index("batch_size", self.batch_size, MAX_BATCH_SIZE)?;
        check_range("fast_settle_channel", self.fast_settle_channel, 15)?;
        for delay in self.cable_delay_overrides.iter().flatten() {
            check_range("cable_delay", *delay, MAX_DELAY)?;
        }
        self.amplifier.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = BoardConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sample_rate, SampleRate::Hz30000);
        assert_eq!(cfg.batch_size, 256);
    }

    #[test]
    fn builder_and_validation() {
        let cfg = BoardConfig::default()
            .with_batch_size(0)
            .with_cable_delay_override(2, 7);
        assert_eq!(cfg.cable_delay_overrides[2], Some(7));
        assert!(matches!(
            cfg.validate(),
            Err(RhythmError::ArgumentOutOfRange { name: "batch_size", .. })
        ));

        let cfg = BoardConfig::default().with_cable_delay_override(0, 16);
        assert!(matches!(
            cfg.validate(),
            Err(RhythmError::ArgumentOutOfRange { name: "cable_delay", value: 16, max: 15 })
        ));

        let cfg = BoardConfig::default().with_external_fast_settle(16);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_bandwidth_rejected() {
        let amp = AmplifierSettings {
            lower_bandwidth_hz: 8000.0,
            ..AmplifierSettings::default()
        };
        assert!(matches!(
            amp.validate(),
            Err(RhythmError::ArgumentOutOfRange { name: "lower_bandwidth_hz", .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let cfg = BoardConfig::default().with_overrides(|k| match k {
            ENV_BOARD_INDEX => Some("3".into()),
            ENV_BATCH_SIZE => Some("many".into()),
            _ => None,
        });
        assert_eq!(cfg.board_index, 3);
        assert_eq!(cfg.batch_size, 256);
    }
}
