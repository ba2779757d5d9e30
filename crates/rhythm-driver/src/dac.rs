//! TTL outputs, analog DACs and external triggers
//!
//! The board has eight DACs that can mirror any amplifier channel, each with
//! a threshold comparator that can drive TTL outputs 0–7 (TTL mode 1). A
//! single high-pass filter and gain stage are shared by all DACs.

use crate::error::{check_range, Result};
use crate::session::BoardSession;
use rhythm_gateware::devices;
use rhythm_gateware::regs::{fields, mode, rhythm};
use rhythm_gateware::rhd::Port;
use rhythm_gateware::MAX_STREAMS;
use std::f64::consts::PI;

/// Number of analog DAC outputs.
pub const DAC_COUNT: u8 = 8;

/// Highest DAC stream select (16 and 17 select the DAC manual value).
pub const MAX_DAC_STREAM: u8 = MAX_STREAMS as u8 + 1;

/// DAC high-pass coefficient for `cutoff_hz` at `sample_rate_hz`
///
/// `floor(65536 (1 - exp(-2π f / rate)) + 0.5)`, clamped to 1..=65535.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn highpass_coefficient(cutoff_hz: f64, sample_rate_hz: f64) -> u32 {
    let b = 1.0 - (-2.0 * PI * cutoff_hz / sample_rate_hz).exp();
    let c = (65536.0 * b + 0.5).floor();
    c.clamp(1.0, 65535.0) as u32
}

/// Pack one flag per TTL line into the output word, line 0 in bit 0
pub fn pack_ttl_lines(lines: [bool; 16]) -> u16 {
    (0..16).filter(|&i| lines[i]).fold(0u16, |v, i| v | (1 << i))
}

impl BoardSession {
    /// Drive the 16 TTL output lines
    ///
    /// # Errors
    ///
    /// Propagates link errors.
    pub fn set_ttl_out(&mut self, value: u16) -> Result<()> {
        self.bus_mut().write_data(devices::TTL, &[u32::from(value)])
    }

    /// Drive TTL outputs from one flag per line, line 0 first
    ///
    /// # Errors
    ///
    /// Propagates link errors.
    pub fn set_ttl_out_bits(&mut self, lines: [bool; 16]) -> Result<()> {
        self.set_ttl_out(pack_ttl_lines(lines))
    }

    /// All TTL outputs low
    ///
    /// # Errors
    ///
    /// Propagates link errors.
    pub fn clear_ttl_out(&mut self) -> Result<()> {
        self.set_ttl_out(0)
    }

    /// 0: all TTL outputs manual; 1: outputs 0–7 follow the DAC comparators
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for modes above 1.
    pub fn set_ttl_mode(&mut self, ttl_mode: u8) -> Result<()> {
        check_range("ttl_mode", ttl_mode, 1)?;
        let bit = 1 << mode::TTL_OUT_MODE;
        self.mask_rhythm(rhythm::MODE, u32::from(ttl_mode) << mode::TTL_OUT_MODE, bit)
    }

    /// Value output by DACs routed to the manual source
    ///
    /// # Errors
    ///
    /// Propagates link errors.
    pub fn set_dac_manual(&mut self, value: u16) -> Result<()> {
        let v = u32::from(value);
        self.bus_mut().write_data(devices::TTL, &[v | (v << 16); 4])
    }

    /// Enable or disable DAC `dac`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for DACs above 7.
    pub fn enable_dac(&mut self, dac: u8, enabled: bool) -> Result<()> {
        check_range("dac", dac, DAC_COUNT - 1)?;
        let value = if enabled { fields::DAC_ENABLE } else { 0 };
        self.mask_rhythm(rhythm::DAC_SEL_1 + u16::from(dac), value, fields::DAC_ENABLE)
    }

    /// Shared DAC gain, 0–7
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` above 7.
    pub fn set_dac_gain(&mut self, gain: u8) -> Result<()> {
        check_range("dac_gain", gain, 7)?;
        self.mask_rhythm(
            rhythm::DAC_CTL,
            u32::from(gain) << fields::DAC_GAIN_SHIFT,
            fields::DAC_GAIN_MASK << fields::DAC_GAIN_SHIFT,
        )
    }

    /// Audio noise slicer half-width, 0–127
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` above 127.
    pub fn set_audio_noise_suppress(&mut self, level: u8) -> Result<()> {
        check_range("noise_suppress", level, 127)?;
        self.mask_rhythm(rhythm::DAC_CTL, u32::from(level), fields::NOISE_SUPPRESS_MASK)
    }

    /// Stream (0–15, or 16–17 for the manual value) mirrored by DAC `dac`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for bad DAC or stream numbers.
    pub fn select_dac_data_stream(&mut self, dac: u8, stream: u8) -> Result<()> {
        check_range("dac", dac, DAC_COUNT - 1)?;
        check_range("dac_stream", stream, MAX_DAC_STREAM)?;
        self.mask_rhythm(
            rhythm::DAC_SEL_1 + u16::from(dac),
            u32::from(stream) << fields::DAC_STREAM_SHIFT,
            fields::DAC_SELECT_MASK << fields::DAC_STREAM_SHIFT,
        )
    }

    /// Amplifier channel (0–31) mirrored by DAC `dac`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for bad DAC or channel numbers.
    pub fn select_dac_data_channel(&mut self, dac: u8, channel: u8) -> Result<()> {
        check_range("dac", dac, DAC_COUNT - 1)?;
        check_range("dac_channel", channel, 31)?;
        self.mask_rhythm(rhythm::DAC_SEL_1 + u16::from(dac), u32::from(channel), fields::DAC_SELECT_MASK)
    }

    /// Comparator threshold of DAC `dac`; `rising` fires above it
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for DACs above 7.
    pub fn set_dac_threshold(&mut self, dac: u8, threshold: u16, rising: bool) -> Result<()> {
        check_range("dac", dac, DAC_COUNT - 1)?;
        let value = u32::from(threshold) | (u32::from(rising) << fields::THRESHOLD_POLARITY_SHIFT);
        self.write_rhythm(rhythm::DAC_THRESH_1 + u16::from(dac), value)
    }

    /// Enable the shared DAC high-pass
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn enable_dac_highpass_filter(&mut self, enabled: bool) -> Result<()> {
        let value = if enabled { fields::HPF_ENABLE } else { 0 };
        self.mask_rhythm(rhythm::HPF, value, fields::HPF_ENABLE)
    }

    /// Set the DAC high-pass cutoff for the current sample rate
    ///
    /// Returns the programmed coefficient. Call again after a rate change.
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_dac_highpass_filter(&mut self, cutoff_hz: f64) -> Result<u32> {
        let coefficient = highpass_coefficient(cutoff_hz, self.sample_rate_hz());
        self.mask_rhythm(rhythm::HPF, coefficient, fields::HPF_COEFFICIENT)?;
        Ok(coefficient)
    }

    /// Let a TTL input force amplifier fast settle
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn enable_external_fast_settle(&mut self, enabled: bool) -> Result<()> {
        let value = if enabled { fields::EXTERNAL_ENABLE } else { 0 };
        self.mask_rhythm(rhythm::EXTERNAL_FAST_SETTLE, value, fields::EXTERNAL_ENABLE)
    }

    /// TTL input (0–15) used for external fast settle
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` above 15.
    pub fn set_external_fast_settle_channel(&mut self, channel: u8) -> Result<()> {
        check_range("fast_settle_channel", channel, 15)?;
        self.mask_rhythm(rhythm::EXTERNAL_FAST_SETTLE, u32::from(channel), fields::NIBBLE)
    }

    /// Let a TTL input drive the headstage auxout pin on `port`
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn enable_external_dig_out(&mut self, port: Port, enabled: bool) -> Result<()> {
        let value = if enabled { fields::EXTERNAL_ENABLE } else { 0 };
        self.mask_rhythm(Self::digout_register(port), value, fields::EXTERNAL_ENABLE)
    }

    /// TTL input (0–15) driving auxout on `port`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` above 15.
    pub fn set_external_dig_out_channel(&mut self, port: Port, channel: u8) -> Result<()> {
        check_range("dig_out_channel", channel, 15)?;
        self.mask_rhythm(Self::digout_register(port), u32::from(channel), fields::NIBBLE)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn digout_register(port: Port) -> u16 {
        rhythm::EXTERNAL_DIGOUT_A + port.index() as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::SimulatedBoard;
    use crate::error::RhythmError;

    fn session() -> BoardSession {
        let mut s = BoardSession::new(Box::new(SimulatedBoard::new()), Some(100));
        s.initialize().unwrap();
        s
    }

    fn read(s: &mut BoardSession, offset: u16) -> u32 {
        s.bus_mut().read(devices::RHYTHM, offset).unwrap()
    }

    #[test]
    fn test_highpass_coefficient() {
        // 250 Hz at 30 kHz: 65536 * (1 - e^(-2π/120)) ≈ 3343
        assert_eq!(highpass_coefficient(250.0, 30_000.0), 3343);
        assert_eq!(highpass_coefficient(0.0, 30_000.0), 1);
        assert_eq!(highpass_coefficient(1e9, 1000.0), 65535);
    }

    #[test]
    fn test_dac_select_fields_share_register() {
        let mut s = session();
        s.enable_dac(3, true).unwrap();
        s.select_dac_data_stream(3, 17).unwrap();
        s.select_dac_data_channel(3, 31).unwrap();
        assert_eq!(read(&mut s, rhythm::DAC_SEL_1 + 3), 0x0400 | (17 << 5) | 31);
        s.enable_dac(3, false).unwrap();
        assert_eq!(read(&mut s, rhythm::DAC_SEL_1 + 3), (17 << 5) | 31);
        assert!(matches!(
            s.select_dac_data_stream(3, 18),
            Err(RhythmError::ArgumentOutOfRange { name: "dac_stream", .. })
        ));
        assert!(s.enable_dac(8, true).is_err());
    }

    #[test]
    fn test_dac_ctl_gain_and_noise() {
        let mut s = session();
        s.set_dac_gain(5).unwrap();
        s.set_audio_noise_suppress(100).unwrap();
        assert_eq!(read(&mut s, rhythm::DAC_CTL), (5 << 7) | 100);
        assert!(s.set_dac_gain(8).is_err());
        assert!(s.set_audio_noise_suppress(128).is_err());
    }

    #[test]
    fn test_hpf_enable_and_coefficient() {
        let mut s = session();
        let c = s.set_dac_highpass_filter(250.0).unwrap();
        s.enable_dac_highpass_filter(true).unwrap();
        assert_eq!(read(&mut s, rhythm::HPF), (1 << 16) | c);
    }

    #[test]
    fn test_external_triggers() {
        let mut s = session();
        s.enable_external_fast_settle(true).unwrap();
        s.set_external_fast_settle_channel(9).unwrap();
        assert_eq!(read(&mut s, rhythm::EXTERNAL_FAST_SETTLE), 0x19);
        s.set_external_dig_out_channel(Port::C, 4).unwrap();
        s.enable_external_dig_out(Port::C, true).unwrap();
        assert_eq!(read(&mut s, rhythm::EXTERNAL_DIGOUT_C), 0x14);
        assert_eq!(read(&mut s, rhythm::EXTERNAL_DIGOUT_D), 0);
        assert!(s.set_external_dig_out_channel(Port::A, 16).is_err());
    }

    #[test]
    fn test_ttl_mode_bit() {
        let mut s = session();
        s.set_ttl_mode(0).unwrap();
        assert_eq!(read(&mut s, rhythm::MODE) & (1 << mode::TTL_OUT_MODE), 0);
        assert!(s.set_ttl_mode(2).is_err());
    }

    #[test]
    fn test_ttl_bits_pack_lsb_first() {
        let mut lines = [false; 16];
        lines[0] = true;
        lines[15] = true;
        assert_eq!(pack_ttl_lines(lines), 0x8001);
        assert_eq!(pack_ttl_lines([true; 16]), 0xFFFF);
    }
}
