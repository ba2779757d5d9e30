//! Cable propagation model.
//!
//! The board samples each MISO line a programmable number of clock steps after
//! driving SCLK. The right delay depends on the round trip through the
//! headstage cable plus fixed LVDS and chip latencies. The SPI clock runs at
//! 2800 steps per sample period.

use crate::rate::SampleRate;

/// Speed of light in vacuum, m/s.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Signal velocity in the headstage cable relative to c.
pub const CABLE_VELOCITY_FACTOR: f64 = 0.555;

/// FPGA LVDS output delay, seconds.
pub const LVDS_OUTPUT_DELAY: f64 = 1.9e-9;
/// FPGA LVDS input delay, seconds.
pub const LVDS_INPUT_DELAY: f64 = 1.4e-9;
/// RHD2000 SCLK → MISO response, seconds.
pub const CHIP_RESPONSE_DELAY: f64 = 9.0e-9;
/// MISO settle time, seconds.
pub const MISO_SETTLE_TIME: f64 = 6.7e-9;

/// Largest delay the cable delay register can hold.
pub const MAX_DELAY: u8 = 15;

/// Meters per foot.
pub const METERS_PER_FOOT: f64 = 0.3048;
/// Feet per meter.
pub const FEET_PER_METER: f64 = 3.2808;

const FIXED_DELAY: f64 = LVDS_OUTPUT_DELAY + CHIP_RESPONSE_DELAY + LVDS_INPUT_DELAY + MISO_SETTLE_TIME;

/// Duration of one SPI clock step at `rate`, seconds.
#[must_use]
pub fn clock_step(rate: SampleRate) -> f64 {
    1.0 / (2800.0 * rate.hz())
}

fn cable_velocity() -> f64 {
    CABLE_VELOCITY_FACTOR * SPEED_OF_LIGHT
}

/// MISO delay for a cable of `meters`. Never below 1; may exceed
/// [`MAX_DELAY`] for long cables at high rates.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn meters_to_delay(meters: f64, rate: SampleRate) -> u32 {
    let round_trip = 2.0 * meters.max(0.0) / cable_velocity() + FIXED_DELAY;
    let delay = ((round_trip / clock_step(rate)) + 1.0 + 0.5).floor();
    if delay < 1.0 {
        1
    } else {
        delay as u32
    }
}

/// Cable length implied by `delay`. Never negative.
#[must_use]
pub fn delay_to_meters(delay: u32, rate: SampleRate) -> f64 {
    let round_trip = (f64::from(delay) - 1.0) * clock_step(rate) - FIXED_DELAY;
    let distance = cable_velocity() * round_trip;
    if distance < 0.0 {
        0.0
    } else {
        distance / 2.0
    }
}

/// Delay clamped to what the register can hold.
#[must_use]
pub fn register_delay(delay: u32) -> u8 {
    u8::try_from(delay.min(u32::from(MAX_DELAY))).unwrap_or(MAX_DELAY)
}

/// Feet to meters.
#[must_use]
pub fn feet_to_meters(feet: f64) -> f64 {
    feet * METERS_PER_FOOT
}

/// Meters to feet.
#[must_use]
pub fn meters_to_feet(meters: f64) -> f64 {
    meters * FEET_PER_METER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_step_at_30k() {
        let step = clock_step(SampleRate::Hz30000);
        assert!((step - 1.0 / 84.0e6).abs() < 1e-15);
    }

    #[test]
    fn zero_length_cable() {
        assert_eq!(meters_to_delay(0.0, SampleRate::Hz30000), 3);
        assert_eq!(meters_to_delay(0.0, SampleRate::Hz1000), 1);
        assert!(delay_to_meters(1, SampleRate::Hz30000).abs() < f64::EPSILON);
    }

    #[test]
    fn three_foot_cable_at_30k() {
        let d = meters_to_delay(feet_to_meters(3.0), SampleRate::Hz30000);
        assert_eq!(d, 4);
    }

    #[test]
    fn round_trip_within_one_step() {
        for rate in [SampleRate::Hz1000, SampleRate::Hz20000, SampleRate::Hz30000] {
            let floor = meters_to_delay(0.0, rate);
            for d in 1..=15u32 {
                let m = delay_to_meters(d, rate);
                let back = meters_to_delay(m, rate);
                if m > 0.0 {
                    assert!(back.abs_diff(d) <= 1, "rate {rate} delay {d} -> {m} m -> {back}");
                } else {
                    assert_eq!(back, floor, "rate {rate} delay {d} clamps to zero length");
                }
            }
        }
    }

    #[test]
    fn register_delay_saturates() {
        assert_eq!(register_delay(3), 3);
        assert_eq!(register_delay(40), 15);
    }

    #[test]
    fn feet_meters() {
        assert!((meters_to_feet(feet_to_meters(10.0)) - 10.0).abs() < 1e-3);
    }
}
