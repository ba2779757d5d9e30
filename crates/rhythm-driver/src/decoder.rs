//! Sample frame decoding
//!
//! [`FrameDecoder`] turns one Rhythm frame payload into one column of a
//! [`SampleBatch`]. The decoder holds only the [`SampleLayout`] for the
//! session's stream count; it keeps no state between samples.
//!
//! Storage is channel-major so each channel's samples are contiguous:
//!
//! ```text
//! amplifier   [max(1, streams × 32)][samples]   row = stream × 32 + channel
//! aux         [streams × 3][samples]            row = stream × 3 + slot
//! adc         [8][samples]
//! ```

use crate::error::{check_index, Result, RhythmError};
use rhythm_gateware::frame::{self, SampleLayout, ADC_CHANNELS, AUX_SLOTS};
use rhythm_gateware::CHANNELS_PER_STREAM;

/// Aux slot carrying the accelerometer round-robin.
const ACCELEROMETER_SLOT: usize = 1;

/// Commands in one accelerometer round (temperature/dummy, then x, y, z).
const ACCELEROMETER_PERIOD: usize = 4;

/// A fixed number of decoded samples
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    streams: usize,
    samples: usize,
    timestamps: Vec<u32>,
    aux: Vec<u16>,
    amplifier: Vec<u16>,
    adc: Vec<u16>,
    ttl_in: Vec<u16>,
    ttl_out: Vec<u16>,
    buffer_fullness: f64,
}

impl SampleBatch {
    /// Zeroed batch for `streams` streams and `samples` samples
    pub fn new(streams: usize, samples: usize) -> Self {
        let layout = SampleLayout::new(streams);
        let streams = layout.streams;
        Self {
            streams,
            samples,
            timestamps: vec![0; samples],
            aux: vec![0; streams * AUX_SLOTS * samples],
            amplifier: vec![0; layout.amplifier_rows() * samples],
            adc: vec![0; ADC_CHANNELS * samples],
            ttl_in: vec![0; samples],
            ttl_out: vec![0; samples],
            buffer_fullness: 0.0,
        }
    }

    /// Enabled streams
    pub fn streams(&self) -> usize {
        self.streams
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.samples
    }

    /// Whether the batch holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    /// Sample timestamps
    pub fn timestamps(&self) -> &[u32] {
        &self.timestamps
    }

    /// Amplifier rows. At least 1, even with no streams.
    pub fn amplifier_rows(&self) -> usize {
        self.amplifier.len().checked_div(self.samples).unwrap_or(0).max(1)
    }

    /// All amplifier data, row-major
    pub fn amplifier_data(&self) -> &[u16] {
        &self.amplifier
    }

    /// Samples of amplifier row `row` (`stream × 32 + channel`)
    pub fn amplifier(&self, row: usize) -> Option<&[u16]> {
        self.row(&self.amplifier, row)
    }

    /// Samples of aux `slot` for `stream`
    pub fn aux(&self, stream: usize, slot: usize) -> Option<&[u16]> {
        if stream >= self.streams || slot >= AUX_SLOTS {
            return None;
        }
        self.row(&self.aux, stream * AUX_SLOTS + slot)
    }

    /// Samples of board ADC `channel`
    pub fn adc(&self, channel: usize) -> Option<&[u16]> {
        if channel >= ADC_CHANNELS {
            return None;
        }
        self.row(&self.adc, channel)
    }

    /// TTL input lines per sample
    pub fn ttl_in(&self) -> &[u16] {
        &self.ttl_in
    }

    /// TTL output lines per sample
    pub fn ttl_out(&self) -> &[u16] {
        &self.ttl_out
    }

    /// Hardware buffer fill level at emission, percent
    pub fn buffer_fullness(&self) -> f64 {
        self.buffer_fullness
    }

    pub(crate) fn set_buffer_fullness(&mut self, percent: f64) {
        self.buffer_fullness = percent;
    }

    /// Accelerometer x, y, z of the first stream
    ///
    /// The aux sampling list reads the three headstage aux inputs round-robin
    /// on slot 1, one every four samples. Returns `None` without streams.
    pub fn accelerometer(&self) -> Option<[Vec<u16>; 3]> {
        let slot = self.aux(0, ACCELEROMETER_SLOT)?;
        let rounds = self.samples / ACCELEROMETER_PERIOD;
        let axis = |j: usize| -> Vec<u16> {
            (0..rounds)
                .map(|i| slot[(j + 1) % ACCELEROMETER_PERIOD + i * ACCELEROMETER_PERIOD])
                .collect()
        };
        Some([axis(0), axis(1), axis(2)])
    }

    fn row<'a>(&self, data: &'a [u16], row: usize) -> Option<&'a [u16]> {
        let start = row.checked_mul(self.samples)?;
        data.get(start..start + self.samples)
    }
}

/// Stateless per-sample decoder for a fixed stream count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDecoder {
    layout: SampleLayout,
}

impl FrameDecoder {
    /// Decoder for `streams` enabled streams
    pub fn new(streams: usize) -> Self {
        Self {
            layout: SampleLayout::new(streams),
        }
    }

    /// Layout in use
    pub fn layout(&self) -> &SampleLayout {
        &self.layout
    }

    /// Empty batch shaped for this decoder
    pub fn new_batch(&self, samples: usize) -> SampleBatch {
        SampleBatch::new(self.layout.streams, samples)
    }

    /// Decode one sample payload into column `slot` of `batch`
    ///
    /// The header is validated before anything is written.
    ///
    /// # Errors
    ///
    /// - `FrameLength` if the payload is shorter than the layout
    /// - `HeaderMismatch` if the magic does not match (`sample` = `slot`)
    /// - `ArgumentOutOfRange` if `slot` is outside the batch
    pub fn decode_into(&self, payload: &[u8], batch: &mut SampleBatch, slot: usize) -> Result<()> {
        let l = &self.layout;
        if payload.len() < l.bytes() {
            return Err(RhythmError::FrameLength {
                expected: l.bytes(),
                actual: payload.len(),
            });
        }
        if batch.samples == 0 {
            return Err(RhythmError::out_of_range("slot", 0, -1));
        }
        check_index("slot", slot, batch.samples - 1)?;
        if batch.streams != l.streams {
            return Err(RhythmError::invalid_state(format!(
                "batch shaped for {} streams, decoder for {}",
                batch.streams, l.streams
            )));
        }

        let word = |i: usize| u16::from_le_bytes([payload[2 * i], payload[2 * i + 1]]);

        let found = frame::assemble_header([
            word(l.header),
            word(l.header + 1),
            word(l.header + 2),
            word(l.header + 3),
        ]);
        if found != frame::HEADER_MAGIC {
            return Err(RhythmError::HeaderMismatch {
                found,
                sample: slot as u64,
            });
        }

        let n = batch.samples;
        batch.timestamps[slot] = u32::from(word(l.timestamp)) | (u32::from(word(l.timestamp + 1)) << 16);

        for aux_slot in 0..AUX_SLOTS {
            for stream in 0..l.streams {
                batch.aux[(stream * AUX_SLOTS + aux_slot) * n + slot] = word(l.aux_word(aux_slot, stream));
            }
        }
        for channel in 0..CHANNELS_PER_STREAM {
            for stream in 0..l.streams {
                let row = stream * CHANNELS_PER_STREAM + channel;
                batch.amplifier[row * n + slot] = word(l.amplifier_word(channel, stream));
            }
        }
        for channel in 0..ADC_CHANNELS {
            batch.adc[channel * n + slot] = word(l.adc + channel);
        }
        batch.ttl_in[slot] = word(l.ttl_in);
        batch.ttl_out[slot] = word(l.ttl_out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a sample the way the gateware lays it out.
    fn synth(streams: usize, timestamp: u32, amp: impl Fn(usize, usize) -> u16) -> Vec<u8> {
        let l = SampleLayout::new(streams);
        let mut w = vec![0u16; l.words];
        w[l.header..l.header + 4].copy_from_slice(&frame::header_words());
        w[l.timestamp] = (timestamp & 0xFFFF) as u16;
        w[l.timestamp + 1] = (timestamp >> 16) as u16;
        for slot in 0..AUX_SLOTS {
            for s in 0..streams {
                w[l.aux_word(slot, s)] = (100 * slot + s) as u16;
            }
        }
        for c in 0..CHANNELS_PER_STREAM {
            for s in 0..streams {
                w[l.amplifier_word(c, s)] = amp(s, c);
            }
        }
        for a in 0..ADC_CHANNELS {
            w[l.adc + a] = 7000 + a as u16;
        }
        w[l.ttl_in] = 0xBEEF;
        w[l.ttl_out] = 0x0F0F;
        w.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_known_sample() {
        let dec = FrameDecoder::new(3);
        let mut batch = dec.new_batch(4);
        let payload = synth(3, 0x0001_0002, |s, c| (s * 1000 + c) as u16);
        dec.decode_into(&payload, &mut batch, 2).unwrap();

        assert_eq!(batch.timestamps()[2], 0x0001_0002);
        assert_eq!(batch.amplifier(0).unwrap()[2], 0);
        assert_eq!(batch.amplifier(31).unwrap()[2], 31);
        assert_eq!(batch.amplifier(32 + 5).unwrap()[2], 1005);
        assert_eq!(batch.amplifier(2 * 32 + 17).unwrap()[2], 2017);
        assert_eq!(batch.aux(1, 2).unwrap()[2], 201);
        assert_eq!(batch.adc(7).unwrap()[2], 7007);
        assert_eq!(batch.ttl_in()[2], 0xBEEF);
        assert_eq!(batch.ttl_out()[2], 0x0F0F);
        // Other columns untouched.
        assert_eq!(batch.timestamps()[1], 0);
    }

    #[test]
    fn corrupt_header_word_is_rejected() {
        let dec = FrameDecoder::new(1);
        let good = synth(1, 9, |_, c| c as u16);
        for i in 0..4 {
            let mut bad = good.clone();
            bad[2 * (frame::PREFIX_WORDS + i)] ^= 0x01;
            let mut batch = dec.new_batch(1);
            let err = dec.decode_into(&bad, &mut batch, 0).unwrap_err();
            assert!(matches!(err, RhythmError::HeaderMismatch { sample: 0, .. }), "word {i}");
            assert_eq!(batch.timestamps()[0], 0, "nothing written on failure");
        }
    }

    #[test]
    fn zero_streams_keeps_one_amplifier_row() {
        let dec = FrameDecoder::new(0);
        let mut batch = dec.new_batch(8);
        dec.decode_into(&synth(0, 5, |_, _| 0), &mut batch, 7).unwrap();
        assert_eq!(batch.amplifier_rows(), 1);
        assert_eq!(batch.amplifier(0).unwrap().len(), 8);
        assert!(batch.aux(0, 0).is_none());
        assert!(batch.accelerometer().is_none());
        assert_eq!(batch.adc(3).unwrap()[7], 7003);
    }

    #[test]
    fn short_payload_and_bad_slot() {
        let dec = FrameDecoder::new(2);
        let payload = synth(2, 0, |_, _| 0);
        let mut batch = dec.new_batch(2);
        assert!(matches!(
            dec.decode_into(&payload[..payload.len() - 2], &mut batch, 0),
            Err(RhythmError::FrameLength { .. })
        ));
        assert!(matches!(
            dec.decode_into(&payload, &mut batch, 2),
            Err(RhythmError::ArgumentOutOfRange { name: "slot", .. })
        ));
    }

    #[test]
    fn accelerometer_deinterleave() {
        let mut batch = SampleBatch::new(1, 8);
        for i in 0..8 {
            batch.aux[8 + i] = i as u16;
        }
        let [x, y, z] = batch.accelerometer().unwrap();
        assert_eq!(x, vec![1, 5]);
        assert_eq!(y, vec![2, 6]);
        assert_eq!(z, vec![3, 7]);
    }
}
