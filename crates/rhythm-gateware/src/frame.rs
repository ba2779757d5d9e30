//! Rhythm sample frame layout.
//!
//! Each frame from device [`crate::devices::RHYTHM`] carries exactly one
//! sample of every enabled stream as little-endian 16-bit words:
//!
//! ```text
//! word  count        contents
//! 0     4            link-layer prefix (hub clock), ignored
//! 4     4            header magic, low word first
//! 8     2            timestamp, low word first
//! 10    3 × S        aux slots, stream-major (slot 0 of all streams, then 1, then 2)
//! ..    32 × S       amplifier channels, stream-major
//! ..    S            filler, one per stream
//! ..    8            board ADCs
//! ..    1            TTL in
//! ..    1            TTL out
//! ```
//!
//! `S` is the number of enabled streams (0–16). Every offset is a function of
//! `S` alone, so the layout is computed once per session.

use crate::{CHANNELS_PER_STREAM, MAX_STREAMS};

/// 64-bit magic that opens every Rhythm sample.
pub const HEADER_MAGIC: u64 = 0xC691_1999_2702_1942;

/// Link-layer words preceding the header.
pub const PREFIX_WORDS: usize = 4;
/// Words in the header magic.
pub const HEADER_WORDS: usize = 4;
/// Words in the timestamp.
pub const TIMESTAMP_WORDS: usize = 2;
/// Auxiliary command result slots per stream.
pub const AUX_SLOTS: usize = 3;
/// Board ADC inputs.
pub const ADC_CHANNELS: usize = 8;
/// TTL in + TTL out.
pub const TTL_WORDS: usize = 2;

/// Word offsets of every field for a given stream count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    /// Enabled streams the layout was built for.
    pub streams: usize,
    /// First header word.
    pub header: usize,
    /// Timestamp low word.
    pub timestamp: usize,
    /// First aux word.
    pub aux: usize,
    /// First amplifier word.
    pub amplifier: usize,
    /// First filler word.
    pub filler: usize,
    /// First ADC word.
    pub adc: usize,
    /// TTL in word.
    pub ttl_in: usize,
    /// TTL out word.
    pub ttl_out: usize,
    /// Total words in one sample.
    pub words: usize,
}

impl SampleLayout {
    /// Layout for `streams` enabled streams. Counts above 16 are clamped.
    #[must_use]
    pub const fn new(streams: usize) -> Self {
        let streams = if streams > MAX_STREAMS { MAX_STREAMS } else { streams };
        let header = PREFIX_WORDS;
        let timestamp = header + HEADER_WORDS;
        let aux = timestamp + TIMESTAMP_WORDS;
        let amplifier = aux + AUX_SLOTS * streams;
        let filler = amplifier + CHANNELS_PER_STREAM * streams;
        let adc = filler + streams;
        let ttl_in = adc + ADC_CHANNELS;
        let ttl_out = ttl_in + 1;
        Self {
            streams,
            header,
            timestamp,
            aux,
            amplifier,
            filler,
            adc,
            ttl_in,
            ttl_out,
            words: ttl_out + 1,
        }
    }

    /// Sample size in bytes.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.words * 2
    }

    /// Word index of aux `slot` for `stream`.
    #[must_use]
    pub const fn aux_word(&self, slot: usize, stream: usize) -> usize {
        self.aux + slot * self.streams + stream
    }

    /// Word index of amplifier `channel` for `stream`.
    #[must_use]
    pub const fn amplifier_word(&self, channel: usize, stream: usize) -> usize {
        self.amplifier + channel * self.streams + stream
    }

    /// Rows of the channel-major amplifier buffer. Never zero.
    #[must_use]
    pub const fn amplifier_rows(&self) -> usize {
        let rows = self.streams * CHANNELS_PER_STREAM;
        if rows == 0 {
            1
        } else {
            rows
        }
    }
}

/// The magic split into the four words as they appear on the wire.
#[must_use]
pub const fn header_words() -> [u16; HEADER_WORDS] {
    [
        (HEADER_MAGIC & 0xFFFF) as u16,
        ((HEADER_MAGIC >> 16) & 0xFFFF) as u16,
        ((HEADER_MAGIC >> 32) & 0xFFFF) as u16,
        ((HEADER_MAGIC >> 48) & 0xFFFF) as u16,
    ]
}

/// Reassemble a 64-bit header from four wire words.
#[must_use]
pub const fn assemble_header(words: [u16; HEADER_WORDS]) -> u64 {
    (words[0] as u64) | ((words[1] as u64) << 16) | ((words[2] as u64) << 32) | ((words[3] as u64) << 48)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_without_streams() {
        let l = SampleLayout::new(0);
        assert_eq!(l.aux, 10);
        assert_eq!(l.amplifier, 10);
        assert_eq!(l.adc, 10);
        assert_eq!(l.ttl_out, 19);
        assert_eq!(l.words, 20);
        assert_eq!(l.amplifier_rows(), 1);
    }

    #[test]
    fn layout_scales_with_streams() {
        for s in 0..=MAX_STREAMS {
            assert_eq!(SampleLayout::new(s).words, 20 + 36 * s);
        }
        let l = SampleLayout::new(2);
        assert_eq!(l.aux_word(1, 1), 13);
        assert_eq!(l.amplifier_word(0, 0), 16);
        assert_eq!(l.filler, 16 + 64);
        assert_eq!(l.amplifier_rows(), 64);
    }

    #[test]
    fn layout_clamps_stream_count() {
        assert_eq!(SampleLayout::new(40), SampleLayout::new(MAX_STREAMS));
    }

    #[test]
    fn header_word_order() {
        let w = header_words();
        assert_eq!(w, [0x1942, 0x2702, 0x1999, 0xC691]);
        assert_eq!(assemble_header(w), HEADER_MAGIC);
    }
}
