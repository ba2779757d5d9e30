// SPDX-License-Identifier: AGPL-3.0-only

//! Simulated Rhythm board
//!
//! Implements [`Transport`] with an in-process model of the gateware, so the
//! whole driver (calibration, acquisition, streaming) runs in CI without a
//! board attached.
//!
//! ## What is modelled
//!
//! - A flat register file per device, with the read-only registers (clock
//!   busy, SPI running, memory monitor clock/size, gateware version) behaving
//!   like the hardware.
//! - Hub clock switching: `CLOCK_BUSY` reads non-zero for a configurable
//!   number of polls after each `CLOCK_SEL` write.
//! - Bounded runs: with continuous mode off, the board produces exactly
//!   `MAX_TIMESTEP` samples. Polling `SPI_RUNNING` advances the SPI engine.
//! - Aux command execution: every sample, each stream's three aux slots
//!   return the result of the command uploaded for the port's selected bank,
//!   `SPI_PIPELINE_DEPTH + ROM_SAMPLE_SHIFT` samples late. `READ` commands
//!   answer from the ROM of the chip at that position, but only when the
//!   port's cable delay is within one step of the chip's ideal delay.
//! - Memory monitor frames every `CLK_DIV × rate / CLK_HZ` samples.
//! - An idle board (stopped, or a bounded run that has finished) produces
//!   nothing, so frame reads wait out their whole timeout.
//!
//! Sample contents are deterministic functions of the timestamp (see
//! [`SimulatedBoard::amplifier_value`]) so decoded data can be checked.

use crate::error::{Result, RhythmError};
use crate::transport::{Frame, Transport, TransportFactory, TransportKind};
use bytes::{BufMut, BytesMut};
use rhythm_gateware::frame::{self, SampleLayout};
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::rhd::{self, ChipKind, DataSource, Port};
use rhythm_gateware::{devices, regs, timing, CHANNELS_PER_STREAM, CHIP_POSITIONS, MAX_STREAMS};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Memory monitor clock reported by the model.
pub const DEFAULT_MONITOR_CLOCK_HZ: u32 = 100_000_000;

/// Board memory size reported by the model, in 32-bit words.
pub const DEFAULT_TOTAL_MEMORY_WORDS: u32 = 1 << 24;

/// Gateware version reported by the model.
pub const DEFAULT_GATEWARE_VERSION: u32 = 0x0001_0004;

/// Samples the SPI engine advances per `SPI_RUNNING` poll.
const SPI_POLL_STEP: u64 = 64;

/// Samples between a command and its result appearing in a frame.
const RESULT_LATENCY: u64 = (rhd::SPI_PIPELINE_DEPTH + rhd::ROM_SAMPLE_SHIFT) as u64;

/// A chip attached to one MISO line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedChip {
    /// Chip type
    pub kind: ChipKind,
    /// Cable length to the headstage
    pub cable_meters: f64,
}

impl SimulatedChip {
    /// Chip of `kind` at the end of a `cable_meters` cable
    pub fn new(kind: ChipKind, cable_meters: f64) -> Self {
        Self { kind, cable_meters }
    }

    /// Delay at which MISO sampling lands mid-bit
    pub fn ideal_delay(&self, rate: SampleRate) -> u32 {
        timing::meters_to_delay(self.cable_meters, rate)
    }

    /// Whether the ROM reads back cleanly at `delay`
    pub fn responds_at(&self, delay: u32, rate: SampleRate) -> bool {
        self.ideal_delay(rate).abs_diff(delay) <= 1
    }
}

/// In-process gateware model
#[derive(Debug, Clone)]
pub struct SimulatedBoard {
    registers: HashMap<(u16, u16), u32>,
    chips: [Option<SimulatedChip>; CHIP_POSITIONS],
    clock_busy_reads: u32,
    clock_busy_remaining: u32,
    memory_used: u32,
    corrupt_header_at: Option<u64>,
    ttl_out: u16,
    dac_manual: u16,
    running: bool,
    closed: bool,
    timestamp: u32,
    run_sample: u64,
    remaining: Option<u64>,
    since_memory_report: u64,
    rhythm_frames: u64,
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBoard {
    /// Board with no chips attached
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        registers.insert((devices::MEMORY_MONITOR, regs::memory::CLK_HZ), DEFAULT_MONITOR_CLOCK_HZ);
        registers.insert(
            (devices::MEMORY_MONITOR, regs::memory::TOTAL_MEM),
            DEFAULT_TOTAL_MEMORY_WORDS,
        );
        registers.insert((devices::GATEWARE_INFO, regs::info::VERSION), DEFAULT_GATEWARE_VERSION);
        Self {
            registers,
            chips: [None; CHIP_POSITIONS],
            clock_busy_reads: 2,
            clock_busy_remaining: 0,
            memory_used: DEFAULT_TOTAL_MEMORY_WORDS / 4,
            corrupt_header_at: None,
            ttl_out: 0,
            dac_manual: 0,
            running: false,
            closed: false,
            timestamp: 0,
            run_sample: 0,
            remaining: None,
            since_memory_report: 0,
            rhythm_frames: 0,
        }
    }

    /// Attach `chip` at chip position `position` (0..8: A1, A2, B1, …)
    ///
    /// Positions outside the board are ignored.
    pub fn with_chip(mut self, position: usize, chip: SimulatedChip) -> Self {
        if let Some(slot) = self.chips.get_mut(position) {
            *slot = Some(chip);
        }
        self
    }

    /// Number of busy reads after each clock change
    pub fn with_clock_busy_reads(mut self, reads: u32) -> Self {
        self.clock_busy_reads = reads;
        self
    }

    /// Words reported as queued by the memory monitor
    pub fn with_memory_used(mut self, words: u32) -> Self {
        self.memory_used = words;
        self
    }

    /// Flip the header of the `n`th Rhythm frame of a continuous run
    ///
    /// Counted from the last counter reset. Bounded runs are never corrupted.
    pub fn with_corrupt_header_at(mut self, n: u64) -> Self {
        self.corrupt_header_at = Some(n);
        self
    }

    /// Current TTL output lines
    pub fn ttl_out(&self) -> u16 {
        self.ttl_out
    }

    /// Last manual DAC value
    pub fn dac_manual(&self) -> u16 {
        self.dac_manual
    }

    /// Raw register contents, bypassing read side effects
    pub fn peek(&self, device: u16, offset: u16) -> u32 {
        self.reg(device, offset)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Amplifier word the model produces for `channel` of `source`
    #[allow(clippy::cast_possible_truncation)]
    pub fn amplifier_value(timestamp: u32, source: DataSource, channel: usize) -> u16 {
        let base = u16::from(source.code()) * 2048 + (channel as u16 & 0x1F) * 64;
        base.wrapping_add((timestamp & 0x3F) as u16)
    }

    /// ADC word the model produces for board ADC `index`
    #[allow(clippy::cast_possible_truncation)]
    pub fn adc_value(timestamp: u32, index: usize) -> u16 {
        ((index as u16 & 0x7) << 12) | (timestamp & 0x0FFF) as u16
    }

    fn reg(&self, device: u16, offset: u16) -> u32 {
        self.registers.get(&(device, offset)).copied().unwrap_or(0)
    }

    fn link_closed(device: u16, offset: u16) -> RhythmError {
        RhythmError::register_io(device, offset, "link closed")
    }

    fn rate(&self) -> SampleRate {
        SampleRate::from_clock_word(self.reg(devices::HUB_MANAGER, regs::hub::CLOCK_SEL)).unwrap_or_default()
    }

    fn cable_delay(&self, port: Port) -> u32 {
        (self.reg(devices::RHYTHM, regs::rhythm::CABLE_DELAY) >> port.nibble_shift()) & regs::fields::NIBBLE
    }

    fn enabled_sources(&self) -> Vec<DataSource> {
        let enabled = self.reg(devices::RHYTHM, regs::rhythm::DATA_STREAM_EN);
        (0..MAX_STREAMS)
            .filter(|s| enabled & (1 << s) != 0)
            .filter_map(|s| {
                #[allow(clippy::cast_possible_truncation)]
                let offset = regs::rhythm::DATA_STREAM_1_8_SEL + (s / 8) as u16;
                let shift = 4 * (s % 8);
                let code = (self.reg(devices::RHYTHM, offset) >> shift) & regs::fields::NIBBLE;
                DataSource::from_code(u8::try_from(code).ok()?)
            })
            .collect()
    }

    fn poll_spi_running(&mut self) -> u32 {
        if !self.running {
            return 0;
        }
        match self.remaining {
            None => 1,
            Some(0) => 0,
            Some(n) => {
                self.advance(n.min(SPI_POLL_STEP));
                1
            }
        }
    }

    fn advance(&mut self, samples: u64) {
        #[allow(clippy::cast_possible_truncation)]
        let step = samples as u32;
        self.timestamp = self.timestamp.wrapping_add(step);
        self.run_sample += samples;
        self.remaining = self.remaining.map(|r| r.saturating_sub(samples));
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn memory_period(&self) -> Option<u64> {
        let div = self.reg(devices::MEMORY_MONITOR, regs::memory::CLK_DIV);
        let hz = self.reg(devices::MEMORY_MONITOR, regs::memory::CLK_HZ);
        if div == 0 || hz == 0 {
            return None;
        }
        let period = (f64::from(div) * self.rate().hz() / f64::from(hz)).round();
        Some(period.max(1.0) as u64)
    }

    fn memory_report_due(&self) -> bool {
        self.reg(devices::MEMORY_MONITOR, regs::memory::ENABLE) != 0
            && self.memory_period().is_some_and(|p| self.since_memory_report >= p)
    }

    fn memory_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(0);
        buf.put_u32_le(self.memory_used);
        buf.put_u32_le(0);
        Frame::new(devices::MEMORY_MONITOR, buf.freeze())
    }

    fn command_index(m: u64, loop_index: u32, end_index: u32) -> u64 {
        let (lp, end) = (u64::from(loop_index), u64::from(end_index));
        if m <= end || end < lp {
            m.min(end)
        } else {
            lp + (m - lp) % (end - lp + 1)
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn aux_result(&self, slot: usize, source: DataSource) -> u16 {
        if self.run_sample < RESULT_LATENCY {
            return 0;
        }
        let slot16 = slot as u16;
        let port = source.port();
        let bank_reg = self.reg(devices::RHYTHM, regs::rhythm::AUXCMD_BANK_1 + slot16);
        let bank = (bank_reg >> port.nibble_shift()) & regs::fields::NIBBLE;
        let loop_index = self.reg(devices::RHYTHM, regs::rhythm::LOOP_AUXCMD_INDEX_1 + slot16);
        let end_index = self.reg(devices::RHYTHM, regs::rhythm::MAX_AUXCMD_INDEX_1 + slot16);
        let index = Self::command_index(self.run_sample - RESULT_LATENCY, loop_index, end_index)
            .min(regs::rhythm::COMMAND_RAM_BANK_SIZE as u64 - 1);
        let address = regs::command_ram_address(slot16, bank as u16, index as u16);
        let word = self.reg(devices::RHYTHM, address) as u16;
        match rhd::command::read_target(word) {
            Some(register) => self.rom_response(source, register),
            None => 0,
        }
    }

    fn rom_response(&self, source: DataSource, register: u8) -> u16 {
        let Some(chip) = self.chips[source.position()] else {
            return 0xFFFF;
        };
        if source.is_ddr() && chip.kind != ChipKind::Rhd2164 {
            return 0xFFFF;
        }
        if !chip.responds_at(self.cable_delay(source.port()), self.rate()) {
            return 0xFFFF;
        }
        rhd::rom_register(chip.kind, register)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn rhythm_frame(&mut self) -> Frame {
        let sources = self.enabled_sources();
        let layout = SampleLayout::new(sources.len());
        let ts = self.timestamp;
        let mut words = vec![0u16; layout.words];

        for (i, w) in words[..frame::PREFIX_WORDS].iter_mut().enumerate() {
            *w = (self.run_sample >> (16 * i)) as u16;
        }
        let mut header = frame::header_words();
        if self.remaining.is_none() && self.corrupt_header_at == Some(self.rhythm_frames) {
            header[0] ^= 0xFFFF;
        }
        words[layout.header..layout.header + frame::HEADER_WORDS].copy_from_slice(&header);
        words[layout.timestamp] = (ts & 0xFFFF) as u16;
        words[layout.timestamp + 1] = (ts >> 16) as u16;

        for slot in 0..frame::AUX_SLOTS {
            for (k, &source) in sources.iter().enumerate() {
                words[layout.aux_word(slot, k)] = self.aux_result(slot, source);
            }
        }
        for channel in 0..CHANNELS_PER_STREAM {
            for (k, &source) in sources.iter().enumerate() {
                words[layout.amplifier_word(channel, k)] = Self::amplifier_value(ts, source, channel);
            }
        }
        for (i, w) in words[layout.adc..layout.adc + frame::ADC_CHANNELS].iter_mut().enumerate() {
            *w = Self::adc_value(ts, i);
        }
        words[layout.ttl_in] = (ts & 0xFFFF) as u16;
        words[layout.ttl_out] = self.ttl_out;

        self.rhythm_frames += 1;
        let mut buf = BytesMut::with_capacity(layout.bytes());
        for w in words {
            buf.put_u16_le(w);
        }
        Frame::new(devices::RHYTHM, buf.freeze())
    }
}

impl Transport for SimulatedBoard {
    fn read_register(&mut self, device: u16, offset: u16) -> Result<u32> {
        if self.closed {
            return Err(Self::link_closed(device, offset));
        }
        let value = match (device, offset) {
            (devices::HUB_MANAGER, regs::hub::CLOCK_BUSY) => {
                let busy = self.clock_busy_remaining > 0;
                self.clock_busy_remaining = self.clock_busy_remaining.saturating_sub(1);
                u32::from(busy)
            }
            (devices::RHYTHM, regs::rhythm::SPI_RUNNING) => self.poll_spi_running(),
            _ => self.reg(device, offset),
        };
        Ok(value)
    }

    fn write_register(&mut self, device: u16, offset: u16, value: u32) -> Result<()> {
        if self.closed {
            return Err(Self::link_closed(device, offset));
        }
        match (device, offset) {
            (devices::HUB_MANAGER, regs::hub::CLOCK_SEL) => {
                self.registers.insert((device, offset), value);
                self.clock_busy_remaining = self.clock_busy_reads;
                debug!("Simulated sample clock now {}", self.rate());
            }
            (devices::HUB_MANAGER, regs::hub::CLOCK_BUSY)
            | (devices::RHYTHM, regs::rhythm::SPI_RUNNING)
            | (devices::MEMORY_MONITOR, regs::memory::CLK_HZ | regs::memory::TOTAL_MEM)
            | (devices::GATEWARE_INFO, _) => {}
            _ => {
                self.registers.insert((device, offset), value);
            }
        }
        Ok(())
    }

    fn write_data(&mut self, device: u16, words: &[u32]) -> Result<()> {
        if self.closed {
            return Err(Self::link_closed(device, 0));
        }
        if device != devices::TTL {
            return Err(RhythmError::register_io(device, 0, "device accepts no data writes"));
        }
        #[allow(clippy::cast_possible_truncation)]
        let low = (words.first().copied().unwrap_or(0) & 0xFFFF) as u16;
        if words.len() == 4 {
            self.dac_manual = low;
        } else {
            self.ttl_out = low;
        }
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if self.closed {
            return Err(Self::link_closed(devices::RHYTHM, 0));
        }
        if !self.running || self.remaining == Some(0) {
            // The reader owns the board, so nothing can start it meanwhile.
            if !timeout.is_zero() {
                thread::sleep(timeout);
            }
            return Ok(None);
        }
        if self.memory_report_due() {
            self.since_memory_report = 0;
            return Ok(Some(self.memory_frame()));
        }
        let frame = self.rhythm_frame();
        self.advance(1);
        self.since_memory_report += 1;
        Ok(Some(frame))
    }

    fn start(&mut self, reset_counters: bool) -> Result<()> {
        if self.closed {
            return Err(Self::link_closed(devices::RHYTHM, regs::rhythm::ENABLE));
        }
        if reset_counters {
            self.timestamp = 0;
            self.run_sample = 0;
            self.rhythm_frames = 0;
        }
        let mode = self.reg(devices::RHYTHM, regs::rhythm::MODE);
        let continuous = mode & (1 << regs::mode::SPI_RUN_CONTINUOUS) != 0;
        self.remaining = if continuous {
            None
        } else {
            Some(u64::from(self.reg(devices::RHYTHM, regs::rhythm::MAX_TIMESTEP)))
        };
        self.since_memory_report = 0;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.closed {
            return Err(Self::link_closed(devices::RHYTHM, regs::rhythm::ENABLE));
        }
        self.running = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if self.closed {
            return Err(Self::link_closed(devices::HUB_MANAGER, 0));
        }
        self.running = false;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.running = false;
        self.closed = true;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }
}

/// Opens clones of a template [`SimulatedBoard`]
#[derive(Debug, Clone)]
pub struct SimulatedFactory {
    board: SimulatedBoard,
    boards: u32,
}

impl SimulatedFactory {
    /// One board at index 0
    pub fn new(board: SimulatedBoard) -> Self {
        Self { board, boards: 1 }
    }

    /// Number of identical boards attached
    pub fn with_board_count(mut self, boards: u32) -> Self {
        self.boards = boards;
        self
    }

    /// No boards attached; every open fails
    pub fn unavailable() -> Self {
        Self::new(SimulatedBoard::new()).with_board_count(0)
    }
}

impl TransportFactory for SimulatedFactory {
    fn open(&self, index: u32) -> Result<Box<dyn Transport>> {
        if index >= self.boards {
            return Err(RhythmError::transport_unavailable(
                index,
                format!("no simulated board at index {index} ({} attached)", self.boards),
            ));
        }
        info!("Opened simulated board {index}");
        Ok(Box::new(self.board.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuous(board: &mut SimulatedBoard) {
        board
            .write_register(devices::RHYTHM, regs::rhythm::MODE, 1 << regs::mode::SPI_RUN_CONTINUOUS)
            .unwrap();
    }

    fn rhythm_words(frame: &Frame) -> Vec<u16> {
        assert_eq!(frame.device, devices::RHYTHM);
        frame.words_u16().collect()
    }

    #[test]
    fn test_clock_busy_clears() {
        let mut board = SimulatedBoard::new().with_clock_busy_reads(3);
        board
            .write_register(devices::HUB_MANAGER, regs::hub::CLOCK_SEL, SampleRate::Hz1000.clock_word())
            .unwrap();
        let busy: Vec<u32> = (0..4)
            .map(|_| board.read_register(devices::HUB_MANAGER, regs::hub::CLOCK_BUSY).unwrap())
            .collect();
        assert_eq!(busy, vec![1, 1, 1, 0]);
        assert_eq!(board.rate(), SampleRate::Hz1000);
    }

    #[test]
    fn test_bounded_run_produces_max_timestep_samples() {
        let mut board = SimulatedBoard::new();
        board.write_register(devices::RHYTHM, regs::rhythm::MAX_TIMESTEP, 10).unwrap();
        board.start(true).unwrap();
        let mut frames = 0;
        while board.read_frame(Duration::ZERO).unwrap().is_some() {
            frames += 1;
        }
        assert_eq!(frames, 10);
        assert_eq!(board.read_register(devices::RHYTHM, regs::rhythm::SPI_RUNNING).unwrap(), 0);
    }

    #[test]
    fn test_idle_read_waits_for_timeout() {
        let mut board = SimulatedBoard::new();
        let wait = Duration::from_millis(20);
        let begun = std::time::Instant::now();
        assert!(board.read_frame(wait).unwrap().is_none());
        assert!(begun.elapsed() >= wait);

        // A finished bounded run is idle too.
        board.write_register(devices::RHYTHM, regs::rhythm::MAX_TIMESTEP, 1).unwrap();
        board.start(true).unwrap();
        assert!(board.read_frame(wait).unwrap().is_some());
        let begun = std::time::Instant::now();
        assert!(board.read_frame(wait).unwrap().is_none());
        assert!(begun.elapsed() >= wait);
    }

    #[test]
    fn test_spi_running_poll_advances_engine() {
        let mut board = SimulatedBoard::new();
        board.write_register(devices::RHYTHM, regs::rhythm::MAX_TIMESTEP, 64).unwrap();
        board.start(true).unwrap();
        assert_eq!(board.read_register(devices::RHYTHM, regs::rhythm::SPI_RUNNING).unwrap(), 1);
        assert_eq!(board.read_register(devices::RHYTHM, regs::rhythm::SPI_RUNNING).unwrap(), 0);
    }

    #[test]
    fn test_frame_has_valid_header_and_layout() {
        let mut board = SimulatedBoard::new();
        continuous(&mut board);
        board.write_register(devices::RHYTHM, regs::rhythm::DATA_STREAM_EN, 0b11).unwrap();
        board.start(true).unwrap();
        let words = rhythm_words(&board.read_frame(Duration::ZERO).unwrap().unwrap());
        let layout = SampleLayout::new(2);
        assert_eq!(words.len(), layout.words);
        let header = frame::assemble_header([words[4], words[5], words[6], words[7]]);
        assert_eq!(header, frame::HEADER_MAGIC);
    }

    #[test]
    fn test_rom_answers_only_at_good_delay() {
        let chip = SimulatedChip::new(ChipKind::Rhd2164, timing::feet_to_meters(3.0));
        let mut board = SimulatedBoard::new().with_chip(0, chip);
        continuous(&mut board);
        board.write_register(devices::RHYTHM, regs::rhythm::DATA_STREAM_EN, 1).unwrap();
        board
            .write_register(devices::RHYTHM, regs::command_ram_address(2, 0, 0), u32::from(rhd::command::read(63)))
            .unwrap();
        let layout = SampleLayout::new(1);

        for (delay, expected) in [(4u32, 4u16), (9, 0xFFFF)] {
            board.write_register(devices::RHYTHM, regs::rhythm::CABLE_DELAY, delay).unwrap();
            board.start(true).unwrap();
            let mut last = 0;
            for _ in 0..4 {
                let words = rhythm_words(&board.read_frame(Duration::ZERO).unwrap().unwrap());
                last = words[layout.aux_word(2, 0)];
            }
            board.stop().unwrap();
            assert_eq!(last, expected, "delay {delay}");
        }
    }

    #[test]
    fn test_memory_monitor_frames() {
        let mut board = SimulatedBoard::new().with_memory_used(1234);
        continuous(&mut board);
        // 30 kHz, one report per 8 samples.
        let div = DEFAULT_MONITOR_CLOCK_HZ / (30_000 / 8);
        board.write_register(devices::MEMORY_MONITOR, regs::memory::CLK_DIV, div).unwrap();
        board.write_register(devices::MEMORY_MONITOR, regs::memory::ENABLE, 1).unwrap();
        board.start(true).unwrap();
        let frames: Vec<Frame> = (0..18).map(|_| board.read_frame(Duration::ZERO).unwrap().unwrap()).collect();
        let reports: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.device == devices::MEMORY_MONITOR)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(reports, vec![8, 17]);
        assert_eq!(frames[8].word_u32(regs::memory::FRAME_USED_WORD), Some(1234));
    }

    #[test]
    fn test_ttl_and_dac_data_writes() {
        let mut board = SimulatedBoard::new();
        board.write_data(devices::TTL, &[0xA5A5]).unwrap();
        board.write_data(devices::TTL, &[0x1234_1234; 4]).unwrap();
        assert_eq!(board.ttl_out(), 0xA5A5);
        assert_eq!(board.dac_manual(), 0x1234);
        assert!(board.write_data(devices::DAC, &[1]).is_err());
    }

    #[test]
    fn test_closed_link_fails() {
        let mut board = SimulatedBoard::new();
        board.close().unwrap();
        assert!(board.is_closed());
        assert!(matches!(
            board.read_register(devices::RHYTHM, 0),
            Err(RhythmError::RegisterIo { .. })
        ));
        assert!(board.read_frame(Duration::ZERO).is_err());
    }

    #[test]
    fn test_factory_index_bounds() {
        let factory = SimulatedFactory::new(SimulatedBoard::new()).with_board_count(2);
        assert!(factory.open(1).is_ok());
        assert!(matches!(
            factory.open(2),
            Err(RhythmError::TransportUnavailable { index: 2, .. })
        ));
        assert!(SimulatedFactory::unavailable().open(0).is_err());
    }
}
