//! Open board session
//!
//! A [`BoardSession`] exists from register bring-up until close. It owns the
//! [`RegisterBus`] (and through it the transport) plus the board state the
//! registers cannot be cheaply read back for: sample rate, stream map and
//! cable delays. Calibration and acquisition borrow or take the session
//! explicitly; there is no global board object.
//!
//! Every setter range-checks its arguments before the first register access,
//! so a rejected call leaves the board untouched.

use crate::bus::RegisterBus;
use crate::commands::{AuxSlot, CommandList};
use crate::error::{check_index, check_range, Result, RhythmError};
use crate::transport::{Frame, Transport, TransportKind};
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::regs::{self, fields, mode, rhythm};
use rhythm_gateware::rhd::{DataSource, Port, DEFAULT_SOURCE_MAP};
use rhythm_gateware::{devices, timing, MAX_STREAMS, PORT_COUNT};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cable length assumed until calibration measures one.
pub const DEFAULT_CABLE_FEET: f64 = 3.0;

/// Last command index a bank can hold.
pub const MAX_COMMAND_INDEX: u16 = (rhythm::COMMAND_RAM_BANK_SIZE - 1) as u16;

/// One hardware data stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSlot {
    /// Source feeding the stream
    pub source: DataSource,
    /// Whether the stream is in the sample frames
    pub enabled: bool,
}

/// The 16 stream slots as last programmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMap {
    slots: [StreamSlot; MAX_STREAMS],
}

impl Default for StreamMap {
    fn default() -> Self {
        let mut slots = [StreamSlot {
            source: DataSource::PortA1,
            enabled: false,
        }; MAX_STREAMS];
        for (slot, source) in slots.iter_mut().zip(DEFAULT_SOURCE_MAP) {
            slot.source = source;
        }
        Self { slots }
    }
}

impl StreamMap {
    /// Slot `stream`, if it exists
    pub fn get(&self, stream: usize) -> Option<&StreamSlot> {
        self.slots.get(stream)
    }

    /// All slots in stream order
    pub fn slots(&self) -> &[StreamSlot] {
        &self.slots
    }

    /// Number of enabled streams
    pub fn enabled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.enabled).count()
    }

    /// Sources of the enabled streams, in frame order
    pub fn enabled_sources(&self) -> Vec<DataSource> {
        self.slots.iter().filter(|s| s.enabled).map(|s| s.source).collect()
    }

    /// Enable bitmask as written to `DATA_STREAM_EN`
    pub fn enable_mask(&self) -> u32 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enabled)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }
}

/// An open, initialised board
#[derive(Debug)]
pub struct BoardSession {
    bus: RegisterBus,
    sample_rate: SampleRate,
    streams: StreamMap,
    cable_delays: [u8; PORT_COUNT],
    poll_limit: Option<u32>,
}

impl BoardSession {
    /// Wrap a freshly opened transport. Call [`initialize`](Self::initialize) next.
    pub fn new(transport: Box<dyn Transport>, poll_limit: Option<u32>) -> Self {
        Self {
            bus: RegisterBus::new(transport),
            // The gateware boots at 30 kS/s.
            sample_rate: SampleRate::Hz30000,
            streams: StreamMap::default(),
            cable_delays: [0; PORT_COUNT],
            poll_limit,
        }
    }

    /// Program power-on defaults
    ///
    /// 30 kHz, all aux banks 0 and lengths 0, continuous mode, 3 ft cables,
    /// default source map with only stream 0 enabled, TTL out cleared, DACs
    /// off and centred, thresholds mid-scale rising, external triggers off.
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn initialize(&mut self) -> Result<()> {
        debug!("Programming board defaults");
        self.set_sample_rate(SampleRate::Hz30000)?;
        for slot in AuxSlot::ALL {
            for port in Port::ALL {
                self.select_aux_command_bank(port, slot, 0)?;
            }
            self.select_aux_command_length(slot, 0, 0)?;
        }
        self.set_continuous_run_mode(true)?;
        self.set_max_timestep(u32::MAX)?;
        for port in Port::ALL {
            self.set_cable_length_feet(port, DEFAULT_CABLE_FEET)?;
        }
        self.set_dsp_settle(false)?;
        for (stream, source) in DEFAULT_SOURCE_MAP.into_iter().enumerate() {
            self.set_data_source(stream, source)?;
        }
        for stream in 0..MAX_STREAMS {
            self.enable_data_stream(stream, stream == 0)?;
        }
        self.update_stream_block_size()?;
        self.clear_ttl_out()?;
        for dac in 0..8 {
            self.enable_dac(dac, false)?;
            self.select_dac_data_stream(dac, 0)?;
            self.select_dac_data_channel(dac, 0)?;
        }
        self.set_dac_manual(32768)?;
        self.set_dac_gain(0)?;
        self.set_audio_noise_suppress(0)?;
        self.set_ttl_mode(1)?;
        for dac in 0..8 {
            self.set_dac_threshold(dac, 32768, true)?;
        }
        self.enable_external_fast_settle(false)?;
        self.set_external_fast_settle_channel(0)?;
        for port in Port::ALL {
            self.enable_external_dig_out(port, false)?;
            self.set_external_dig_out_channel(port, 0)?;
        }
        Ok(())
    }

    // ── Bus access ────────────────────────────────────────────────────────

    /// The register bus
    pub fn bus_mut(&mut self) -> &mut RegisterBus {
        &mut self.bus
    }

    /// Busy-poll bound from the configuration
    pub fn poll_limit(&self) -> Option<u32> {
        self.poll_limit
    }

    /// Kind of the underlying transport
    pub fn transport_kind(&self) -> TransportKind {
        self.bus.kind()
    }

    /// Next frame from the link, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        self.bus.read_frame(timeout)
    }

    /// Close the transport and consume the session
    ///
    /// # Errors
    ///
    /// Propagates the transport's close error.
    pub fn close(self) -> Result<()> {
        let mut transport = self.bus.into_transport();
        info!("Closing {} transport", transport.kind());
        transport.close()
    }

    pub(crate) fn write_rhythm(&mut self, offset: u16, value: u32) -> Result<()> {
        self.bus.write(devices::RHYTHM, offset, value)
    }

    pub(crate) fn mask_rhythm(&mut self, offset: u16, value: u32, mask: u32) -> Result<()> {
        self.bus.write_masked(devices::RHYTHM, offset, value, mask)
    }

    // ── Sample clock ──────────────────────────────────────────────────────

    /// Switch the sample clock and wait for the hub to settle
    ///
    /// Cable delays depend on the rate; re-derive them afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the hub stays busy past the poll bound.
    pub fn set_sample_rate(&mut self, rate: SampleRate) -> Result<()> {
        self.bus.write(devices::HUB_MANAGER, regs::hub::CLOCK_SEL, rate.clock_word())?;
        self.bus
            .poll_until_clear(devices::HUB_MANAGER, regs::hub::CLOCK_BUSY, u32::MAX, self.poll_limit)?;
        self.sample_rate = rate;
        debug!("Sample rate {rate}");
        Ok(())
    }

    /// Current sample rate
    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Current sample rate in Hz
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate.hz()
    }

    // ── Aux command RAM ───────────────────────────────────────────────────

    /// Write `list` into bank `bank` of aux `slot`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for banks above 15 or lists over 1024
    /// commands.
    pub fn upload_command_list(&mut self, list: &CommandList, slot: AuxSlot, bank: u8) -> Result<()> {
        check_range("bank", bank, 15)?;
        check_index("command_list_length", list.len(), rhythm::COMMAND_RAM_BANK_SIZE)?;
        #[allow(clippy::cast_possible_truncation)]
        let slot_index = slot.index() as u16;
        for (i, &word) in (0u16..).zip(list.words()) {
            let address = regs::command_ram_address(slot_index, u16::from(bank), i);
            self.bus.write(devices::RHYTHM, address, u32::from(word))?;
        }
        debug!("Uploaded {} commands to {slot:?} bank {bank}", list.len());
        Ok(())
    }

    /// Select the bank `port` runs on aux `slot`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for banks above 15.
    pub fn select_aux_command_bank(&mut self, port: Port, slot: AuxSlot, bank: u8) -> Result<()> {
        check_range("bank", bank, 15)?;
        #[allow(clippy::cast_possible_truncation)]
        let offset = rhythm::AUXCMD_BANK_1 + slot.index() as u16;
        let shift = port.nibble_shift();
        self.mask_rhythm(offset, u32::from(bank) << shift, fields::NIBBLE << shift)
    }

    /// Set loop and end indices of aux `slot`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for indices above 1023.
    pub fn select_aux_command_length(&mut self, slot: AuxSlot, loop_index: u16, end_index: u16) -> Result<()> {
        check_range("loop_index", loop_index, MAX_COMMAND_INDEX)?;
        check_range("end_index", end_index, MAX_COMMAND_INDEX)?;
        #[allow(clippy::cast_possible_truncation)]
        let i = slot.index() as u16;
        self.write_rhythm(rhythm::LOOP_AUXCMD_INDEX_1 + i, u32::from(loop_index))?;
        self.write_rhythm(rhythm::MAX_AUXCMD_INDEX_1 + i, u32::from(end_index))
    }

    // ── Run control ───────────────────────────────────────────────────────

    /// Run until stopped (`true`) or for `MAX_TIMESTEP` samples (`false`)
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_continuous_run_mode(&mut self, continuous: bool) -> Result<()> {
        let bit = 1 << mode::SPI_RUN_CONTINUOUS;
        self.mask_rhythm(rhythm::MODE, if continuous { bit } else { 0 }, bit)
    }

    /// Samples a bounded run lasts
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_max_timestep(&mut self, samples: u32) -> Result<()> {
        self.write_rhythm(rhythm::MAX_TIMESTEP, samples)
    }

    /// Start SPI acquisition with the sample counter reset
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn run(&mut self) -> Result<()> {
        self.bus.transport_mut().start(true)
    }

    /// Whether the SPI engine is running
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn is_running(&mut self) -> Result<bool> {
        Ok(self.bus.read(devices::RHYTHM, rhythm::SPI_RUNNING)? != 0)
    }

    /// Block until a bounded run finishes
    ///
    /// # Errors
    ///
    /// Returns `Timeout` past the poll bound.
    pub fn wait_until_idle(&mut self) -> Result<u32> {
        self.bus
            .poll_until_clear(devices::RHYTHM, rhythm::SPI_RUNNING, u32::MAX, self.poll_limit)
    }

    /// Stop acquisition
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn stop(&mut self) -> Result<()> {
        self.bus.transport_mut().stop()
    }

    // ── Cable delays ──────────────────────────────────────────────────────

    /// Program the MISO sampling delay of `port`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` above 15.
    pub fn set_cable_delay(&mut self, port: Port, delay: u8) -> Result<()> {
        check_range("cable_delay", delay, timing::MAX_DELAY)?;
        let shift = port.nibble_shift();
        self.mask_rhythm(rhythm::CABLE_DELAY, u32::from(delay) << shift, fields::NIBBLE << shift)?;
        self.cable_delays[port.index()] = delay;
        debug!("Port {port} cable delay {delay}");
        Ok(())
    }

    /// Delay last programmed on `port`
    pub fn cable_delay(&self, port: Port) -> u8 {
        self.cable_delays[port.index()]
    }

    /// All four programmed delays
    pub fn cable_delays(&self) -> [u8; PORT_COUNT] {
        self.cable_delays
    }

    /// Derive and program the delay for a cable of `meters` at the current rate
    ///
    /// Delays past 15 are saturated with a warning.
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_cable_length_meters(&mut self, port: Port, meters: f64) -> Result<()> {
        let delay = timing::meters_to_delay(meters, self.sample_rate);
        let programmed = timing::register_delay(delay);
        if u32::from(programmed) != delay {
            warn!("Port {port}: {meters:.2} m needs delay {delay}, clamped to {programmed}");
        }
        self.set_cable_delay(port, programmed)
    }

    /// [`set_cable_length_meters`](Self::set_cable_length_meters) in feet
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_cable_length_feet(&mut self, port: Port, feet: f64) -> Result<()> {
        self.set_cable_length_meters(port, timing::feet_to_meters(feet))
    }

    /// Cable length implied by the delay on `port` at the current rate
    pub fn estimate_cable_length_meters(&self, port: Port) -> f64 {
        timing::delay_to_meters(u32::from(self.cable_delay(port)), self.sample_rate)
    }

    /// [`estimate_cable_length_meters`](Self::estimate_cable_length_meters) in feet
    pub fn estimate_cable_length_feet(&self, port: Port) -> f64 {
        timing::meters_to_feet(self.estimate_cable_length_meters(port))
    }

    // ── Streams ───────────────────────────────────────────────────────────

    /// Enable DSP settle on amplifier conversions
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_dsp_settle(&mut self, enabled: bool) -> Result<()> {
        let bit = 1 << mode::DSP_SETTLE;
        self.mask_rhythm(rhythm::MODE, if enabled { bit } else { 0 }, bit)
    }

    /// Route `source` into `stream`
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for streams above 15.
    pub fn set_data_source(&mut self, stream: usize, source: DataSource) -> Result<()> {
        check_index("stream", stream, MAX_STREAMS - 1)?;
        #[allow(clippy::cast_possible_truncation)]
        let offset = rhythm::DATA_STREAM_1_8_SEL + (stream / 8) as u16;
        #[allow(clippy::cast_possible_truncation)]
        let shift = 4 * (stream % 8) as u32;
        self.mask_rhythm(offset, u32::from(source.code()) << shift, fields::NIBBLE << shift)?;
        self.streams.slots[stream].source = source;
        Ok(())
    }

    /// Include or drop `stream` from the sample frames
    ///
    /// Frame size changes take effect after
    /// [`update_stream_block_size`](Self::update_stream_block_size).
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for streams above 15.
    pub fn enable_data_stream(&mut self, stream: usize, enabled: bool) -> Result<()> {
        check_index("stream", stream, MAX_STREAMS - 1)?;
        let bit = 1 << stream;
        self.mask_rhythm(rhythm::DATA_STREAM_EN, if enabled { bit } else { 0 }, bit)?;
        self.streams.slots[stream].enabled = enabled;
        Ok(())
    }

    /// Number of enabled streams
    pub fn enabled_stream_count(&self) -> usize {
        self.streams.enabled_count()
    }

    /// Stream map as last programmed
    pub fn stream_map(&self) -> &StreamMap {
        &self.streams
    }

    /// Re-read link frame sizes after changing enabled streams
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn update_stream_block_size(&mut self) -> Result<()> {
        debug!("Frame layout now {} streams", self.enabled_stream_count());
        self.bus.transport_mut().reset()
    }

    // ── Board ─────────────────────────────────────────────────────────────

    /// Board LEDs on or off
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn set_leds(&mut self, on: bool) -> Result<()> {
        let bit = 1 << mode::LED_ENABLE;
        self.mask_rhythm(rhythm::MODE, if on { bit } else { 0 }, bit)
    }

    /// Start buffer-usage reports once per `batch_size` samples
    ///
    /// Returns the board memory size in words.
    ///
    /// # Errors
    ///
    /// Returns `ArgumentOutOfRange` for a zero batch size.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn configure_memory_monitor(&mut self, batch_size: usize) -> Result<u32> {
        if batch_size == 0 {
            return Err(RhythmError::out_of_range("batch_size", 0, 0));
        }
        let total = self.bus.read(devices::MEMORY_MONITOR, regs::memory::TOTAL_MEM)?;
        let clock_hz = self.bus.read(devices::MEMORY_MONITOR, regs::memory::CLK_HZ)?;
        let report_hz = self.sample_rate.hz() / batch_size as f64;
        let divider = (f64::from(clock_hz) / report_hz) as u32;
        self.bus.write(devices::MEMORY_MONITOR, regs::memory::CLK_DIV, divider)?;
        self.bus.write(devices::MEMORY_MONITOR, regs::memory::ENABLE, 1)?;
        debug!("Memory monitor: {total} words, divider {divider}");
        Ok(total)
    }

    /// Gateware version word
    ///
    /// # Errors
    ///
    /// Propagates register I/O errors.
    pub fn gateware_version(&mut self) -> Result<u32> {
        self.bus.read(devices::GATEWARE_INFO, regs::info::VERSION)
    }
}
