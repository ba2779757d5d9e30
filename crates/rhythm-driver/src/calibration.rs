//! Amplifier discovery and calibration
//!
//! Runs once per open, after register bring-up:
//!
//! 1. Upload the aux command lists and run ADC self-calibration.
//! 2. At 30 kS/s, route all 16 streams 1:1 onto the 8 MISO lines and their
//!    DDR twins, then sweep the cable delay 0..=15 on every port. For each
//!    delay run a short bounded burst and look for the ROM signature of an
//!    RHD2000 on each of the 8 chip positions.
//! 3. Give every detected chip consecutive streams (two for a dual-die
//!    RHD2164) and disable the rest.
//! 4. Pick each port's delay from the positions it carries, estimate the
//!    cable length and restore the caller's sample rate.
//!
//! A position that never matches simply has no chip. Only too many chips
//! ([`RhythmError::CapacityExceeded`]) or link failures abort calibration.

use crate::commands::{AuxSlot, CommandCompiler, RegisterConfigMode};
use crate::config::BoardConfig;
use crate::decoder::{FrameDecoder, SampleBatch};
use crate::error::{Result, RhythmError};
use crate::session::BoardSession;
use crate::transport::FRAME_WAIT;
use rhythm_gateware::devices::FrameSource;
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::rhd::{self, ChipKind, DataSource, Port};
use rhythm_gateware::{timing, CHIP_POSITIONS, MAX_CHANNELS, MAX_STREAMS, PORT_COUNT};
use tracing::{debug, info, warn};

/// Samples run by ADC self-calibration.
pub const ADC_CALIBRATION_SAMPLES: u32 = 64;

/// Samples decoded per candidate delay.
pub const DISCOVERY_BURST: usize = 64;

/// Bounded run length programmed for discovery.
pub const DISCOVERY_RUN_LENGTH: u32 = 128 * 64;

/// Rate used for discovery, for the finest delay resolution.
pub const DISCOVERY_RATE: SampleRate = SampleRate::Hz30000;

/// Candidate delays swept per port.
pub const CANDIDATE_DELAYS: u8 = 16;

/// Match history of one chip position across the delay sweep
///
/// The first match is the primary candidate, the second a backup; on the
/// third match the backup replaces the primary and the tracker freezes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DelayTracker {
    matches: u8,
    primary: Option<u8>,
    backup: Option<u8>,
}

impl DelayTracker {
    /// Record a signature match at `delay`
    pub fn record(&mut self, delay: u8) {
        match self.matches {
            0 => self.primary = Some(delay),
            1 => self.backup = Some(delay),
            2 => self.primary = self.backup,
            _ => return,
        }
        self.matches += 1;
    }

    /// Matches counted (saturates at 3)
    pub fn matches(&self) -> u8 {
        self.matches
    }

    /// Chosen delay, `None` if the position never matched
    pub fn delay(&self) -> Option<u8> {
        self.primary
    }
}

/// ROM fields read from one chip position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomReadout {
    /// ROM register 63
    pub chip_id: u16,
    /// ROM register 59 (MISO status)
    pub register59: u16,
}

/// Check the ROM signature in `stream`'s aux slot 2 and read the chip id
///
/// Returns `None` when "INTAN"/"RHD" are not where the probe put them.
pub fn decode_rom(batch: &SampleBatch, stream: usize) -> Option<RomReadout> {
    let aux = batch.aux(stream, rhd::AUX_ROM_SLOT)?;
    let word = |sample: usize| aux.get(sample + rhd::ROM_SAMPLE_SHIFT).copied();
    let byte = |sample: usize| word(sample).map(|w| w & 0x00FF);

    let intan = rhd::INTAN_SAMPLES
        .iter()
        .zip(rhd::INTAN_SIGNATURE)
        .all(|(&s, &c)| byte(s) == Some(u16::from(c)));
    let rhd_name = rhd::RHD_SAMPLES
        .iter()
        .zip(rhd::RHD_SIGNATURE)
        .all(|(&s, &c)| byte(s) == Some(u16::from(c)));
    if !(intan && rhd_name) {
        return None;
    }
    Some(RomReadout {
        chip_id: byte(rhd::CHIP_ID_SAMPLE)?,
        register59: byte(rhd::MISO_STATUS_SAMPLE)?,
    })
}

/// Discovery outcome for one chip position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReport {
    /// MISO line probed
    pub source: DataSource,
    /// Recognised chip, if any
    pub chip: Option<ChipKind>,
    /// Raw chip id of the last match
    pub chip_id: Option<u16>,
    /// MISO status register of the last match
    pub register59: Option<u16>,
    /// Delay tracking for this position
    pub tracker: DelayTracker,
}

impl PositionReport {
    fn new(source: DataSource) -> Self {
        Self {
            source,
            chip: None,
            chip_id: None,
            register59: None,
            tracker: DelayTracker::default(),
        }
    }

    fn record(&mut self, delay: u8, rom: RomReadout) {
        if self.tracker.matches() < 3 {
            self.chip_id = Some(rom.chip_id);
            self.register59 = Some(rom.register59);
            self.chip = ChipKind::from_id(rom.chip_id);
        }
        self.tracker.record(delay);
    }
}

/// A stream given to a detected chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamAssignment {
    /// Hardware stream index
    pub stream: usize,
    /// Source routed into it
    pub source: DataSource,
    /// Chip occupying it
    pub chip: ChipKind,
}

/// Stream layout chosen after discovery
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamAllocation {
    /// Assignments in stream order
    pub assignments: Vec<StreamAssignment>,
}

impl StreamAllocation {
    /// Streams in use
    pub fn stream_count(&self) -> usize {
        self.assignments.len()
    }

    /// Amplifier channels delivered (32 per stream)
    pub fn channel_count(&self) -> usize {
        self.stream_count() * rhythm_gateware::CHANNELS_PER_STREAM
    }

    /// Whether no chip was found
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Give detected chips consecutive streams in position order
///
/// Dual-die chips take their source and its DDR twin.
///
/// # Errors
///
/// Returns `CapacityExceeded` if the chips need more than 16 streams.
pub fn allocate_streams(chips: &[(DataSource, ChipKind)]) -> Result<StreamAllocation> {
    let demand: usize = chips.iter().map(|(_, kind)| kind.streams()).sum();
    if demand > MAX_STREAMS {
        return Err(RhythmError::CapacityExceeded {
            required_streams: demand,
            max_channels: MAX_CHANNELS,
        });
    }
    let mut assignments = Vec::with_capacity(demand);
    for &(source, chip) in chips {
        assignments.push(StreamAssignment {
            stream: assignments.len(),
            source,
            chip,
        });
        if chip.streams() == 2 {
            assignments.push(StreamAssignment {
                stream: assignments.len(),
                source: source.ddr_twin(),
                chip,
            });
        }
    }
    Ok(StreamAllocation { assignments })
}

/// Effective delay per port
///
/// An override wins; otherwise the larger authoritative delay of the port's
/// positions that hold a recognised chip, or 0 with none.
pub fn resolve_port_delays(
    reports: &[PositionReport],
    overrides: [Option<u8>; PORT_COUNT],
) -> [u8; PORT_COUNT] {
    let mut delays = [0u8; PORT_COUNT];
    for port in Port::ALL {
        let detected = reports
            .iter()
            .filter(|r| r.source.port() == port && r.chip.is_some())
            .filter_map(|r| r.tracker.delay())
            .max()
            .unwrap_or(0);
        delays[port.index()] = overrides[port.index()].unwrap_or(detected);
    }
    delays
}

/// Final delay and cable estimate for one port
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortCalibration {
    /// Port
    pub port: Port,
    /// Delay programmed at the acquisition rate
    pub delay: u8,
    /// Cable length estimated at the discovery rate
    pub cable_meters: f64,
    /// Delay came from the configuration, not discovery
    pub overridden: bool,
}

/// Everything calibration decided
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    /// Per-port delays and cable estimates
    pub ports: [PortCalibration; PORT_COUNT],
    /// Discovery report for the 8 chip positions
    pub positions: Vec<PositionReport>,
    /// Streams given to the detected chips
    pub allocation: StreamAllocation,
}

impl CalibrationResult {
    /// Detected chips in position order
    pub fn chips(&self) -> impl Iterator<Item = (DataSource, ChipKind)> + '_ {
        self.positions.iter().filter_map(|p| p.chip.map(|c| (p.source, c)))
    }
}

/// Upload every aux command list compiled for `rate`
///
/// # Errors
///
/// Propagates register I/O errors.
pub fn upload_command_lists(
    session: &mut BoardSession,
    compiler: &dyn CommandCompiler,
    config: &BoardConfig,
    rate: SampleRate,
) -> Result<()> {
    let lists = [
        (AuxSlot::DigitalOut, 0, compiler.digital_out_update()),
        (AuxSlot::AuxSampling, 0, compiler.aux_sampling(rate)),
        (
            AuxSlot::RegisterConfig,
            RegisterConfigMode::Calibrate.bank(),
            compiler.register_config(rate, &config.amplifier, RegisterConfigMode::Calibrate),
        ),
        (
            AuxSlot::RegisterConfig,
            RegisterConfigMode::Configure.bank(),
            compiler.register_config(rate, &config.amplifier, RegisterConfigMode::Configure),
        ),
        (
            AuxSlot::RegisterConfig,
            RegisterConfigMode::FastSettle.bank(),
            compiler.register_config(rate, &config.amplifier, RegisterConfigMode::FastSettle),
        ),
    ];
    for (slot, bank, list) in &lists {
        session.upload_command_list(list, *slot, *bank)?;
        let end = u16::try_from(list.len().saturating_sub(1)).unwrap_or(u16::MAX);
        session.select_aux_command_length(*slot, 0, end)?;
    }
    for port in Port::ALL {
        session.select_aux_command_bank(port, AuxSlot::DigitalOut, 0)?;
        session.select_aux_command_bank(port, AuxSlot::AuxSampling, 0)?;
    }
    Ok(())
}

fn select_register_bank(session: &mut BoardSession, mode: RegisterConfigMode) -> Result<()> {
    for port in Port::ALL {
        session.select_aux_command_bank(port, AuxSlot::RegisterConfig, mode.bank())?;
    }
    Ok(())
}

/// Bank used once calibration is over
pub fn operating_mode(config: &BoardConfig) -> RegisterConfigMode {
    if config.fast_settle {
        RegisterConfigMode::FastSettle
    } else {
        RegisterConfigMode::Configure
    }
}

/// Run ADC self-calibration on every chip
///
/// # Errors
///
/// Returns `Timeout` if the bounded run never finishes within the poll bound.
pub fn calibrate_adcs(session: &mut BoardSession, config: &BoardConfig) -> Result<()> {
    select_register_bank(session, RegisterConfigMode::Calibrate)?;
    session.set_continuous_run_mode(false)?;
    session.set_max_timestep(ADC_CALIBRATION_SAMPLES)?;
    session.run()?;
    let reads = session.wait_until_idle()?;
    session.stop()?;
    debug!("ADC calibration done after {reads} status reads");
    select_register_bank(session, operating_mode(config))
}

/// Decode `samples` Rhythm frames from a bounded run
fn read_burst(session: &mut BoardSession, decoder: &FrameDecoder, samples: usize) -> Result<SampleBatch> {
    let mut batch = decoder.new_batch(samples);
    let mut slot = 0;
    let mut idle = 0u32;
    while slot < samples {
        match session.read_frame(FRAME_WAIT)? {
            Some(frame) => {
                idle = 0;
                if FrameSource::from_device_id(frame.device) == FrameSource::Rhythm {
                    decoder.decode_into(&frame.payload, &mut batch, slot)?;
                    slot += 1;
                }
            }
            None => {
                idle = idle.saturating_add(1);
                if session.poll_limit().is_some_and(|max| idle >= max) {
                    return Err(RhythmError::Timeout { reads: idle });
                }
            }
        }
    }
    Ok(batch)
}

/// Sweep all delays and probe every chip position
///
/// Leaves all 16 streams enabled; allocation reprograms them.
///
/// # Errors
///
/// Propagates register, link and decode errors.
pub fn discover_chips(session: &mut BoardSession) -> Result<Vec<PositionReport>> {
    for (stream, source) in DataSource::ALL.into_iter().enumerate() {
        session.set_data_source(stream, source)?;
        session.enable_data_stream(stream, true)?;
    }
    session.update_stream_block_size()?;
    session.set_continuous_run_mode(false)?;
    session.set_max_timestep(DISCOVERY_RUN_LENGTH)?;

    let decoder = FrameDecoder::new(MAX_STREAMS);
    let mut reports: Vec<PositionReport> = (0..CHIP_POSITIONS)
        .filter_map(DataSource::for_position)
        .map(PositionReport::new)
        .collect();

    for delay in 0..CANDIDATE_DELAYS {
        for port in Port::ALL {
            session.set_cable_delay(port, delay)?;
        }
        session.run()?;
        let burst = read_burst(session, &decoder, DISCOVERY_BURST);
        session.stop()?;
        let burst = burst?;

        for (position, report) in reports.iter_mut().enumerate() {
            if let Some(rom) = decode_rom(&burst, position) {
                report.record(delay, rom);
            }
        }
        let hits: Vec<String> = reports
            .iter()
            .enumerate()
            .filter(|(position, _)| decode_rom(&burst, *position).is_some())
            .map(|(_, r)| r.source.to_string())
            .collect();
        debug!("Delay {delay:2}: signature on [{}]", hits.join(", "));
    }

    for report in &reports {
        match (report.chip, report.chip_id) {
            (Some(kind), _) => info!(
                "{}: {kind} at delay {}",
                report.source,
                report.tracker.delay().unwrap_or(0)
            ),
            (None, Some(id)) => warn!("{}: unknown chip id {id}, ignored", report.source),
            (None, None) => {}
        }
    }
    Ok(reports)
}

/// Route allocated streams and disable every other slot
///
/// # Errors
///
/// Propagates register I/O errors.
pub fn apply_allocation(session: &mut BoardSession, allocation: &StreamAllocation) -> Result<()> {
    for stream in 0..MAX_STREAMS {
        match allocation.assignments.get(stream) {
            Some(a) => {
                session.set_data_source(stream, a.source)?;
                session.enable_data_stream(stream, true)?;
            }
            None => session.enable_data_stream(stream, false)?,
        }
    }
    session.update_stream_block_size()
}

/// Full calibration on an initialised session
///
/// # Errors
///
/// `CapacityExceeded` when detected chips need more than 16 streams, or any
/// register, link or decode failure.
pub fn run(
    session: &mut BoardSession,
    compiler: &dyn CommandCompiler,
    config: &BoardConfig,
) -> Result<CalibrationResult> {
    info!("Calibrating: discovery at {DISCOVERY_RATE}, acquisition at {}", config.sample_rate);

    session.set_sample_rate(DISCOVERY_RATE)?;
    upload_command_lists(session, compiler, config, DISCOVERY_RATE)?;
    calibrate_adcs(session, config)?;

    let positions = discover_chips(session)?;
    let chips: Vec<(DataSource, ChipKind)> = positions
        .iter()
        .filter_map(|p| p.chip.map(|c| (p.source, c)))
        .collect();
    let allocation = allocate_streams(&chips)?;
    apply_allocation(session, &allocation)?;

    let delays = resolve_port_delays(&positions, config.cable_delay_overrides);
    let mut ports = Port::ALL.map(|port| PortCalibration {
        port,
        delay: delays[port.index()],
        cable_meters: 0.0,
        overridden: config.cable_delay_overrides[port.index()].is_some(),
    });
    for p in &mut ports {
        session.set_cable_delay(p.port, p.delay)?;
        p.cable_meters = session.estimate_cable_length_meters(p.port);
    }

    session.set_continuous_run_mode(true)?;
    session.set_max_timestep(u32::MAX)?;

    if config.sample_rate != DISCOVERY_RATE {
        session.set_sample_rate(config.sample_rate)?;
        upload_command_lists(session, compiler, config, config.sample_rate)?;
        select_register_bank(session, operating_mode(config))?;
        for p in &mut ports {
            let detected = positions
                .iter()
                .any(|r| r.source.port() == p.port && r.chip.is_some());
            if !p.overridden && detected {
                session.set_cable_length_meters(p.port, p.cable_meters)?;
                p.delay = session.cable_delay(p.port);
            }
        }
    }

    session.enable_external_fast_settle(config.external_fast_settle)?;
    session.set_external_fast_settle_channel(config.fast_settle_channel)?;

    for p in &ports {
        debug!(
            "Port {}: delay {} ({:.2} m{})",
            p.port,
            p.delay,
            p.cable_meters,
            if p.overridden { ", override" } else { "" }
        );
    }
    info!(
        "Calibration complete: {} chips, {} streams",
        chips.len(),
        allocation.stream_count()
    );
    Ok(CalibrationResult {
        ports,
        positions,
        allocation,
    })
}

/// Delay a cable of `meters` needs at `rate`, saturated to the register
pub fn delay_for_length(meters: f64, rate: SampleRate) -> u8 {
    timing::register_delay(timing::meters_to_delay(meters, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::simulated::{SimulatedBoard, SimulatedChip};
    use crate::commands::StaticCommandCompiler;
    use rhythm_gateware::frame::SampleLayout;

    #[test]
    fn test_third_match_promotes_backup() {
        let mut t = DelayTracker::default();
        for d in [3, 7, 11] {
            t.record(d);
        }
        assert_eq!(t.delay(), Some(7));
        assert_eq!(t.matches(), 3);
        t.record(14);
        assert_eq!(t.delay(), Some(7), "frozen after the third match");
        assert_eq!(t.matches(), 3);
    }

    #[test]
    fn test_one_and_two_matches_keep_primary() {
        let mut t = DelayTracker::default();
        assert_eq!(t.delay(), None);
        t.record(5);
        assert_eq!(t.delay(), Some(5));
        t.record(6);
        assert_eq!(t.delay(), Some(5));
    }

    #[test]
    fn test_nine_single_die_chips_fit() {
        let chips = vec![(DataSource::PortA1, ChipKind::Rhd2132); 9];
        let alloc = allocate_streams(&chips).unwrap();
        assert_eq!(alloc.stream_count(), 9);
        assert_eq!(alloc.channel_count(), 288);
    }

    #[test]
    fn test_seventeen_single_die_chips_overflow() {
        let chips = vec![(DataSource::PortB2, ChipKind::Rhd2216); 17];
        let err = allocate_streams(&chips).unwrap_err();
        assert!(matches!(
            err,
            RhythmError::CapacityExceeded { required_streams: 17, max_channels: 512 }
        ));
    }

    #[test]
    fn test_dual_die_takes_two_consecutive_streams() {
        let chips = [
            (DataSource::PortA1, ChipKind::Rhd2132),
            (DataSource::PortB1, ChipKind::Rhd2164),
            (DataSource::PortC2, ChipKind::Rhd2216),
        ];
        let alloc = allocate_streams(&chips).unwrap();
        let sources: Vec<DataSource> = alloc.assignments.iter().map(|a| a.source).collect();
        assert_eq!(
            sources,
            vec![DataSource::PortA1, DataSource::PortB1, DataSource::PortB1Ddr, DataSource::PortC2]
        );
        assert_eq!(alloc.assignments[2].stream, 2);
        let nine_dual = vec![(DataSource::PortA1, ChipKind::Rhd2164); 9];
        assert!(allocate_streams(&nine_dual).is_err());
    }

    #[test]
    fn test_port_delay_is_max_of_positions_unless_overridden() {
        let mut reports: Vec<PositionReport> = DataSource::ALL[..8].iter().map(|&s| PositionReport::new(s)).collect();
        for (position, delay) in [(0, 4), (1, 6), (5, 2)] {
            reports[position].chip = Some(ChipKind::Rhd2132);
            reports[position].tracker.record(delay);
        }
        let delays = resolve_port_delays(&reports, [None, None, None, Some(9)]);
        assert_eq!(delays, [6, 0, 2, 9]);
    }

    #[test]
    fn test_unrecognised_chip_does_not_set_port_delay() {
        let mut reports: Vec<PositionReport> = DataSource::ALL[..8].iter().map(|&s| PositionReport::new(s)).collect();
        // B1 answered with an unknown id, B2 holds a real chip.
        reports[2].chip_id = Some(3);
        reports[2].tracker.record(12);
        reports[3].chip = Some(ChipKind::Rhd2216);
        reports[3].tracker.record(5);
        // D1 only ever matched with an unknown id.
        reports[6].chip_id = Some(7);
        reports[6].tracker.record(8);
        let delays = resolve_port_delays(&reports, [None; PORT_COUNT]);
        assert_eq!(delays, [0, 5, 0, 0]);
    }

    #[test]
    fn test_decode_rom_from_synthetic_burst() {
        let layout = SampleLayout::new(1);
        let decoder = FrameDecoder::new(1);
        let mut batch = decoder.new_batch(DISCOVERY_BURST);
        let mut rom = [0u16; DISCOVERY_BURST];
        for (register, sample) in rhd::ROM_PROBE {
            rom[sample + rhd::ROM_SAMPLE_SHIFT] = rhd::rom_register(ChipKind::Rhd2216, register);
        }
        for (slot, &value) in rom.iter().enumerate() {
            let mut words = vec![0u16; layout.words];
            words[layout.header..layout.timestamp].copy_from_slice(&rhythm_gateware::frame::header_words());
            words[layout.aux_word(rhd::AUX_ROM_SLOT, 0)] = value;
            let payload: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
            decoder.decode_into(&payload, &mut batch, slot).unwrap();
        }
        let readout = decode_rom(&batch, 0).unwrap();
        assert_eq!(readout.chip_id, 2);
        assert_eq!(readout.register59, 0);
        assert!(decode_rom(&batch, 1).is_none());
    }

    fn calibrate(board: SimulatedBoard, config: &BoardConfig) -> Result<(CalibrationResult, BoardSession)> {
        let mut session = BoardSession::new(Box::new(board), Some(10_000));
        session.initialize()?;
        let result = run(&mut session, &StaticCommandCompiler, config)?;
        Ok((result, session))
    }

    #[test]
    fn test_no_chips_disables_all_streams() {
        let (result, session) = calibrate(SimulatedBoard::new(), &BoardConfig::default()).unwrap();
        assert!(result.allocation.is_empty());
        assert_eq!(session.enabled_stream_count(), 0);
        assert!(result.positions.iter().all(|p| p.chip.is_none()));
        assert!(result.ports.iter().all(|p| p.delay == 0));
    }

    #[test]
    fn test_detects_chips_and_delays() {
        let three_feet = timing::feet_to_meters(3.0);
        let board = SimulatedBoard::new()
            .with_chip(0, SimulatedChip::new(ChipKind::Rhd2132, three_feet))
            .with_chip(3, SimulatedChip::new(ChipKind::Rhd2164, 1.0))
            .with_chip(6, SimulatedChip::new(ChipKind::Rhd2216, 0.0));
        let (result, session) = calibrate(board, &BoardConfig::default()).unwrap();

        let chips: Vec<(DataSource, ChipKind)> = result.chips().collect();
        assert_eq!(
            chips,
            vec![
                (DataSource::PortA1, ChipKind::Rhd2132),
                (DataSource::PortB2, ChipKind::Rhd2164),
                (DataSource::PortD1, ChipKind::Rhd2216),
            ]
        );
        assert_eq!(session.enabled_stream_count(), 4);
        assert_eq!(
            session.stream_map().enabled_sources(),
            vec![DataSource::PortA1, DataSource::PortB2, DataSource::PortB2Ddr, DataSource::PortD1]
        );
        // Window is ideal ± 1; the third match promotes the middle one.
        for (port, meters) in [(Port::A, three_feet), (Port::B, 1.0), (Port::D, 0.0)] {
            let ideal = delay_for_length(meters, DISCOVERY_RATE);
            assert_eq!(result.ports[port.index()].delay, ideal, "port {port}");
        }
        assert_eq!(result.ports[Port::C.index()].delay, 0);
        assert_eq!(result.positions[0].tracker.matches(), 3);
    }

    #[test]
    fn test_override_skips_detection_for_port() {
        let board = SimulatedBoard::new().with_chip(0, SimulatedChip::new(ChipKind::Rhd2132, 0.5));
        let config = BoardConfig::default().with_cable_delay_override(0, 11);
        let (result, session) = calibrate(board, &config).unwrap();
        assert_eq!(session.cable_delay(Port::A), 11);
        assert!(result.ports[0].overridden);
        assert_eq!(result.allocation.stream_count(), 1);
    }

    #[test]
    fn test_rate_restored_and_delays_rederived() {
        let board = SimulatedBoard::new().with_chip(2, SimulatedChip::new(ChipKind::Rhd2132, 3.0));
        let config = BoardConfig::default().with_sample_rate(SampleRate::Hz1000);
        let (result, session) = calibrate(board, &config).unwrap();
        assert_eq!(session.sample_rate(), SampleRate::Hz1000);
        let b = result.ports[Port::B.index()];
        assert_eq!(b.delay, delay_for_length(b.cable_meters, SampleRate::Hz1000));
        assert_eq!(session.cable_delay(Port::B), b.delay);
    }
}
