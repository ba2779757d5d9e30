//! `rhythm`: command-line tools for the Rhythm acquisition driver.
//!
//! ```text
//! USAGE:
//!   rhythm rates                          Supported sample rates and clock words
//!   rhythm cable --meters 1.5             MISO delay for a cable length, per rate
//!   rhythm cable --delay 7 --rate 20000   Cable length implied by a delay
//!   rhythm registers [device]             Symbolic register maps
//!   rhythm scan --chip 0:2164:0.9         Calibrate a simulated board and report
//!   rhythm stream --batches 5             Stream batches from a simulated board
//! ```
//!
//! `scan` and `stream` run against the simulated board; `--chip` takes
//! `POSITION:ID:METERS` with position 0–7 (A1, A2, B1, … D2) and chip id
//! 2132, 2216 or 2164.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rhythm_driver::backends::{SimulatedBoard, SimulatedChip, SimulatedFactory};
use rhythm_driver::{BatchStream, BoardConfig, BoardDriver};
use rhythm_gateware::rate::SampleRate;
use rhythm_gateware::rhd::{ChipKind, DataSource};
use rhythm_gateware::{devices, regs, timing};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rhythm", about = "Rhythm acquisition board tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the supported sample rates.
    Rates,
    /// Convert between cable length and MISO sampling delay.
    Cable {
        /// Cable length in meters.
        #[arg(long, conflicts_with_all = ["feet", "delay"])]
        meters: Option<f64>,
        /// Cable length in feet.
        #[arg(long, conflicts_with = "delay")]
        feet: Option<f64>,
        /// Delay to convert back to a length.
        #[arg(long)]
        delay: Option<u8>,
        /// Sample rate in Hz (all rates when omitted).
        #[arg(long, value_parser = parse_rate)]
        rate: Option<SampleRate>,
    },
    /// Print the symbolic register maps.
    Registers {
        /// Device name (rhythm, hub-manager, memory-monitor, gateware-info).
        device: Option<String>,
    },
    /// Calibrate a simulated board and print what was found.
    Scan {
        /// Simulated chip as POSITION:ID:METERS (repeatable).
        #[arg(long = "chip", value_parser = parse_chip)]
        chips: Vec<(usize, SimulatedChip)>,
        /// Acquisition sample rate in Hz.
        #[arg(long, default_value = "30000", value_parser = parse_rate)]
        rate: SampleRate,
    },
    /// Stream batches from a simulated board.
    Stream {
        /// Simulated chip as POSITION:ID:METERS (repeatable).
        #[arg(long = "chip", value_parser = parse_chip)]
        chips: Vec<(usize, SimulatedChip)>,
        /// Acquisition sample rate in Hz.
        #[arg(long, default_value = "30000", value_parser = parse_rate)]
        rate: SampleRate,
        /// Batches to print before exiting.
        #[arg(long, default_value_t = 5)]
        batches: usize,
        /// Samples per batch (overrides RHYTHM_BATCH_SIZE).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Rates => cmd_rates(),
        Cmd::Cable {
            meters,
            feet,
            delay,
            rate,
        } => cmd_cable(meters.or(feet.map(timing::feet_to_meters)), delay, rate)?,
        Cmd::Registers { device } => cmd_registers(device.as_deref())?,
        Cmd::Scan { chips, rate } => cmd_scan(&chips, rate)?,
        Cmd::Stream {
            chips,
            rate,
            batches,
            batch_size,
        } => cmd_stream(&chips, rate, batches, batch_size)?,
    }

    Ok(())
}

fn parse_rate(s: &str) -> Result<SampleRate, String> {
    let hz: u32 = s.parse().map_err(|e| format!("{s}: {e}"))?;
    SampleRate::from_nominal(hz).ok_or_else(|| {
        let all: Vec<String> = SampleRate::ALL.iter().map(|r| r.nominal().to_string()).collect();
        format!("unsupported rate {hz}; one of {}", all.join(", "))
    })
}

fn parse_chip(s: &str) -> Result<(usize, SimulatedChip), String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [position, id, meters] = parts.as_slice() else {
        return Err(format!("{s}: expected POSITION:ID:METERS"));
    };
    let position: usize = position.parse().map_err(|e| format!("position {position}: {e}"))?;
    if DataSource::for_position(position).is_none() {
        return Err(format!("position {position} outside 0-7"));
    }
    let kind = match *id {
        "2132" => ChipKind::Rhd2132,
        "2216" => ChipKind::Rhd2216,
        "2164" => ChipKind::Rhd2164,
        other => return Err(format!("unknown chip {other}; use 2132, 2216 or 2164")),
    };
    let meters: f64 = meters.parse().map_err(|e| format!("meters {meters}: {e}"))?;
    Ok((position, SimulatedChip::new(kind, meters)))
}

fn simulated_factory(chips: &[(usize, SimulatedChip)]) -> SimulatedFactory {
    let board = chips
        .iter()
        .fold(SimulatedBoard::new(), |board, &(position, chip)| board.with_chip(position, chip));
    SimulatedFactory::new(board)
}

fn cmd_rates() {
    println!("{:>8}  {:>10}  {:>6}  {:>5}  {:>7}  {:>8}", "nominal", "actual Hz", "clock", "div", "word", "step ns");
    for rate in SampleRate::ALL {
        let c = rate.clock_select();
        println!(
            "{:>8}  {:>10.2}  {:>6}  {:>5}  {:#07x}  {:>8.3}",
            rate.nominal(),
            rate.hz(),
            c.clock,
            if c.divide_enable { c.divider.to_string() } else { "-".into() },
            rate.clock_word(),
            timing::clock_step(rate) * 1e9,
        );
    }
}

fn cmd_cable(meters: Option<f64>, delay: Option<u8>, rate: Option<SampleRate>) -> Result<()> {
    let rates: Vec<SampleRate> = rate.map_or_else(|| SampleRate::ALL.to_vec(), |r| vec![r]);
    match (meters, delay) {
        (Some(m), None) => {
            if m < 0.0 {
                bail!("cable length must not be negative");
            }
            println!("{m:.3} m ({:.2} ft)", timing::meters_to_feet(m));
            for rate in rates {
                let exact = timing::meters_to_delay(m, rate);
                let programmed = timing::register_delay(exact);
                let note = if u32::from(programmed) == exact { "" } else { "  (saturated)" };
                println!("  {:>8}  delay {programmed:>2}{note}", rate.to_string());
            }
        }
        (None, Some(d)) => {
            if d > timing::MAX_DELAY {
                bail!("delay {d} above {}", timing::MAX_DELAY);
            }
            println!("delay {d}");
            for rate in rates {
                let m = timing::delay_to_meters(u32::from(d), rate);
                println!("  {:>8}  {m:>7.3} m  {:>7.2} ft", rate.to_string(), timing::meters_to_feet(m));
            }
        }
        _ => bail!("give one of --meters, --feet or --delay"),
    }
    Ok(())
}

fn cmd_registers(device: Option<&str>) -> Result<()> {
    let maps: Vec<&regs::RegisterMap> = match device {
        None => regs::ALL_MAPS.iter().collect(),
        Some(name) => {
            let map = regs::ALL_MAPS
                .iter()
                .find(|m| devices::name(m.device).eq_ignore_ascii_case(name))
                .with_context(|| format!("no register map for device {name}"))?;
            vec![map]
        }
    };
    for map in maps {
        println!("{} (device {:#06x})", devices::name(map.device), map.device);
        for (name, offset) in map.entries {
            println!("  {offset:#06x}  {name}");
        }
        println!();
    }
    Ok(())
}

fn cmd_scan(chips: &[(usize, SimulatedChip)], rate: SampleRate) -> Result<()> {
    let factory = simulated_factory(chips);
    let config = BoardConfig::from_env().with_sample_rate(rate);
    let mut driver = BoardDriver::open(&factory, config)?;
    let result = driver.calibrate()?.clone();

    println!("Positions:");
    for p in &result.positions {
        let chip = p.chip.map_or_else(|| "-".to_string(), |c| c.to_string());
        let delay = p.tracker.delay().map_or_else(|| "-".to_string(), |d| d.to_string());
        println!(
            "  {:<4} {:<8} matches {}  delay {delay}",
            p.source.to_string(),
            chip,
            p.tracker.matches()
        );
    }
    println!("Ports at {rate}:");
    for p in &result.ports {
        println!(
            "  {}  delay {:>2}  {:.2} m{}",
            p.port,
            p.delay,
            p.cable_meters,
            if p.overridden { "  (override)" } else { "" }
        );
    }
    println!("Streams:");
    for a in &result.allocation.assignments {
        println!("  {:>2}  {:<6} {}", a.stream, a.source.to_string(), a.chip);
    }
    println!(
        "{} streams, {} amplifier channels",
        result.allocation.stream_count(),
        result.allocation.channel_count()
    );
    driver.close()?;
    Ok(())
}

fn cmd_stream(
    chips: &[(usize, SimulatedChip)],
    rate: SampleRate,
    batches: usize,
    batch_size: Option<usize>,
) -> Result<()> {
    let mut config = BoardConfig::from_env().with_sample_rate(rate);
    if let Some(size) = batch_size {
        config = config.with_batch_size(size);
    }
    let stream = BatchStream::new(Arc::new(simulated_factory(chips)), config);
    let sub = stream.subscribe()?;
    if let Some(status) = stream.status() {
        info!("Streaming: {status:?}");
    }

    for (i, item) in sub.iter().take(batches).enumerate() {
        let batch = item.map_err(|e| anyhow::anyhow!("stream ended: {e}"))?;
        let first = batch.timestamps().first().copied().unwrap_or(0);
        let peak = batch.amplifier_data().iter().copied().max().unwrap_or(0);
        println!(
            "batch {i:>3}  t0 {first:>9}  {} samples × {} streams  peak {peak:>5}  buffer {:>5.1}%",
            batch.len(),
            batch.streams(),
            batch.buffer_fullness()
        );
    }
    Ok(())
}
