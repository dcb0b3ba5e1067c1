//! # dpga_daq_cli
//!
//! Part of the dpga_daq crate family.
//!
//! This is the command line application which runs the DPGA readout chain over a range of
//! runs.
//!
//! ## Use
//!
//! Make a template configuration file and fill it out
//!
//! ```bash
//! dpga_daq_cli -p config.yaml new
//! ```
//!
//! Then run one of the phases over the configured runs
//!
//! ```bash
//! dpga_daq_cli -p config.yaml pedestals
//! dpga_daq_cli -p config.yaml offsets
//! dpga_daq_cli -p config.yaml physics
//! ```
//!
//! `physics` is the default when no phase is given. Each phase writes its files into the
//! configured `output_path`; the offsets phase needs `pedestal_path`, and the physics phase
//! needs the calibration files of the corrections it applies.
//!
//! Progress is shown per worker, and the full log is written to `dpga_daq.log`. While the
//! progress bars are drawn the log only goes to the file; errors of the workers are
//! reported on the terminal once they are done.
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use spdlog::Logger;

use libdpga_daq::config::Config;
use libdpga_daq::monitor::MonitorQueue;
use libdpga_daq::process::{create_subsets, process_subset};
use libdpga_daq::sinks::EventRecord;
use libdpga_daq::worker_status::{BarColor, RunPhase, WorkerStatus};

const MONITOR_REPORT_INTERVAL: u64 = 1000;

/// The terminal logger, and the file only logger used while progress bars are drawn
struct Loggers {
    console: Arc<Logger>,
    file_only: Arc<Logger>,
}

impl Loggers {
    fn set_level_filter(&self, filter: spdlog::LevelFilter) {
        self.console.set_level_filter(filter);
        self.file_only.set_level_filter(filter);
    }
}

fn build_loggers(log_path: &Path) -> Result<Loggers, spdlog::Error> {
    let pattern = || {
        spdlog::formatter::PatternFormatter::new(spdlog::formatter::pattern!(
            "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
        ))
    };
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(log_path)
            .formatter(Box::new(pattern()))
            .truncate(true)
            .build()?,
    );
    let stdout_sink = Arc::new(
        spdlog::sink::StdStreamSink::builder()
            .std_stream(spdlog::sink::StdStream::Stdout)
            .formatter(Box::new(pattern()))
            .build()?,
    );
    let console = Arc::new(
        Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink.clone())
            .sink(stdout_sink)
            .build()?,
    );
    let file_only = Arc::new(
        Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    Ok(Loggers { console, file_only })
}

fn init_logging() -> Result<Loggers, spdlog::Error> {
    let loggers = build_loggers(Path::new("./dpga_daq.log"))?;
    spdlog::set_default_logger(loggers.console.clone());
    Ok(loggers)
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "{prefix} [{bar:40.cyan/blue}] {pos}% {msg}",
        BarColor::MAGENTA => "{prefix} [{bar:40.magenta/blue}] {pos}% {msg}",
        BarColor::GREEN => "{prefix} [{bar:40.green/blue}] {pos}% {msg}",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Drain the monitor queue, reporting the running multiplicity
fn run_monitor(rx: crossbeam_channel::Receiver<EventRecord>) {
    let mut n_events: u64 = 0;
    let mut n_pulses: u64 = 0;
    for record in rx.iter() {
        n_events += 1;
        n_pulses += record.pulses.len() as u64;
        if n_events % MONITOR_REPORT_INTERVAL == 0 {
            spdlog::info!(
                "Monitor: {} events, mean multiplicity {:.2}",
                n_events,
                n_pulses as f64 / n_events as f64
            );
        }
    }
    spdlog::info!("Monitor received {} events", n_events);
}

fn main() {
    // Create a cli
    let matches = Command::new("dpga_daq_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(Command::new("pedestals").about("Compute per-capacitor pedestals"))
        .subcommand(Command::new("offsets").about("Compute time dependent offsets"))
        .subcommand(Command::new("physics").about("Correct events and write pulse records"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    let loggers = match init_logging() {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Could not create logging: {e}");
            return;
        }
    };

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            spdlog::error!("A configuration path is required");
            return;
        }
    };

    let phase = match matches.subcommand() {
        Some(("new", _)) => {
            spdlog::info!("Making a template config at {}...", config_path.display());
            match Config::default().write_config_file(&config_path) {
                Ok(()) => spdlog::info!("Done."),
                Err(e) => spdlog::error!("{e}"),
            }
            return;
        }
        Some(("pedestals", _)) => RunPhase::Pedestal,
        Some(("offsets", _)) => RunPhase::TimeDepOffset,
        _ => RunPhase::Physics,
    };

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.display());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return;
        }
    };
    if let Err(e) = config.validate() {
        spdlog::error!("{e}");
        return;
    }
    if config.debug_words {
        loggers.set_level_filter(spdlog::LevelFilter::All);
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("Raw Path: {}", config.raw_path.display());
    spdlog::info!("Output Path: {}", config.output_path.display());
    spdlog::info!("Dialect: {} with {} boards", config.dialect, config.n_boards);
    spdlog::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    spdlog::info!("Phase: {}", phase);

    let (monitor, monitor_handle) = if config.has_monitor() && phase == RunPhase::Physics {
        let (queue, rx) = MonitorQueue::new(config.monitor_queue_depth);
        (
            Some(Arc::new(queue)),
            Some(std::thread::spawn(move || run_monitor(rx))),
        )
    } else {
        (None, None)
    };

    // Spawn the workers, one bar each. Stdout belongs to the bars until they finish.
    spdlog::info!("Logging to dpga_daq.log while processing...");
    spdlog::set_default_logger(loggers.file_only.clone());
    let pb_manager = MultiProgress::new();
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut bars: Vec<ProgressBar> = Vec::new();
    let mut workers = Vec::new();
    for subset in create_subsets(&config).into_iter() {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let idx = workers.len();
        let bar = pb_manager.add(ProgressBar::new(100));
        bar.set_style(bar_style(&phase.color()));
        bar.set_prefix(format!("Worker {idx}"));
        bars.push(bar);
        let conf = config.clone();
        let tx = tx.clone();
        let monitor = monitor.clone();
        workers.push(std::thread::spawn(move || {
            process_subset(conf, phase, tx, idx, subset, monitor)
        }));
    }
    drop(tx);
    drop(monitor);

    loop {
        std::thread::sleep(std::time::Duration::from_millis(500));
        loop {
            match rx.try_recv() {
                Ok(status) => {
                    if let Some(bar) = bars.get(status.worker_id) {
                        bar.set_position((status.progress * 100.0) as u64);
                        bar.set_message(format!(
                            "{} run {} ({} events)",
                            status.phase, status.run_number, status.n_events
                        ));
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => break,
            }
        }

        if workers.iter().all(|w| w.is_finished()) {
            break;
        }
    }
    for bar in bars.iter() {
        bar.finish();
    }
    spdlog::set_default_logger(loggers.console.clone());

    for (idx, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(Ok(())) => spdlog::info!("Worker {} complete", idx),
            Ok(Err(e)) => spdlog::error!("Worker {} failed with error: {e}", idx),
            Err(_) => spdlog::error!("Failed to join worker {}!", idx),
        }
    }
    if let Some(handle) = monitor_handle {
        if handle.join().is_err() {
            spdlog::error!("Failed to join the monitor!");
        }
    }

    spdlog::info!("Done.");
}
