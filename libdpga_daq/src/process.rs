use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::board_map::BoardMap;
use super::calibration::{correct_event, PedestalRun, TimeDepOffsetRun};
use super::capacitor_array::{CapacitorArray, CapacitorArrayBuilder};
use super::codec::FrameReader;
use super::config::Config;
use super::error::ProcessorError;
use super::event::Event;
use super::event_assembler::EventAssembler;
use super::monitor::MonitorQueue;
use super::sinks::{EventRecord, PedestalFileSink, PedestalSink, RecordWriter, TextRecordWriter};
use super::worker_status::{RunPhase, WorkerStatus};

const PEDESTAL_SUFFIX: &str = "_pedestals.txt";
const OFFSET_SUFFIX: &str = "_offsets.txt";
const RECORD_SUFFIX: &str = ".tsv";

/// Pull frames from `reader` through `assembler` and hand every event to `on_event`
/// together with the number of bytes consumed so far.
///
/// Stops after `max_events` events if given. Returns the number of events handled.
pub fn assemble_events<R, F>(
    reader: &mut FrameReader<R>,
    assembler: &mut EventAssembler,
    max_events: Option<u64>,
    mut on_event: F,
) -> Result<u64, ProcessorError>
where
    R: Read,
    F: FnMut(&Event, u64) -> Result<(), ProcessorError>,
{
    let mut n_events: u64 = 0;
    let mut exhausted = false;
    loop {
        while let Some(event) = assembler.poll() {
            on_event(&event, reader.bytes_read())?;
            n_events += 1;
            if max_events.is_some_and(|max| n_events >= max) {
                spdlog::info!("Reached the limit of {} events", n_events);
                return Ok(n_events);
            }
        }
        if exhausted {
            break;
        }
        match reader.read_frame()? {
            Some(frame) => assembler.push(frame)?,
            None => {
                assembler.finish()?;
                exhausted = true;
            }
        }
    }
    if assembler.n_incomplete() > 0 {
        spdlog::warn!(
            "{} of {} events were incomplete",
            assembler.n_incomplete(),
            assembler.n_emitted()
        );
    }
    Ok(n_events)
}

/// Sends coarse progress updates as the run file is consumed
struct ProgressReporter<'a> {
    tx: &'a Sender<WorkerStatus>,
    run_number: i32,
    worker_id: usize,
    phase: RunPhase,
    total: u64,
    flush_val: u64,
    last: u64,
}

impl<'a> ProgressReporter<'a> {
    fn new(tx: &'a Sender<WorkerStatus>, run_number: i32, worker_id: usize, phase: RunPhase, total: u64) -> Self {
        let flush_frac: f64 = 0.01;
        Self {
            tx,
            run_number,
            worker_id,
            phase,
            total,
            flush_val: (total as f64 * flush_frac) as u64,
            last: 0,
        }
    }

    fn send(&self, progress: f32, n_events: u64) -> Result<(), ProcessorError> {
        self.tx.send(WorkerStatus::new(
            progress,
            self.run_number,
            self.worker_id,
            self.phase,
            n_events,
        ))?;
        Ok(())
    }

    fn update(&mut self, bytes: u64, n_events: u64) -> Result<(), ProcessorError> {
        if self.total > 0 && bytes.saturating_sub(self.last) > self.flush_val {
            self.last = bytes;
            self.send((bytes as f64 / self.total as f64) as f32, n_events)?;
        }
        Ok(())
    }
}

/// Load the calibration files a physics run needs for its corrections
pub fn load_calibration(config: &Config) -> Result<CapacitorArray, ProcessorError> {
    let flags = config.corrections;
    flags.validate()?;
    let mut builder = CapacitorArrayBuilder::new();
    if flags.pedestal {
        let path = config
            .pedestal_path
            .as_deref()
            .ok_or(ProcessorError::MissingCalibration("pedestal"))?;
        builder.load_calibration(path)?;
    }
    if flags.time_dep_offset {
        let path = config
            .time_dep_offset_path
            .as_deref()
            .ok_or(ProcessorError::MissingCalibration("time dependent offset"))?;
        builder.load_time_dep_offsets(path)?;
    }
    if flags.energy {
        let path = config
            .energy_calibration_path
            .as_deref()
            .ok_or(ProcessorError::MissingCalibration("energy"))?;
        builder.load_energy_calibration(path)?;
    }
    Ok(builder.build())
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// The main loop of dpga_daq.
///
/// Reads one run file, assembles its events and runs the requested phase over them:
/// pedestals and time dependent offsets are written as calibration files, physics
/// events are corrected and written as pulse records (and offered to the monitor).
pub fn process_run(
    config: &Config,
    run_number: i32,
    phase: RunPhase,
    calibration: &Arc<CapacitorArray>,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
    monitor: Option<&MonitorQueue<EventRecord>>,
) -> Result<(), ProcessorError> {
    let run_path = config.get_run_file(run_number)?;
    let source = source_name(&run_path);
    let total_data_size = std::fs::metadata(&run_path)?.len();
    spdlog::info!(
        "Total run size: {}",
        human_bytes::human_bytes(total_data_size as f64)
    );

    let mut reader = FrameReader::new(
        BufReader::new(File::open(&run_path)?),
        config.dialect,
        config.debug_words,
    )?;
    let board_map = BoardMap::new(config.board_map_path.as_deref())?;
    let mut assembler = EventAssembler::new(config.assembler_settings(), board_map);
    let mut progress = ProgressReporter::new(tx, run_number, *worker_id, phase, total_data_size);
    progress.send(0.0, 0)?;

    let n_events = match phase {
        RunPhase::Pedestal => {
            let mut run = PedestalRun::new();
            let n_events = assemble_events(&mut reader, &mut assembler, config.max_events, |event, bytes| {
                run.accumulate(event);
                progress.update(bytes, run.n_events())
            })?;
            spdlog::info!(
                "Accumulated {} pulses without signal for pedestals",
                run.n_pulses()
            );
            let path = config.get_output_file(run_number, PEDESTAL_SUFFIX)?;
            let mut sink = PedestalFileSink::new(&path, &source);
            sink.consume(&run.finalize())?;
            n_events
        }
        RunPhase::TimeDepOffset => {
            let mut run = TimeDepOffsetRun::new(calibration.clone());
            let n_events = assemble_events(&mut reader, &mut assembler, config.max_events, |event, bytes| {
                run.accumulate(event);
                progress.update(bytes, run.n_events())
            })?;
            let path = config.get_output_file(run_number, OFFSET_SUFFIX)?;
            run.finish(&path, &source)?;
            n_events
        }
        RunPhase::Physics => {
            let path = config.get_output_file(run_number, RECORD_SUFFIX)?;
            let mut writer = TextRecordWriter::create(&path)?;
            let mut count: u64 = 0;
            let n_events = assemble_events(&mut reader, &mut assembler, config.max_events, |event, bytes| {
                let corrected = correct_event(event, calibration, config.corrections)?;
                let record = EventRecord::from(&corrected);
                writer.write(&record)?;
                if let Some(queue) = monitor {
                    queue.publish(record);
                }
                count += 1;
                progress.update(bytes, count)
            })?;
            writer.finish()?;
            spdlog::info!("Wrote {} pulse records to {}", writer.rows(), path.display());
            if let Some(queue) = monitor {
                if queue.dropped() > 0 {
                    spdlog::warn!("Monitor dropped {} events", queue.dropped());
                }
            }
            n_events
        }
    };

    progress.send(1.0, n_events)?;
    spdlog::info!(
        "Done with run {}: {} events from {} frames ({})",
        run_number,
        n_events,
        reader.frames_read(),
        human_bytes::human_bytes(reader.bytes_read() as f64)
    );
    Ok(())
}

/// Calibration snapshot a phase starts from
fn phase_calibration(config: &Config, phase: RunPhase) -> Result<Arc<CapacitorArray>, ProcessorError> {
    let array = match phase {
        RunPhase::Pedestal => CapacitorArray::new(),
        RunPhase::TimeDepOffset => {
            let path = config
                .pedestal_path
                .as_deref()
                .ok_or(ProcessorError::MissingCalibration("pedestal"))?;
            let mut builder = CapacitorArrayBuilder::new();
            builder.load_calibration(path)?;
            builder.build()
        }
        RunPhase::Physics => load_calibration(config)?,
    };
    Ok(array.into_shared())
}

/// The function to be called by a separate thread (typically the UI).
/// Allows multiple runs to be processed
pub fn process(
    config: Config,
    phase: RunPhase,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    monitor: Option<Arc<MonitorQueue<EventRecord>>>,
) -> Result<(), ProcessorError> {
    let runs: Vec<i32> = (config.first_run_number..(config.last_run_number + 1)).collect();
    process_subset(config, phase, tx, worker_id, runs, monitor)
}

/// Process a subset of runs
pub fn process_subset(
    config: Config,
    phase: RunPhase,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
    monitor: Option<Arc<MonitorQueue<EventRecord>>>,
) -> Result<(), ProcessorError> {
    config.validate()?;
    let calibration = phase_calibration(&config, phase)?;
    for run in subset {
        if config.does_run_exist(run) {
            spdlog::info!("Processing run {} ({})...", run, phase);
            process_run(
                &config,
                run,
                phase,
                &calibration,
                &tx,
                &worker_id,
                monitor.as_deref(),
            )?;
            spdlog::info!("Finished processing run {}.", run);
        } else {
            spdlog::info!("Run {} does not exist, skipping...", run);
        }
    }
    Ok(())
}

/// Divide a run range in to a set of subranges (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_subsets() {
        let config = Config {
            first_run_number: 1,
            last_run_number: 7,
            n_threads: 3,
            ..Config::default()
        };
        let subsets = create_subsets(&config);
        assert_eq!(subsets, vec![vec![1, 4, 7], vec![2, 5], vec![3, 6]]);
    }

    #[test]
    fn test_missing_calibration() {
        let mut config = Config::default();
        config.corrections.pedestal = true;
        assert!(matches!(
            load_calibration(&config),
            Err(ProcessorError::MissingCalibration("pedestal"))
        ));
    }
}
