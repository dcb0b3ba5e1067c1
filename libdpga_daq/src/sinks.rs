use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::capacitor_array::CapacitorArray;
use super::error::SinkError;
use super::event::Event;
use super::pulse::Pulse;

/// Fraction of the amplitude used for pulse timing (T30)
pub const TIMING_FRACTION: f64 = 0.3;

/// Per pulse quantities written to the output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PulseRecord {
    pub event: u64,
    /// Connected channel number (0..240)
    pub channel: usize,
    pub amplitude: f64,
    pub charge: f64,
    pub time: Option<f64>,
    pub energy: Option<f64>,
    pub saturated: bool,
}

impl PulseRecord {
    pub fn new(event: u64, pulse: &Pulse) -> Option<Self> {
        Some(Self {
            event,
            channel: pulse.channel.abs240().ok()?,
            amplitude: pulse.amplitude(),
            charge: pulse.charge(),
            time: pulse.rising_edge_fraction(TIMING_FRACTION),
            energy: pulse.energy(),
            saturated: pulse.has_saturated_signal(),
        })
    }
}

/// Derived quantities of one event: a record for every pulse with signal
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: u64,
    pub key: u64,
    pub timestamp: Option<u64>,
    pub complete: bool,
    pub pulses: Vec<PulseRecord>,
}

impl From<&Event> for EventRecord {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            key: event.key,
            timestamp: event.timestamp,
            complete: event.is_complete(),
            pulses: event
                .pulses_with_signal()
                .filter_map(|p| PulseRecord::new(event.id, p))
                .collect(),
        }
    }
}

/// Receives the per-capacitor statistics at the end of a pedestal run
pub trait PedestalSink {
    fn consume(&mut self, array: &CapacitorArray) -> Result<(), SinkError>;
}

/// Receives the derived quantities of every processed event
pub trait RecordWriter {
    fn write(&mut self, record: &EventRecord) -> Result<(), SinkError>;

    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Receives corrected events for line-of-response reconstruction
pub trait LorReconstructor {
    fn reconstruct(&mut self, event: &Event) -> Result<(), SinkError>;
}

/// Writes pedestals into a calibration file
#[derive(Debug, Clone)]
pub struct PedestalFileSink {
    path: PathBuf,
    source: String,
}

impl PedestalFileSink {
    pub fn new(path: &Path, source: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            source: source.to_string(),
        }
    }
}

impl PedestalSink for PedestalFileSink {
    fn consume(&mut self, array: &CapacitorArray) -> Result<(), SinkError> {
        array.save_calibration(&self.path, &self.source)?;
        Ok(())
    }
}

/// TextRecordWriter writes one tab-separated row per pulse with signal, with a
/// header row
pub struct TextRecordWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: u64,
}

impl TextRecordWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TextRecordWriter<W> {
    pub fn new(out: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(true)
            .delimiter(b'\t')
            .from_writer(out);
        Self { writer, rows: 0 }
    }

    /// Rows written so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::IOError(e.into_error()))
    }
}

impl<W: Write> RecordWriter for TextRecordWriter<W> {
    fn write(&mut self, record: &EventRecord) -> Result<(), SinkError> {
        for pulse in record.pulses.iter() {
            self.writer.serialize(pulse)?;
            self.rows += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
