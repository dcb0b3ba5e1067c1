use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::worker_status::WorkerStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("Invalid hemisphere {0}; expected less than {max}", max=NUMBER_OF_HEMISPHERES)]
    BadHemisphere(u8),
    #[error("Invalid board {0}; expected less than {max}", max=NUMBER_OF_BOARDS)]
    BadBoard(u8),
    #[error("Invalid DRS {0}; expected less than {max}", max=NUMBER_OF_DRS)]
    BadDrs(u8),
    #[error("Invalid quartet {0}; expected less than {max}", max=NUMBER_OF_QUARTETS)]
    BadQuartet(u8),
    #[error("Invalid channel {0}; expected less than {max}", max=NUMBER_OF_CHANNELS)]
    BadChannel(u8),
    #[error("Invalid capacitor {0}; expected less than {max}", max=NUMBER_OF_CAPACITORS)]
    BadCapacitor(u16),
    #[error("Absolute index {value} is out of range for the {scheme} numbering (size {size})")]
    AbsoluteOutOfRange {
        scheme: &'static str,
        value: usize,
        size: usize,
    },
    #[error("Quartet (drs {drs}, quartet {quartet}) is not connected and has no physical index")]
    UnusedQuartet { drs: u8, quartet: u8 },
    #[error("Fifo {0} belongs to an unconnected quartet")]
    UnusedFifo(usize),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Bad magic word in {field} at byte offset {offset}: expected {expected:#x}, found {found:#x}")]
    BadMagic {
        offset: u64,
        field: &'static str,
        expected: u32,
        found: u32,
    },
    #[error("Stream truncated at byte offset {offset}")]
    Truncated { offset: u64 },
    #[error("Unknown header dialect: {0}")]
    UnknownDialect(String),
    #[error("Invalid stream header at byte offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },
    #[error("Invalid value {value} for {field} at byte offset {offset}")]
    InvalidField {
        offset: u64,
        field: &'static str,
        value: u64,
    },
    #[error("Front end id in trailer ({trailer:#x}) does not match header ({header:#x}) at byte offset {offset}")]
    FrontEndMismatch { offset: u64, header: u16, trailer: u16 },
    #[error("End of stream reached after {found} frames but the stream header announced {expected}")]
    FrameCountMismatch { expected: u32, found: u32 },
    #[error("FrameCodec failed due to IO error at byte offset {offset}: {source}")]
    IOError {
        offset: u64,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("FrameCodec failed to encode due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Cannot encode a {frame} frame with a {dialect} codec")]
    DialectMismatch {
        frame: &'static str,
        dialect: &'static str,
    },
    #[error("Frame carries {found} samples per channel; codec expects {expected}")]
    SampleCountMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum FatalProtocolError {
    #[error("Event id mismatch: expected {expected}, found {found}")]
    EventIdMismatch { expected: u64, found: u64 },
    #[error("SRout mismatch in quartet {quartet}: {first} vs {second}")]
    SroutMismatch {
        quartet: usize,
        first: u32,
        second: u32,
    },
    #[error("Counter {counter} mismatch in quartet {quartet}: {first:#x} vs {second:#x}")]
    CounterMismatch {
        quartet: usize,
        counter: usize,
        first: u32,
        second: u32,
    },
    #[error("Non-uniform sample timing at sample {index}: step {found} differs from {expected}")]
    TimeStepDrift {
        index: usize,
        expected: f64,
        found: f64,
    },
    #[error("Received a second frame for slot {slot} of event {key}")]
    DuplicateFrame { key: u64, slot: usize },
    #[error("Received a frame for event {0} which was already emitted")]
    StaleFrame(u64),
    #[error("Event {key} is incomplete: received {received} of {expected} frames")]
    IncompleteEvent {
        key: u64,
        received: usize,
        expected: usize,
    },
    #[error("Channel blocks of frame {key} (front end {fe_id:#x}) do not form one quartet: {reason}")]
    ChannelMismatch {
        key: u64,
        fe_id: u16,
        reason: String,
    },
    #[error("Unknown front end id {0:#x}")]
    UnknownFrontEnd(u16),
    #[error("Received an {kind} frame in a {dialect} stream")]
    UnexpectedFrame {
        kind: &'static str,
        dialect: &'static str,
    },
    #[error("Hardware address of board {board} is outside the configured {n_boards} boards")]
    BoardNotReadOut { board: usize, n_boards: usize },
    #[error("Frame routing failed due to topology error: {0}")]
    Routing(#[from] TopologyError),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Could not load calibration because file {0:?} does not exist")]
    MissingFile(PathBuf),
    #[error("Calibration file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Malformed row in calibration file {path:?} at line {line}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrectionError {
    #[error("Time dependent offset correction requested without pedestal correction")]
    OffsetWithoutPedestal,
    #[error("Energy calibration requested without pedestal correction")]
    EnergyWithoutPedestal,
    #[error("Energy calibration requested without time dependent offset correction")]
    EnergyWithoutOffset,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Sink failed to write a record: {0}")]
    RecordError(#[from] csv::Error),
    #[error("Sink failed due to calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
}

#[derive(Debug, Error)]
pub enum BoardMapError {
    #[error("BoardMap failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("BoardMap failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("BoardMap was given a file with the incorrect format; most likely the number of columns is incorrect")]
    BadFileFormat,
    #[error("BoardMap contains front end id {0:#x} more than once")]
    DuplicateFrontEnd(u16),
    #[error("BoardMap board index {0} is out of range; expected less than {max}", max=TOTAL_BOARDS)]
    BoardOutOfRange(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid value: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to decode error: {0}")]
    DecodeError(#[from] DecodeError),
    #[error("Processor failed due to protocol error: {0}")]
    ProtocolError(#[from] FatalProtocolError),
    #[error("Processor failed due to calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to correction error: {0}")]
    CorrectionError(#[from] CorrectionError),
    #[error("Processor failed due to sink error: {0}")]
    SinkError(#[from] SinkError),
    #[error("Processor failed due to BoardMap error: {0}")]
    MapError(#[from] BoardMapError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor could not find a {0} calibration file in the configuration")]
    MissingCalibration(&'static str),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
