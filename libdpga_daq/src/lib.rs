//! # dpga_daq
//!
//! dpga_daq is the readout and calibration chain of the DPGA PET demonstrator, written in
//! Rust. It takes the binary streams produced by the DRS waveform digitizers of the
//! detector (either routed through the ASM boards or through the multi-board AMC
//! concentrator), rebuilds them into events of clusters and pulses, and produces the
//! per-capacitor pedestal, time dependent offset and pulse record files used downstream.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, you will
//! most likely need to install the Rust tool chain. See the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./dpga_daq_cli` from the top
//! level repository. To use the CLI see the `dpga_daq_cli` documentation.
//!
//! ## Hardware
//!
//! The detector has 2 hemispheres of 6 ASM boards. Each board carries 3 DRS chips split
//! into 2 quartets of 4 channels, and each channel has 1024 capacitors sampled
//! circularly. The second quartet of the third DRS is not connected, leaving 60 connected
//! quartets (240 channels) out of 72 (288). See [hardware_id] for the numbering schemes.
//!
//! ## Data streams
//!
//! Three stream layouts (dialects) are supported, all big endian:
//!
//! - `legacy`: a two word header (size, number of frames) followed by ASM frames
//! - `calibration`: a sixteen word run information header followed by ASM frames
//! - `multi_board`: no header; AMC frames of 16 bit words, one quartet per frame
//!
//! ASM frames carry one fifo (half a quartet) and are matched into events on their event
//! id; AMC frames are matched on their timestamp. See [codec] and [event_assembler].
//!
//! ## Configuration
//!
//! Runs are read from `raw_path/run_####.bin` for every run in the range
//! `first_run_number..=last_run_number`, split over `n_threads` workers. The YAML format of
//! a configuration file is as follows:
//!
//! ```yml
//! raw_path: None
//! output_path: None
//! first_run_number: 0
//! last_run_number: 0
//! n_threads: 1
//! dialect: legacy
//! board_map_path: null
//! n_boards: 12
//! max_pending_events: 1
//! incomplete_policy: fail_fast
//! signal_threshold: 800.0
//! pedestal_path: null
//! time_dep_offset_path: null
//! energy_calibration_path: null
//! corrections:
//!   pedestal: false
//!   time_dep_offset: false
//!   energy: false
//! monitor_queue_depth: 0
//! max_events: null
//! debug_words: false
//! ```
//!
//! Note that if the `board_map_path` field is set to `null`, the bundled default map will
//! be used. The board map is a CSV file `fe_id,board` giving the absolute board (0..12)
//! of every AMC front end id. A front end id appears once, but a board may be listed under
//! several ids; the bundled map reads the test bench front end 0x1e as board 0.
//!
//! ## Output
//!
//! Every phase writes into `output_path`:
//!
//! - pedestals: `run_####_pedestals.txt`, one row per capacitor
//!   (`iHemi iASM iDRS iQuartet iChannel iCapacitor pedestalMean pedestalMeanErr`)
//! - offsets: `run_####_offsets.txt`, one row per channel and sample index
//!   (`iHemi iASM iDRS iQuartet iChannel iSample timeDepOffsetMean timeDepOffsetMeanErr`)
//! - physics: `run_####.tsv`, one tab separated row per pulse with signal
//!
//! A log file is also written by the CLI. If an error occurs the log file will contain
//! the detailed status of the run. It is not advised to delete the log files.
pub mod board_map;
pub mod calibration;
pub mod calibration_file;
pub mod capacitor_array;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod event_assembler;
pub mod frame;
pub mod hardware_id;
pub mod monitor;
pub mod process;
pub mod pulse;
pub mod sinks;
pub mod worker_status;
