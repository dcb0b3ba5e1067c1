use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::calibration::CorrectionFlags;
use super::constants::{DEFAULT_SIGNAL_THRESHOLD, TOTAL_BOARDS};
use super::error::ConfigError;
use super::event_assembler::{AssemblerSettings, IncompletePolicy};
use super::frame::HeaderDialect;

/// Structure representing the application configuration. Contains pathing, readout and calibration information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the raw run files (run_0001.bin, ...)
    pub raw_path: PathBuf,
    /// Directory receiving calibration files and pulse records
    pub output_path: PathBuf,
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
    pub dialect: HeaderDialect,
    pub board_map_path: Option<PathBuf>,
    pub n_boards: usize,
    pub max_pending_events: usize,
    pub incomplete_policy: IncompletePolicy,
    pub signal_threshold: f64,
    pub pedestal_path: Option<PathBuf>,
    pub time_dep_offset_path: Option<PathBuf>,
    pub energy_calibration_path: Option<PathBuf>,
    pub corrections: CorrectionFlags,
    /// Zero disables the online monitor
    pub monitor_queue_depth: usize,
    pub max_events: Option<u64>,
    /// Log every decoded word; very slow
    pub debug_words: bool,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        let settings = AssemblerSettings::new(HeaderDialect::default());
        Self {
            raw_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
            dialect: settings.dialect,
            board_map_path: None,
            n_boards: TOTAL_BOARDS,
            max_pending_events: settings.max_pending,
            incomplete_policy: settings.policy,
            signal_threshold: DEFAULT_SIGNAL_THRESHOLD,
            pedestal_path: None,
            time_dep_offset_path: None,
            energy_calibration_path: None,
            corrections: CorrectionFlags::default(),
            monitor_queue_depth: 0,
            max_events: None,
            debug_words: false,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Settings for the EventAssembler of every run
    pub fn assembler_settings(&self) -> AssemblerSettings {
        AssemblerSettings {
            dialect: self.dialect,
            n_boards: self.n_boards,
            max_pending: self.max_pending_events,
            policy: self.incomplete_policy,
            signal_threshold: self.signal_threshold,
        }
    }

    pub fn does_run_exist(&self, run_number: i32) -> bool {
        self.raw_path.join(self.get_run_file_name(run_number)).exists()
    }

    /// Get the path to a raw run file
    pub fn get_run_file(&self, run_number: i32) -> Result<PathBuf, ConfigError> {
        let run_file = self.raw_path.join(self.get_run_file_name(run_number));
        if run_file.exists() {
            Ok(run_file)
        } else {
            Err(ConfigError::BadFilePath(run_file))
        }
    }

    /// Get the path to an output file of a run, e.g. `run_0001_pedestals.txt`
    pub fn get_output_file(&self, run_number: i32, suffix: &str) -> Result<PathBuf, ConfigError> {
        let output_file = self
            .output_path
            .join(format!("{}{}", self.get_run_str(run_number), suffix));
        if self.output_path.exists() {
            Ok(output_file)
        } else {
            Err(ConfigError::BadFilePath(self.output_path.clone()))
        }
    }

    /// Construct the run string
    fn get_run_str(&self, run_number: i32) -> String {
        format!("run_{run_number:0>4}")
    }

    fn get_run_file_name(&self, run_number: i32) -> String {
        format!("{}.bin", self.get_run_str(run_number))
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn is_n_boards_valid(&self) -> bool {
        self.n_boards >= 1 && self.n_boards <= TOTAL_BOARDS
    }

    pub fn is_run_range_valid(&self) -> bool {
        self.first_run_number <= self.last_run_number
    }

    pub fn is_signal_threshold_valid(&self) -> bool {
        self.signal_threshold.is_finite()
    }

    pub fn has_monitor(&self) -> bool {
        self.monitor_queue_depth > 0
    }

    /// Check every parameter a run depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_n_threads_valid() {
            return Err(ConfigError::InvalidParameter(format!(
                "n_threads must be at least 1, found {}",
                self.n_threads
            )));
        }
        if !self.is_n_boards_valid() {
            return Err(ConfigError::InvalidParameter(format!(
                "n_boards must be between 1 and {TOTAL_BOARDS}, found {}",
                self.n_boards
            )));
        }
        if self.max_pending_events == 0 {
            return Err(ConfigError::InvalidParameter(String::from(
                "max_pending_events must be at least 1",
            )));
        }
        if !self.is_run_range_valid() {
            return Err(ConfigError::InvalidParameter(format!(
                "first_run_number {} is after last_run_number {}",
                self.first_run_number, self.last_run_number
            )));
        }
        if !self.is_signal_threshold_valid() {
            return Err(ConfigError::InvalidParameter(String::from(
                "signal_threshold must be a finite number",
            )));
        }
        self.corrections
            .validate()
            .map_err(|e| ConfigError::InvalidParameter(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let config = Config {
            dialect: HeaderDialect::MultiBoard,
            incomplete_policy: IncompletePolicy::FlushWithWarning,
            max_events: Some(10),
            ..Config::default()
        };
        config.write_config_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("dialect: multi_board"));
        assert!(text.contains("incomplete_policy: flush_with_warning"));

        let read = Config::read_config_file(&path).unwrap();
        assert_eq!(read.dialect, HeaderDialect::MultiBoard);
        assert_eq!(read.max_events, Some(10));
        assert_eq!(read.n_boards, TOTAL_BOARDS);
        assert!(read.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::read_config_file(Path::new("/does/not/exist.yaml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }

    #[test]
    fn test_validation() {
        let config = Config {
            n_boards: 13,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParameter(_))));
        let config = Config {
            corrections: CorrectionFlags {
                energy: true,
                ..CorrectionFlags::none()
            },
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParameter(_))));
    }

    #[test]
    fn test_run_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            raw_path: dir.path().to_path_buf(),
            output_path: dir.path().to_path_buf(),
            ..Config::default()
        };
        assert!(!config.does_run_exist(3));
        std::fs::write(dir.path().join("run_0003.bin"), b"").unwrap();
        assert!(config.does_run_exist(3));
        assert!(config.get_run_file(3).is_ok());
        assert_eq!(
            config.get_output_file(12, ".tsv").unwrap(),
            dir.path().join("run_0012.tsv")
        );
    }
}
