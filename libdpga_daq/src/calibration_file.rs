//! Text import/export of the calibration held in a [CapacitorArray].
//!
//! All files are space delimited with `#` comment lines. Rows are parsed in full
//! before any value is applied, so a bad file leaves the calibration untouched.
//! Floating point values are written with the shortest representation that parses
//! back to the same bits.
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::capacitor_array::{CapacitorArray, CapacitorArrayBuilder, EnergyCalibration, TimeDepOffset};
use super::error::CalibrationError;
use super::hardware_id::{CapacitorAddress, ChannelAddress};

const PEDESTAL_COLUMNS: usize = 8;
const OFFSET_COLUMNS: usize = 8;
const ENERGY_MIN_COLUMNS: usize = 2;
const ENERGY_MAX_COLUMNS: usize = 3;

fn creation_date() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("unknown"))
}

fn open(path: &Path) -> Result<BufReader<File>, CalibrationError> {
    if !path.exists() {
        return Err(CalibrationError::MissingFile(path.to_path_buf()));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Split every data line of a file into columns, keeping the 1-based line number
fn read_rows(path: &Path) -> Result<Vec<(usize, Vec<String>)>, CalibrationError> {
    let reader = open(path)?;
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        rows.push((
            idx + 1,
            trimmed.split_whitespace().map(String::from).collect(),
        ));
    }
    Ok(rows)
}

/// Column parsing with the location attached to the error
struct RowParser<'a> {
    path: &'a Path,
    line: usize,
    columns: &'a [String],
}

impl<'a> RowParser<'a> {
    fn new(
        path: &'a Path,
        line: usize,
        columns: &'a [String],
        min: usize,
        max: usize,
    ) -> Result<Self, CalibrationError> {
        let parser = Self {
            path,
            line,
            columns,
        };
        if columns.len() < min || columns.len() > max {
            return Err(parser.malformed(format!(
                "expected {} columns, found {}",
                if min == max {
                    min.to_string()
                } else {
                    format!("{min} to {max}")
                },
                columns.len()
            )));
        }
        Ok(parser)
    }

    fn malformed(&self, reason: String) -> CalibrationError {
        CalibrationError::MalformedRow {
            path: self.path.to_path_buf(),
            line: self.line,
            reason,
        }
    }

    fn get<T: FromStr>(&self, column: usize) -> Result<T, CalibrationError>
    where
        T::Err: std::fmt::Display,
    {
        self.columns[column]
            .parse()
            .map_err(|e: T::Err| self.malformed(format!("column {}: {e}", column + 1)))
    }

    fn channel(&self) -> Result<ChannelAddress, CalibrationError> {
        ChannelAddress::from_rel(
            self.get(0)?,
            self.get(1)?,
            self.get(2)?,
            self.get(3)?,
            self.get(4)?,
        )
        .map_err(|e| self.malformed(e.to_string()))
    }
}

impl CapacitorArray {
    /// Write one row per capacitor: `iHemi iASM iDRS iQuartet iChannel iCapacitor mean stddev`
    pub fn save_calibration(&self, path: &Path, source: &str) -> Result<(), CalibrationError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "# iHemi iASM iDRS iQuartet iChannel iCapacitor pedestalMean pedestalMeanErr (creation date: {}, input file: {})",
            creation_date(),
            source
        )?;
        for (addr, cap) in self.capacitors() {
            let q = &addr.channel.quartet;
            writeln!(
                writer,
                "{} {} {} {} {} {} {} {}",
                q.hemisphere,
                q.board,
                q.drs,
                q.quartet,
                addr.channel.channel,
                addr.capacitor,
                cap.mean,
                cap.stddev
            )?;
        }
        writer.flush()?;
        spdlog::info!("Wrote pedestals to {}", path.display());
        Ok(())
    }

    /// Write one row per channel and sample index: `iHemi iASM iDRS iQuartet iChannel iSample mean err`
    pub fn save_time_dep_offsets(&self, path: &Path, source: &str) -> Result<(), CalibrationError> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "# iHemi iASM iDRS iQuartet iChannel iSample timeDepOffsetMean timeDepOffsetMeanErr (creation date: {}, input file: {})",
            creation_date(),
            source
        )?;
        for channel in ChannelAddress::all() {
            let q = &channel.quartet;
            for (index, offset) in self.channel_offsets(&channel).iter().enumerate() {
                writeln!(
                    writer,
                    "{} {} {} {} {} {} {} {}",
                    q.hemisphere,
                    q.board,
                    q.drs,
                    q.quartet,
                    channel.channel,
                    index,
                    offset.mean,
                    offset.error
                )?;
            }
        }
        writer.flush()?;
        spdlog::info!("Wrote time dependent offsets to {}", path.display());
        Ok(())
    }
}

impl CapacitorArrayBuilder {
    /// Load pedestals written by [CapacitorArray::save_calibration].
    ///
    /// Only the capacitors present in the file are overwritten. Returns the number
    /// of rows applied.
    pub fn load_calibration(&mut self, path: &Path) -> Result<usize, CalibrationError> {
        let mut parsed = Vec::new();
        for (line, columns) in read_rows(path)? {
            let row = RowParser::new(path, line, &columns, PEDESTAL_COLUMNS, PEDESTAL_COLUMNS)?;
            let channel = row.channel()?;
            let addr = CapacitorAddress::new(channel, row.get(5)?)
                .map_err(|e| row.malformed(e.to_string()))?;
            parsed.push((addr, row.get::<f64>(6)?, row.get::<f64>(7)?));
        }
        for (addr, mean, stddev) in parsed.iter() {
            self.set_pedestal(addr, *mean, *stddev);
        }
        spdlog::info!("Loaded {} pedestals from {}", parsed.len(), path.display());
        Ok(parsed.len())
    }

    /// Load time dependent offsets written by [CapacitorArray::save_time_dep_offsets]
    pub fn load_time_dep_offsets(&mut self, path: &Path) -> Result<usize, CalibrationError> {
        let mut parsed = Vec::new();
        for (line, columns) in read_rows(path)? {
            let row = RowParser::new(path, line, &columns, OFFSET_COLUMNS, OFFSET_COLUMNS)?;
            let channel = row.channel()?;
            let index: usize = row.get(5)?;
            let offset = TimeDepOffset {
                mean: row.get(6)?,
                error: row.get(7)?,
            };
            parsed.push((channel, index, offset));
        }
        for (channel, index, offset) in parsed.iter() {
            self.set_time_dep_offset(channel, *index, *offset);
        }
        spdlog::info!(
            "Loaded {} time dependent offsets from {}",
            parsed.len(),
            path.display()
        );
        Ok(parsed.len())
    }

    /// Load the energy calibration: `iChannelAbs240 ADCper511keVMean [ADCper511keVMeanErr]`
    pub fn load_energy_calibration(&mut self, path: &Path) -> Result<usize, CalibrationError> {
        let mut parsed = Vec::new();
        for (line, columns) in read_rows(path)? {
            let row = RowParser::new(path, line, &columns, ENERGY_MIN_COLUMNS, ENERGY_MAX_COLUMNS)?;
            let channel = ChannelAddress::from_abs240(row.get(0)?)
                .map_err(|e| row.malformed(e.to_string()))?;
            let adc_per_511: f64 = row.get(1)?;
            parsed.push((channel, EnergyCalibration::from_adc_per_511_kev(adc_per_511)));
        }
        for (channel, calibration) in parsed.iter() {
            self.set_energy_calibration(channel, *calibration);
        }
        spdlog::info!(
            "Loaded energy calibration of {} channels from {}",
            parsed.len(),
            path.display()
        );
        Ok(parsed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TOTAL_CAPACITORS;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_pedestal_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pedestals.csv");
        let mut builder = CapacitorArrayBuilder::new();
        let a = CapacitorAddress::from_rel(1, 2, 0, 1, 3, 999).unwrap();
        let b = CapacitorAddress::from_rel(0, 0, 2, 1, 0, 0).unwrap();
        builder.set_pedestal(&a, 0.1 + 0.2, 1.0 / 3.0);
        builder.set_pedestal(&b, -812.000000000001, 1e-300);
        let array = builder.build();
        array.save_calibration(&path, "run_0001.bin").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().filter(|l| l.starts_with('#')).count(), 1);
        assert_eq!(contents.lines().count(), TOTAL_CAPACITORS + 1);

        let mut loaded = CapacitorArrayBuilder::new();
        assert_eq!(loaded.load_calibration(&path).unwrap(), TOTAL_CAPACITORS);
        let loaded = loaded.build();
        assert_eq!(loaded.capacitor(&a), array.capacitor(&a));
        assert_eq!(loaded.capacitor(&b), array.capacitor(&b));
        assert_eq!(loaded, array);
    }

    #[test]
    fn test_malformed_row_leaves_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "bad.csv",
            "# header\n0 0 0 0 0 0 5.5 0.1\n0 0 0 0 0 1 abc 0.1\n",
        );
        let addr = CapacitorAddress::from_rel(0, 0, 0, 0, 0, 0).unwrap();
        let mut builder = CapacitorArrayBuilder::new();
        builder.set_pedestal(&addr, 1.0, 0.5);
        match builder.load_calibration(&path) {
            Err(CalibrationError::MalformedRow { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected MalformedRow, got {other:?}"),
        }
        assert_eq!(builder.array().capacitor(&addr).mean, 1.0);

        let path = write_file(&dir, "short.csv", "0 0 0 0 0 0 5.5\n");
        assert!(matches!(
            builder.load_calibration(&path),
            Err(CalibrationError::MalformedRow { line: 1, .. })
        ));
        let path = write_file(&dir, "range.csv", "0 6 0 0 0 0 5.5 0.1\n");
        assert!(matches!(
            builder.load_calibration(&path),
            Err(CalibrationError::MalformedRow { line: 1, .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let mut builder = CapacitorArrayBuilder::new();
        assert!(matches!(
            builder.load_calibration(Path::new("/this/path/does/not/exist.csv")),
            Err(CalibrationError::MissingFile(_))
        ));
    }

    #[test]
    fn test_partial_file_keeps_other_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "one.csv", "# one row\n\n1 5 2 0 3 1023 700.25 0.5\n");
        let other = CapacitorAddress::from_rel(0, 0, 0, 0, 0, 0).unwrap();
        let mut builder = CapacitorArrayBuilder::new();
        builder.set_pedestal(&other, 3.0, 0.0);
        assert_eq!(builder.load_calibration(&path).unwrap(), 1);
        let array = builder.build();
        assert_eq!(array.get(1, 5, 2, 0, 3, 1023).unwrap().mean, 700.25);
        assert_eq!(array.capacitor(&other).mean, 3.0);
    }

    #[test]
    fn test_time_dep_offset_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.csv");
        let ch = ChannelAddress::from_rel(1, 1, 1, 1, 1).unwrap();
        let mut builder = CapacitorArrayBuilder::new();
        builder.set_time_dep_offset(&ch, 0, TimeDepOffset { mean: 0.7, error: 0.01 });
        builder.set_time_dep_offset(&ch, 2, TimeDepOffset { mean: -1.3, error: 0.02 });
        let array = builder.build();
        array.save_time_dep_offsets(&path, "run").unwrap();

        let mut loaded = CapacitorArrayBuilder::new();
        assert_eq!(loaded.load_time_dep_offsets(&path).unwrap(), 3);
        assert_eq!(loaded.build().channel_offsets(&ch), array.channel_offsets(&ch));
    }

    #[test]
    fn test_energy_calibration_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "energy.csv",
            "# iChannelAbs240 ADCper511keVMean ADCper511keVMeanErr\n0 1022 3.5\n239 0 0\n",
        );
        let mut builder = CapacitorArrayBuilder::new();
        assert_eq!(builder.load_energy_calibration(&path).unwrap(), 2);
        let array = builder.build();
        let first = ChannelAddress::from_abs240(0).unwrap();
        let last = ChannelAddress::from_abs240(239).unwrap();
        assert_eq!(array.energy_calibration(&first).a, 0.5);
        assert_eq!(array.energy_calibration(&last).a, 0.0);

        let path = write_file(&dir, "bad_energy.csv", "240 1000\n");
        let mut builder = CapacitorArrayBuilder::new();
        assert!(matches!(
            builder.load_energy_calibration(&path),
            Err(CalibrationError::MalformedRow { line: 1, .. })
        ));
    }
}
