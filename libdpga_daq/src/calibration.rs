use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::capacitor_array::{CapacitorArray, CapacitorArrayBuilder};
use super::error::{CalibrationError, CorrectionError};
use super::event::Event;

/// Which corrections [correct_event] applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CorrectionFlags {
    pub pedestal: bool,
    pub time_dep_offset: bool,
    pub energy: bool,
}

impl CorrectionFlags {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            pedestal: true,
            time_dep_offset: true,
            energy: true,
        }
    }

    /// Offsets are defined on pedestal corrected samples, and the energy scale on fully
    /// corrected ones
    pub fn validate(&self) -> Result<(), CorrectionError> {
        if self.time_dep_offset && !self.pedestal {
            return Err(CorrectionError::OffsetWithoutPedestal);
        }
        if self.energy && !self.pedestal {
            return Err(CorrectionError::EnergyWithoutPedestal);
        }
        if self.energy && !self.time_dep_offset {
            return Err(CorrectionError::EnergyWithoutOffset);
        }
        Ok(())
    }
}

/// Return a corrected copy of an event. The event itself is left untouched.
pub fn correct_event(
    event: &Event,
    array: &CapacitorArray,
    flags: CorrectionFlags,
) -> Result<Event, CorrectionError> {
    flags.validate()?;
    let mut corrected = event.clone();
    for cluster in corrected.clusters_mut() {
        for pulse in cluster.pulses.iter_mut() {
            if flags.pedestal {
                pulse.subtract_pedestal(array);
            }
            if flags.time_dep_offset {
                pulse.subtract_time_dep_offsets(array);
            }
            if flags.energy {
                let energy = array.energy_calibration(&pulse.channel).apply(pulse.amplitude());
                pulse.set_energy(energy);
            }
        }
    }
    Ok(corrected)
}

/// PedestalRun accumulates per-capacitor pedestals from the no-signal pulses of a
/// calibration run. [PedestalRun::finish] consumes the run, so statistics are
/// finalized exactly once.
#[derive(Debug, Default)]
pub struct PedestalRun {
    builder: CapacitorArrayBuilder,
    n_events: u64,
    n_pulses: u64,
}

impl PedestalRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing calibration; only pedestals are replaced
    pub fn from_array(array: CapacitorArray) -> Self {
        Self {
            builder: CapacitorArrayBuilder::from_array(array),
            n_events: 0,
            n_pulses: 0,
        }
    }

    pub fn accumulate(&mut self, event: &Event) {
        self.n_events += 1;
        for pulse in event.pulses().filter(|p| !p.has_signal()) {
            self.n_pulses += 1;
            for sample in pulse.samples() {
                self.builder.add_pedestal_sample(sample.capacitor, sample.amplitude);
            }
        }
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    /// Pulses without signal accumulated so far
    pub fn n_pulses(&self) -> u64 {
        self.n_pulses
    }

    /// Finalize the pedestals without writing a file
    pub fn finalize(mut self) -> CapacitorArray {
        self.builder.finalize_mean_stddev();
        self.builder.build()
    }

    /// Finalize the pedestals and write them to `path`
    pub fn finish(self, path: &Path, source: &str) -> Result<CapacitorArray, CalibrationError> {
        let n_events = self.n_events;
        let array = self.finalize();
        array.save_calibration(path, source)?;
        spdlog::info!(
            "Pedestal run finished with {} events; wrote {}",
            n_events,
            path.display()
        );
        Ok(array)
    }
}

/// TimeDepOffsetRun accumulates per-channel, per-sample-index offsets from the
/// no-signal pulses of a calibration run, after pedestal subtraction.
#[derive(Debug)]
pub struct TimeDepOffsetRun {
    pedestals: Arc<CapacitorArray>,
    builder: CapacitorArrayBuilder,
    n_events: u64,
}

impl TimeDepOffsetRun {
    pub fn new(pedestals: Arc<CapacitorArray>) -> Self {
        let builder = CapacitorArrayBuilder::from_shared(&pedestals);
        Self {
            pedestals,
            builder,
            n_events: 0,
        }
    }

    pub fn accumulate(&mut self, event: &Event) {
        self.n_events += 1;
        for pulse in event.pulses().filter(|p| !p.has_signal()) {
            let mut corrected = pulse.clone();
            corrected.subtract_pedestal(&self.pedestals);
            for (idx, sample) in corrected.samples().iter().enumerate() {
                self.builder
                    .add_time_dep_offset_sample(&corrected.channel, idx, sample.amplitude);
            }
        }
    }

    pub fn n_events(&self) -> u64 {
        self.n_events
    }

    pub fn finalize(mut self) -> CapacitorArray {
        self.builder.finalize_time_dep_offsets();
        self.builder.build()
    }

    /// Finalize the offsets and write them to `path`. The returned array keeps the
    /// pedestals the run started from.
    pub fn finish(self, path: &Path, source: &str) -> Result<CapacitorArray, CalibrationError> {
        let n_events = self.n_events;
        let array = self.finalize();
        array.save_time_dep_offsets(path, source)?;
        spdlog::info!(
            "Time dependent offset run finished with {} events; wrote {}",
            n_events,
            path.display()
        );
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacitor_array::{EnergyCalibration, TimeDepOffset};
    use crate::constants::*;
    use crate::hardware_id::{CapacitorAddress, QuartetAddress};
    use crate::pulse::{Cluster, Pulse, Sample};

    /// One cluster on quartet 0 with a flat pulse on channel 0 and a signal on channel 1
    fn make_event(srout: u32, level: f64) -> Event {
        let quartet = QuartetAddress::new(0, 0, 0, 0).unwrap();
        let mut pulses: [Pulse; 4] = std::array::from_fn(|c| Pulse::new(quartet.channel(c as u8).unwrap()));
        for (c, pulse) in pulses.iter_mut().enumerate().take(2) {
            for idx in 0..4usize {
                let amplitude = if c == 1 && idx == 2 { 2000.0 } else { level + idx as f64 };
                let capacitor = CapacitorAddress::from_srout(pulse.channel, srout, idx).id();
                pulse
                    .add_sample(
                        Sample::new(amplitude, idx as u16, idx as f64 * SAMPLING_PERIOD_NS),
                        capacitor,
                        DEFAULT_SIGNAL_THRESHOLD,
                    )
                    .unwrap();
            }
        }
        Event::new(0, 0, None, vec![Cluster::new(quartet, pulses, srout, vec![])], 2, 2)
    }

    #[test]
    fn test_correction_contract() {
        let event = make_event(0, 100.0);
        let array = CapacitorArray::new();
        let flags = CorrectionFlags {
            time_dep_offset: true,
            ..CorrectionFlags::none()
        };
        assert_eq!(
            correct_event(&event, &array, flags),
            Err(CorrectionError::OffsetWithoutPedestal)
        );
        let flags = CorrectionFlags {
            energy: true,
            ..CorrectionFlags::none()
        };
        assert_eq!(
            correct_event(&event, &array, flags),
            Err(CorrectionError::EnergyWithoutPedestal)
        );
        let flags = CorrectionFlags {
            pedestal: true,
            energy: true,
            ..CorrectionFlags::none()
        };
        assert_eq!(
            correct_event(&event, &array, flags),
            Err(CorrectionError::EnergyWithoutOffset)
        );
        assert!(correct_event(&event, &array, CorrectionFlags::none()).is_ok());
    }

    #[test]
    fn test_correction_returns_copy() {
        let event = make_event(0, 100.0);
        let mut builder = CapacitorArrayBuilder::new();
        let flat = &event.clusters()[0].pulses[0];
        for sample in flat.samples() {
            let addr = sample.capacitor.address().unwrap();
            builder.set_pedestal(&addr, 100.0, 1.0);
        }
        builder.set_time_dep_offset(&flat.channel, 3, TimeDepOffset { mean: 3.0, error: 0.1 });
        builder.set_energy_calibration(&flat.channel, EnergyCalibration::from_adc_per_511_kev(2.0));
        let array = builder.build();

        let corrected = correct_event(&event, &array, CorrectionFlags::all()).unwrap();
        let raw: Vec<f64> = event.clusters()[0].pulses[0].samples().iter().map(|s| s.amplitude).collect();
        assert_eq!(raw, vec![100.0, 101.0, 102.0, 103.0]);
        let pulse = &corrected.clusters()[0].pulses[0];
        let values: Vec<f64> = pulse.samples().iter().map(|s| s.amplitude).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 0.0]);
        assert_eq!(pulse.energy(), Some(2.0 * 511.0 / 2.0));
        assert!(event.clusters()[0].pulses[0].energy().is_none());
    }

    #[test]
    fn test_pedestal_run_skips_signal() {
        let mut run = PedestalRun::new();
        run.accumulate(&make_event(5, 100.0));
        run.accumulate(&make_event(5, 110.0));
        assert_eq!(run.n_events(), 2);
        assert_eq!(run.n_pulses(), 2 * 3);
        let array = run.finalize();

        let quartet = QuartetAddress::new(0, 0, 0, 0).unwrap();
        let flat = quartet.channel(0).unwrap();
        let cap = array.capacitor(&CapacitorAddress::from_srout(flat, 5, 1));
        assert_eq!(cap.mean, 106.0);
        assert!((cap.stddev - 5.0).abs() < 1e-12);
        // the signal pulse contributed nothing
        let signal = quartet.channel(1).unwrap();
        let cap = array.capacitor(&CapacitorAddress::from_srout(signal, 5, 1));
        assert_eq!((cap.mean, cap.stddev), (0.0, 0.0));
    }

    #[test]
    fn test_offset_run_uses_pedestals() {
        let mut pedestals = PedestalRun::new();
        pedestals.accumulate(&make_event(0, 100.0));
        let pedestals = pedestals.finalize().into_shared();

        let mut run = TimeDepOffsetRun::new(pedestals.clone());
        // same capacitors one level higher: every offset becomes 1
        run.accumulate(&make_event(0, 101.0));
        run.accumulate(&make_event(0, 101.0));
        let array = run.finalize();
        let channel = QuartetAddress::new(0, 0, 0, 0).unwrap().channel(0).unwrap();
        let offsets = array.channel_offsets(&channel);
        assert_eq!(offsets.len(), 4);
        assert!(offsets.iter().all(|o| o.mean == 1.0 && o.error == 0.0));
        assert_eq!(array.capacitors().count(), pedestals.capacitors().count());
        assert_eq!(
            array.capacitor(&CapacitorAddress::from_srout(channel, 0, 2)).mean,
            102.0
        );
    }

    #[test]
    fn test_pedestal_run_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pedestals.txt");
        let mut run = PedestalRun::new();
        run.accumulate(&make_event(9, 50.0));
        let array = run.finish(&path, "run_0001.bin").unwrap();

        let mut builder = CapacitorArrayBuilder::new();
        builder.load_calibration(&path).unwrap();
        assert_eq!(builder.build(), array);
    }
}
