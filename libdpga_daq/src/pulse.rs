use super::capacitor_array::CapacitorArray;
use super::constants::*;
use super::error::FatalProtocolError;
use super::hardware_id::{CapacitorId, ChannelAddress, QuartetAddress};

/// One raw measurement of a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub amplitude: f64,
    /// Position of the sample inside its pulse
    pub index: u16,
    pub time: f64,
    /// Set by [Pulse::add_sample]
    pub capacitor: CapacitorId,
}

impl Sample {
    pub fn new(amplitude: f64, index: u16, time: f64) -> Self {
        Self {
            amplitude,
            index,
            time,
            capacitor: CapacitorId::default(),
        }
    }
}

/// The samples of one channel in one event.
///
/// Derived quantities (amplitude, charge, edges) are computed from the samples on
/// every call and reflect whatever corrections have been applied so far.
#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    pub channel: ChannelAddress,
    samples: Vec<Sample>,
    time_step: f64,
    has_signal: bool,
    has_saturated_signal: bool,
    energy: Option<f64>,
}

impl Pulse {
    pub fn new(channel: ChannelAddress) -> Self {
        Self {
            channel,
            samples: Vec::new(),
            time_step: 0.0,
            has_signal: false,
            has_saturated_signal: false,
            energy: None,
        }
    }

    /// Append a sample read from `capacitor`.
    ///
    /// The first two samples fix the time step; every later step has to match it
    /// within a relative tolerance of 1e-4.
    pub fn add_sample(
        &mut self,
        mut sample: Sample,
        capacitor: CapacitorId,
        signal_threshold: f64,
    ) -> Result<(), FatalProtocolError> {
        if let Some(last) = self.samples.last() {
            let step = sample.time - last.time;
            if self.samples.len() == 1 {
                self.time_step = step;
            } else if (step - self.time_step).abs() > TIME_STEP_TOLERANCE * self.time_step.abs() {
                return Err(FatalProtocolError::TimeStepDrift {
                    index: self.samples.len(),
                    expected: self.time_step,
                    found: step,
                });
            }
        }
        if sample.amplitude > signal_threshold {
            self.has_signal = true;
            if sample.amplitude == ADC_MAX {
                self.has_saturated_signal = true;
            }
        }
        sample.capacitor = capacitor;
        self.samples.push(sample);
        Ok(())
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    /// At least one raw sample was above the signal threshold
    pub fn has_signal(&self) -> bool {
        self.has_signal
    }

    /// At least one raw sample hit the maximum ADC code
    pub fn has_saturated_signal(&self) -> bool {
        self.has_saturated_signal
    }

    /// Calibrated energy in keV, if an energy calibration was applied
    pub fn energy(&self) -> Option<f64> {
        self.energy
    }

    pub(crate) fn set_energy(&mut self, energy: f64) {
        self.energy = Some(energy);
    }

    /// Subtract the pedestal of each sample's capacitor.
    ///
    /// Not idempotent: calling it twice subtracts the pedestal twice.
    pub fn subtract_pedestal(&mut self, array: &CapacitorArray) {
        for sample in self.samples.iter_mut() {
            sample.amplitude -= array.by_id(sample.capacitor).mean;
        }
    }

    /// Subtract the channel's time dependent offset of each sample index.
    ///
    /// Applies on top of [Pulse::subtract_pedestal]; also not idempotent.
    pub fn subtract_time_dep_offsets(&mut self, array: &CapacitorArray) {
        let offsets = array.channel_offsets(&self.channel);
        for (sample, offset) in self.samples.iter_mut().zip(offsets.iter()) {
            sample.amplitude -= offset.mean;
        }
    }

    /// Index of the highest sample
    pub fn peak_index(&self) -> Option<usize> {
        let mut peak: Option<(usize, f64)> = None;
        for (idx, sample) in self.samples.iter().enumerate() {
            match peak {
                Some((_, best)) if best >= sample.amplitude => (),
                _ => peak = Some((idx, sample.amplitude)),
            }
        }
        peak.map(|(idx, _)| idx)
    }

    /// Highest sample amplitude; zero for an empty pulse or one that never rises above zero
    pub fn amplitude(&self) -> f64 {
        self.samples
            .iter()
            .fold(0.0, |max, s| if s.amplitude > max { s.amplitude } else { max })
    }

    /// Sum of amplitudes times the time step
    pub fn charge(&self) -> f64 {
        self.samples.iter().map(|s| s.amplitude).sum::<f64>() * self.time_step
    }

    /// Time at which the pulse rises through `threshold` before its peak, linearly
    /// interpolated between samples. None if the pulse never crosses it.
    pub fn rising_edge(&self, threshold: f64) -> Option<f64> {
        let peak = self.peak_index()?;
        if self.samples[peak].amplitude < threshold {
            return None;
        }
        let mut idx = peak;
        while idx > 0 {
            let before = &self.samples[idx - 1];
            if before.amplitude < threshold {
                return Some(interpolate(before, &self.samples[idx], threshold));
            }
            idx -= 1;
        }
        None
    }

    /// Time at which the pulse falls back through `threshold` after its peak
    pub fn falling_edge(&self, threshold: f64) -> Option<f64> {
        let peak = self.peak_index()?;
        if self.samples[peak].amplitude < threshold {
            return None;
        }
        for idx in peak..self.samples.len().saturating_sub(1) {
            let after = &self.samples[idx + 1];
            if after.amplitude < threshold {
                return Some(interpolate(&self.samples[idx], after, threshold));
            }
        }
        None
    }

    /// Rising edge at a fraction of the amplitude (0.3 gives the usual T30)
    pub fn rising_edge_fraction(&self, fraction: f64) -> Option<f64> {
        self.rising_edge(fraction * self.amplitude())
    }

    pub fn falling_edge_fraction(&self, fraction: f64) -> Option<f64> {
        self.falling_edge(fraction * self.amplitude())
    }
}

/// Time where the segment from `a` to `b` reaches `level`
fn interpolate(a: &Sample, b: &Sample, level: f64) -> f64 {
    let rise = b.amplitude - a.amplitude;
    if rise == 0.0 {
        return a.time;
    }
    a.time + (level - a.amplitude) * (b.time - a.time) / rise
}

/// The four pulses of one quartet, sharing a start capacitor
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub quartet: QuartetAddress,
    pub pulses: [Pulse; NUMBER_OF_CHANNELS as usize],
    srout: u32,
    counters: Vec<u32>,
}

impl Cluster {
    pub fn new(
        quartet: QuartetAddress,
        pulses: [Pulse; NUMBER_OF_CHANNELS as usize],
        srout: u32,
        counters: Vec<u32>,
    ) -> Self {
        Self {
            quartet,
            pulses,
            srout,
            counters,
        }
    }

    /// Number of this quartet among the connected ones (0..60)
    pub fn id(&self) -> usize {
        self.quartet.abs60().unwrap_or(TOTAL_PHYSICAL_QUARTETS)
    }

    /// First capacitor of the acquisition window
    pub fn srout(&self) -> u32 {
        self.srout
    }

    /// Hardware counters as read from the frames
    pub fn counters(&self) -> &[u32] {
        &self.counters
    }

    pub fn counter(&self, idx: usize) -> Option<u32> {
        self.counters.get(idx).copied()
    }

    pub fn n_samples(&self) -> usize {
        self.pulses[0].n_samples()
    }

    pub fn pulses_with_signal(&self) -> impl Iterator<Item = &Pulse> {
        self.pulses.iter().filter(|p| p.has_signal())
    }

    pub fn pulses_with_saturated_signal(&self) -> impl Iterator<Item = &Pulse> {
        self.pulses.iter().filter(|p| p.has_saturated_signal())
    }

    /// Sum of the pulse amplitudes
    pub fn amplitude(&self) -> f64 {
        self.pulses.iter().map(|p| p.amplitude()).sum()
    }

    pub fn charge(&self) -> f64 {
        self.pulses.iter().map(|p| p.charge()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacitor_array::{CapacitorArrayBuilder, TimeDepOffset};
    use crate::hardware_id::CapacitorAddress;

    fn channel() -> ChannelAddress {
        ChannelAddress::from_rel(0, 1, 0, 1, 2).unwrap()
    }

    fn make_pulse(amplitudes: &[f64], srout: u32) -> Pulse {
        let ch = channel();
        let mut pulse = Pulse::new(ch);
        for (i, a) in amplitudes.iter().enumerate() {
            let sample = Sample::new(*a, i as u16, i as f64 * SAMPLING_PERIOD_NS);
            let cap = CapacitorAddress::from_srout(ch, srout, i).id();
            pulse
                .add_sample(sample, cap, DEFAULT_SIGNAL_THRESHOLD)
                .unwrap();
        }
        pulse
    }

    #[test]
    fn test_signal_flags() {
        let quiet = make_pulse(&[500.0, 510.0, 505.0], 0);
        assert!(!quiet.has_signal());
        assert!(!quiet.has_saturated_signal());
        let loud = make_pulse(&[500.0, 900.0, 4095.0], 0);
        assert!(loud.has_signal());
        assert!(loud.has_saturated_signal());
        assert!((loud.time_step() - SAMPLING_PERIOD_NS).abs() < 1e-12);
        let high = make_pulse(&[500.0, 4094.0, 900.0], 0);
        assert!(high.has_signal());
        assert!(!high.has_saturated_signal());
    }

    #[test]
    fn test_saturation_needs_signal() {
        let mut pulse = Pulse::new(channel());
        let cap = CapacitorId::default();
        pulse.add_sample(Sample::new(ADC_MAX, 0, 0.0), cap, ADC_MAX).unwrap();
        assert!(!pulse.has_signal());
        assert!(!pulse.has_saturated_signal());
    }

    #[test]
    fn test_time_step_drift() {
        let mut pulse = Pulse::new(channel());
        let cap = CapacitorId::default();
        pulse.add_sample(Sample::new(1.0, 0, 0.0), cap, 800.0).unwrap();
        pulse.add_sample(Sample::new(1.0, 1, 0.2), cap, 800.0).unwrap();
        pulse
            .add_sample(Sample::new(1.0, 2, 0.40000001), cap, 800.0)
            .unwrap();
        let err = pulse
            .add_sample(Sample::new(1.0, 3, 0.7), cap, 800.0)
            .unwrap_err();
        assert!(matches!(err, FatalProtocolError::TimeStepDrift { index: 3, .. }));
        assert_eq!(pulse.n_samples(), 3);
    }

    #[test]
    fn test_capacitor_wraps_around() {
        let pulse = make_pulse(&[1.0, 2.0, 3.0], 1023);
        let caps: Vec<u16> = pulse
            .samples()
            .iter()
            .map(|s| s.capacitor.address().unwrap().capacitor)
            .collect();
        assert_eq!(caps, vec![1023, 0, 1]);
    }

    #[test]
    fn test_subtract_pedestal_is_not_idempotent() {
        let ch = channel();
        let mut builder = CapacitorArrayBuilder::new();
        for cap in 0..4 {
            let addr = CapacitorAddress::new(ch, cap).unwrap();
            builder.set_pedestal(&addr, 100.0 + cap as f64, 0.1);
        }
        let array = builder.build();
        let raw = make_pulse(&[600.0, 700.0, 650.0], 1);
        let mut once = raw.clone();
        once.subtract_pedestal(&array);
        let mut twice = once.clone();
        twice.subtract_pedestal(&array);
        for ((r, o), t) in raw
            .samples()
            .iter()
            .zip(once.samples())
            .zip(twice.samples())
        {
            let mean = array.by_id(r.capacitor).mean;
            assert_eq!(o.amplitude, r.amplitude - mean);
            assert_eq!(t.amplitude, r.amplitude - 2.0 * mean);
        }
        assert_eq!(once.amplitude(), 700.0 - 102.0);
    }

    #[test]
    fn test_subtract_time_dep_offsets() {
        let ch = channel();
        let mut builder = CapacitorArrayBuilder::new();
        builder.set_time_dep_offset(&ch, 1, TimeDepOffset { mean: 5.0, error: 0.0 });
        let array = builder.build();
        let mut pulse = make_pulse(&[10.0, 10.0, 10.0], 0);
        pulse.subtract_time_dep_offsets(&array);
        let amps: Vec<f64> = pulse.samples().iter().map(|s| s.amplitude).collect();
        // indices past the known offsets are left alone
        assert_eq!(amps, vec![10.0, 5.0, 10.0]);
    }

    #[test]
    fn test_derived_features() {
        let pulse = make_pulse(&[0.0, 10.0, 30.0, 50.0, 20.0, 0.0], 0);
        assert_eq!(pulse.amplitude(), 50.0);
        assert_eq!(pulse.peak_index(), Some(3));
        assert!((pulse.charge() - 110.0 * SAMPLING_PERIOD_NS).abs() < 1e-9);
        // 20 is reached half way between samples 1 and 2
        let rise = pulse.rising_edge(20.0).unwrap();
        assert!((rise - 1.5 * SAMPLING_PERIOD_NS).abs() < 1e-9);
        let fall = pulse.falling_edge(35.0).unwrap();
        assert!((fall - 3.5 * SAMPLING_PERIOD_NS).abs() < 1e-9);
        let t30 = pulse.rising_edge_fraction(0.3).unwrap();
        assert!((t30 - 1.25 * SAMPLING_PERIOD_NS).abs() < 1e-9);
        assert_eq!(pulse.rising_edge(60.0), None);
        assert_eq!(Pulse::new(channel()).amplitude(), 0.0);
        assert_eq!(Pulse::new(channel()).rising_edge(1.0), None);
    }
}
