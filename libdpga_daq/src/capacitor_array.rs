use super::constants::*;
use super::hardware_id::{CapacitorAddress, CapacitorId, ChannelAddress};
use std::sync::Arc;

/// Pedestal of one DRS capacitor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Capacitor {
    pub mean: f64,
    /// Standard error on the mean
    pub stddev: f64,
}

/// Mean offset left on one sample index of a channel after pedestal subtraction
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeDepOffset {
    pub mean: f64,
    pub error: f64,
}

/// Linear conversion of a corrected amplitude to keV: `a * amplitude + b`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyCalibration {
    pub a: f64,
    pub b: f64,
}

impl EnergyCalibration {
    /// Build from the ADC counts measured for a 511 keV photon. Zero gives a = 0.
    pub fn from_adc_per_511_kev(adc_per_511: f64) -> Self {
        let a = if adc_per_511 == 0.0 {
            0.0
        } else {
            ENERGY_CALIBRATION_KEV / adc_per_511
        };
        Self { a, b: 0.0 }
    }

    pub fn apply(&self, amplitude: f64) -> f64 {
        self.a * amplitude + self.b
    }
}

/// Running sample statistics (Welford). Memory is constant in the number of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.n += 1;
        let delta = value - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    /// (mean, standard error on the mean). Unbiased variance; (0, 0) without samples.
    pub fn mean_stderr(&self) -> (f64, f64) {
        match self.n {
            0 => (0.0, 0.0),
            1 => (self.mean, 0.0),
            n => {
                let variance = self.m2 / (n - 1) as f64;
                let stderr = (variance / n as f64).sqrt();
                if stderr.is_nan() {
                    (self.mean, 0.0)
                } else {
                    (self.mean, stderr)
                }
            }
        }
    }
}

/// CapacitorArray is the read-only calibration state of the whole detector.
///
/// It holds one [Capacitor] for each of the 288 x 1024 hardware capacitors, plus the
/// per-channel time dependent offsets and energy calibration. An array is never
/// mutated once built; share it as an `Arc<CapacitorArray>` and build a new one
/// with [CapacitorArrayBuilder] to change it.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacitorArray {
    capacitors: Vec<Capacitor>,
    offsets: Vec<Vec<TimeDepOffset>>,
    energy: Vec<EnergyCalibration>,
}

impl Default for CapacitorArray {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacitorArray {
    /// Create an array with all calibration values zero
    pub fn new() -> Self {
        Self {
            capacitors: vec![Capacitor::default(); TOTAL_CAPACITORS],
            offsets: vec![Vec::new(); TOTAL_CHANNELS],
            energy: vec![EnergyCalibration::default(); TOTAL_CHANNELS],
        }
    }

    pub fn capacitor(&self, address: &CapacitorAddress) -> &Capacitor {
        &self.capacitors[address.id().index()]
    }

    /// Look up a capacitor from its relative indices. None if any index is out of range.
    pub fn get(
        &self,
        hemisphere: u8,
        board: u8,
        drs: u8,
        quartet: u8,
        channel: u8,
        capacitor: u16,
    ) -> Option<&Capacitor> {
        CapacitorAddress::from_rel(hemisphere, board, drs, quartet, channel, capacitor)
            .ok()
            .map(|addr| self.capacitor(&addr))
    }

    pub fn by_id(&self, id: CapacitorId) -> &Capacitor {
        &self.capacitors[id.index()]
    }

    /// Every capacitor with its address, in storage order
    pub fn capacitors(&self) -> impl Iterator<Item = (CapacitorAddress, &Capacitor)> {
        self.capacitors.iter().enumerate().filter_map(|(idx, cap)| {
            CapacitorId::from_index(idx)
                .and_then(|id| id.address())
                .ok()
                .map(|addr| (addr, cap))
        })
    }

    /// Time dependent offset of a sample index. None if no offset is known for it.
    pub fn time_dep_offset(&self, channel: &ChannelAddress, index: usize) -> Option<&TimeDepOffset> {
        self.offsets[channel.abs288()].get(index)
    }

    pub fn channel_offsets(&self, channel: &ChannelAddress) -> &[TimeDepOffset] {
        &self.offsets[channel.abs288()]
    }

    pub fn energy_calibration(&self, channel: &ChannelAddress) -> &EnergyCalibration {
        &self.energy[channel.abs288()]
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// CapacitorArrayBuilder owns a private copy of the calibration while it is being
/// changed: accumulating pedestal or offset samples, loading files, or editing values.
///
/// Calling [CapacitorArrayBuilder::build] freezes it into a new [CapacitorArray].
#[derive(Debug, Clone)]
pub struct CapacitorArrayBuilder {
    array: CapacitorArray,
    pedestal_stats: Vec<RunningStats>,
    offset_stats: Vec<Vec<RunningStats>>,
}

impl Default for CapacitorArrayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacitorArrayBuilder {
    pub fn new() -> Self {
        Self::from_array(CapacitorArray::new())
    }

    pub fn from_array(array: CapacitorArray) -> Self {
        Self {
            array,
            pedestal_stats: Vec::new(),
            offset_stats: Vec::new(),
        }
    }

    /// Start from a copy of a shared snapshot; readers of the snapshot are unaffected
    pub fn from_shared(array: &Arc<CapacitorArray>) -> Self {
        Self::from_array(CapacitorArray::clone(array))
    }

    /// The calibration as it currently stands
    pub fn array(&self) -> &CapacitorArray {
        &self.array
    }

    /// Add one no-signal sample to the pedestal accumulator of a capacitor
    pub fn add_pedestal_sample(&mut self, id: CapacitorId, value: f64) {
        if self.pedestal_stats.is_empty() {
            self.pedestal_stats = vec![RunningStats::default(); TOTAL_CAPACITORS];
        }
        self.pedestal_stats[id.index()].push(value);
    }

    pub fn n_pedestal_samples(&self, id: CapacitorId) -> u64 {
        self.pedestal_stats
            .get(id.index())
            .map(|s| s.count())
            .unwrap_or(0)
    }

    /// Replace every capacitor's pedestal by the mean and standard error of its
    /// accumulated samples. Capacitors without samples get (0, 0).
    pub fn finalize_mean_stddev(&mut self) {
        for (idx, cap) in self.array.capacitors.iter_mut().enumerate() {
            let (mean, stddev) = self
                .pedestal_stats
                .get(idx)
                .map(|s| s.mean_stderr())
                .unwrap_or((0.0, 0.0));
            *cap = Capacitor { mean, stddev };
        }
    }

    /// Add one pedestal corrected, no-signal sample to the offset accumulator of
    /// sample `index` of a channel
    pub fn add_time_dep_offset_sample(&mut self, channel: &ChannelAddress, index: usize, value: f64) {
        if self.offset_stats.is_empty() {
            self.offset_stats = vec![Vec::new(); TOTAL_CHANNELS];
        }
        let stats = &mut self.offset_stats[channel.abs288()];
        if stats.len() <= index {
            stats.resize(index + 1, RunningStats::default());
        }
        stats[index].push(value);
    }

    pub fn n_time_dep_offset_samples(&self, channel: &ChannelAddress, index: usize) -> u64 {
        self.offset_stats
            .get(channel.abs288())
            .and_then(|s| s.get(index))
            .map(|s| s.count())
            .unwrap_or(0)
    }

    /// Replace every channel's offsets by the mean and standard error of its samples
    pub fn finalize_time_dep_offsets(&mut self) {
        for (idx, offsets) in self.array.offsets.iter_mut().enumerate() {
            *offsets = match self.offset_stats.get(idx) {
                Some(stats) => stats
                    .iter()
                    .map(|s| {
                        let (mean, error) = s.mean_stderr();
                        TimeDepOffset { mean, error }
                    })
                    .collect(),
                None => Vec::new(),
            };
        }
    }

    pub fn set_pedestal(&mut self, address: &CapacitorAddress, mean: f64, stddev: f64) {
        self.array.capacitors[address.id().index()] = Capacitor { mean, stddev };
    }

    pub fn set_time_dep_offset(&mut self, channel: &ChannelAddress, index: usize, offset: TimeDepOffset) {
        let offsets = &mut self.array.offsets[channel.abs288()];
        if offsets.len() <= index {
            offsets.resize(index + 1, TimeDepOffset::default());
        }
        offsets[index] = offset;
    }

    pub fn set_energy_calibration(&mut self, channel: &ChannelAddress, calibration: EnergyCalibration) {
        self.array.energy[channel.abs288()] = calibration;
    }

    pub fn build(self) -> CapacitorArray {
        self.array
    }
}
