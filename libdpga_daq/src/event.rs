use super::pulse::{Cluster, Pulse};

/// Event is the assembled readout of one trigger.
///
/// Clusters are ordered by their connected quartet number (0..60). An event built
/// from every expected frame is complete; events flushed early by the assembler are
/// marked incomplete and only hold the clusters which arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Sequence number assigned by the assembler
    pub id: u64,
    /// Hardware key the frames were matched on (event id or timestamp)
    pub key: u64,
    /// Board timestamp for multi-board streams
    pub timestamp: Option<u64>,
    clusters: Vec<Cluster>,
    n_frames: usize,
    expected_frames: usize,
}

impl Event {
    pub fn new(
        id: u64,
        key: u64,
        timestamp: Option<u64>,
        mut clusters: Vec<Cluster>,
        n_frames: usize,
        expected_frames: usize,
    ) -> Self {
        clusters.sort_by_key(|c| c.id());
        Self {
            id,
            key,
            timestamp,
            clusters,
            n_frames,
            expected_frames,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.n_frames == self.expected_frames
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn expected_frames(&self) -> usize {
        self.expected_frames
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub(crate) fn clusters_mut(&mut self) -> &mut [Cluster] {
        &mut self.clusters
    }

    /// Cluster of a connected quartet number, if it was read out
    pub fn cluster(&self, quartet_abs60: usize) -> Option<&Cluster> {
        self.clusters
            .binary_search_by_key(&quartet_abs60, |c| c.id())
            .ok()
            .map(|idx| &self.clusters[idx])
    }

    pub fn pulses(&self) -> impl Iterator<Item = &Pulse> {
        self.clusters.iter().flat_map(|c| c.pulses.iter())
    }

    pub fn pulses_with_signal(&self) -> impl Iterator<Item = &Pulse> {
        self.pulses().filter(|p| p.has_signal())
    }

    /// Number of pulses with signal
    pub fn multiplicity(&self) -> usize {
        self.pulses_with_signal().count()
    }

    pub fn has_saturated_signal(&self) -> bool {
        self.pulses().any(|p| p.has_saturated_signal())
    }
}
