use std::fmt;

#[derive(Debug, Clone, Default)]
pub enum BarColor {
    #[default]
    CYAN,
    MAGENTA,
    GREEN,
}

/// The pass a worker is running over its runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// Accumulate per-capacitor pedestals
    #[default]
    Pedestal,
    /// Accumulate time dependent offsets on top of known pedestals
    TimeDepOffset,
    /// Correct events and write pulse records
    Physics,
}

impl RunPhase {
    pub fn color(&self) -> BarColor {
        match self {
            Self::Pedestal => BarColor::MAGENTA,
            Self::TimeDepOffset => BarColor::GREEN,
            Self::Physics => BarColor::CYAN,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pedestal => write!(f, "Pedestals"),
            Self::TimeDepOffset => write!(f, "Offsets"),
            Self::Physics => write!(f, "Physics"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub worker_id: usize,
    pub phase: RunPhase,
    pub n_events: u64,
    pub color: BarColor,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, worker_id: usize, phase: RunPhase, n_events: u64) -> Self {
        Self {
            progress,
            run_number,
            worker_id,
            phase,
            n_events,
            color: phase.color(),
        }
    }
}
