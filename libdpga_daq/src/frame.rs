use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::constants::*;
use super::error::DecodeError;

/// Layout family of a readout stream. Fixed for the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderDialect {
    /// Two word header (size, frame count), ASM frames
    #[default]
    Legacy,
    /// Sixteen word run configuration header, ASM frames
    Calibration,
    /// No stream header, 16 bit AMC frames from several boards
    MultiBoard,
}

impl HeaderDialect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Calibration => "calibration",
            Self::MultiBoard => "multi_board",
        }
    }

    /// Frames needed for one event with `n_boards` boards read out
    pub fn frames_per_event(&self, n_boards: usize) -> usize {
        match self {
            Self::Legacy | Self::Calibration => n_boards * ASM_FRAMES_PER_BOARD,
            Self::MultiBoard => n_boards * AMC_FRAMES_PER_BOARD,
        }
    }
}

impl fmt::Display for HeaderDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HeaderDialect {
    type Err = DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" | "old" => Ok(Self::Legacy),
            "calibration" | "cal" => Ok(Self::Calibration),
            "multi_board" | "multiboard" | "amc" => Ok(Self::MultiBoard),
            _ => Err(DecodeError::UnknownDialect(s.to_string())),
        }
    }
}

/// Run configuration words written at the start of calibration era streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInfo {
    pub history: u32,
    pub run_number: u32,
    pub free_field: u32,
    pub time_start: u32,
    pub time_stop: u32,
    pub n_events: u32,
    pub n_asm_cards: u32,
    pub n_samples: u32,
    pub data_to_read: u32,
    pub trigger_equation: u32,
    pub trigger_delay: u32,
    pub channels_used_for_trigger: u32,
    pub threshold: u32,
    pub low_high_threshold: u32,
    pub trigger_shaping_high_threshold: u32,
    pub trigger_shaping_low_threshold: u32,
}

impl RunInfo {
    pub fn to_words(&self) -> [u32; CALIBRATION_HEADER_WORDS] {
        [
            self.history,
            self.run_number,
            self.free_field,
            self.time_start,
            self.time_stop,
            self.n_events,
            self.n_asm_cards,
            self.n_samples,
            self.data_to_read,
            self.trigger_equation,
            self.trigger_delay,
            self.channels_used_for_trigger,
            self.threshold,
            self.low_high_threshold,
            self.trigger_shaping_high_threshold,
            self.trigger_shaping_low_threshold,
        ]
    }

    pub fn from_words(w: &[u32; CALIBRATION_HEADER_WORDS]) -> Self {
        Self {
            history: w[0],
            run_number: w[1],
            free_field: w[2],
            time_start: w[3],
            time_stop: w[4],
            n_events: w[5],
            n_asm_cards: w[6],
            n_samples: w[7],
            data_to_read: w[8],
            trigger_equation: w[9],
            trigger_delay: w[10],
            channels_used_for_trigger: w[11],
            threshold: w[12],
            low_high_threshold: w[13],
            trigger_shaping_high_threshold: w[14],
            trigger_shaping_low_threshold: w[15],
        }
    }
}

/// Header at the start of a stream, selected by the dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamHeader {
    Legacy { size: u32, num_frames: u32 },
    Calibration(RunInfo),
    MultiBoard,
}

impl StreamHeader {
    /// Header for a legacy stream carrying `n_samples` per frame
    pub fn legacy(n_samples: usize, num_frames: u32) -> Self {
        Self::Legacy {
            size: n_samples as u32 + LEGACY_SIZE_OFFSET,
            num_frames,
        }
    }

    pub fn dialect(&self) -> HeaderDialect {
        match self {
            Self::Legacy { .. } => HeaderDialect::Legacy,
            Self::Calibration(_) => HeaderDialect::Calibration,
            Self::MultiBoard => HeaderDialect::MultiBoard,
        }
    }

    /// Samples per ASM frame. None for multi-board streams, whose frames carry it.
    pub fn n_samples(&self) -> Option<usize> {
        match self {
            Self::Legacy { size, .. } => Some(size.saturating_sub(LEGACY_SIZE_OFFSET) as usize),
            Self::Calibration(info) => Some(info.n_samples.saturating_sub(1) as usize),
            Self::MultiBoard => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Legacy { .. } => LEGACY_HEADER_WORDS * 4,
            Self::Calibration(_) => CALIBRATION_HEADER_WORDS * 4,
            Self::MultiBoard => 0,
        }
    }
}

/// One frame of an ASM board: two channels of one quartet (one fifo)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmFrame {
    pub frame_id: u32,
    pub event_id: u32,
    pub fifo_id: u32,
    /// Channel 2h in bits 16..28, channel 2h+1 in bits 0..12
    pub data: Vec<u32>,
    pub srout: u32,
    pub counters: [u32; NUMBER_OF_COUNTERS],
    /// Low nibble of the trailer word
    pub trailer_tag: u8,
}

impl AsmFrame {
    /// Amplitudes of the first (0) or second (1) channel of the fifo
    pub fn amplitudes(&self, which: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().map(move |word| {
            let raw = if which == 0 { word >> 16 } else { *word };
            (raw & ADC_MASK) as f64
        })
    }

    pub fn n_samples(&self) -> usize {
        self.data.len()
    }

    pub fn encoded_len(&self) -> usize {
        (4 + self.data.len() + 1 + NUMBER_OF_COUNTERS + 1) * 4
    }
}

/// One channel block of an AMC frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmcChannelBlock {
    pub channel_word: u16,
    pub data: Vec<u16>,
}

impl AmcChannelBlock {
    /// Channel inside the board (0..24)
    pub fn channel_id(&self) -> u16 {
        (self.channel_word & 0x7f00) >> 8
    }
}

/// One frame of the multi-board readout: the four channels of one quartet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmcFrame {
    pub amc_frame_counters: [u16; 2],
    pub fe_word: u16,
    pub trigger_mode: u16,
    pub trigger: u16,
    pub asm_frame_counters: [u16; 4],
    pub counters: [u16; AMC_NUMBER_OF_COUNTERS],
    pub timestamps: [u16; 4],
    /// As written on the wire; every channel block holds `n_samples + 11` words
    pub n_samples: u16,
    pub channels: [AmcChannelBlock; AMC_CHANNELS_PER_FRAME],
    pub fe_trailer: u16,
}

impl AmcFrame {
    pub fn fe_id(&self) -> u16 {
        front_end_id(self.fe_word)
    }

    pub fn amc_frame_counter(&self) -> u32 {
        ((self.amc_frame_counters[0] as u32) << 16) | self.amc_frame_counters[1] as u32
    }

    pub fn asm_frame_counter(&self) -> u64 {
        self.asm_frame_counters
            .iter()
            .fold(0u64, |acc, w| (acc << 16) | *w as u64)
    }

    pub fn timestamp(&self) -> u64 {
        let high = ((self.timestamps[0] as u64) << 16) | self.timestamps[1] as u64;
        let low = ((self.timestamps[2] as u64) << 16) | self.timestamps[3] as u64;
        (high << 32) | low
    }

    pub fn samples_per_channel(&self) -> usize {
        self.n_samples as usize + AMC_EXTRA_SAMPLES as usize
    }

    pub fn encoded_len(&self) -> usize {
        (1 + 2 + 3 + 4 + 2 + AMC_NUMBER_OF_COUNTERS + 4 + 1) * 2
            + self
                .channels
                .iter()
                .map(|c| (1 + c.data.len()) * 2)
                .sum::<usize>()
            + 2 * 2
    }
}

/// Front end id packed in the header and trailer words of an AMC frame
pub fn front_end_id(word: u16) -> u16 {
    (word & 0x7fff) >> 8
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Asm(AsmFrame),
    Amc(AmcFrame),
}

impl Frame {
    /// The key used to match the frames of one event: the event id for ASM frames,
    /// the timestamp for AMC frames
    pub fn key(&self) -> u64 {
        match self {
            Self::Asm(f) => f.event_id as u64,
            Self::Amc(f) => f.timestamp(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Asm(_) => "ASM",
            Self::Amc(_) => "AMC",
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Asm(f) => f.encoded_len(),
            Self::Amc(f) => f.encoded_len(),
        }
    }
}
