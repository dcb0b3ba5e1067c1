// Detector topology
pub const NUMBER_OF_HEMISPHERES: u8 = 2;
pub const NUMBER_OF_BOARDS: u8 = 6; // per hemisphere
pub const NUMBER_OF_DRS: u8 = 3; // per board
pub const NUMBER_OF_QUARTETS: u8 = 2; // per drs
pub const NUMBER_OF_CHANNELS: u8 = 4; // per quartet
pub const NUMBER_OF_CAPACITORS: u16 = 1024; // per channel
pub const UNUSED_DRS: u8 = 2; // (drs 2, quartet 1) is not connected on any board
pub const UNUSED_QUARTET: u8 = 1;

pub const TOTAL_BOARDS: usize = (NUMBER_OF_HEMISPHERES * NUMBER_OF_BOARDS) as usize; // 12
pub const QUARTETS_PER_BOARD: usize = (NUMBER_OF_DRS * NUMBER_OF_QUARTETS) as usize; // 6
pub const PHYSICAL_QUARTETS_PER_BOARD: usize = QUARTETS_PER_BOARD - 1; // 5
pub const TOTAL_QUARTETS: usize = TOTAL_BOARDS * QUARTETS_PER_BOARD; // 72
pub const TOTAL_PHYSICAL_QUARTETS: usize = TOTAL_BOARDS * PHYSICAL_QUARTETS_PER_BOARD; // 60
pub const TOTAL_CHANNELS: usize = TOTAL_QUARTETS * NUMBER_OF_CHANNELS as usize; // 288
pub const TOTAL_PHYSICAL_CHANNELS: usize = TOTAL_PHYSICAL_QUARTETS * NUMBER_OF_CHANNELS as usize; // 240
pub const TOTAL_CAPACITORS: usize = TOTAL_CHANNELS * NUMBER_OF_CAPACITORS as usize; // 294912
pub const CHANNELS_PER_BOARD: usize = QUARTETS_PER_BOARD * NUMBER_OF_CHANNELS as usize; // 24
pub const TOTAL_FIFOS: usize = TOTAL_QUARTETS * 2; // 144, one fifo per half quartet
pub const TOTAL_PHYSICAL_FIFOS: usize = TOTAL_PHYSICAL_QUARTETS * 2; // 120
pub const FIFOS_PER_BOARD: usize = QUARTETS_PER_BOARD * 2; // 12

// Electronics constants
pub const ADC_MAX: f64 = 4095.0; // 12 bit
pub const ADC_MASK: u32 = 0xFFF;
pub const SAMPLING_PERIOD_NS: f64 = 0.2; // 5 GS/s
pub const DEFAULT_SIGNAL_THRESHOLD: f64 = 800.0;
pub const TIME_STEP_TOLERANCE: f64 = 1e-4; // relative
pub const ENERGY_CALIBRATION_KEV: f64 = 511.0;

// ASM frame layout (legacy and calibration dialects), 32 bit words
pub const ASM_START_OF_FRAME: u32 = 0xCAFEDECA;
pub const ASM_END_OF_FRAME: u32 = 0xBADCAFE; // upper 28 bits of the trailer word
pub const ASM_LAST_FRAME: u32 = 0xFFFFFFFF;
pub const NUMBER_OF_COUNTERS: usize = 17;
pub const MAX_SAMPLES_PER_FRAME: usize = NUMBER_OF_CAPACITORS as usize; // one full DRS window
pub const LEGACY_HEADER_WORDS: usize = 2;
pub const LEGACY_SIZE_OFFSET: u32 = 8; // size - 8 = samples per frame
pub const CALIBRATION_HEADER_WORDS: usize = 16;
pub const ASM_FRAMES_PER_BOARD: usize = PHYSICAL_QUARTETS_PER_BOARD * 2; // 10

// AMC frame layout (multi-board dialect), 16 bit words
pub const AMC_FIRST_BLOCK_WORD: u16 = 0x1230;
pub const AMC_LAST_FRAME: u16 = 0xFFFF;
pub const AMC_START_OF_DATA_1: u16 = 0xCAFE;
pub const AMC_START_OF_DATA_2: u16 = 0xDECA;
pub const AMC_CRC_WORD: u16 = 0x9876;
pub const AMC_FE_HEADER_CTRL: u16 = 0xFE;
pub const AMC_CHANNEL_CTRL: u16 = 0xFD;
pub const AMC_FE_TRAILER_CTRL: u16 = 0xFB;
pub const AMC_EXTRA_SAMPLES: u16 = 11; // samples on the wire = header sample word + 11
pub const AMC_CHANNELS_PER_FRAME: usize = 4;
pub const AMC_NUMBER_OF_COUNTERS: usize = 4;
pub const AMC_FRAMES_PER_BOARD: usize = PHYSICAL_QUARTETS_PER_BOARD; // 5
