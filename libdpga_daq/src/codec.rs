use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, ErrorKind, Read, Write};

use super::constants::*;
use super::error::{DecodeError, EncodeError};
use super::frame::{
    front_end_id, AmcChannelBlock, AmcFrame, AsmFrame, Frame, HeaderDialect, RunInfo,
    StreamHeader,
};

/// Outcome of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    /// The terminal sentinel was read. Not an error.
    EndOfStream,
}

/// Big-endian word source which keeps track of the byte offset for diagnostics
#[derive(Debug)]
struct WordSource<R: Read> {
    inner: R,
    offset: u64,
    debug_words: bool,
}

impl<R: Read> WordSource<R> {
    fn new(inner: R, offset: u64, debug_words: bool) -> Self {
        Self {
            inner,
            offset,
            debug_words,
        }
    }

    fn map_err(&self, e: std::io::Error) -> DecodeError {
        if e.kind() == ErrorKind::UnexpectedEof {
            DecodeError::Truncated {
                offset: self.offset,
            }
        } else {
            DecodeError::IOError {
                offset: self.offset,
                source: e,
            }
        }
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let word = self
            .inner
            .read_u32::<BigEndian>()
            .map_err(|e| self.map_err(e))?;
        if self.debug_words {
            spdlog::debug!("word @ {:#010x}: {:#010x}", self.offset, word);
        }
        self.offset += 4;
        Ok(word)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let word = self
            .inner
            .read_u16::<BigEndian>()
            .map_err(|e| self.map_err(e))?;
        if self.debug_words {
            spdlog::debug!("word @ {:#010x}: {:#06x}", self.offset, word);
        }
        self.offset += 2;
        Ok(word)
    }

    fn read_u16_array<const N: usize>(&mut self) -> Result<[u16; N], DecodeError> {
        let mut words = [0u16; N];
        for w in words.iter_mut() {
            *w = self.read_u16()?;
        }
        Ok(words)
    }

    /// Read a 32 bit word that must equal `expected`
    fn expect_u32(&mut self, field: &'static str, expected: u32) -> Result<(), DecodeError> {
        let offset = self.offset;
        let found = self.read_u32()?;
        if found != expected {
            return Err(DecodeError::BadMagic {
                offset,
                field,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn expect_u16(&mut self, field: &'static str, expected: u16) -> Result<(), DecodeError> {
        let offset = self.offset;
        let found = self.read_u16()?;
        if found != expected {
            return Err(DecodeError::BadMagic {
                offset,
                field,
                expected: expected as u32,
                found: found as u32,
            });
        }
        Ok(())
    }

    /// Read a 16 bit control word whose low byte must equal `ctrl`
    fn expect_ctrl(&mut self, field: &'static str, ctrl: u16) -> Result<u16, DecodeError> {
        let offset = self.offset;
        let word = self.read_u16()?;
        if word & 0xff != ctrl {
            return Err(DecodeError::BadMagic {
                offset,
                field,
                expected: ctrl as u32,
                found: (word & 0xff) as u32,
            });
        }
        Ok(word)
    }
}

/// FrameCodec converts between the binary stream layout and [Frame]s.
///
/// The codec is built for one [HeaderDialect] and, for ASM dialects, the number of
/// samples per frame announced in the stream header. Multi-board frames carry their
/// own sample count.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    dialect: HeaderDialect,
    n_samples: usize,
    debug_words: bool,
}

impl FrameCodec {
    /// Create a codec from a decoded stream header
    pub fn new(header: &StreamHeader) -> Self {
        Self {
            dialect: header.dialect(),
            n_samples: header.n_samples().unwrap_or(0),
            debug_words: false,
        }
    }

    /// Log every decoded word at debug level
    pub fn with_debug_words(mut self, debug_words: bool) -> Self {
        self.debug_words = debug_words;
        self
    }

    pub fn dialect(&self) -> HeaderDialect {
        self.dialect
    }

    /// Samples per ASM frame. Zero for multi-board streams, where each frame carries it.
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Decode the stream header of the given dialect from the start of `bytes`
    pub fn decode_header(dialect: HeaderDialect, bytes: &[u8]) -> Result<StreamHeader, DecodeError> {
        let mut source = WordSource::new(Cursor::new(bytes), 0, false);
        read_header(dialect, &mut source)
    }

    /// Decode one frame from the start of `bytes`.
    ///
    /// Byte offsets in errors are relative to the start of the slice. The number of
    /// bytes consumed is [Frame::encoded_len].
    pub fn decode(&self, bytes: &[u8]) -> Result<Decoded, DecodeError> {
        let mut source = WordSource::new(Cursor::new(bytes), 0, self.debug_words);
        self.read_frame(&mut source)
    }

    fn read_frame<R: Read>(&self, source: &mut WordSource<R>) -> Result<Decoded, DecodeError> {
        match self.dialect {
            HeaderDialect::Legacy | HeaderDialect::Calibration => self.read_asm_frame(source),
            HeaderDialect::MultiBoard => self.read_amc_frame(source),
        }
    }

    fn read_asm_frame<R: Read>(&self, source: &mut WordSource<R>) -> Result<Decoded, DecodeError> {
        let frame_id = source.read_u32()?;
        if frame_id == ASM_LAST_FRAME {
            return Ok(Decoded::EndOfStream);
        }
        let event_id = source.read_u32()?;
        let fifo_offset = source.offset;
        let fifo_id = source.read_u32()?;
        if fifo_id as usize >= TOTAL_FIFOS {
            return Err(DecodeError::InvalidField {
                offset: fifo_offset,
                field: "fifo id",
                value: fifo_id as u64,
            });
        }
        source.expect_u32("start of frame", ASM_START_OF_FRAME)?;

        let mut data = Vec::with_capacity(self.n_samples.min(MAX_SAMPLES_PER_FRAME));
        for _ in 0..self.n_samples {
            data.push(source.read_u32()?);
        }
        let srout = source.read_u32()?;
        let mut counters = [0u32; NUMBER_OF_COUNTERS];
        for c in counters.iter_mut() {
            *c = source.read_u32()?;
        }

        let trailer_offset = source.offset;
        let trailer = source.read_u32()?;
        if trailer >> 4 != ASM_END_OF_FRAME {
            return Err(DecodeError::BadMagic {
                offset: trailer_offset,
                field: "end of frame",
                expected: ASM_END_OF_FRAME,
                found: trailer >> 4,
            });
        }

        Ok(Decoded::Frame(Frame::Asm(AsmFrame {
            frame_id,
            event_id,
            fifo_id,
            data,
            srout,
            counters,
            trailer_tag: (trailer & 0xf) as u8,
        })))
    }

    fn read_amc_frame<R: Read>(&self, source: &mut WordSource<R>) -> Result<Decoded, DecodeError> {
        let first_offset = source.offset;
        let first = source.read_u16()?;
        if first == AMC_LAST_FRAME {
            return Ok(Decoded::EndOfStream);
        }
        if first != AMC_FIRST_BLOCK_WORD {
            return Err(DecodeError::BadMagic {
                offset: first_offset,
                field: "first block word",
                expected: AMC_FIRST_BLOCK_WORD as u32,
                found: first as u32,
            });
        }
        let amc_frame_counters = source.read_u16_array::<2>()?;
        let fe_word = source.expect_ctrl("front end header", AMC_FE_HEADER_CTRL)?;
        let trigger_mode = source.read_u16()?;
        let trigger = source.read_u16()?;
        let asm_frame_counters = source.read_u16_array::<4>()?;
        source.expect_u16("start of data", AMC_START_OF_DATA_1)?;
        source.expect_u16("start of data", AMC_START_OF_DATA_2)?;
        let counters = source.read_u16_array::<AMC_NUMBER_OF_COUNTERS>()?;
        let timestamps = source.read_u16_array::<4>()?;
        let n_samples_offset = source.offset;
        let n_samples = source.read_u16()?;
        if n_samples as usize > MAX_SAMPLES_PER_FRAME {
            return Err(DecodeError::InvalidField {
                offset: n_samples_offset,
                field: "number of samples",
                value: n_samples as u64,
            });
        }
        let samples = n_samples as usize + AMC_EXTRA_SAMPLES as usize;

        let mut blocks = Vec::with_capacity(AMC_CHANNELS_PER_FRAME);
        for _ in 0..AMC_CHANNELS_PER_FRAME {
            let channel_word = source.expect_ctrl("channel header", AMC_CHANNEL_CTRL)?;
            let mut data = Vec::with_capacity(samples);
            for _ in 0..samples {
                data.push(source.read_u16()?);
            }
            blocks.push(AmcChannelBlock { channel_word, data });
        }
        source.expect_u16("crc", AMC_CRC_WORD)?;
        let trailer_offset = source.offset;
        let fe_trailer = source.expect_ctrl("front end trailer", AMC_FE_TRAILER_CTRL)?;
        if front_end_id(fe_trailer) != front_end_id(fe_word) {
            return Err(DecodeError::FrontEndMismatch {
                offset: trailer_offset,
                header: front_end_id(fe_word),
                trailer: front_end_id(fe_trailer),
            });
        }

        let channels: [AmcChannelBlock; AMC_CHANNELS_PER_FRAME] = match blocks.try_into() {
            Ok(c) => c,
            Err(_) => {
                return Err(DecodeError::Truncated {
                    offset: source.offset,
                })
            }
        };

        Ok(Decoded::Frame(Frame::Amc(AmcFrame {
            amc_frame_counters,
            fe_word,
            trigger_mode,
            trigger,
            asm_frame_counters,
            counters,
            timestamps,
            n_samples,
            channels,
            fe_trailer,
        })))
    }

    /// Encode a frame. Byte-exact inverse of [FrameCodec::decode].
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, EncodeError> {
        let mut bytes = Vec::with_capacity(frame.encoded_len());
        self.encode_into(frame, &mut bytes)?;
        Ok(bytes)
    }

    pub fn encode_into<W: Write>(&self, frame: &Frame, out: &mut W) -> Result<(), EncodeError> {
        match (self.dialect, frame) {
            (HeaderDialect::Legacy | HeaderDialect::Calibration, Frame::Asm(f)) => {
                self.write_asm_frame(f, out)
            }
            (HeaderDialect::MultiBoard, Frame::Amc(f)) => write_amc_frame(f, out),
            _ => Err(EncodeError::DialectMismatch {
                frame: frame.kind(),
                dialect: self.dialect.name(),
            }),
        }
    }

    fn write_asm_frame<W: Write>(&self, frame: &AsmFrame, out: &mut W) -> Result<(), EncodeError> {
        if frame.data.len() != self.n_samples {
            return Err(EncodeError::SampleCountMismatch {
                expected: self.n_samples,
                found: frame.data.len(),
            });
        }
        out.write_u32::<BigEndian>(frame.frame_id)?;
        out.write_u32::<BigEndian>(frame.event_id)?;
        out.write_u32::<BigEndian>(frame.fifo_id)?;
        out.write_u32::<BigEndian>(ASM_START_OF_FRAME)?;
        for word in frame.data.iter() {
            out.write_u32::<BigEndian>(*word)?;
        }
        out.write_u32::<BigEndian>(frame.srout)?;
        for c in frame.counters.iter() {
            out.write_u32::<BigEndian>(*c)?;
        }
        out.write_u32::<BigEndian>((ASM_END_OF_FRAME << 4) | (frame.trailer_tag & 0xf) as u32)?;
        Ok(())
    }

    /// Encode the terminal sentinel of this dialect
    pub fn encode_end_of_stream<W: Write>(&self, out: &mut W) -> Result<(), EncodeError> {
        match self.dialect {
            HeaderDialect::Legacy | HeaderDialect::Calibration => {
                out.write_u32::<BigEndian>(ASM_LAST_FRAME)?
            }
            HeaderDialect::MultiBoard => out.write_u16::<BigEndian>(AMC_LAST_FRAME)?,
        }
        Ok(())
    }
}

fn read_header<R: Read>(
    dialect: HeaderDialect,
    source: &mut WordSource<R>,
) -> Result<StreamHeader, DecodeError> {
    match dialect {
        HeaderDialect::Legacy => {
            let size_offset = source.offset;
            let size = source.read_u32()?;
            let num_frames = source.read_u32()?;
            if size < LEGACY_SIZE_OFFSET {
                return Err(DecodeError::InvalidHeader {
                    offset: size_offset,
                    reason: format!("frame size {size} is smaller than {LEGACY_SIZE_OFFSET}"),
                });
            }
            let header = StreamHeader::Legacy { size, num_frames };
            check_samples_per_frame(&header, size_offset)?;
            Ok(header)
        }
        HeaderDialect::Calibration => {
            let start = source.offset;
            let mut words = [0u32; CALIBRATION_HEADER_WORDS];
            for w in words.iter_mut() {
                *w = source.read_u32()?;
            }
            let info = RunInfo::from_words(&words);
            if info.n_samples == 0 {
                return Err(DecodeError::InvalidHeader {
                    offset: start,
                    reason: String::from("number of samples is zero"),
                });
            }
            let header = StreamHeader::Calibration(info);
            check_samples_per_frame(&header, start)?;
            Ok(header)
        }
        HeaderDialect::MultiBoard => Ok(StreamHeader::MultiBoard),
    }
}

/// A frame never holds more samples than a channel has capacitors
fn check_samples_per_frame(header: &StreamHeader, offset: u64) -> Result<(), DecodeError> {
    match header.n_samples() {
        Some(n) if n > MAX_SAMPLES_PER_FRAME => Err(DecodeError::InvalidHeader {
            offset,
            reason: format!("{n} samples per frame exceeds {MAX_SAMPLES_PER_FRAME}"),
        }),
        _ => Ok(()),
    }
}

pub fn encode_header<W: Write>(header: &StreamHeader, out: &mut W) -> Result<(), EncodeError> {
    match header {
        StreamHeader::Legacy { size, num_frames } => {
            out.write_u32::<BigEndian>(*size)?;
            out.write_u32::<BigEndian>(*num_frames)?;
        }
        StreamHeader::Calibration(info) => {
            for w in info.to_words() {
                out.write_u32::<BigEndian>(w)?;
            }
        }
        StreamHeader::MultiBoard => (),
    }
    Ok(())
}

fn write_amc_frame<W: Write>(frame: &AmcFrame, out: &mut W) -> Result<(), EncodeError> {
    let samples = frame.samples_per_channel();
    for block in frame.channels.iter() {
        if block.data.len() != samples {
            return Err(EncodeError::SampleCountMismatch {
                expected: samples,
                found: block.data.len(),
            });
        }
    }
    out.write_u16::<BigEndian>(AMC_FIRST_BLOCK_WORD)?;
    for w in frame.amc_frame_counters {
        out.write_u16::<BigEndian>(w)?;
    }
    out.write_u16::<BigEndian>(frame.fe_word)?;
    out.write_u16::<BigEndian>(frame.trigger_mode)?;
    out.write_u16::<BigEndian>(frame.trigger)?;
    for w in frame.asm_frame_counters {
        out.write_u16::<BigEndian>(w)?;
    }
    out.write_u16::<BigEndian>(AMC_START_OF_DATA_1)?;
    out.write_u16::<BigEndian>(AMC_START_OF_DATA_2)?;
    for w in frame.counters {
        out.write_u16::<BigEndian>(w)?;
    }
    for w in frame.timestamps {
        out.write_u16::<BigEndian>(w)?;
    }
    out.write_u16::<BigEndian>(frame.n_samples)?;
    for block in frame.channels.iter() {
        out.write_u16::<BigEndian>(block.channel_word)?;
        for w in block.data.iter() {
            out.write_u16::<BigEndian>(*w)?;
        }
    }
    out.write_u16::<BigEndian>(AMC_CRC_WORD)?;
    out.write_u16::<BigEndian>(frame.fe_trailer)?;
    Ok(())
}

/// FrameReader decodes a complete stream from any byte source.
///
/// The stream header is read on construction. Frames are then returned in order
/// until the terminal sentinel, after which every call returns None.
#[derive(Debug)]
pub struct FrameReader<R: Read> {
    source: WordSource<R>,
    header: StreamHeader,
    codec: FrameCodec,
    frames_read: u32,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, dialect: HeaderDialect, debug_words: bool) -> Result<Self, DecodeError> {
        let mut source = WordSource::new(reader, 0, debug_words);
        let header = read_header(dialect, &mut source)?;
        let codec = FrameCodec::new(&header).with_debug_words(debug_words);
        spdlog::debug!("Opened {} stream with header {:?}", dialect, header);
        Ok(Self {
            source,
            header,
            codec,
            frames_read: 0,
            finished: false,
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    pub fn frames_read(&self) -> u32 {
        self.frames_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.source.offset
    }

    /// Get the next frame in the stream.
    ///
    /// Returns None once the terminal sentinel has been read. Running out of bytes
    /// before the sentinel is a [DecodeError::Truncated].
    pub fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        match self.codec.read_frame(&mut self.source)? {
            Decoded::Frame(frame) => {
                self.frames_read += 1;
                Ok(Some(frame))
            }
            Decoded::EndOfStream => {
                self.finished = true;
                if let StreamHeader::Legacy { num_frames, .. } = self.header {
                    if num_frames != 0 && num_frames != self.frames_read {
                        return Err(DecodeError::FrameCountMismatch {
                            expected: num_frames,
                            found: self.frames_read,
                        });
                    }
                }
                spdlog::debug!("End of stream after {} frames", self.frames_read);
                Ok(None)
            }
        }
    }
}

/// FrameWriter produces a stream which [FrameReader] can read back.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    out: W,
    codec: FrameCodec,
    frames_written: u32,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(mut out: W, header: &StreamHeader) -> Result<Self, EncodeError> {
        encode_header(header, &mut out)?;
        Ok(Self {
            out,
            codec: FrameCodec::new(header),
            frames_written: 0,
        })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        self.codec.encode_into(frame, &mut self.out)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Write the terminal sentinel and hand back the sink
    pub fn close(mut self) -> Result<W, EncodeError> {
        self.codec.encode_end_of_stream(&mut self.out)?;
        self.out.flush()?;
        Ok(self.out)
    }
}
