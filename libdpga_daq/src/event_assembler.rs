use bitvec::prelude::*;
use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::board_map::BoardMap;
use super::constants::*;
use super::error::FatalProtocolError;
use super::event::Event;
use super::frame::{AmcFrame, AsmFrame, Frame, HeaderDialect};
use super::hardware_id::{fifo144_to_fifo120, CapacitorAddress, ChannelAddress, QuartetAddress};
use super::pulse::{Cluster, Pulse, Sample};

const RETIRED_KEYS: usize = 4096; // keys remembered to catch late frames

/// What to do with the oldest event when it has to leave the window incomplete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompletePolicy {
    /// Raise a [FatalProtocolError]
    #[default]
    FailFast,
    /// Emit the event marked incomplete and log a warning
    FlushWithWarning,
}

#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub dialect: HeaderDialect,
    /// The first `n_boards` boards (in absolute order) are read out
    pub n_boards: usize,
    /// Events which may be in flight at once
    pub max_pending: usize,
    pub policy: IncompletePolicy,
    pub signal_threshold: f64,
}

impl AssemblerSettings {
    /// Defaults for a dialect: ASM streams arrive one event at a time, multi-board
    /// streams interleave the boards of a few neighbouring triggers
    pub fn new(dialect: HeaderDialect) -> Self {
        Self {
            dialect,
            n_boards: TOTAL_BOARDS,
            max_pending: match dialect {
                HeaderDialect::Legacy | HeaderDialect::Calibration => 1,
                HeaderDialect::MultiBoard => 8,
            },
            policy: IncompletePolicy::default(),
            signal_threshold: DEFAULT_SIGNAL_THRESHOLD,
        }
    }
}

/// Frames received so far for one key
#[derive(Debug)]
struct PendingEvent {
    frames: Vec<Option<Frame>>,
    filled: BitVec,
}

impl PendingEvent {
    fn new(n_slots: usize) -> Self {
        Self {
            frames: vec![None; n_slots],
            filled: bitvec![0; n_slots],
        }
    }

    fn is_complete(&self) -> bool {
        self.filled.all()
    }

    fn received(&self) -> usize {
        self.filled.count_ones()
    }
}

/// EventAssembler groups frames into [Event]s.
///
/// Frames are matched on their key (the event id of ASM frames, the timestamp of
/// AMC frames) and routed to a slot: one per fifo for ASM frames, one per quartet
/// for AMC frames. An event is emitted once the oldest key has every slot filled.
///
/// At most `max_pending` keys are kept. A frame with a new key beyond that window
/// forces the oldest key out; if it is incomplete the [IncompletePolicy] decides
/// between failing and flushing it. With a window of one, a new key while the
/// current event is incomplete is an event id mismatch.
#[derive(Debug)]
pub struct EventAssembler {
    settings: AssemblerSettings,
    board_map: BoardMap,
    n_slots: usize,
    pending: FxHashMap<u64, PendingEvent>,
    order: VecDeque<u64>,
    ready: VecDeque<Event>,
    retired: FxHashSet<u64>,
    retired_order: VecDeque<u64>,
    n_emitted: u64,
    n_incomplete: u64,
}

impl EventAssembler {
    /// Create a new EventAssembler.
    ///
    /// The BoardMap is only used for multi-board streams.
    pub fn new(settings: AssemblerSettings, board_map: BoardMap) -> Self {
        let n_boards = settings.n_boards.clamp(1, TOTAL_BOARDS);
        let settings = AssemblerSettings {
            n_boards,
            max_pending: settings.max_pending.max(1),
            ..settings
        };
        let n_slots = settings.dialect.frames_per_event(n_boards);
        EventAssembler {
            settings,
            board_map,
            n_slots,
            pending: FxHashMap::default(),
            order: VecDeque::new(),
            ready: VecDeque::new(),
            retired: FxHashSet::default(),
            retired_order: VecDeque::new(),
            n_emitted: 0,
            n_incomplete: 0,
        }
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    /// Frames needed for a complete event
    pub fn frames_per_event(&self) -> usize {
        self.n_slots
    }

    /// Keys currently in flight
    pub fn n_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn n_emitted(&self) -> u64 {
        self.n_emitted
    }

    /// Events flushed without every frame
    pub fn n_incomplete(&self) -> u64 {
        self.n_incomplete
    }

    /// Add a frame.
    ///
    /// Any error is fatal to the stream: the assembler should not be fed further.
    pub fn push(&mut self, frame: Frame) -> Result<(), FatalProtocolError> {
        let key = frame.key();
        if self.retired.contains(&key) {
            return Err(FatalProtocolError::StaleFrame(key));
        }
        let slot = self.route(&frame, key)?;

        if !self.pending.contains_key(&key) {
            while self.pending.len() >= self.settings.max_pending {
                self.evict_oldest(key)?;
            }
            self.pending.insert(key, PendingEvent::new(self.n_slots));
            self.order.push_back(key);
        }

        let event = match self.pending.get_mut(&key) {
            Some(e) => e,
            None => return Err(FatalProtocolError::StaleFrame(key)),
        };
        if event.filled[slot] {
            return Err(FatalProtocolError::DuplicateFrame { key, slot });
        }
        if let Frame::Asm(asm) = &frame {
            if let Some(Some(Frame::Asm(sibling))) = event.frames.get(slot ^ 1) {
                check_siblings(slot / 2, sibling, asm)?;
            }
        }
        event.frames[slot] = Some(frame);
        event.filled.set(slot, true);

        self.drain_complete()
    }

    /// Take the next assembled event, oldest first
    pub fn poll(&mut self) -> Option<Event> {
        self.ready.pop_front()
    }

    /// Resolve every key still in flight at the end of the stream, applying the
    /// incomplete policy to those missing frames
    pub fn finish(&mut self) -> Result<(), FatalProtocolError> {
        self.drain_complete()?;
        while let Some(key) = self.order.front().copied() {
            let event = match self.pending.get(&key) {
                Some(e) => e,
                None => {
                    self.order.pop_front();
                    continue;
                }
            };
            if !event.is_complete() && self.settings.policy == IncompletePolicy::FailFast {
                return Err(FatalProtocolError::IncompleteEvent {
                    key,
                    received: event.received(),
                    expected: self.n_slots,
                });
            }
            self.emit_front()?;
        }
        Ok(())
    }

    /// Slot of a frame inside its event
    fn route(&self, frame: &Frame, key: u64) -> Result<usize, FatalProtocolError> {
        let n_boards = self.settings.n_boards;
        let (slot, board) = match (self.settings.dialect, frame) {
            (HeaderDialect::Legacy | HeaderDialect::Calibration, Frame::Asm(f)) => {
                let slot = fifo144_to_fifo120(f.fifo_id as usize)?;
                (slot, slot / ASM_FRAMES_PER_BOARD)
            }
            (HeaderDialect::MultiBoard, Frame::Amc(f)) => {
                let quartet = self.amc_quartet(f, key)?;
                let slot = quartet.abs60()?;
                (slot, quartet.board12())
            }
            (dialect, frame) => {
                return Err(FatalProtocolError::UnexpectedFrame {
                    kind: frame.kind(),
                    dialect: dialect.name(),
                })
            }
        };
        if board >= n_boards {
            return Err(FatalProtocolError::BoardNotReadOut { board, n_boards });
        }
        Ok(slot)
    }

    /// The four channel blocks of an AMC frame must be the four channels of one quartet
    fn amc_quartet(&self, frame: &AmcFrame, key: u64) -> Result<QuartetAddress, FatalProtocolError> {
        let fe_id = frame.fe_id();
        let board = self
            .board_map
            .get_board(fe_id)
            .ok_or(FatalProtocolError::UnknownFrontEnd(fe_id))?;
        let mut quartet: Option<QuartetAddress> = None;
        let mut seen = [false; NUMBER_OF_CHANNELS as usize];
        for block in frame.channels.iter() {
            let channel = ChannelAddress::from_board_channel(board, block.channel_id())?;
            match quartet {
                Some(q) if q != channel.quartet => {
                    return Err(FatalProtocolError::ChannelMismatch {
                        key,
                        fe_id,
                        reason: format!("channel {} is not in {}", block.channel_id(), q),
                    })
                }
                _ => quartet = Some(channel.quartet),
            }
            if seen[channel.channel as usize] {
                return Err(FatalProtocolError::ChannelMismatch {
                    key,
                    fe_id,
                    reason: format!("channel {} appears twice", block.channel_id()),
                });
            }
            seen[channel.channel as usize] = true;
        }
        quartet.ok_or(FatalProtocolError::ChannelMismatch {
            key,
            fe_id,
            reason: String::from("frame has no channel blocks"),
        })
    }

    /// Make room for `incoming` by resolving the oldest key
    fn evict_oldest(&mut self, incoming: u64) -> Result<(), FatalProtocolError> {
        let oldest = match self.order.front().copied() {
            Some(k) => k,
            None => return Ok(()),
        };
        let (complete, received) = match self.pending.get(&oldest) {
            Some(e) => (e.is_complete(), e.received()),
            None => {
                self.order.pop_front();
                return Ok(());
            }
        };
        if !complete && self.settings.policy == IncompletePolicy::FailFast {
            if self.settings.max_pending == 1 {
                return Err(FatalProtocolError::EventIdMismatch {
                    expected: oldest,
                    found: incoming,
                });
            }
            return Err(FatalProtocolError::IncompleteEvent {
                key: oldest,
                received,
                expected: self.n_slots,
            });
        }
        self.emit_front()
    }

    fn drain_complete(&mut self) -> Result<(), FatalProtocolError> {
        while let Some(key) = self.order.front() {
            match self.pending.get(key) {
                Some(e) if e.is_complete() => self.emit_front()?,
                _ => break,
            }
        }
        Ok(())
    }

    /// Build the oldest pending event and queue it
    fn emit_front(&mut self) -> Result<(), FatalProtocolError> {
        let key = match self.order.pop_front() {
            Some(k) => k,
            None => return Ok(()),
        };
        let pending = match self.pending.remove(&key) {
            Some(p) => p,
            None => return Ok(()),
        };
        self.retire(key);

        let received = pending.received();
        if received != self.n_slots {
            self.n_incomplete += 1;
            spdlog::warn!(
                "Flushing incomplete event {} with {} of {} frames",
                key,
                received,
                self.n_slots
            );
        }
        let event = self.build_event(key, pending.frames, received)?;
        self.n_emitted += 1;
        self.ready.push_back(event);
        Ok(())
    }

    fn retire(&mut self, key: u64) {
        if self.retired.insert(key) {
            self.retired_order.push_back(key);
        }
        while self.retired_order.len() > RETIRED_KEYS {
            if let Some(old) = self.retired_order.pop_front() {
                self.retired.remove(&old);
            }
        }
    }

    fn build_event(
        &self,
        key: u64,
        frames: Vec<Option<Frame>>,
        received: usize,
    ) -> Result<Event, FatalProtocolError> {
        let threshold = self.settings.signal_threshold;
        let mut clusters = Vec::new();
        let mut timestamp = None;
        match self.settings.dialect {
            HeaderDialect::Legacy | HeaderDialect::Calibration => {
                for pair in frames.chunks(2) {
                    let halves: Vec<&AsmFrame> = pair
                        .iter()
                        .filter_map(|f| match f {
                            Some(Frame::Asm(a)) => Some(a),
                            _ => None,
                        })
                        .collect();
                    if !halves.is_empty() {
                        clusters.push(asm_cluster(&halves, threshold)?);
                    }
                }
            }
            HeaderDialect::MultiBoard => {
                for frame in frames.iter().flatten() {
                    if let Frame::Amc(amc) = frame {
                        timestamp = Some(amc.timestamp());
                        clusters.push(self.amc_cluster(amc, key, threshold)?);
                    }
                }
            }
        }
        Ok(Event::new(
            self.n_emitted,
            key,
            timestamp,
            clusters,
            received,
            self.n_slots,
        ))
    }

    fn amc_cluster(&self, frame: &AmcFrame, key: u64, threshold: f64) -> Result<Cluster, FatalProtocolError> {
        let quartet = self.amc_quartet(frame, key)?;
        let board = quartet.board12();
        let mut pulses = empty_pulses(&quartet)?;
        for block in frame.channels.iter() {
            let channel = ChannelAddress::from_board_channel(board, block.channel_id())?;
            let amplitudes = block.data.iter().map(|w| (*w as u32 & ADC_MASK) as f64);
            pulses[channel.channel as usize] = make_pulse(channel, 0, amplitudes, threshold)?;
        }
        let counters = frame.counters.iter().map(|c| *c as u32).collect();
        Ok(Cluster::new(quartet, pulses, 0, counters))
    }
}

/// Both halves of a quartet must come from the same acquisition window.
///
/// Their event ids agree already: the event id is the key the halves were matched on.
fn check_siblings(quartet: usize, first: &AsmFrame, second: &AsmFrame) -> Result<(), FatalProtocolError> {
    if first.srout != second.srout {
        return Err(FatalProtocolError::SroutMismatch {
            quartet,
            first: first.srout,
            second: second.srout,
        });
    }
    for (counter, (a, b)) in first.counters.iter().zip(second.counters.iter()).enumerate() {
        if a != b {
            return Err(FatalProtocolError::CounterMismatch {
                quartet,
                counter,
                first: *a,
                second: *b,
            });
        }
    }
    Ok(())
}

fn empty_pulses(quartet: &QuartetAddress) -> Result<[Pulse; NUMBER_OF_CHANNELS as usize], FatalProtocolError> {
    Ok([
        Pulse::new(quartet.channel(0)?),
        Pulse::new(quartet.channel(1)?),
        Pulse::new(quartet.channel(2)?),
        Pulse::new(quartet.channel(3)?),
    ])
}

fn make_pulse(
    channel: ChannelAddress,
    srout: u32,
    amplitudes: impl Iterator<Item = f64>,
    threshold: f64,
) -> Result<Pulse, FatalProtocolError> {
    let mut pulse = Pulse::new(channel);
    for (idx, amplitude) in amplitudes.enumerate() {
        let sample = Sample::new(amplitude, idx as u16, idx as f64 * SAMPLING_PERIOD_NS);
        let capacitor = CapacitorAddress::from_srout(channel, srout, idx).id();
        pulse.add_sample(sample, capacitor, threshold)?;
    }
    Ok(pulse)
}

/// Cluster from the one or two ASM frames of a quartet
fn asm_cluster(halves: &[&AsmFrame], threshold: f64) -> Result<Cluster, FatalProtocolError> {
    let (quartet, _) = QuartetAddress::from_fifo144(halves[0].fifo_id as usize)?;
    let mut pulses = empty_pulses(&quartet)?;
    for frame in halves.iter() {
        let (_, half) = QuartetAddress::from_fifo144(frame.fifo_id as usize)?;
        for which in 0..2 {
            let channel = quartet.channel(half * 2 + which as u8)?;
            pulses[channel.channel as usize] =
                make_pulse(channel, frame.srout, frame.amplitudes(which), threshold)?;
        }
    }
    let counters = halves[0].counters.to_vec();
    Ok(Cluster::new(quartet, pulses, halves[0].srout, counters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::{make_amc_frame, make_asm_frame};

    const N_SAMPLES: usize = 8;

    fn asm_settings(n_boards: usize) -> AssemblerSettings {
        AssemblerSettings {
            n_boards,
            ..AssemblerSettings::new(HeaderDialect::Legacy)
        }
    }

    /// Every used fifo of the first `n_boards` boards
    fn event_frames(event_id: u32, n_boards: usize) -> Vec<Frame> {
        (0..n_boards * FIFOS_PER_BOARD)
            .filter(|f| fifo144_to_fifo120(*f).is_ok())
            .map(|f| Frame::Asm(make_asm_frame(event_id, f as u32, N_SAMPLES)))
            .collect()
    }

    #[test]
    fn test_one_complete_event() {
        let mut asm = EventAssembler::new(asm_settings(TOTAL_BOARDS), BoardMap::default());
        let frames = event_frames(7, TOTAL_BOARDS);
        assert_eq!(frames.len(), asm.frames_per_event());
        assert_eq!(frames.len(), 120);
        for frame in frames {
            assert!(asm.poll().is_none());
            asm.push(frame).unwrap();
        }
        let event = asm.poll().unwrap();
        assert!(asm.poll().is_none());
        assert!(event.is_complete());
        assert_eq!(event.key, 7);
        assert_eq!(event.clusters().len(), TOTAL_PHYSICAL_QUARTETS);
        for (idx, cluster) in event.clusters().iter().enumerate() {
            assert_eq!(cluster.id(), idx);
            assert_eq!(cluster.srout(), 17);
            for pulse in cluster.pulses.iter() {
                assert_eq!(pulse.n_samples(), N_SAMPLES);
                let first = pulse.samples()[0].capacitor.address().unwrap();
                assert_eq!(first.capacitor, 17);
                assert_eq!(first.channel, pulse.channel);
            }
        }
        // channel 2h gets the upper half word, 2h+1 the lower one
        let cluster = event.cluster(0).unwrap();
        assert_eq!(cluster.pulses[0].samples()[1].amplitude, 101.0);
        assert_eq!(cluster.pulses[1].samples()[1].amplitude, 201.0);
        assert_eq!(cluster.pulses[2].samples()[1].amplitude, 101.0);
        asm.finish().unwrap();
        assert_eq!(asm.n_emitted(), 1);
    }

    #[test]
    fn test_frames_in_any_order() {
        let mut asm = EventAssembler::new(asm_settings(2), BoardMap::default());
        let mut frames = event_frames(1, 2);
        frames.reverse();
        for frame in frames {
            asm.push(frame).unwrap();
        }
        let event = asm.poll().unwrap();
        assert_eq!(event.clusters().len(), 10);
        assert_eq!(event.n_frames(), 20);
    }

    #[test]
    fn test_consecutive_events() {
        let mut asm = EventAssembler::new(asm_settings(1), BoardMap::default());
        for id in 0..3 {
            for frame in event_frames(id, 1) {
                asm.push(frame).unwrap();
            }
        }
        asm.finish().unwrap();
        let ids: Vec<u64> = std::iter::from_fn(|| asm.poll()).map(|e| e.key).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_corrupted_event_id() {
        let mut asm = EventAssembler::new(asm_settings(1), BoardMap::default());
        let mut frames = event_frames(4, 1);
        if let Frame::Asm(f) = &mut frames[5] {
            f.event_id = 5;
        }
        let mut result = Ok(());
        for frame in frames {
            result = asm.push(frame);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(
            result,
            Err(FatalProtocolError::EventIdMismatch {
                expected: 4,
                found: 5
            })
        ));
        assert!(asm.poll().is_none());
    }

    #[test]
    fn test_corrupted_last_frame_is_caught_at_finish() {
        let mut asm = EventAssembler::new(
            AssemblerSettings {
                max_pending: 2,
                ..asm_settings(1)
            },
            BoardMap::default(),
        );
        let mut frames = event_frames(4, 1);
        if let Some(Frame::Asm(f)) = frames.last_mut() {
            f.event_id = 99;
        }
        for frame in frames {
            asm.push(frame).unwrap();
        }
        assert!(asm.poll().is_none());
        assert!(matches!(
            asm.finish(),
            Err(FatalProtocolError::IncompleteEvent {
                key: 4,
                received: 9,
                expected: 10
            })
        ));
    }

    #[test]
    fn test_srout_and_counter_mismatch() {
        let mut asm = EventAssembler::new(asm_settings(1), BoardMap::default());
        asm.push(Frame::Asm(make_asm_frame(0, 0, N_SAMPLES))).unwrap();
        let mut sibling = make_asm_frame(0, 1, N_SAMPLES);
        sibling.srout = 18;
        assert!(matches!(
            asm.push(Frame::Asm(sibling)),
            Err(FatalProtocolError::SroutMismatch {
                quartet: 0,
                first: 17,
                second: 18
            })
        ));

        let mut asm = EventAssembler::new(asm_settings(1), BoardMap::default());
        asm.push(Frame::Asm(make_asm_frame(0, 3, N_SAMPLES))).unwrap();
        let mut sibling = make_asm_frame(0, 2, N_SAMPLES);
        sibling.counters[16] ^= 1;
        assert!(matches!(
            asm.push(Frame::Asm(sibling)),
            Err(FatalProtocolError::CounterMismatch {
                quartet: 1,
                counter: 16,
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_stale_and_unused() {
        let mut asm = EventAssembler::new(asm_settings(1), BoardMap::default());
        asm.push(Frame::Asm(make_asm_frame(0, 4, N_SAMPLES))).unwrap();
        assert!(matches!(
            asm.push(Frame::Asm(make_asm_frame(0, 4, N_SAMPLES))),
            Err(FatalProtocolError::DuplicateFrame { key: 0, slot: 4 })
        ));
        assert!(matches!(
            asm.push(Frame::Asm(make_asm_frame(0, 10, N_SAMPLES))),
            Err(FatalProtocolError::Routing(_))
        ));
        assert!(matches!(
            asm.push(Frame::Asm(make_asm_frame(0, 12, N_SAMPLES))),
            Err(FatalProtocolError::BoardNotReadOut {
                board: 1,
                n_boards: 1
            })
        ));

        let mut asm = EventAssembler::new(asm_settings(1), BoardMap::default());
        for frame in event_frames(3, 1) {
            asm.push(frame).unwrap();
        }
        assert!(matches!(
            asm.push(Frame::Asm(make_asm_frame(3, 0, N_SAMPLES))),
            Err(FatalProtocolError::StaleFrame(3))
        ));
    }

    #[test]
    fn test_flush_with_warning() {
        let mut asm = EventAssembler::new(
            AssemblerSettings {
                policy: IncompletePolicy::FlushWithWarning,
                ..asm_settings(1)
            },
            BoardMap::default(),
        );
        let frames = event_frames(0, 1);
        for frame in frames.into_iter().skip(2) {
            asm.push(frame).unwrap();
        }
        for frame in event_frames(1, 1).into_iter().take(3) {
            asm.push(frame).unwrap();
        }
        let first = asm.poll().unwrap();
        assert!(!first.is_complete());
        assert_eq!(first.key, 0);
        assert_eq!(first.clusters().len(), 4);
        assert!(first.cluster(0).is_none());
        asm.finish().unwrap();
        let second = asm.poll().unwrap();
        assert_eq!(second.n_frames(), 3);
        // the quartet with one half has two empty pulses
        assert_eq!(second.cluster(1).unwrap().pulses[2].n_samples(), 0);
        assert_eq!(asm.n_incomplete(), 2);
    }

    fn amc_settings(n_boards: usize) -> AssemblerSettings {
        AssemblerSettings {
            n_boards,
            ..AssemblerSettings::new(HeaderDialect::MultiBoard)
        }
    }

    fn amc_event(timestamp: u64, n_boards: usize) -> Vec<Frame> {
        let map = BoardMap::new(None).unwrap();
        let mut frames = Vec::new();
        for board in 0..n_boards {
            let fe_id = map.get_fe_id(board).unwrap();
            for local in 0..PHYSICAL_QUARTETS_PER_BOARD {
                frames.push(Frame::Amc(make_amc_frame(fe_id, (local * 4) as u16, timestamp, 2)));
            }
        }
        frames
    }

    #[test]
    fn test_interleaved_multi_board_events() {
        let mut asm = EventAssembler::new(amc_settings(2), BoardMap::new(None).unwrap());
        let a = amc_event(100, 2);
        let b = amc_event(200, 2);
        assert_eq!(a.len(), asm.frames_per_event());
        for (fa, fb) in a.into_iter().zip(b.into_iter()) {
            asm.push(fb).unwrap();
            asm.push(fa).unwrap();
        }
        // 200 arrived first and is emitted first
        let first = asm.poll().unwrap();
        let second = asm.poll().unwrap();
        assert_eq!((first.key, second.key), (200, 100));
        assert_eq!(first.timestamp, Some(200));
        assert_eq!(first.clusters().len(), 10);
        let pulse = &first.cluster(9).unwrap().pulses[3];
        assert_eq!(pulse.n_samples(), 2 + AMC_EXTRA_SAMPLES as usize);
        assert_eq!(pulse.channel.quartet.board12(), 1);
    }

    #[test]
    fn test_multi_board_window_overflow() {
        let mut asm = EventAssembler::new(
            AssemblerSettings {
                max_pending: 2,
                ..amc_settings(1)
            },
            BoardMap::new(None).unwrap(),
        );
        asm.push(amc_event(1, 1).remove(0)).unwrap();
        asm.push(amc_event(2, 1).remove(0)).unwrap();
        assert!(matches!(
            asm.push(amc_event(3, 1).remove(0)),
            Err(FatalProtocolError::IncompleteEvent {
                key: 1,
                received: 1,
                expected: 5
            })
        ));
    }

    #[test]
    fn test_amc_channel_checks() {
        let mut asm = EventAssembler::new(amc_settings(1), BoardMap::new(None).unwrap());
        let mut frame = make_amc_frame(0x10, 0, 5, 0);
        frame.channels[3].channel_word = (4 << 8) | AMC_CHANNEL_CTRL;
        assert!(matches!(
            asm.push(Frame::Amc(frame)),
            Err(FatalProtocolError::ChannelMismatch { fe_id: 0x10, .. })
        ));
        let mut frame = make_amc_frame(0x10, 0, 5, 0);
        frame.channels[3].channel_word = (1 << 8) | AMC_CHANNEL_CTRL;
        assert!(matches!(
            asm.push(Frame::Amc(frame)),
            Err(FatalProtocolError::ChannelMismatch { .. })
        ));
        assert!(matches!(
            asm.push(Frame::Amc(make_amc_frame(0x1f, 0, 5, 0))),
            Err(FatalProtocolError::UnknownFrontEnd(0x1f))
        ));
        // channels 20..24 belong to the unconnected quartet
        assert!(matches!(
            asm.push(Frame::Amc(make_amc_frame(0x10, 20, 5, 0))),
            Err(FatalProtocolError::Routing(_))
        ));
        assert!(matches!(
            asm.push(Frame::Asm(make_asm_frame(0, 0, 1))),
            Err(FatalProtocolError::UnexpectedFrame { .. })
        ));
    }

    #[test]
    fn test_test_bench_front_end() {
        let mut asm = EventAssembler::new(amc_settings(1), BoardMap::new(None).unwrap());
        for local in 0..PHYSICAL_QUARTETS_PER_BOARD {
            let fe_id = if local < 3 { 0x10 } else { 0x1e };
            asm.push(Frame::Amc(make_amc_frame(fe_id, (local * 4) as u16, 50, 1)))
                .unwrap();
        }
        let event = asm.poll().unwrap();
        assert!(event.is_complete());
        assert_eq!(event.clusters().len(), PHYSICAL_QUARTETS_PER_BOARD);
        for (idx, cluster) in event.clusters().iter().enumerate() {
            assert_eq!(cluster.id(), idx);
            assert_eq!(cluster.quartet.board12(), 0);
        }
    }
}
