//! Hardware addressing of the DPGA readout.
//!
//! Every element of the readout is addressed by a relative tuple
//! (hemisphere, board, drs, quartet, channel, capacitor). Different stages of the
//! electronics and of the analysis flatten that tuple into absolute numbers:
//!
//! - quartet 72: every hardware quartet, `quartet + 36*hemi + 6*board + 2*drs`
//! - quartet 60: connected quartets only, `quartet + 30*hemi + 5*board + 2*drs`
//! - channel 288 / channel 240: `4*quartet_abs + channel` on top of the above
//! - fifo 144: one fifo per half quartet as reported by ASM frames
//! - fifo 120: fifo 144 with the two fifos of the unconnected quartet removed
//! - board 12: `6*hemi + board`
//!
//! The quartet (drs 2, quartet 1) of every board is not connected to a detector
//! channel. It has a 72/288 index but no 60/240 index.
use std::fmt;

use super::constants::*;
use super::error::TopologyError;

fn check_abs(scheme: &'static str, value: usize, size: usize) -> Result<(), TopologyError> {
    if value >= size {
        Err(TopologyError::AbsoluteOutOfRange {
            scheme,
            value,
            size,
        })
    } else {
        Ok(())
    }
}

/// Split a board 12 index into (hemisphere, board)
pub fn board12_to_rel(board_abs: usize) -> Result<(u8, u8), TopologyError> {
    check_abs("board 12", board_abs, TOTAL_BOARDS)?;
    let hemi = board_abs / NUMBER_OF_BOARDS as usize;
    let board = board_abs % NUMBER_OF_BOARDS as usize;
    Ok((hemi as u8, board as u8))
}

/// Fifo 144 to fifo 120. Fails for the fifos of the unconnected quartet.
pub fn fifo144_to_fifo120(fifo: usize) -> Result<usize, TopologyError> {
    check_abs("fifo 144", fifo, TOTAL_FIFOS)?;
    let local = fifo % FIFOS_PER_BOARD;
    if local >= FIFOS_PER_BOARD - 2 {
        return Err(TopologyError::UnusedFifo(fifo));
    }
    Ok(fifo - 2 * (fifo / FIFOS_PER_BOARD))
}

pub fn fifo120_to_fifo144(fifo: usize) -> Result<usize, TopologyError> {
    check_abs("fifo 120", fifo, TOTAL_PHYSICAL_FIFOS)?;
    Ok(fifo + 2 * (fifo / (FIFOS_PER_BOARD - 2)))
}

/// Address of one DRS quartet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuartetAddress {
    pub hemisphere: u8,
    pub board: u8,
    pub drs: u8,
    pub quartet: u8,
}

impl QuartetAddress {
    pub fn new(hemisphere: u8, board: u8, drs: u8, quartet: u8) -> Result<Self, TopologyError> {
        if hemisphere >= NUMBER_OF_HEMISPHERES {
            return Err(TopologyError::BadHemisphere(hemisphere));
        }
        if board >= NUMBER_OF_BOARDS {
            return Err(TopologyError::BadBoard(board));
        }
        if drs >= NUMBER_OF_DRS {
            return Err(TopologyError::BadDrs(drs));
        }
        if quartet >= NUMBER_OF_QUARTETS {
            return Err(TopologyError::BadQuartet(quartet));
        }
        Ok(Self {
            hemisphere,
            board,
            drs,
            quartet,
        })
    }

    /// Is this quartet connected to detector channels
    pub fn is_physical(&self) -> bool {
        !(self.drs == UNUSED_DRS && self.quartet == UNUSED_QUARTET)
    }

    pub fn board12(&self) -> usize {
        self.hemisphere as usize * NUMBER_OF_BOARDS as usize + self.board as usize
    }

    pub fn abs72(&self) -> usize {
        self.board12() * QUARTETS_PER_BOARD
            + self.drs as usize * NUMBER_OF_QUARTETS as usize
            + self.quartet as usize
    }

    pub fn from_abs72(abs: usize) -> Result<Self, TopologyError> {
        check_abs("quartet 72", abs, TOTAL_QUARTETS)?;
        let (hemi, board) = board12_to_rel(abs / QUARTETS_PER_BOARD)?;
        let local = abs % QUARTETS_PER_BOARD;
        Self::new(
            hemi,
            board,
            (local / NUMBER_OF_QUARTETS as usize) as u8,
            (local % NUMBER_OF_QUARTETS as usize) as u8,
        )
    }

    pub fn abs60(&self) -> Result<usize, TopologyError> {
        if !self.is_physical() {
            return Err(TopologyError::UnusedQuartet {
                drs: self.drs,
                quartet: self.quartet,
            });
        }
        Ok(self.board12() * PHYSICAL_QUARTETS_PER_BOARD
            + self.drs as usize * NUMBER_OF_QUARTETS as usize
            + self.quartet as usize)
    }

    pub fn from_abs60(abs: usize) -> Result<Self, TopologyError> {
        check_abs("quartet 60", abs, TOTAL_PHYSICAL_QUARTETS)?;
        let (hemi, board) = board12_to_rel(abs / PHYSICAL_QUARTETS_PER_BOARD)?;
        let local = abs % PHYSICAL_QUARTETS_PER_BOARD;
        Self::new(
            hemi,
            board,
            (local / NUMBER_OF_QUARTETS as usize) as u8,
            (local % NUMBER_OF_QUARTETS as usize) as u8,
        )
    }

    /// Fifo carrying channels (0, 1) for half 0 or (2, 3) for half 1
    pub fn fifo144(&self, half: u8) -> usize {
        self.abs72() * 2 + (half & 1) as usize
    }

    /// Inverse of [QuartetAddress::fifo144], returning the quartet and the half
    pub fn from_fifo144(fifo: usize) -> Result<(Self, u8), TopologyError> {
        check_abs("fifo 144", fifo, TOTAL_FIFOS)?;
        Ok((Self::from_abs72(fifo / 2)?, (fifo % 2) as u8))
    }

    pub fn channel(&self, channel: u8) -> Result<ChannelAddress, TopologyError> {
        ChannelAddress::new(*self, channel)
    }

    /// Every hardware quartet in quartet 72 order
    pub fn all() -> impl Iterator<Item = Self> {
        (0..TOTAL_QUARTETS).filter_map(|abs| Self::from_abs72(abs).ok())
    }

    /// Every connected quartet in quartet 60 order
    pub fn physical() -> impl Iterator<Item = Self> {
        (0..TOTAL_PHYSICAL_QUARTETS).filter_map(|abs| Self::from_abs60(abs).ok())
    }
}

impl fmt::Display for QuartetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hemi {} board {} drs {} quartet {}",
            self.hemisphere, self.board, self.drs, self.quartet
        )
    }
}

/// Address of one detector channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelAddress {
    pub quartet: QuartetAddress,
    pub channel: u8,
}

impl ChannelAddress {
    pub fn new(quartet: QuartetAddress, channel: u8) -> Result<Self, TopologyError> {
        if channel >= NUMBER_OF_CHANNELS {
            return Err(TopologyError::BadChannel(channel));
        }
        Ok(Self { quartet, channel })
    }

    pub fn from_rel(
        hemisphere: u8,
        board: u8,
        drs: u8,
        quartet: u8,
        channel: u8,
    ) -> Result<Self, TopologyError> {
        Self::new(QuartetAddress::new(hemisphere, board, drs, quartet)?, channel)
    }

    pub fn abs288(&self) -> usize {
        self.quartet.abs72() * NUMBER_OF_CHANNELS as usize + self.channel as usize
    }

    pub fn from_abs288(abs: usize) -> Result<Self, TopologyError> {
        check_abs("channel 288", abs, TOTAL_CHANNELS)?;
        Self::new(
            QuartetAddress::from_abs72(abs / NUMBER_OF_CHANNELS as usize)?,
            (abs % NUMBER_OF_CHANNELS as usize) as u8,
        )
    }

    pub fn abs240(&self) -> Result<usize, TopologyError> {
        Ok(self.quartet.abs60()? * NUMBER_OF_CHANNELS as usize + self.channel as usize)
    }

    pub fn from_abs240(abs: usize) -> Result<Self, TopologyError> {
        check_abs("channel 240", abs, TOTAL_PHYSICAL_CHANNELS)?;
        Self::new(
            QuartetAddress::from_abs60(abs / NUMBER_OF_CHANNELS as usize)?,
            (abs % NUMBER_OF_CHANNELS as usize) as u8,
        )
    }

    /// Channel 288 to the fifo which carries it
    pub fn fifo144(&self) -> usize {
        self.abs288() / 2
    }

    /// Position of this channel inside the board, as reported by AMC frames (0..24)
    pub fn board_channel(&self) -> u16 {
        (self.abs288() % CHANNELS_PER_BOARD) as u16
    }

    /// Build a channel from a board 12 index and the AMC channel id
    pub fn from_board_channel(board_abs: usize, channel_id: u16) -> Result<Self, TopologyError> {
        check_abs("board 12", board_abs, TOTAL_BOARDS)?;
        check_abs("board channel", channel_id as usize, CHANNELS_PER_BOARD)?;
        Self::from_abs288(board_abs * CHANNELS_PER_BOARD + channel_id as usize)
    }

    pub fn capacitor(&self, capacitor: u16) -> Result<CapacitorAddress, TopologyError> {
        CapacitorAddress::new(*self, capacitor)
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..TOTAL_CHANNELS).filter_map(|abs| Self::from_abs288(abs).ok())
    }

    pub fn physical() -> impl Iterator<Item = Self> {
        (0..TOTAL_PHYSICAL_CHANNELS).filter_map(|abs| Self::from_abs240(abs).ok())
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} channel {}", self.quartet, self.channel)
    }
}

/// Flat storage index of one capacitor, `1024 * channel288 + capacitor`.
///
/// Samples carry this instead of a reference so that events can be copied freely
/// while still pointing into the shared calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CapacitorId(u32);

impl CapacitorId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn from_index(index: usize) -> Result<Self, TopologyError> {
        check_abs("capacitor", index, TOTAL_CAPACITORS)?;
        Ok(Self(index as u32))
    }

    pub fn channel_abs288(&self) -> usize {
        self.index() / NUMBER_OF_CAPACITORS as usize
    }

    pub fn address(&self) -> Result<CapacitorAddress, TopologyError> {
        CapacitorAddress::from_id(*self)
    }
}

/// Address of one storage capacitor of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapacitorAddress {
    pub channel: ChannelAddress,
    pub capacitor: u16,
}

impl CapacitorAddress {
    pub fn new(channel: ChannelAddress, capacitor: u16) -> Result<Self, TopologyError> {
        if capacitor >= NUMBER_OF_CAPACITORS {
            return Err(TopologyError::BadCapacitor(capacitor));
        }
        Ok(Self { channel, capacitor })
    }

    pub fn from_rel(
        hemisphere: u8,
        board: u8,
        drs: u8,
        quartet: u8,
        channel: u8,
        capacitor: u16,
    ) -> Result<Self, TopologyError> {
        Self::new(
            ChannelAddress::from_rel(hemisphere, board, drs, quartet, channel)?,
            capacitor,
        )
    }

    /// Capacitor used by sample `index` of a window starting at `srout`
    pub fn from_srout(channel: ChannelAddress, srout: u32, index: usize) -> Self {
        let capacitor = ((srout as usize + index) % NUMBER_OF_CAPACITORS as usize) as u16;
        Self { channel, capacitor }
    }

    pub fn id(&self) -> CapacitorId {
        CapacitorId(
            (self.channel.abs288() * NUMBER_OF_CAPACITORS as usize + self.capacitor as usize)
                as u32,
        )
    }

    pub fn from_id(id: CapacitorId) -> Result<Self, TopologyError> {
        let capacitors = NUMBER_OF_CAPACITORS as usize;
        Self::new(
            ChannelAddress::from_abs288(id.index() / capacitors)?,
            (id.index() % capacitors) as u16,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quartet_round_trips() {
        let mut n_physical = 0;
        for hemi in 0..NUMBER_OF_HEMISPHERES {
            for board in 0..NUMBER_OF_BOARDS {
                for drs in 0..NUMBER_OF_DRS {
                    for quartet in 0..NUMBER_OF_QUARTETS {
                        let addr = QuartetAddress::new(hemi, board, drs, quartet).unwrap();
                        assert_eq!(QuartetAddress::from_abs72(addr.abs72()).unwrap(), addr);
                        for half in 0..2 {
                            let (back, back_half) =
                                QuartetAddress::from_fifo144(addr.fifo144(half)).unwrap();
                            assert_eq!(back, addr);
                            assert_eq!(back_half, half);
                        }
                        if addr.is_physical() {
                            n_physical += 1;
                            let abs = addr.abs60().unwrap();
                            assert_eq!(QuartetAddress::from_abs60(abs).unwrap(), addr);
                            assert_eq!(
                                abs,
                                quartet as usize
                                    + hemi as usize * 30
                                    + board as usize * 5
                                    + drs as usize * 2
                            );
                        } else {
                            assert!(addr.abs60().is_err());
                        }
                    }
                }
            }
        }
        assert_eq!(n_physical, TOTAL_PHYSICAL_QUARTETS);
    }

    #[test]
    fn test_channel_round_trips() {
        for abs in 0..TOTAL_CHANNELS {
            let ch = ChannelAddress::from_abs288(abs).unwrap();
            assert_eq!(ch.abs288(), abs);
            let (hemi, board) = board12_to_rel(ch.quartet.board12()).unwrap();
            assert_eq!((hemi, board), (ch.quartet.hemisphere, ch.quartet.board));
            assert_eq!(
                ChannelAddress::from_board_channel(ch.quartet.board12(), ch.board_channel())
                    .unwrap(),
                ch
            );
        }
        for abs in 0..TOTAL_PHYSICAL_CHANNELS {
            let ch = ChannelAddress::from_abs240(abs).unwrap();
            assert_eq!(ch.abs240().unwrap(), abs);
        }
        assert_eq!(ChannelAddress::physical().count(), TOTAL_PHYSICAL_CHANNELS);
        assert_eq!(ChannelAddress::all().count(), TOTAL_CHANNELS);
    }

    #[test]
    fn test_fifo_numbering() {
        let mut used = 0;
        for fifo in 0..TOTAL_FIFOS {
            match fifo144_to_fifo120(fifo) {
                Ok(f120) => {
                    used += 1;
                    assert_eq!(fifo120_to_fifo144(f120).unwrap(), fifo);
                    let (quartet, _) = QuartetAddress::from_fifo144(fifo).unwrap();
                    assert_eq!(quartet.abs60().unwrap(), f120 / 2);
                }
                Err(TopologyError::UnusedFifo(f)) => {
                    assert_eq!(f, fifo);
                    let (quartet, _) = QuartetAddress::from_fifo144(fifo).unwrap();
                    assert!(!quartet.is_physical());
                }
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(used, TOTAL_PHYSICAL_FIFOS);
        let ch = ChannelAddress::from_abs288(77).unwrap();
        assert_eq!(ch.fifo144(), 38);
    }

    #[test]
    fn test_capacitor_ids() {
        let addr = CapacitorAddress::from_rel(1, 5, 2, 0, 3, 1023).unwrap();
        let id = addr.id();
        assert_eq!(id.index(), TOTAL_CAPACITORS - 1 - NUMBER_OF_CAPACITORS as usize * 4);
        assert_eq!(CapacitorAddress::from_id(id).unwrap(), addr);
        assert_eq!(CapacitorId::from_index(id.index()).unwrap(), id);
        assert!(CapacitorId::from_index(TOTAL_CAPACITORS).is_err());

        let ch = addr.channel;
        assert_eq!(CapacitorAddress::from_srout(ch, 1020, 10).capacitor, 6);
        assert_eq!(CapacitorAddress::from_srout(ch, 0, 1023).capacitor, 1023);
    }

    #[test]
    fn test_bad_addresses() {
        assert_eq!(
            QuartetAddress::new(2, 0, 0, 0),
            Err(TopologyError::BadHemisphere(2))
        );
        assert_eq!(
            ChannelAddress::from_rel(0, 0, 0, 0, 4),
            Err(TopologyError::BadChannel(4))
        );
        assert!(QuartetAddress::from_abs60(TOTAL_PHYSICAL_QUARTETS).is_err());
        assert!(fifo120_to_fifo144(TOTAL_PHYSICAL_FIFOS).is_err());
    }
}
