// Multi-board (AMC) frames identify their ASM board by a front end id chosen in the
// firmware rather than by position. BoardMap translates that id to the absolute
// board number (0..12, hemisphere major) used everywhere else. The map is the only
// piece of the topology that changes between setups, so it is read from a CSV file
// with a bundled default.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use fxhash::FxHashMap;

use super::constants::TOTAL_BOARDS;
use super::error::BoardMapError;

const ENTRIES_PER_LINE: usize = 2; //Number of elements in a single row in the CSV file

/// Load the default map for windows
#[cfg(target_family = "windows")]
fn load_default_map() -> String {
    String::from(include_str!("data\\default_board_map.csv"))
}

/// Load the default map for macos and linux
#[cfg(target_family = "unix")]
fn load_default_map() -> String {
    String::from(include_str!("data/default_board_map.csv"))
}

/// Front end ids are written in hex (0x10) in the map files, plain decimal is accepted too
fn parse_fe_id(entry: &str) -> Result<u16, BoardMapError> {
    let entry = entry.trim();
    match entry
        .strip_prefix("0x")
        .or_else(|| entry.strip_prefix("0X"))
    {
        Some(hex) => Ok(u16::from_str_radix(hex, 16)?),
        None => Ok(entry.parse()?),
    }
}

/// BoardMap contains the mapping of front end ids to absolute board number.
///
/// Each row of the CSV file holds a front end id and a board number. A front end id
/// appears once; a board may be listed under several ids (the test bench board 0x1e
/// reads out as board 0). The first id listed for a board is the one used when writing
/// frames. Lines starting with `#` are comments.
#[derive(Debug, Clone, Default)]
pub struct BoardMap {
    map: FxHashMap<u16, usize>,
    inverse: FxHashMap<usize, u16>,
}

impl BoardMap {
    /// Create a new BoardMap
    /// If the path is None, we load the default that is bundled with the library
    pub fn new(path: Option<&Path>) -> Result<Self, BoardMapError> {
        let mut contents = String::new();
        if let Some(p) = path {
            let mut file = File::open(p)?;
            file.read_to_string(&mut contents)?;
        } else {
            contents = load_default_map();
        }
        Self::from_csv(&contents)
    }

    fn from_csv(contents: &str) -> Result<Self, BoardMapError> {
        let mut bm = BoardMap::default();

        let mut lines = contents.lines();
        lines.next(); // Skip the header
        for line in lines.filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#')) {
            let entries: Vec<&str> = line.split_terminator(",").collect();
            if entries.len() != ENTRIES_PER_LINE {
                return Err(BoardMapError::BadFileFormat);
            }

            let fe_id = parse_fe_id(entries[0])?;
            let board: usize = entries[1].trim().parse()?;
            if board >= TOTAL_BOARDS {
                return Err(BoardMapError::BoardOutOfRange(board));
            }
            if bm.map.insert(fe_id, board).is_some() {
                return Err(BoardMapError::DuplicateFrontEnd(fe_id));
            }
            bm.inverse.entry(board).or_insert(fe_id);
        }

        Ok(bm)
    }

    /// Get the absolute board for a front end id.
    ///
    /// If returns None the id does not exist in the map
    pub fn get_board(&self, fe_id: u16) -> Option<usize> {
        self.map.get(&fe_id).copied()
    }

    /// Get the primary front end id of an absolute board
    pub fn get_fe_id(&self, board: usize) -> Option<u16> {
        self.inverse.get(&board).copied()
    }

    /// Number of front end ids, aliases included
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
