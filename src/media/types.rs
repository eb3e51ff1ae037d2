use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest block any image format can carry.
pub const MAX_BLOCK_LEN: usize = 65535;

/// Mount name meaning "drive is empty".
pub const NO_MEDIA_SENTINEL: &str = "*";

/// Tape position state owned by one media handler.
///
/// Handlers compute the complete next state of an operation and commit it
/// with a single assignment once all fallible I/O has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapePosition {
    /// Offset of the next block header to read or write.
    pub next_block_pos: u64,
    /// Offset of the most recently processed header; `None` at load point.
    pub prev_block_pos: Option<u64>,
    /// 1-based tapemark-delimited file number.
    pub cur_file_num: u32,
    /// Blocks and tapemarks crossed since load point.
    pub block_id: u32,
    pub fenced: bool,
    pub eot_warning: bool,
}

impl Default for TapePosition {
    fn default() -> Self {
        Self::load_point()
    }
}

impl TapePosition {
    /// Position at beginning of tape.
    pub const fn load_point() -> Self {
        Self {
            next_block_pos: 0,
            prev_block_pos: None,
            cur_file_num: 1,
            block_id: 0,
            fenced: false,
            eot_warning: false,
        }
    }

    pub fn at_load_point(&self) -> bool {
        self.next_block_pos == 0
    }

    /// State after moving forward over a block (or tapemark) whose header was
    /// at `header_pos` and whose successor starts at `next_pos`.
    pub(crate) fn advanced(&self, header_pos: u64, next_pos: u64, tapemark: bool) -> Self {
        Self {
            next_block_pos: next_pos,
            prev_block_pos: Some(header_pos),
            cur_file_num: if tapemark { self.cur_file_num + 1 } else { self.cur_file_num },
            block_id: self.block_id.wrapping_add(1),
            ..*self
        }
    }

    /// State after moving backward over a block (or tapemark).
    pub(crate) fn retreated(&self, next_pos: u64, prev_pos: Option<u64>, tapemark: bool) -> Self {
        Self {
            next_block_pos: next_pos,
            prev_block_pos: prev_pos,
            cur_file_num: if tapemark { self.cur_file_num.saturating_sub(1).max(1) } else { self.cur_file_num },
            block_id: self.block_id.wrapping_sub(1),
            ..*self
        }
    }
}

/// Read-only media configuration supplied at mount time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaParameters {
    /// Maximum virtual capacity in bytes; 0 means unbounded.
    pub max_size: u64,
    /// Early-warning margin before `max_size`.
    pub eot_margin: u64,
    /// Mount read-only even if the image is writable.
    pub logical_readonly: bool,
    /// Per-format tuning values, passed through untouched.
    pub tuning: BTreeMap<String, String>,
}

impl MediaParameters {
    /// True if a write ending at `end_pos` would exceed the configured capacity.
    pub fn exceeds_capacity(&self, end_pos: u64) -> bool {
        self.max_size > 0 && end_pos > self.max_size
    }

    /// Early-warning check for a tape positioned at `next_block_pos`.
    pub fn in_warning_zone(&self, next_block_pos: u64) -> bool {
        self.max_size > 0 && next_block_pos.saturating_add(self.eot_margin) > self.max_size
    }
}

/// Image formats known to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapeFormat {
    /// Binary-6 segmented headers (`.aws`).
    Aws,
    /// Compressed derivative of `Aws`; handled outside this crate.
    Het,
    /// ASCII-hex-12 headers (`.fkt`).
    FakeTape,
    /// Multi-file description (`.tdf`) of headers/fixed/text sub-files.
    Oma,
}

impl TapeFormat {
    pub fn description(&self) -> &'static str {
        match self {
            TapeFormat::Aws => "AWS tape image",
            TapeFormat::Het => "Compressed (HET) tape image",
            TapeFormat::FakeTape => "FakeTape image",
            TapeFormat::Oma => "OMA tape description",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            TapeFormat::Aws => &["aws"],
            TapeFormat::Het => &["het"],
            TapeFormat::FakeTape => &["fkt"],
            TapeFormat::Oma => &["tdf"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        [TapeFormat::Aws, TapeFormat::Het, TapeFormat::FakeTape, TapeFormat::Oma]
            .into_iter()
            .find(|f| f.extensions().contains(&ext.as_str()))
    }
}
