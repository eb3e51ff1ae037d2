//! Tape description (`.tdf`) parsing for OMA volumes.
//!
//! A description starts with `@TDF` and lists one sub-file per line:
//!
//! ```text
//! @TDF
//! label.hdr   HEADERS
//! data.bin    FIXED RECSIZE 80
//! readme.txt  TEXT
//! TM
//! EOT
//! ```

use crate::error::{Result, RustVtapeError};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::MAX_BLOCK_LEN;

/// How one sub-file of an OMA volume is cut into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmaFileFormat {
    /// Blocks carry 16-byte headers.
    Headers,
    /// Every block is `record_len` bytes; the final one may be shorter.
    Fixed { record_len: usize },
    /// One block per line.
    Text,
    /// A tapemark with no backing file.
    Tapemark,
    /// Logical end of the volume.
    EndOfTape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmaEntry {
    pub path: PathBuf,
    pub format: OmaFileFormat,
}

impl OmaEntry {
    fn marker(format: OmaFileFormat) -> Self {
        Self {
            path: PathBuf::new(),
            format,
        }
    }
}

/// Parsed description. Never changes after it is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapeDescription {
    entries: Vec<OmaEntry>,
}

impl TapeDescription {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RustVtapeError::description_file(format!("cannot read {}: {}", path.display(), e))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let description = Self::parse(&text, base_dir)?;
        debug!(
            "Loaded tape description {} with {} entries",
            path.display(),
            description.entries.len()
        );
        Ok(description)
    }

    /// Parse description text; relative file names resolve against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        match lines.next() {
            Some((_, first)) if first.eq_ignore_ascii_case("@TDF") => {}
            _ => return Err(RustVtapeError::description_file("missing @TDF signature")),
        }

        let mut entries = Vec::new();
        for (line_no, line) in lines {
            let entry = parse_line(line, line_no, base_dir)?;
            let at_end = entry.format == OmaFileFormat::EndOfTape;
            entries.push(entry);
            if at_end {
                break;
            }
        }

        if entries.last().map(|e| e.format) != Some(OmaFileFormat::EndOfTape) {
            entries.push(OmaEntry::marker(OmaFileFormat::EndOfTape));
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[OmaEntry] {
        &self.entries
    }

    /// Entry for 1-based file number `file_num`.
    pub fn get(&self, file_num: u32) -> Option<&OmaEntry> {
        (file_num as usize).checked_sub(1).and_then(|i| self.entries.get(i))
    }
}

fn parse_line(line: &str, line_no: usize, base_dir: &Path) -> Result<OmaEntry> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let bad = |what: &str| RustVtapeError::description_file(format!("line {}: {}: '{}'", line_no, what, line));

    match tokens.as_slice() {
        [word] if word.eq_ignore_ascii_case("TM") => Ok(OmaEntry::marker(OmaFileFormat::Tapemark)),
        [word] if word.eq_ignore_ascii_case("EOT") => Ok(OmaEntry::marker(OmaFileFormat::EndOfTape)),
        [name, kind, rest @ ..] => {
            let format = if kind.eq_ignore_ascii_case("HEADERS") && rest.is_empty() {
                OmaFileFormat::Headers
            } else if kind.eq_ignore_ascii_case("TEXT") && rest.is_empty() {
                OmaFileFormat::Text
            } else if kind.eq_ignore_ascii_case("FIXED") {
                match rest {
                    [keyword, size] if keyword.eq_ignore_ascii_case("RECSIZE") => {
                        let record_len: usize = size.parse().map_err(|_| bad("invalid record size"))?;
                        if record_len == 0 || record_len > MAX_BLOCK_LEN {
                            return Err(bad("record size out of range"));
                        }
                        OmaFileFormat::Fixed { record_len }
                    }
                    _ => return Err(bad("FIXED needs RECSIZE n")),
                }
            } else {
                return Err(bad("unknown file format"));
            };
            Ok(OmaEntry {
                path: resolve_path(name, base_dir),
                format,
            })
        }
        _ => Err(bad("unrecognised entry")),
    }
}

fn resolve_path(name: &str, base_dir: &Path) -> PathBuf {
    let name = if cfg!(windows) {
        name.to_string()
    } else {
        name.replace('\\', "/")
    };
    let path = PathBuf::from(name);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
