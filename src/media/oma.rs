//! OMA Tape Volumes
//!
//! A read-only volume assembled from the sub-files listed in a tape
//! description. The position's `cur_file_num` selects the description entry
//! and `next_block_pos` is the offset inside that entry's file.

use crate::error::{ErrorKind, MediaResult, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::codec::{read_up_to, OmaHeader, OMA_HEADER_LEN};
use super::tdf::{OmaEntry, OmaFileFormat, TapeDescription};
use super::types::{MediaParameters, TapeFormat, TapePosition, MAX_BLOCK_LEN};
use super::{owned_path, read_block_data, MediaHandler};

const TEXT_EOF: u8 = 0x1A;

pub struct OmaTape {
    path: PathBuf,
    params: MediaParameters,
    description: TapeDescription,
    /// Sub-file handle and the file number it belongs to.
    handle: Option<(u32, File)>,
    loaded: bool,
    pos: TapePosition,
}

impl OmaTape {
    /// Parse the description at `path` and mount the volume at load point.
    pub fn mount(path: impl AsRef<Path>, params: MediaParameters) -> Result<Self> {
        let path = owned_path(path);
        let description = TapeDescription::load(&path)?;
        info!(
            "Mounted OMA volume {} ({} entries)",
            path.display(),
            description.entries().len()
        );
        Ok(Self {
            path,
            params,
            description,
            handle: None,
            loaded: true,
            pos: TapePosition::load_point(),
        })
    }

    pub fn description(&self) -> &TapeDescription {
        &self.description
    }

    fn entry(&self, file_num: u32) -> MediaResult<OmaEntry> {
        self.description.get(file_num).cloned().ok_or_else(|| {
            warn!("File {} is beyond the end of {}", file_num, self.path.display());
            ErrorKind::LocateError
        })
    }

    fn require_loaded(&self) -> MediaResult<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(ErrorKind::TapeUnloaded)
        }
    }

    /// Handle of the sub-file for `file_num`, opened on first use.
    fn sub_file(&mut self, file_num: u32, path: &Path) -> MediaResult<&mut File> {
        if !matches!(self.handle, Some((num, _)) if num == file_num) {
            let file = File::open(path).map_err(|e| {
                warn!("Cannot open OMA sub-file {}: {}", path.display(), e);
                ErrorKind::TapeLoadFail
            })?;
            debug!("Opened OMA file {} ({})", file_num, path.display());
            self.handle = Some((file_num, file));
        }
        match self.handle.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(ErrorKind::TapeLoadFail),
        }
    }

    fn sub_file_len(&mut self, file_num: u32, path: &Path) -> MediaResult<u64> {
        let file = self.sub_file(file_num, path)?;
        file.metadata().map(|m| m.len()).map_err(|e| {
            warn!("Cannot stat OMA sub-file {}: {}", path.display(), e);
            ErrorKind::ReadFail
        })
    }

    /// Position after crossing the tapemark that ends the current entry.
    fn next_file_position(&self) -> TapePosition {
        TapePosition {
            next_block_pos: 0,
            prev_block_pos: None,
            cur_file_num: self.pos.cur_file_num + 1,
            block_id: self.pos.block_id.wrapping_add(1),
            ..self.pos
        }
    }

    fn read_headers_block(&mut self, entry: &OmaEntry, buf: &mut Vec<u8>) -> MediaResult<usize> {
        let start = self.pos.next_block_pos;
        let file = self.sub_file(self.pos.cur_file_num, &entry.path)?;
        let header = OmaHeader::read_from(file, start).map_err(|kind| match kind {
            ErrorKind::EmptyTape => ErrorKind::BlockShort,
            other => other,
        })?;

        if header.is_tapemark() {
            self.handle = None;
            self.pos = self.next_file_position();
            return Ok(0);
        }

        let len = header.cur_len as usize;
        read_block_data(file, buf, len)?;
        self.pos = self.pos.advanced(start, header.next_offset(start), false);
        Ok(len)
    }

    fn read_fixed_block(&mut self, entry: &OmaEntry, record_len: usize, buf: &mut Vec<u8>) -> MediaResult<usize> {
        let start = self.pos.next_block_pos;
        let file = self.sub_file(self.pos.cur_file_num, &entry.path)?;
        seek_sub_file(file, start)?;
        buf.resize(record_len, 0);
        let got = read_up_to(file, buf).map_err(|e| {
            warn!("Read from {} failed: {}", entry.path.display(), e);
            ErrorKind::ReadFail
        })?;
        buf.truncate(got);

        if got == 0 {
            self.handle = None;
            self.pos = self.next_file_position();
        } else {
            self.pos = self.pos.advanced(start, start + got as u64, false);
        }
        Ok(got)
    }

    fn read_text_block(&mut self, entry: &OmaEntry, buf: &mut Vec<u8>) -> MediaResult<usize> {
        let start = self.pos.next_block_pos;
        let file = self.sub_file(self.pos.cur_file_num, &entry.path)?;
        let line = read_text_line(file, start, buf)?;

        if line.consumed == 0 && !line.terminated {
            self.handle = None;
            self.pos = self.next_file_position();
            return Ok(0);
        }
        if !line.terminated {
            warn!("Unterminated last line in {}", entry.path.display());
            return Err(ErrorKind::BlockShort);
        }
        if buf.is_empty() {
            warn!("Empty line at offset {} in {}", start, entry.path.display());
            return Err(ErrorKind::BlockShort);
        }

        self.pos = self.pos.advanced(start, start + line.consumed, false);
        Ok(buf.len())
    }

    /// Step back from offset 0 of the current entry to just before the
    /// tapemark ending the previous one.
    fn back_into_previous_file(&mut self) -> MediaResult<usize> {
        let file_num = self.pos.cur_file_num - 1;
        let entry = self.entry(file_num)?;

        let (next, prev) = match entry.format {
            OmaFileFormat::Tapemark => (0, None),
            OmaFileFormat::Headers => {
                let size = self.sub_file_len(file_num, &entry.path)?;
                let tm_pos = size.checked_sub(OMA_HEADER_LEN as u64).ok_or(ErrorKind::ReadFail)?;
                let header = OmaHeader::read_from(self.sub_file(file_num, &entry.path)?, tm_pos)?;
                if !header.is_tapemark() {
                    warn!("{} does not end with a tapemark header", entry.path.display());
                    return Err(ErrorKind::ReadFail);
                }
                (tm_pos, header.prev_offset())
            }
            OmaFileFormat::Fixed { record_len } => {
                let size = self.sub_file_len(file_num, &entry.path)?;
                let record_len = record_len as u64;
                let last_len = match size % record_len {
                    0 => record_len,
                    short => short,
                };
                (size, size.checked_sub(last_len))
            }
            OmaFileFormat::Text => (self.sub_file_len(file_num, &entry.path)?, None),
            OmaFileFormat::EndOfTape => return Err(ErrorKind::LocateError),
        };

        self.pos = TapePosition {
            next_block_pos: next,
            prev_block_pos: prev,
            cur_file_num: file_num,
            block_id: self.pos.block_id.wrapping_sub(1),
            ..self.pos
        };
        Ok(0)
    }

    fn back_within_file(&mut self, entry: &OmaEntry) -> MediaResult<usize> {
        let file_num = self.pos.cur_file_num;
        let next = self.pos.next_block_pos;

        let (start, prev, len) = match entry.format {
            OmaFileFormat::Headers => {
                let start = self.pos.prev_block_pos.ok_or(ErrorKind::LocateError)?;
                let header = OmaHeader::read_from(self.sub_file(file_num, &entry.path)?, start)?;
                (start, header.prev_offset(), header.cur_len.max(0) as usize)
            }
            OmaFileFormat::Fixed { record_len } => {
                let start = self.pos.prev_block_pos.ok_or(ErrorKind::LocateError)?;
                let prev = start.checked_sub(record_len as u64);
                (start, prev, (next - start) as usize)
            }
            OmaFileFormat::Text => {
                let Some(start) = self.pos.prev_block_pos else {
                    debug!("Text files can only be backspaced one line");
                    return Err(ErrorKind::LoadPointError);
                };
                let mut line = Vec::new();
                read_text_line(self.sub_file(file_num, &entry.path)?, start, &mut line)?;
                (start, None, line.len())
            }
            OmaFileFormat::Tapemark | OmaFileFormat::EndOfTape => return Err(ErrorKind::LocateError),
        };

        self.pos = self.pos.retreated(start, prev, false);
        Ok(len)
    }
}

struct TextLine {
    consumed: u64,
    terminated: bool,
}

fn seek_sub_file(file: &mut File, offset: u64) -> MediaResult<()> {
    file.seek(SeekFrom::Start(offset)).map(|_| ()).map_err(|e| {
        warn!("Seek to offset {} failed: {}", offset, e);
        ErrorKind::LocateError
    })
}

/// Read one line starting at `offset` into `buf`. Carriage returns are
/// dropped and bytes beyond the maximum block length are discarded.
fn read_text_line(file: &mut File, offset: u64, buf: &mut Vec<u8>) -> MediaResult<TextLine> {
    seek_sub_file(file, offset)?;
    buf.clear();
    let mut consumed = 0u64;

    for byte in BufReader::new(file).bytes() {
        let byte = byte.map_err(|e| {
            warn!("Text read failed: {}", e);
            ErrorKind::ReadFail
        })?;
        match byte {
            TEXT_EOF => break,
            b'\n' => {
                return Ok(TextLine {
                    consumed: consumed + 1,
                    terminated: true,
                })
            }
            b'\r' => consumed += 1,
            _ => {
                consumed += 1;
                if buf.len() < MAX_BLOCK_LEN {
                    buf.push(byte);
                }
            }
        }
    }
    Ok(TextLine {
        consumed,
        terminated: false,
    })
}

impl MediaHandler for OmaTape {
    fn format(&self) -> TapeFormat {
        TapeFormat::Oma
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn params(&self) -> &MediaParameters {
        &self.params
    }

    fn position(&self) -> &TapePosition {
        &self.pos
    }

    fn position_mut(&mut self) -> &mut TapePosition {
        &mut self.pos
    }

    fn open(&mut self) -> MediaResult<()> {
        self.description = TapeDescription::load(&self.path).map_err(|e| {
            warn!("Cannot load tape description: {}", e);
            ErrorKind::TapeLoadFail
        })?;
        self.handle = None;
        self.loaded = true;
        self.pos = TapePosition::load_point();
        Ok(())
    }

    fn close(&mut self) {
        self.handle = None;
        self.loaded = false;
        self.pos = TapePosition::load_point();
    }

    fn query_loaded(&self) -> bool {
        self.loaded
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn at_load_point(&self) -> bool {
        self.pos.cur_file_num == 1 && self.pos.next_block_pos == 0
    }

    fn read(&mut self, buf: &mut Vec<u8>) -> MediaResult<usize> {
        self.require_loaded()?;
        buf.clear();
        let entry = self.entry(self.pos.cur_file_num)?;
        match entry.format {
            OmaFileFormat::Tapemark => {
                self.pos = self.next_file_position();
                Ok(0)
            }
            OmaFileFormat::EndOfTape => Err(ErrorKind::EndOfTape),
            OmaFileFormat::Headers => self.read_headers_block(&entry, buf),
            OmaFileFormat::Fixed { record_len } => self.read_fixed_block(&entry, record_len, buf),
            OmaFileFormat::Text => self.read_text_block(&entry, buf),
        }
    }

    fn write(&mut self, _data: &[u8]) -> MediaResult<()> {
        self.require_loaded()?;
        Err(ErrorKind::WriteProtect)
    }

    fn write_tapemark(&mut self) -> MediaResult<()> {
        self.require_loaded()?;
        Err(ErrorKind::WriteProtect)
    }

    fn rewind(&mut self) -> MediaResult<()> {
        self.require_loaded()?;
        self.handle = None;
        self.pos = TapePosition::load_point();
        Ok(())
    }

    fn space_block_forward(&mut self) -> MediaResult<usize> {
        let mut scratch = Vec::new();
        self.read(&mut scratch)
    }

    fn space_block_backward(&mut self) -> MediaResult<usize> {
        self.require_loaded()?;
        if self.at_load_point() {
            return Err(ErrorKind::LoadPointError);
        }
        if self.pos.next_block_pos == 0 {
            return self.back_into_previous_file();
        }
        let entry = self.entry(self.pos.cur_file_num)?;
        self.back_within_file(&entry)
    }

    fn sync(&mut self) -> MediaResult<()> {
        self.require_loaded()?;
        Err(ErrorKind::WriteProtect)
    }

    fn erase_gap(&mut self) -> MediaResult<()> {
        self.require_loaded()?;
        Err(ErrorKind::WriteProtect)
    }

    fn secure_erase(&mut self) -> MediaResult<()> {
        self.require_loaded()?;
        Err(ErrorKind::WriteProtect)
    }
}
