//! FakeTape Images
//!
//! Every block is a 12-character ASCII hex header (previous length, current
//! length, XOR check) followed by the data. A zero current length is a
//! tapemark.

use crate::error::{ErrorKind, MediaResult};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::codec::{write_error, FakeHeader, FAKE_HEADER_LEN};
use super::types::{MediaParameters, TapeFormat, TapePosition, MAX_BLOCK_LEN};
use super::{open_image_file, owned_path, read_block_data, require_writable, MediaHandler};

const HEADER_LEN: u64 = FAKE_HEADER_LEN as u64;

pub struct FakeTape {
    path: PathBuf,
    params: MediaParameters,
    file: Option<File>,
    read_only: bool,
    pos: TapePosition,
}

impl FakeTape {
    pub fn new(path: impl AsRef<Path>, params: MediaParameters) -> Self {
        Self {
            path: owned_path(path),
            params,
            file: None,
            read_only: false,
            pos: TapePosition::load_point(),
        }
    }

    fn file(&mut self) -> MediaResult<&mut File> {
        self.file.as_mut().ok_or(ErrorKind::TapeUnloaded)
    }

    /// Read the header at the current position, optionally its data too,
    /// and return the header with the offset following the block.
    fn next_block(&mut self, buf: Option<&mut Vec<u8>>) -> MediaResult<(FakeHeader, u64)> {
        let start = self.pos.next_block_pos;
        let file = self.file()?;
        let header = FakeHeader::read_from(file, start)?;
        let len = header.cur_len as usize;

        if let Some(buf) = buf {
            read_block_data(file, buf, len)?;
        } else {
            let end = start + HEADER_LEN + len as u64;
            let size = file.metadata().map_err(|_| ErrorKind::ReadFail)?.len();
            if end > size {
                warn!("Block at offset {} runs past the end of the image", start);
                return Err(ErrorKind::BlockShort);
            }
        }
        Ok((header, start + HEADER_LEN + len as u64))
    }

    fn append(&mut self, data: &[u8]) -> MediaResult<()> {
        if self.file.is_none() {
            return Err(ErrorKind::TapeUnloaded);
        }
        require_writable(self.read_only)?;

        let start = self.pos.next_block_pos;
        let end = start + HEADER_LEN + data.len() as u64;
        if self.params.exceeds_capacity(end) {
            info!(
                "Write of {} bytes at offset {} would pass the {} byte limit",
                data.len(),
                start,
                self.params.max_size
            );
            return Err(ErrorKind::EndOfTape);
        }

        let prev_len = match self.pos.prev_block_pos {
            Some(prev) if start > 0 => {
                let file = self.file()?;
                FakeHeader::read_from(file, prev)?.cur_len
            }
            _ => 0,
        };
        let header = FakeHeader {
            prev_len,
            cur_len: data.len() as u16,
        };

        let file = self.file()?;
        header.write_to(file, start)?;
        if !data.is_empty() {
            file.write_all(data).map_err(write_error)?;
        }
        file.set_len(end).map_err(write_error)?;

        self.pos = self.pos.advanced(start, end, header.is_tapemark());
        Ok(())
    }
}

impl MediaHandler for FakeTape {
    fn format(&self) -> TapeFormat {
        TapeFormat::FakeTape
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
        let (file, read_only) = open_image_file(&self.path, &self.params, true)?;
        debug!("Opened FakeTape image {} (read-only: {})", self.path.display(), read_only);
        self.file = Some(file);
        self.read_only = read_only;
        self.pos = TapePosition::load_point();
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed FakeTape image {}", self.path.display());
        }
        self.pos = TapePosition::load_point();
    }

    fn query_loaded(&self) -> bool {
        self.file.is_some()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn read(&mut self, buf: &mut Vec<u8>) -> MediaResult<usize> {
        buf.clear();
        let start = self.pos.next_block_pos;
        let (header, end) = self.next_block(Some(buf))?;
        self.pos = self.pos.advanced(start, end, header.is_tapemark());
        Ok(header.cur_len as usize)
    }

    fn write(&mut self, data: &[u8]) -> MediaResult<()> {
        if data.len() > MAX_BLOCK_LEN {
            warn!("Block of {} bytes is too long for a FakeTape header", data.len());
            return Err(ErrorKind::WriteFail);
        }
        self.append(data)
    }

    fn write_tapemark(&mut self) -> MediaResult<()> {
        self.append(&[])
    }

    fn rewind(&mut self) -> MediaResult<()> {
        self.file()?;
        self.pos = TapePosition::load_point();
        Ok(())
    }

    fn space_block_forward(&mut self) -> MediaResult<usize> {
        let start = self.pos.next_block_pos;
        let (header, end) = self.next_block(None)?;
        self.pos = self.pos.advanced(start, end, header.is_tapemark());
        Ok(header.cur_len as usize)
    }

    fn space_block_backward(&mut self) -> MediaResult<usize> {
        self.file()?;
        if self.pos.at_load_point() {
            return Err(ErrorKind::LoadPointError);
        }
        let header_pos = self.pos.prev_block_pos.ok_or(ErrorKind::LocateError)?;
        let header = FakeHeader::read_from(self.file()?, header_pos)?;

        let prev = if header_pos == 0 {
            None
        } else {
            Some(
                header_pos
                    .checked_sub(HEADER_LEN + header.prev_len as u64)
                    .ok_or(ErrorKind::LocateError)?,
            )
        };
        self.pos = self.pos.retreated(header_pos, prev, header.is_tapemark());
        Ok(header.cur_len as usize)
    }

    fn sync(&mut self) -> MediaResult<()> {
        require_writable(self.read_only)?;
        let result = self.file()?.sync_data();
        result.map_err(|e| {
            warn!("Flushing {} failed: {}", self.path.display(), e);
            ErrorKind::WriteFail
        })
    }

    fn erase_gap(&mut self) -> MediaResult<()> {
        self.file()?;
        require_writable(self.read_only)
    }

    fn secure_erase(&mut self) -> MediaResult<()> {
        require_writable(self.read_only)?;
        let end = self.pos.next_block_pos;
        self.file()?.set_len(end).map_err(write_error)?;
        info!("Erased {} from offset {}", self.path.display(), end);
        Ok(())
    }
}
