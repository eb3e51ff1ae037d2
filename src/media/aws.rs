//! AWS Tape Images
//!
//! Binary-6 segmented images. Every block is one or more header+data
//! segments; the header carries the segment length and the length of the
//! segment before it, which is all backward spacing has to go on.

use crate::error::{ErrorKind, MediaResult};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::codec::{write_error, AwsHeader, AWS_HEADER_LEN};
use super::types::{MediaParameters, TapeFormat, TapePosition, MAX_BLOCK_LEN};
use super::{open_image_file, owned_path, read_block_data, require_writable, MediaHandler};

const HEADER_LEN: u64 = AWS_HEADER_LEN as u64;

/// Outcome of walking the segments of one block.
struct BlockSpan {
    /// Header offset of the first segment.
    first_header: u64,
    /// Header offset of the last segment.
    last_header: u64,
    /// Offset just past the block.
    end: u64,
    len: usize,
    tapemark: bool,
}

pub struct AwsTape {
    path: PathBuf,
    params: MediaParameters,
    file: Option<File>,
    read_only: bool,
    pos: TapePosition,
}

impl AwsTape {
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

    /// Walk forward over the segments of the block at `start`, appending the
    /// data to `buf` when given.
    fn scan_forward(&mut self, start: u64, mut buf: Option<&mut Vec<u8>>) -> MediaResult<BlockSpan> {
        let file = self.file()?;
        let mut offset = start;
        let mut len = 0usize;

        loop {
            let header = AwsHeader::read_from(file, offset)?;
            let seg_len = header.cur_len as usize;

            if len + seg_len > MAX_BLOCK_LEN {
                warn!("Block at offset {} exceeds {} bytes", start, MAX_BLOCK_LEN);
                return Err(ErrorKind::ReadFail);
            }
            if header.is_tapemark() && len + seg_len > 0 {
                warn!("Tapemark flag on a data segment at offset {}", offset);
                return Err(ErrorKind::ReadFail);
            }

            let header_pos = offset;
            offset += HEADER_LEN + seg_len as u64;

            if !header.is_tapemark() {
                if let Some(buf) = buf.as_deref_mut() {
                    read_block_data(file, buf, seg_len)?;
                }
                len += seg_len;
            }

            if header.ends_block() {
                return Ok(BlockSpan {
                    first_header: start,
                    last_header: header_pos,
                    end: offset,
                    len,
                    tapemark: len == 0,
                });
            }
        }
    }

    /// Walk backward from the last segment header at `last` to the first
    /// segment of its block.
    fn scan_backward(&mut self, last: u64) -> MediaResult<(BlockSpan, Option<u64>)> {
        let file = self.file()?;
        let mut offset = last;
        let mut len = 0usize;

        let first = loop {
            let header = AwsHeader::read_from(file, offset)?;
            len += header.cur_len as usize;
            if len > MAX_BLOCK_LEN {
                warn!("Block ending at offset {} exceeds {} bytes", last, MAX_BLOCK_LEN);
                return Err(ErrorKind::ReadFail);
            }
            if header.starts_block() {
                break header;
            }
            offset = offset
                .checked_sub(HEADER_LEN + header.prev_len as u64)
                .ok_or(ErrorKind::LocateError)?;
        };

        let prev = if offset == 0 {
            None
        } else {
            Some(
                offset
                    .checked_sub(HEADER_LEN + first.prev_len as u64)
                    .ok_or(ErrorKind::LocateError)?,
            )
        };
        let end = self.pos.next_block_pos;
        Ok((
            BlockSpan {
                first_header: offset,
                last_header: last,
                end,
                len,
                tapemark: first.is_tapemark() || len == 0,
            },
            prev,
        ))
    }

    /// Length of the last segment before `start`, for the new header's
    /// "previous length" field.
    fn previous_segment_len(&mut self, start: u64) -> MediaResult<u16> {
        if start == 0 {
            return Ok(0);
        }
        let prev = self.pos.prev_block_pos.ok_or(ErrorKind::LocateError)?;
        let file = self.file()?;
        Ok(AwsHeader::read_from(file, prev)?.cur_len)
    }

    /// Write one header (plus data) at the current position, truncate the
    /// image behind it and commit the new position.
    fn append(&mut self, header: AwsHeader, data: &[u8]) -> MediaResult<()> {
        let start = self.pos.next_block_pos;
        let end = start + HEADER_LEN + data.len() as u64;
        let file = self.file()?;

        header.write_to(file, start)?;
        if !data.is_empty() {
            file.write_all(data).map_err(write_error)?;
        }
        file.set_len(end).map_err(write_error)?;

        self.pos = self.pos.advanced(start, end, header.is_tapemark());
        Ok(())
    }

    fn check_writable(&self, data_len: usize) -> MediaResult<()> {
        if self.file.is_none() {
            return Err(ErrorKind::TapeUnloaded);
        }
        require_writable(self.read_only)?;
        let end = self.pos.next_block_pos + HEADER_LEN + data_len as u64;
        if self.params.exceeds_capacity(end) {
            info!(
                "Write of {} bytes at offset {} would pass the {} byte limit",
                data_len, self.pos.next_block_pos, self.params.max_size
            );
            return Err(ErrorKind::EndOfTape);
        }
        Ok(())
    }
}

impl MediaHandler for AwsTape {
    fn format(&self) -> TapeFormat {
        TapeFormat::Aws
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
        debug!("Opened AWS image {} (read-only: {})", self.path.display(), read_only);
        self.file = Some(file);
        self.read_only = read_only;
        self.pos = TapePosition::load_point();
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed AWS image {}", self.path.display());
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
        let span = self.scan_forward(self.pos.next_block_pos, Some(buf))?;
        self.pos = self.pos.advanced(span.last_header, span.end, span.tapemark);
        Ok(span.len)
    }

    fn write(&mut self, data: &[u8]) -> MediaResult<()> {
        if data.len() > MAX_BLOCK_LEN {
            warn!("Block of {} bytes is too long for an AWS segment", data.len());
            return Err(ErrorKind::WriteFail);
        }
        self.check_writable(data.len())?;
        let prev_len = self.previous_segment_len(self.pos.next_block_pos)?;
        self.append(AwsHeader::block(data.len() as u16, prev_len), data)
    }

    fn write_tapemark(&mut self) -> MediaResult<()> {
        self.check_writable(0)?;
        let prev_len = self.previous_segment_len(self.pos.next_block_pos)?;
        self.append(AwsHeader::tapemark(prev_len), &[])
    }

    fn rewind(&mut self) -> MediaResult<()> {
        self.file()?;
        self.pos = TapePosition::load_point();
        Ok(())
    }

    fn space_block_forward(&mut self) -> MediaResult<usize> {
        let span = self.scan_forward(self.pos.next_block_pos, None)?;
        self.pos = self.pos.advanced(span.last_header, span.end, span.tapemark);
        Ok(span.len)
    }

    fn space_block_backward(&mut self) -> MediaResult<usize> {
        self.file()?;
        if self.pos.at_load_point() {
            return Err(ErrorKind::LoadPointError);
        }
        let last = self.pos.prev_block_pos.ok_or(ErrorKind::LocateError)?;
        let (span, prev) = self.scan_backward(last)?;
        self.pos = self.pos.retreated(span.first_header, prev, span.tapemark);
        Ok(span.len)
    }

    fn sync(&mut self) -> MediaResult<()> {
        require_writable(self.read_only)?;
        self.file()?.sync_data().map_err(|e| {
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
