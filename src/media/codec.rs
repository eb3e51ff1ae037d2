//! Block Header Codecs
//!
//! Encoding and decoding of the per-block headers of the headered image
//! formats. Each codec reads or writes exactly one header at a given offset
//! and keeps no state of its own.

use crate::error::{ErrorKind, MediaResult};
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

use super::types::MAX_BLOCK_LEN;

pub const AWS_HEADER_LEN: usize = 6;
pub const FAKE_HEADER_LEN: usize = 12;
pub const OMA_HEADER_LEN: usize = 16;
pub const OMA_MAGIC: &[u8; 4] = b"@HDF";

bitflags! {
    /// First flag byte of a Binary-6 header.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct AwsFlags: u8 {
        const NEW_RECORD    = 0b1000_0000; // first segment of a block
        const TAPEMARK      = 0b0100_0000;
        const END_OF_RECORD = 0b0010_0000; // last segment of a block
        const COMPRESSION   = 0b0000_0011; // set only by the compressed derivative
    }
}

/// Seek to `offset`, mapping failure to a positioning error.
fn seek_to<S: Seek>(storage: &mut S, offset: u64) -> MediaResult<()> {
    storage.seek(SeekFrom::Start(offset)).map(|_| ()).map_err(|e| {
        warn!("Seek to offset {} failed: {}", offset, e);
        ErrorKind::LocateError
    })
}

/// Read until `buf` is full or end of file; returns the byte count.
pub(crate) fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Map a storage write failure. Exhausted space is end of tape, anything else
/// a write failure.
pub(crate) fn write_error(e: io::Error) -> ErrorKind {
    if e.kind() == io::ErrorKind::StorageFull {
        warn!("Tape image storage full: {}", e);
        ErrorKind::EndOfTape
    } else {
        warn!("Tape image write failed: {}", e);
        ErrorKind::WriteFail
    }
}

/// Read one fixed-size header at `offset`.
fn read_raw_header<S: Read + Seek, const N: usize>(storage: &mut S, offset: u64) -> MediaResult<[u8; N]> {
    seek_to(storage, offset)?;
    let mut raw = [0u8; N];
    let got = read_up_to(storage, &mut raw).map_err(|e| {
        warn!("Header read at offset {} failed: {}", offset, e);
        ErrorKind::ReadFail
    })?;
    match got {
        0 => {
            debug!("End of image data at offset {}", offset);
            Err(ErrorKind::EmptyTape)
        }
        n if n < N => {
            warn!("Truncated block header at offset {} ({} of {} bytes)", offset, n, N);
            Err(ErrorKind::BlockShort)
        }
        _ => Ok(raw),
    }
}

fn write_raw_header<S: Write + Seek>(storage: &mut S, offset: u64, raw: &[u8]) -> MediaResult<()> {
    seek_to(storage, offset)?;
    storage.write_all(raw).map_err(write_error)
}

/// Binary-6 segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwsHeader {
    pub cur_len: u16,
    pub prev_len: u16,
    pub flags1: AwsFlags,
    pub flags2: u8,
}

impl AwsHeader {
    /// Header of a single-segment data block.
    pub fn block(cur_len: u16, prev_len: u16) -> Self {
        Self {
            cur_len,
            prev_len,
            flags1: AwsFlags::NEW_RECORD | AwsFlags::END_OF_RECORD,
            flags2: 0,
        }
    }

    pub fn tapemark(prev_len: u16) -> Self {
        Self {
            cur_len: 0,
            prev_len,
            flags1: AwsFlags::TAPEMARK,
            flags2: 0,
        }
    }

    pub fn is_tapemark(&self) -> bool {
        self.flags1.contains(AwsFlags::TAPEMARK)
    }

    /// True if this segment opens a block (or is a tapemark).
    pub fn starts_block(&self) -> bool {
        self.flags1.intersects(AwsFlags::NEW_RECORD | AwsFlags::TAPEMARK)
    }

    pub fn ends_block(&self) -> bool {
        self.flags1.intersects(AwsFlags::END_OF_RECORD | AwsFlags::TAPEMARK)
    }

    pub fn is_compressed(&self) -> bool {
        self.flags1.intersects(AwsFlags::COMPRESSION)
    }

    pub fn to_bytes(&self) -> [u8; AWS_HEADER_LEN] {
        let mut raw = [0u8; AWS_HEADER_LEN];
        LittleEndian::write_u16(&mut raw[0..2], self.cur_len);
        LittleEndian::write_u16(&mut raw[2..4], self.prev_len);
        raw[4] = self.flags1.bits();
        raw[5] = self.flags2;
        raw
    }

    pub fn from_bytes(raw: &[u8; AWS_HEADER_LEN]) -> Self {
        Self {
            cur_len: LittleEndian::read_u16(&raw[0..2]),
            prev_len: LittleEndian::read_u16(&raw[2..4]),
            flags1: AwsFlags::from_bits_retain(raw[4]),
            flags2: raw[5],
        }
    }

    pub fn read_from<S: Read + Seek>(storage: &mut S, offset: u64) -> MediaResult<Self> {
        let raw = read_raw_header::<S, AWS_HEADER_LEN>(storage, offset)?;
        Ok(Self::from_bytes(&raw))
    }

    pub fn write_to<S: Write + Seek>(&self, storage: &mut S, offset: u64) -> MediaResult<()> {
        write_raw_header(storage, offset, &self.to_bytes())
    }
}

/// ASCII-hex-12 header: previous length, current length and their XOR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeHeader {
    pub prev_len: u16,
    pub cur_len: u16,
}

impl FakeHeader {
    pub fn is_tapemark(&self) -> bool {
        self.cur_len == 0
    }

    pub fn to_bytes(&self) -> [u8; FAKE_HEADER_LEN] {
        let text = format!(
            "{:04X}{:04X}{:04X}",
            self.prev_len,
            self.cur_len,
            self.prev_len ^ self.cur_len
        );
        let mut raw = [0u8; FAKE_HEADER_LEN];
        raw.copy_from_slice(text.as_bytes());
        raw
    }

    /// Decode and verify a header. A bad digit or a failed XOR check is a
    /// data check; corrupted headers are never accepted.
    pub fn from_bytes(raw: &[u8; FAKE_HEADER_LEN]) -> MediaResult<Self> {
        let prev_len = parse_hex_field(&raw[0..4])?;
        let cur_len = parse_hex_field(&raw[4..8])?;
        let xor = parse_hex_field(&raw[8..12])?;
        if prev_len ^ cur_len != xor {
            warn!(
                "FakeTape header check failed: prev={:04X} cur={:04X} xor={:04X}",
                prev_len, cur_len, xor
            );
            return Err(ErrorKind::ReadFail);
        }
        Ok(Self { prev_len, cur_len })
    }

    pub fn read_from<S: Read + Seek>(storage: &mut S, offset: u64) -> MediaResult<Self> {
        let raw = read_raw_header::<S, FAKE_HEADER_LEN>(storage, offset)?;
        Self::from_bytes(&raw)
    }

    pub fn write_to<S: Write + Seek>(&self, storage: &mut S, offset: u64) -> MediaResult<()> {
        write_raw_header(storage, offset, &self.to_bytes())
    }
}

fn parse_hex_field(field: &[u8]) -> MediaResult<u16> {
    if !field.iter().all(u8::is_ascii_hexdigit) {
        warn!("Invalid hex digits in FakeTape header field {:02X?}", field);
        return Err(ErrorKind::ReadFail);
    }
    // All bytes are ASCII hex digits, so both conversions succeed.
    let text = std::str::from_utf8(field).map_err(|_| ErrorKind::ReadFail)?;
    u16::from_str_radix(text, 16).map_err(|_| ErrorKind::ReadFail)
}

/// Fixed-16 header of an OMA headers sub-file.
///
/// Layout: current length (i32 LE, -1 = tapemark), offset of the previous
/// header (i32 LE, -1 = none), magic `@HDF`, 4 reserved bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OmaHeader {
    pub cur_len: i32,
    pub prev_offset: i32,
}

impl OmaHeader {
    pub fn is_tapemark(&self) -> bool {
        self.cur_len == -1
    }

    /// Data length rounded up to the 16-byte boundary.
    pub fn padded_len(&self) -> u64 {
        if self.cur_len <= 0 {
            0
        } else {
            (self.cur_len as u64 + 15) & !15
        }
    }

    /// Offset of the header following one located at `offset`.
    pub fn next_offset(&self, offset: u64) -> u64 {
        offset + OMA_HEADER_LEN as u64 + self.padded_len()
    }

    pub fn prev_offset(&self) -> Option<u64> {
        u64::try_from(self.prev_offset).ok()
    }

    pub fn to_bytes(&self) -> [u8; OMA_HEADER_LEN] {
        let mut raw = [0u8; OMA_HEADER_LEN];
        LittleEndian::write_i32(&mut raw[0..4], self.cur_len);
        LittleEndian::write_i32(&mut raw[4..8], self.prev_offset);
        raw[8..12].copy_from_slice(OMA_MAGIC);
        raw
    }

    pub fn from_bytes(raw: &[u8; OMA_HEADER_LEN]) -> MediaResult<Self> {
        if &raw[8..12] != OMA_MAGIC {
            warn!("OMA header magic missing: {:02X?}", &raw[8..12]);
            return Err(ErrorKind::ReadFail);
        }
        let cur_len = LittleEndian::read_i32(&raw[0..4]);
        if cur_len < -1 || cur_len > MAX_BLOCK_LEN as i32 {
            warn!("OMA header block length {} out of range", cur_len);
            return Err(ErrorKind::ReadFail);
        }
        Ok(Self {
            cur_len,
            prev_offset: LittleEndian::read_i32(&raw[4..8]),
        })
    }

    pub fn read_from<S: Read + Seek>(storage: &mut S, offset: u64) -> MediaResult<Self> {
        let raw = read_raw_header::<S, OMA_HEADER_LEN>(storage, offset)?;
        Self::from_bytes(&raw)
    }

    pub fn write_to<S: Write + Seek>(&self, storage: &mut S, offset: u64) -> MediaResult<()> {
        write_raw_header(storage, offset, &self.to_bytes())
    }
}
