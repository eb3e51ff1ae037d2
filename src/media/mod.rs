//! Tape Media Handlers
//!
//! One handler per image format behind the [`MediaHandler`] trait, plus
//! format detection and the shared open/positioning helpers.

use crate::error::{ErrorKind, MediaResult, Result, RustVtapeError};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub mod aws;
pub mod codec;
pub mod fake;
pub mod oma;
pub mod tdf;
pub mod types;

pub use aws::AwsTape;
pub use codec::{AwsFlags, AwsHeader, FakeHeader, OmaHeader};
pub use fake::FakeTape;
pub use oma::OmaTape;
pub use tdf::{OmaEntry, OmaFileFormat, TapeDescription};
pub use types::{MediaParameters, TapeFormat, TapePosition, MAX_BLOCK_LEN, NO_MEDIA_SENTINEL};

/// Capability set shared by every tape format (and by external hardware
/// backends). All operations are synchronous; an error leaves the position
/// exactly as it was before the call.
pub trait MediaHandler: Send {
    fn format(&self) -> TapeFormat;
    fn path(&self) -> &Path;
    fn params(&self) -> &MediaParameters;
    fn position(&self) -> &TapePosition;
    fn position_mut(&mut self) -> &mut TapePosition;

    /// Open the media and position it at load point.
    fn open(&mut self) -> MediaResult<()>;
    fn close(&mut self);
    fn query_loaded(&self) -> bool;
    fn is_read_only(&self) -> bool;

    /// Read the next block into `buf`, returning its length; 0 means a
    /// tapemark was read.
    fn read(&mut self, buf: &mut Vec<u8>) -> MediaResult<usize>;
    fn write(&mut self, data: &[u8]) -> MediaResult<()>;
    fn write_tapemark(&mut self) -> MediaResult<()>;
    fn rewind(&mut self) -> MediaResult<()>;
    /// Space over one block; returns its length, 0 for a tapemark.
    fn space_block_forward(&mut self) -> MediaResult<usize>;
    /// Space back over one block; returns its length, 0 for a tapemark.
    fn space_block_backward(&mut self) -> MediaResult<usize>;
    fn sync(&mut self) -> MediaResult<()>;
    fn erase_gap(&mut self) -> MediaResult<()>;
    fn secure_erase(&mut self) -> MediaResult<()>;

    fn at_load_point(&self) -> bool {
        self.position().at_load_point()
    }

    /// Real devices answer true; command tables treat some opcodes as no-ops
    /// for emulated media only.
    fn is_physical(&self) -> bool {
        false
    }

    /// Hardware backends refresh a possibly stale "loaded" state here.
    fn refresh_status(&mut self) {}

    /// Space forward past the next tapemark.
    fn space_file_forward(&mut self) -> MediaResult<()> {
        loop {
            if self.space_block_forward()? == 0 {
                return Ok(());
            }
        }
    }

    /// Space backward past the previous tapemark. Reaching load point first
    /// fails with `LoadPointError`.
    fn space_file_backward(&mut self) -> MediaResult<()> {
        loop {
            if self.space_block_backward()? == 0 {
                return Ok(());
            }
        }
    }

    /// Early-warning check, recorded in the position's `eot_warning`.
    fn passed_eot(&mut self) -> bool {
        let passed = self.params().in_warning_zone(self.position().next_block_pos);
        self.position_mut().eot_warning = passed;
        passed
    }

    fn read_block_id(&self) -> u32 {
        self.position().block_id
    }

    /// Headers of image formats have no random access: rewind, then space
    /// forward until `target` is reached.
    fn locate_block(&mut self, target: u32) -> MediaResult<()> {
        debug!("Locating block {} on {}", target, self.path().display());
        self.rewind()?;
        while self.position().block_id < target {
            self.space_block_forward()?;
        }
        Ok(())
    }
}

/// Open an image file read-write, falling back to read-only when the file
/// or filesystem refuses write access. Returns the file and its read-only
/// state.
pub(crate) fn open_image_file(path: &Path, params: &MediaParameters, create: bool) -> MediaResult<(File, bool)> {
    if path.as_os_str() == NO_MEDIA_SENTINEL {
        return Err(ErrorKind::TapeUnloaded);
    }

    if !params.logical_readonly {
        match OpenOptions::new().read(true).write(true).create(create).open(path) {
            Ok(file) => return Ok((file, false)),
            Err(e) => read_only_fallback(path, &e)?,
        }
    }

    File::open(path).map(|file| (file, true)).map_err(|e| {
        warn!("Cannot open tape image {} read-only: {}", path.display(), e);
        ErrorKind::TapeLoadFail
    })
}

/// Decide whether a failed read-write open may be retried read-only. Only a
/// refused write access falls back; anything else fails the load.
fn read_only_fallback(path: &Path, e: &io::Error) -> MediaResult<()> {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            info!("{} is not writable ({}), mounting read-only", path.display(), e);
            Ok(())
        }
        _ => {
            warn!("Cannot open tape image {}: {}", path.display(), e);
            Err(ErrorKind::TapeLoadFail)
        }
    }
}

/// Guard shared by every writing operation.
pub(crate) fn require_writable(read_only: bool) -> MediaResult<()> {
    if read_only {
        Err(ErrorKind::WriteProtect)
    } else {
        Ok(())
    }
}

/// Pick the image format: known suffix first, then the leading bytes. New
/// (empty or missing) files default to AWS.
pub fn detect_format(path: &Path) -> TapeFormat {
    if let Some(format) = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(TapeFormat::from_extension)
    {
        debug!("Format {:?} selected by suffix of {}", format, path.display());
        return format;
    }

    let mut lead = [0u8; codec::FAKE_HEADER_LEN];
    let got = File::open(path)
        .and_then(|mut file| codec::read_up_to(&mut file, &mut lead))
        .unwrap_or(0);
    let format = format_from_leading_bytes(&lead[..got]);
    debug!("Format {:?} selected by content of {}", format, path.display());
    format
}

fn format_from_leading_bytes(lead: &[u8]) -> TapeFormat {
    if lead.starts_with(b"@TDF") {
        return TapeFormat::Oma;
    }
    if let Ok(raw) = <&[u8; codec::FAKE_HEADER_LEN]>::try_from(lead) {
        if matches!(FakeHeader::from_bytes(raw), Ok(h) if h.prev_len == 0) {
            return TapeFormat::FakeTape;
        }
    }
    if let Some(raw) = lead.get(..codec::AWS_HEADER_LEN) {
        let mut bytes = [0u8; codec::AWS_HEADER_LEN];
        bytes.copy_from_slice(raw);
        let header = AwsHeader::from_bytes(&bytes);
        if header.prev_len == 0 && header.starts_block() && header.is_compressed() {
            return TapeFormat::Het;
        }
    }
    TapeFormat::Aws
}

/// Detect the format of `path`, construct its handler and open it.
pub fn open_media(path: impl AsRef<Path>, params: &MediaParameters) -> Result<Box<dyn MediaHandler>> {
    let path = path.as_ref();
    if path.as_os_str() == NO_MEDIA_SENTINEL {
        return Err(ErrorKind::TapeUnloaded.into());
    }

    let format = detect_format(path);
    info!("Mounting {} as {}", path.display(), format.description());

    let handler: Box<dyn MediaHandler> = match format {
        TapeFormat::Aws => {
            let mut tape = AwsTape::new(path, params.clone());
            tape.open()?;
            Box::new(tape)
        }
        TapeFormat::FakeTape => {
            let mut tape = FakeTape::new(path, params.clone());
            tape.open()?;
            Box::new(tape)
        }
        TapeFormat::Oma => Box::new(OmaTape::mount(path, params.clone())?),
        TapeFormat::Het => {
            return Err(RustVtapeError::unsupported_format(format!(
                "{}: compressed images need an external handler",
                path.display()
            )))
        }
    };
    Ok(handler)
}

/// Owned copy of a mount path.
pub(crate) fn owned_path(path: impl AsRef<Path>) -> PathBuf {
    path.as_ref().to_path_buf()
}

/// Read exactly `len` bytes of block data; running out is a short block.
pub(crate) fn read_block_data<R: Read>(reader: &mut R, buf: &mut Vec<u8>, len: usize) -> MediaResult<()> {
    let start = buf.len();
    buf.resize(start + len, 0);
    let got = codec::read_up_to(reader, &mut buf[start..]).map_err(|e| {
        warn!("Block data read failed: {}", e);
        ErrorKind::ReadFail
    })?;
    if got < len {
        warn!("Unexpected end of image inside a data block ({} of {} bytes)", got, len);
        buf.truncate(start + got);
        return Err(ErrorKind::BlockShort);
    }
    Ok(())
}
