//! Channel Command Processor
//!
//! Executes one CCW at a time against the mounted media: the command table
//! is consulted first, then the opcode runs against the handler, and every
//! outcome is turned into unit status and sense bytes.

use byteorder::{BigEndian, ByteOrder};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::error::{ErrorKind, MediaResult, Result};
use crate::media::{open_media, MediaHandler, MediaParameters, NO_MEDIA_SENTINEL};
use crate::sense::{self, SenseContext, UnitStatus};

pub mod command_table;
pub mod constants;
pub mod types;

pub use command_table::CommandTable;
pub use types::{CcwFlags, CcwOutcome, CcwRequest, ChainState, DeviceFamily, DeviceModel, Disposition};

use constants::*;

/// Result of one opcode before sense building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Completion {
    kind: ErrorKind,
    residual: usize,
    more: bool,
    /// Data chaining continues; no status is presented yet.
    deferred: bool,
}

impl Completion {
    fn done(residual: usize) -> Self {
        Self::with(ErrorKind::StatusOnly, residual)
    }

    fn with(kind: ErrorKind, residual: usize) -> Self {
        Self {
            kind,
            residual,
            more: false,
            deferred: false,
        }
    }

    fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::done(0)
        }
    }
}

/// One emulated tape drive.
pub struct TapeDevice {
    model: DeviceModel,
    table: CommandTable,
    media: Option<Box<dyn MediaHandler>>,
    chain: ChainState,
    sense: Vec<u8>,
    sense_pending: bool,
    /// Unread part of the last block, kept for a data-chained read.
    read_remainder: Option<Vec<u8>>,
    /// Data of a data-chained write collected so far.
    write_accumulator: Vec<u8>,
    path_group: [u8; PATH_GROUP_ID_LEN],
    path_state: u8,
    assigned: bool,
    deonirq: bool,
}

impl TapeDevice {
    pub fn new(model: DeviceModel) -> Self {
        info!("Creating {} device", model.description());
        Self {
            model,
            table: CommandTable::new(model),
            media: None,
            chain: ChainState::default(),
            sense: vec![0; model.family().sense_table().sense_len],
            sense_pending: false,
            read_remainder: None,
            write_accumulator: Vec::new(),
            path_group: [0; PATH_GROUP_ID_LEN],
            path_state: 0,
            assigned: false,
            deonirq: false,
        }
    }

    /// Create a device and mount its configured image.
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        let mut device = Self::new(config.model);
        device.deonirq = config.deonirq;
        if let Some(image) = &config.image {
            device.mount(image, &config.media)?;
        }
        Ok(device)
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn command_table(&self) -> &CommandTable {
        &self.table
    }

    pub fn chain_state(&self) -> &ChainState {
        &self.chain
    }

    pub fn media(&self) -> Option<&dyn MediaHandler> {
        self.media.as_deref()
    }

    pub fn sense_bytes(&self) -> &[u8] {
        &self.sense
    }

    pub fn is_sense_pending(&self) -> bool {
        self.sense_pending
    }

    pub fn set_deonirq(&mut self, deonirq: bool) {
        self.deonirq = deonirq;
    }

    /// Detect the format of `path` and mount it; the no-media sentinel
    /// empties the drive instead.
    pub fn mount(&mut self, path: impl AsRef<Path>, params: &MediaParameters) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str() == NO_MEDIA_SENTINEL {
            self.unmount();
            return Ok(());
        }
        let handler = open_media(path, params)?;
        self.mount_handler(handler);
        Ok(())
    }

    /// Mount an already opened handler, e.g. a compressed-image codec or a
    /// hardware backend.
    pub fn mount_handler(&mut self, handler: Box<dyn MediaHandler>) {
        self.unmount();
        info!("Mounted {} on {}", handler.path().display(), self.model.description());
        self.media = Some(handler);
    }

    pub fn unmount(&mut self) {
        if let Some(mut media) = self.media.take() {
            info!("Unmounting {}", media.path().display());
            media.close();
        }
        self.read_remainder = None;
        self.write_accumulator.clear();
    }

    /// Operator reset of a fenced volume.
    pub fn reset_fence(&mut self) {
        if let Some(media) = self.media.as_deref_mut() {
            media.position_mut().fenced = false;
            info!("Volume fence reset on {}", media.path().display());
        }
    }

    /// Execute one CCW. `iobuf` holds the data to write, or receives the
    /// data read.
    pub fn execute(&mut self, req: &CcwRequest, iobuf: &mut [u8]) -> CcwOutcome {
        if req.seq == 0 {
            self.chain.reset();
        }
        let staged = self.chain.staged.take();
        let remainder = self.read_remainder.take();
        if !req.chained {
            self.write_accumulator.clear();
        }

        let disposition = self.table.lookup(req.opcode);
        debug!(
            "CCW 0x{:02X} count {} flags {:?} seq {} ({:?})",
            req.opcode, req.count, req.flags, req.seq, disposition
        );

        let completion = match self.dispatch(req, disposition, iobuf, staged, remainder) {
            Ok(completion) => completion,
            Err(kind) => {
                if kind.fences_volume() {
                    self.fence();
                }
                if kind.is_corruption() {
                    warn!("CCW 0x{:02X}: image is damaged: {}", req.opcode, kind);
                } else {
                    debug!("CCW 0x{:02X} failed: {}", req.opcode, kind);
                }
                Completion::with(kind, req.count as usize)
            }
        };

        if completion.deferred {
            return CcwOutcome {
                status: UnitStatus::empty(),
                sense: self.sense.clone(),
                residual: 0,
                more: completion.more,
            };
        }

        let ctx = self.sense_context(req.opcode, completion.kind);
        let mut status = sense::build(completion.kind, self.model.family(), req.opcode, &ctx, &mut self.sense);
        if completion.kind == ErrorKind::TapeUnloaded && disposition == Disposition::RequiresTapeLoadedPlusDeviceEnd {
            status |= UnitStatus::DE;
        }
        self.sense_pending = status.contains(UnitStatus::UC);
        if self.sense_pending {
            info!(
                "CCW 0x{:02X}: {} (status {:?}, sense {})",
                req.opcode,
                completion.kind,
                status,
                hex::encode_upper(&self.sense)
            );
        }

        CcwOutcome {
            status,
            sense: self.sense.clone(),
            residual: u16::try_from(completion.residual).unwrap_or(u16::MAX),
            more: completion.more,
        }
    }

    fn dispatch(
        &mut self,
        req: &CcwRequest,
        disposition: Disposition,
        iobuf: &mut [u8],
        staged: Option<Vec<u8>>,
        remainder: Option<Vec<u8>>,
    ) -> MediaResult<Completion> {
        let opcode = req.opcode;
        if disposition == Disposition::Unsupported {
            warn!("Opcode 0x{:02X} is not supported by {}", opcode, self.model.description());
            return Err(ErrorKind::BadCommand);
        }
        if self.chain.supervisor_inhibit && is_supervisor_only(opcode) {
            warn!("Opcode 0x{:02X} rejected under supervisor inhibit", opcode);
            return Err(ErrorKind::BadCommand);
        }

        match disposition {
            Disposition::NoOpImmediateSuccess => return Ok(Completion::done(0)),
            Disposition::NoOpUnlessPhysicalDevice if !self.media.as_deref().is_some_and(|m| m.is_physical()) => {
                return Ok(Completion::done(0));
            }
            _ => {}
        }

        if disposition.requires_tape() || disposition == Disposition::NoOpUnlessPhysicalDevice {
            let media = self.loaded_media()?;
            if media.position().fenced && !matches!(opcode, opcodes::REWIND | opcodes::REWIND_UNLOAD) {
                return Err(ErrorKind::Fenced);
            }
        }

        let count = req.count as usize;
        match opcode {
            opcodes::WRITE => self.write_block(req, iobuf),
            opcodes::READ_FORWARD => self.read_forward(req, iobuf, remainder),
            opcodes::READ_BACKWARD => self.read_backward(req, iobuf),
            opcodes::NOP => Ok(Completion::done(0)),
            opcodes::SENSE => self.sense_command(count, iobuf),
            opcodes::REWIND => self.rewind(),
            opcodes::REWIND_UNLOAD => Ok(self.rewind_unload()),
            opcodes::ERASE_GAP => {
                let media = self.writable_media()?;
                media.erase_gap()?;
                Ok(Completion::done(0))
            }
            opcodes::WRITE_TAPEMARK => {
                let write_immediate = self.chain.write_immediate;
                let media = self.writable_media()?;
                media.write_tapemark()?;
                if write_immediate {
                    media.sync()?;
                }
                Ok(Completion::done(0))
            }
            opcodes::SYNCHRONIZE => {
                self.loaded_media()?.sync()?;
                Ok(Completion::done(0))
            }
            opcodes::DATA_SECURITY_ERASE => {
                self.writable_media()?.secure_erase()?;
                Ok(Completion::done(0))
            }
            opcodes::FORWARD_SPACE_BLOCK => {
                let len = self.loaded_media()?.space_block_forward()?;
                Ok(spaced_over(len))
            }
            opcodes::BACKSPACE_BLOCK => {
                let len = self.loaded_media()?.space_block_backward()?;
                Ok(spaced_over(len))
            }
            opcodes::FORWARD_SPACE_FILE => {
                self.loaded_media()?.space_file_forward()?;
                Ok(Completion::done(0))
            }
            opcodes::BACKSPACE_FILE => {
                self.loaded_media()?.space_file_backward()?;
                Ok(Completion::done(0))
            }
            opcodes::LOCATE_BLOCK => self.locate(count, iobuf),
            opcodes::READ_BLOCK_ID => {
                let id = self.loaded_media()?.read_block_id() & self.model.block_id_mask();
                let mut data = [0u8; BLOCK_ID_LEN];
                BigEndian::write_u32(&mut data[0..4], id);
                BigEndian::write_u32(&mut data[4..8], id);
                Ok(fill(&data, count, iobuf))
            }
            opcodes::MODE_SET => self.mode_set(count, iobuf),
            opcodes::PERFORM_SUBSYSTEM_FUNCTION => self.perform_subsystem_function(count, iobuf),
            opcodes::READ_SUBSYSTEM_DATA => match staged {
                Some(data) => Ok(fill(&data, count, iobuf)),
                None => {
                    warn!("Read subsystem data without a preceding prepare order");
                    Err(ErrorKind::BadCommand)
                }
            },
            opcodes::SENSE_ID => Ok(fill(&self.sense_id(), count, iobuf)),
            opcodes::READ_DEVICE_CHARACTERISTICS => Ok(fill(&self.device_characteristics(), count, iobuf)),
            opcodes::READ_BUFFERED_LOG => Ok(fill(&[0u8; BUFFERED_LOG_LEN], count, iobuf)),
            opcodes::SENSE_PATH_GROUP_ID => {
                let mut data = [0u8; PATH_GROUP_ID_LEN + 1];
                data[0] = self.path_state;
                data[1..].copy_from_slice(&self.path_group);
                Ok(fill(&data, count, iobuf))
            }
            opcodes::SET_PATH_GROUP_ID => self.set_path_group(count, iobuf),
            opcodes::ASSIGN | opcodes::UNASSIGN => {
                self.assigned = opcode == opcodes::ASSIGN;
                debug!("Drive {}", if self.assigned { "assigned" } else { "unassigned" });
                Ok(Completion::done(count.saturating_sub(PATH_GROUP_ID_LEN)))
            }
            opcodes::LOAD_DISPLAY => {
                let shown = &iobuf[..count.min(iobuf.len())];
                debug!("Load display message {}", hex::encode_upper(shown));
                Ok(Completion::done(0))
            }
            _ => Err(ErrorKind::BadCommand),
        }
    }

    /// Mounted media that reports itself loaded.
    fn loaded_media(&mut self) -> MediaResult<&mut dyn MediaHandler> {
        let media = self.media.as_deref_mut().ok_or(ErrorKind::TapeUnloaded)?;
        media.refresh_status();
        if media.query_loaded() {
            Ok(media)
        } else {
            Err(ErrorKind::TapeUnloaded)
        }
    }

    fn writable_media(&mut self) -> MediaResult<&mut dyn MediaHandler> {
        let media = self.loaded_media()?;
        if media.is_read_only() {
            return Err(ErrorKind::WriteProtect);
        }
        Ok(media)
    }

    fn fence(&mut self) {
        if let Some(media) = self.media.as_deref_mut() {
            if !media.position().fenced {
                warn!("Fencing volume {}", media.path().display());
            }
            media.position_mut().fenced = true;
        }
    }

    fn sense_context(&mut self, opcode: u8, kind: ErrorKind) -> SenseContext {
        let deonirq = self.deonirq;
        match self.media.as_deref_mut() {
            Some(media) if media.query_loaded() => {
                let passed_eot = if kind == ErrorKind::StatusOnly && is_write_class(opcode) {
                    media.passed_eot()
                } else {
                    media.position().eot_warning
                };
                SenseContext {
                    loaded: true,
                    at_load_point: media.at_load_point(),
                    read_only: media.is_read_only(),
                    passed_eot,
                    deonirq,
                }
            }
            _ => SenseContext {
                deonirq,
                ..Default::default()
            },
        }
    }

    fn write_block(&mut self, req: &CcwRequest, iobuf: &[u8]) -> MediaResult<Completion> {
        let data = &iobuf[..(req.count as usize).min(iobuf.len())];
        if req.flags.contains(CcwFlags::CD) {
            self.write_accumulator.extend_from_slice(data);
            return Ok(Completion::deferred());
        }

        let mut block = std::mem::take(&mut self.write_accumulator);
        block.extend_from_slice(data);
        if block.is_empty() {
            warn!("Write with no data");
            return Err(ErrorKind::BadCommand);
        }

        let write_immediate = self.chain.write_immediate;
        let media = self.writable_media()?;
        media.write(&block)?;
        if write_immediate {
            media.sync()?;
        }
        Ok(Completion::done(0))
    }

    fn read_forward(&mut self, req: &CcwRequest, iobuf: &mut [u8], remainder: Option<Vec<u8>>) -> MediaResult<Completion> {
        let count = req.count as usize;
        let block = match remainder {
            Some(rest) if req.chained && req.prev_opcode == opcodes::READ_FORWARD => rest,
            _ => {
                let mut block = Vec::new();
                if self.loaded_media()?.read(&mut block)? == 0 {
                    return Ok(Completion::with(ErrorKind::ReadTapemark, count));
                }
                block
            }
        };

        let n = block.len().min(count).min(iobuf.len());
        iobuf[..n].copy_from_slice(&block[..n]);
        if block.len() > n && req.flags.contains(CcwFlags::CD) {
            self.read_remainder = Some(block[n..].to_vec());
            return Ok(Completion {
                more: true,
                ..Completion::deferred()
            });
        }
        Ok(Completion {
            more: block.len() > n,
            ..Completion::done(count - n)
        })
    }

    /// Backspace, read the block forward, backspace again; the tail of the
    /// block is what a backward read delivers.
    fn read_backward(&mut self, req: &CcwRequest, iobuf: &mut [u8]) -> MediaResult<Completion> {
        let count = req.count as usize;
        let media = self.loaded_media()?;
        if media.space_block_backward()? == 0 {
            return Ok(Completion::with(ErrorKind::ReadTapemark, count));
        }
        let mut block = Vec::new();
        media.read(&mut block)?;
        media.space_block_backward()?;

        let n = block.len().min(count).min(iobuf.len());
        iobuf[..n].copy_from_slice(&block[block.len() - n..]);
        Ok(Completion {
            more: block.len() > n,
            ..Completion::done(count - n)
        })
    }

    fn sense_command(&mut self, count: usize, iobuf: &mut [u8]) -> MediaResult<Completion> {
        if !self.sense_pending {
            let ctx = self.sense_context(opcodes::SENSE, ErrorKind::Unsolicited);
            sense::build(
                ErrorKind::Unsolicited,
                self.model.family(),
                opcodes::SENSE,
                &ctx,
                &mut self.sense,
            );
        }
        self.sense_pending = false;
        let data = self.sense.clone();
        Ok(fill(&data, count, iobuf))
    }

    fn rewind(&mut self) -> MediaResult<Completion> {
        let media = self.loaded_media()?;
        match media.rewind() {
            Ok(()) => {
                let pos = media.position_mut();
                pos.eot_warning = false;
                pos.fenced = false;
                Ok(Completion::done(0))
            }
            Err(kind) => {
                warn!("Rewind of {} failed: {}", media.path().display(), kind);
                media.position_mut().fenced = true;
                Err(ErrorKind::RewindFailed)
            }
        }
    }

    fn rewind_unload(&mut self) -> Completion {
        if let Some(mut media) = self.media.take() {
            info!("Rewind-unload of {}", media.path().display());
            media.close();
        }
        self.read_remainder = None;
        Completion::with(ErrorKind::UnloadSuccess, 0)
    }

    fn locate(&mut self, count: usize, iobuf: &[u8]) -> MediaResult<Completion> {
        if count < 4 || iobuf.len() < 4 {
            return Err(ErrorKind::BadCommand);
        }
        let target = BigEndian::read_u32(&iobuf[..4]) & self.model.block_id_mask();
        let media = self.loaded_media()?;
        if let Err(kind) = media.locate_block(target) {
            warn!("Locate to block {} failed: {}", target, kind);
            media.position_mut().fenced = true;
            return Err(ErrorKind::LocateError);
        }
        Ok(Completion::done(count - 4))
    }

    fn mode_set(&mut self, count: usize, iobuf: &[u8]) -> MediaResult<Completion> {
        let Some(&mode) = iobuf.first().filter(|_| count > 0) else {
            return Err(ErrorKind::BadCommand);
        };
        self.chain.write_immediate = mode & MSET_WRITE_IMMED != 0;
        self.chain.supervisor_inhibit = mode & MSET_SUPVR_INHIBIT != 0;
        debug!(
            "Mode set 0x{:02X}: write immediate {}, supervisor inhibit {}",
            mode, self.chain.write_immediate, self.chain.supervisor_inhibit
        );
        Ok(Completion::done(count - 1))
    }

    fn perform_subsystem_function(&mut self, count: usize, iobuf: &[u8]) -> MediaResult<Completion> {
        let Some(&order) = iobuf.first().filter(|_| count > 0) else {
            return Err(ErrorKind::BadCommand);
        };
        match order {
            psf_orders::PREPARE_FOR_READ_SUBSYSTEM_DATA => {
                let message = iobuf.get(1).copied().filter(|_| count > 1).unwrap_or(0);
                self.chain.staged = Some(self.subsystem_data(message));
            }
            psf_orders::RESET_VOLUME_FENCED => self.reset_fence(),
            psf_orders::FORCED_ERROR_LOGGING | psf_orders::FORCED_ERROR_LOGGING_DATA => {
                debug!("Forced error logging order 0x{:02X}", order);
            }
            _ => {
                warn!("Unsupported subsystem function order 0x{:02X}", order);
                return Err(ErrorKind::BadCommand);
            }
        }
        Ok(Completion::done(0))
    }

    fn set_path_group(&mut self, count: usize, iobuf: &[u8]) -> MediaResult<Completion> {
        let len = PATH_GROUP_ID_LEN + 1;
        if count < len || iobuf.len() < len {
            return Err(ErrorKind::BadCommand);
        }
        if iobuf[0] & PATH_GROUPED != 0 {
            self.path_group.copy_from_slice(&iobuf[1..len]);
            self.path_state = PATH_GROUPED;
        } else {
            self.path_group = [0; PATH_GROUP_ID_LEN];
            self.path_state = 0;
        }
        Ok(Completion::done(count - len))
    }

    fn sense_id(&self) -> [u8; SENSE_ID_LEN] {
        let mut data = [0xFFu8; SENSE_ID_LEN];
        BigEndian::write_u16(&mut data[1..3], self.model.type_number());
        data[3] = self.model.model_number();
        BigEndian::write_u16(&mut data[4..6], self.model.type_number());
        data[6] = self.model.model_number();
        data
    }

    fn device_characteristics(&self) -> [u8; DEVICE_CHARACTERISTICS_LEN] {
        let mut data = [0u8; DEVICE_CHARACTERISTICS_LEN];
        data[..SENSE_ID_LEN - 1].copy_from_slice(&self.sense_id()[1..]);
        data
    }

    /// Status message returned by the read subsystem data that follows a
    /// prepare order.
    fn subsystem_data(&self, message: u8) -> Vec<u8> {
        let mut data = vec![0u8; SUBSYSTEM_DATA_LEN];
        BigEndian::write_u16(&mut data[0..2], SUBSYSTEM_DATA_LEN as u16);
        data[2] = 0x10;
        data[3] = message;
        BigEndian::write_u16(&mut data[4..6], self.model.type_number());
        data[6] = self.model.model_number();
        let block_id = self.media.as_deref().map_or(0, |m| m.read_block_id()) & self.model.block_id_mask();
        BigEndian::write_u32(&mut data[8..12], block_id);
        data
    }
}

/// Copy as much of `data` as `count` and the buffer allow.
fn fill(data: &[u8], count: usize, iobuf: &mut [u8]) -> Completion {
    let n = data.len().min(count).min(iobuf.len());
    iobuf[..n].copy_from_slice(&data[..n]);
    Completion {
        more: data.len() > n,
        ..Completion::done(count - n)
    }
}

fn spaced_over(len: usize) -> Completion {
    if len == 0 {
        Completion::with(ErrorKind::ReadTapemark, 0)
    } else {
        Completion::done(0)
    }
}
