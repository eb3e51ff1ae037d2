//! Exec Command Handler
//!
//! Handles the `exec` subcommand: mount an image on an emulated drive and
//! run a channel program through the command processor.
//!
//! A program is a JSON list of CCWs:
//!
//! ```json
//! [
//!   { "opcode": 7 },
//!   { "opcode": 1, "flags": 64, "data": "C8C5D3D3D6" },
//!   { "opcode": 2, "count": 80 }
//! ]
//! ```
//!
//! The command-chain flag (0x40) keeps the next CCW in the same chain and the
//! data-chain flag (0x80) continues the data into the next CCW.

use crate::channel::constants::opcodes;
use crate::channel::{CcwFlags, CcwRequest, DeviceModel, TapeDevice};
use crate::config::DeviceConfig;
use crate::error::{Result, RustVtapeError};
use crate::sense::UnitStatus;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramStep {
    pub opcode: u8,
    #[serde(default)]
    pub flags: u8,
    /// Transfer count; defaults to the length of `data`.
    #[serde(default)]
    pub count: Option<u16>,
    /// Hex encoded output data.
    #[serde(default)]
    pub data: Option<String>,
}

impl ProgramStep {
    fn payload(&self) -> Result<Vec<u8>> {
        match &self.data {
            Some(text) => hex::decode(text.trim())
                .map_err(|e| RustVtapeError::parse(format!("opcode 0x{:02X}: bad hex data: {}", self.opcode, e))),
            None => Ok(Vec::new()),
        }
    }
}

pub fn load_program(path: &Path) -> Result<Vec<ProgramStep>> {
    let text = std::fs::read_to_string(path)?;
    parse_program(&text)
}

pub fn parse_program(text: &str) -> Result<Vec<ProgramStep>> {
    serde_json::from_str(text).map_err(|e| RustVtapeError::parse(format!("Failed to parse channel program: {}", e)))
}

pub fn execute(
    config_path: Option<PathBuf>,
    program: PathBuf,
    image: Option<PathBuf>,
    model: DeviceModel,
    dump: bool,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => DeviceConfig::load(&path)?,
        None => DeviceConfig::new(model),
    };
    if image.is_some() {
        config.image = image;
    }

    let steps = load_program(&program)?;
    info!(
        "Running {} CCWs from {} on a {}",
        steps.len(),
        program.display(),
        config.model.description()
    );

    let mut device = TapeDevice::from_config(&config)?;
    if let Some(media) = device.media() {
        println!("Mounted {} ({})", media.path().display(), media.format().description());
    } else {
        println!("No tape mounted");
    }

    let mut seq = 0u32;
    let mut chained = false;
    let mut prev_opcode = 0u8;

    for (index, step) in steps.iter().enumerate() {
        let data = step.payload()?;
        let flags = CcwFlags::from_bits_truncate(step.flags);
        let count = step.count.unwrap_or(u16::try_from(data.len()).unwrap_or(u16::MAX));

        let mut iobuf = data;
        if iobuf.len() < count as usize {
            iobuf.resize(count as usize, 0);
        }

        let req = CcwRequest {
            opcode: step.opcode,
            flags,
            chained,
            count,
            prev_opcode,
            seq,
        };
        debug!("Step {}: {:?}", index, req);
        let outcome = device.execute(&req, &mut iobuf);

        println!(
            "{:>3}: opcode 0x{:02X} count {:>5}  status {:<16} residual {:>5}{}",
            index,
            step.opcode,
            count,
            status_names(outcome.status),
            outcome.residual,
            if outcome.more { "  (more data)" } else { "" }
        );
        if outcome.status.contains(UnitStatus::UC) {
            println!("     sense {}", hex::encode_upper(&outcome.sense));
        }
        if dump && !is_output(step.opcode) {
            let transferred = (count - outcome.residual) as usize;
            if transferred > 0 {
                println!("     data  {}", hex::encode_upper(&iobuf[..transferred.min(iobuf.len())]));
            }
        }

        let chain_ends = !flags.intersects(CcwFlags::CC | CcwFlags::CD) || outcome.status.contains(UnitStatus::UC);
        chained = flags.contains(CcwFlags::CD) && !chain_ends;
        prev_opcode = step.opcode;
        seq = if chain_ends { 0 } else { seq + 1 };
    }
    Ok(())
}

/// Write and control opcodes carry data to the drive.
fn is_output(opcode: u8) -> bool {
    opcode & 0x01 == 0x01 && opcode != opcodes::NOP
}

fn status_names(status: UnitStatus) -> String {
    if status.is_empty() {
        return "-".to_string();
    }
    status
        .iter_names()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join(" ")
}
