//! Unit Status and Sense Building
//!
//! Translates the outcome of a channel command into unit status bits and
//! the device family's sense byte layout. One generic builder is driven by
//! the per-family tables in [`tables`].

use bitflags::bitflags;
use tracing::debug;

use crate::channel::constants::{is_write_class, opcodes};
use crate::channel::types::DeviceFamily;
use crate::error::ErrorKind;

pub mod tables;

pub use tables::{FamilyTable, SenseEntry};

bitflags! {
    /// Unit status byte presented to the channel.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct UnitStatus: u8 {
        const ATTN = 0x80; // attention
        const SM   = 0x40; // status modifier
        const CUE  = 0x20; // control unit end
        const BUSY = 0x10;
        const CE   = 0x08; // channel end
        const DE   = 0x04; // device end
        const UC   = 0x02; // unit check
        const UX   = 0x01; // unit exception
    }
}

bitflags! {
    /// Sense byte 0.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct SenseByte0: u8 {
        const CR  = 0x80; // command reject
        const IR  = 0x40; // intervention required
        const BOC = 0x20; // bus out check
        const EC  = 0x10; // equipment check
        const DC  = 0x08; // data check
        const OR  = 0x04; // overrun
    }
}

bitflags! {
    /// Sense byte 1, recomputed from the drive state on every build.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct SenseByte1: u8 {
        const TUA    = 0x40; // tape unit ready
        const TUB    = 0x20; // tape unit not ready
        const LOADPT = 0x08; // at load point
        const FP     = 0x02; // file protected
    }
}

/// Drive state the builder needs besides the condition itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenseContext {
    pub loaded: bool,
    pub at_load_point: bool,
    pub read_only: bool,
    pub passed_eot: bool,
    /// Present device end with intervention-required conditions.
    pub deonirq: bool,
}

impl DeviceFamily {
    pub fn sense_table(&self) -> &'static FamilyTable {
        match self {
            DeviceFamily::Simple => &tables::SIMPLE,
            DeviceFamily::Full => &tables::FULL,
            DeviceFamily::Streaming => &tables::STREAMING,
        }
    }
}

/// Build the unit status for `kind` and update `sense` in place.
///
/// `StatusOnly` leaves the previous sense contents alone apart from the
/// byte 1 indicators; every other kind rebuilds the buffer from scratch.
pub fn build(
    kind: ErrorKind,
    family: DeviceFamily,
    opcode: u8,
    ctx: &SenseContext,
    sense: &mut Vec<u8>,
) -> UnitStatus {
    let table = family.sense_table();

    if kind == ErrorKind::StatusOnly {
        let mut status = table.entries[kind.index()].status;
        if is_write_class(opcode) && ctx.passed_eot {
            status |= UnitStatus::UX;
        }
        if sense.len() < table.sense_len {
            sense.resize(table.sense_len, 0);
        }
        refresh_indicators(sense, ctx);
        return status;
    }

    let entry = table.entries[kind.index()];
    sense.clear();
    sense.resize(table.sense_len, 0);
    sense[0] = entry.byte0.bits();
    if let Some(offset) = table.code_offset {
        sense[offset] = entry.code;
    }
    if let Some((offset, value)) = table.format_byte {
        sense[offset] = value;
    }
    if kind == ErrorKind::EndOfTape {
        if let Some((offset, bit)) = table.eot_indicator {
            sense[offset] |= bit;
        }
    }
    refresh_indicators(sense, ctx);

    let status = if kind == ErrorKind::TapeUnloaded {
        unloaded_status(opcode, ctx.deonirq)
    } else {
        entry.status
    };
    debug!(
        "Sense for {:?} (opcode 0x{:02X}): status {:?}, bytes {}",
        kind,
        opcode,
        status,
        hex::encode_upper(&sense[..4])
    );
    status
}

/// Status for a command issued with no tape mounted.
fn unloaded_status(opcode: u8, deonirq: bool) -> UnitStatus {
    match opcode {
        opcodes::READ_FORWARD | opcodes::WRITE | opcodes::READ_BACKWARD => {
            let status = UnitStatus::CE | UnitStatus::UC;
            if deonirq {
                status | UnitStatus::DE
            } else {
                status
            }
        }
        opcodes::NOP => UnitStatus::UC,
        opcodes::REWIND_UNLOAD => UnitStatus::CE | UnitStatus::UC | UnitStatus::DE | UnitStatus::CUE,
        _ => UnitStatus::CE | UnitStatus::UC | UnitStatus::DE,
    }
}

fn refresh_indicators(sense: &mut [u8], ctx: &SenseContext) {
    let Some(byte1) = sense.get_mut(1) else {
        return;
    };
    let mut flags = SenseByte1::from_bits_retain(*byte1);
    flags.remove(SenseByte1::all());
    if ctx.loaded {
        flags |= SenseByte1::TUA;
        flags.set(SenseByte1::LOADPT, ctx.at_load_point);
        flags.set(SenseByte1::FP, ctx.read_only);
    } else {
        flags |= SenseByte1::TUB;
    }
    *byte1 = flags.bits();
}
