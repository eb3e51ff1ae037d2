use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::sense::UnitStatus;

/// Emulated drive models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceModel {
    #[serde(rename = "3410")]
    Ibm3410,
    #[serde(rename = "3420")]
    Ibm3420,
    #[serde(rename = "3422")]
    Ibm3422,
    #[serde(rename = "3430")]
    Ibm3430,
    #[serde(rename = "3480")]
    Ibm3480,
    #[serde(rename = "3490")]
    Ibm3490,
    #[serde(rename = "3590")]
    Ibm3590,
    #[serde(rename = "8809")]
    Ibm8809,
    #[serde(rename = "9347")]
    Ibm9347,
    #[serde(rename = "9348")]
    Ibm9348,
}

/// Sense and command-set family shared by several models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Reel drives with 24 sense bytes and no recovery codes.
    Simple,
    /// Cartridge drives reporting an error recovery action code.
    Full,
    /// Streaming drives.
    Streaming,
}

impl DeviceModel {
    pub const ALL: [DeviceModel; 10] = [
        DeviceModel::Ibm3410,
        DeviceModel::Ibm3420,
        DeviceModel::Ibm3422,
        DeviceModel::Ibm3430,
        DeviceModel::Ibm3480,
        DeviceModel::Ibm3490,
        DeviceModel::Ibm3590,
        DeviceModel::Ibm8809,
        DeviceModel::Ibm9347,
        DeviceModel::Ibm9348,
    ];

    pub fn family(&self) -> DeviceFamily {
        match self {
            DeviceModel::Ibm3410 | DeviceModel::Ibm3420 | DeviceModel::Ibm3422 | DeviceModel::Ibm3430 => {
                DeviceFamily::Simple
            }
            DeviceModel::Ibm3480 | DeviceModel::Ibm3490 | DeviceModel::Ibm3590 => DeviceFamily::Full,
            DeviceModel::Ibm8809 | DeviceModel::Ibm9347 | DeviceModel::Ibm9348 => DeviceFamily::Streaming,
        }
    }

    /// Device type as reported by Sense ID, e.g. `0x3480`.
    pub fn type_number(&self) -> u16 {
        match self {
            DeviceModel::Ibm3410 => 0x3410,
            DeviceModel::Ibm3420 => 0x3420,
            DeviceModel::Ibm3422 => 0x3422,
            DeviceModel::Ibm3430 => 0x3430,
            DeviceModel::Ibm3480 => 0x3480,
            DeviceModel::Ibm3490 => 0x3490,
            DeviceModel::Ibm3590 => 0x3590,
            DeviceModel::Ibm8809 => 0x8809,
            DeviceModel::Ibm9347 => 0x9347,
            DeviceModel::Ibm9348 => 0x9348,
        }
    }

    pub fn model_number(&self) -> u8 {
        match self {
            DeviceModel::Ibm3480 => 0x31,
            DeviceModel::Ibm3490 => 0x50,
            DeviceModel::Ibm3590 => 0x11,
            _ => 0x01,
        }
    }

    /// Mask applied to block ids exchanged with the channel.
    pub fn block_id_mask(&self) -> u32 {
        match self {
            DeviceModel::Ibm3480 | DeviceModel::Ibm3490 => 0x003F_FFFF,
            _ => 0xFFFF_FFFF,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceModel::Ibm3410 => "3410 magnetic tape unit",
            DeviceModel::Ibm3420 => "3420 magnetic tape unit",
            DeviceModel::Ibm3422 => "3422 magnetic tape subsystem",
            DeviceModel::Ibm3430 => "3430 magnetic tape subsystem",
            DeviceModel::Ibm3480 => "3480 cartridge tape subsystem",
            DeviceModel::Ibm3490 => "3490 cartridge tape subsystem",
            DeviceModel::Ibm3590 => "3590 high performance tape subsystem",
            DeviceModel::Ibm8809 => "8809 streaming tape unit",
            DeviceModel::Ibm9347 => "9347 streaming tape unit",
            DeviceModel::Ibm9348 => "9348 streaming tape unit",
        }
    }
}

impl std::str::FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = u16::from_str_radix(s.trim(), 16).map_err(|_| format!("invalid device type '{}'", s))?;
        DeviceModel::ALL
            .into_iter()
            .find(|m| m.type_number() == number)
            .ok_or_else(|| format!("unsupported device type '{}'", s))
    }
}

/// How the command table treats one opcode for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Unsupported,
    RequiresTapeLoaded,
    TapeLoadOptional,
    NoOpImmediateSuccess,
    /// No-op on emulated media; executed when the backend is a real drive.
    NoOpUnlessPhysicalDevice,
    /// Like `RequiresTapeLoaded`, adding device end when no tape is loaded.
    RequiresTapeLoadedPlusDeviceEnd,
}

impl Disposition {
    pub fn requires_tape(&self) -> bool {
        matches!(
            self,
            Disposition::RequiresTapeLoaded | Disposition::RequiresTapeLoadedPlusDeviceEnd
        )
    }
}

bitflags! {
    /// CCW flag byte.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    #[rustfmt::skip]
    pub struct CcwFlags: u8 {
        const CD   = 0x80; // chain data
        const CC   = 0x40; // chain command
        const SLI  = 0x20; // suppress length indication
        const SKIP = 0x10;
    }
}

/// One channel command as handed over by the channel program interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcwRequest {
    pub opcode: u8,
    pub flags: CcwFlags,
    /// This CCW continues the data of the previous one.
    pub chained: bool,
    pub count: u16,
    pub prev_opcode: u8,
    /// Position of the CCW in its chain; 0 starts a new chain.
    pub seq: u32,
}

impl CcwRequest {
    pub fn new(opcode: u8, count: u16) -> Self {
        Self {
            opcode,
            flags: CcwFlags::empty(),
            chained: false,
            count,
            prev_opcode: 0,
            seq: 0,
        }
    }
}

/// Completion of one CCW.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CcwOutcome {
    pub status: UnitStatus,
    pub sense: Vec<u8>,
    /// Bytes of `count` not transferred.
    pub residual: u16,
    /// The record had more data than `count` allowed.
    pub more: bool,
}

/// Modes that live for the duration of one command chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainState {
    pub supervisor_inhibit: bool,
    pub write_immediate: bool,
    /// Subsystem data prepared for the next CCW only.
    pub staged: Option<Vec<u8>>,
}

impl ChainState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
