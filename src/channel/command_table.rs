//! Opcode validity per device family.

use std::collections::BTreeMap;

use super::constants::opcodes::*;
use super::types::{DeviceFamily, DeviceModel, Disposition};

use Disposition::{
    NoOpImmediateSuccess as NOOP, NoOpUnlessPhysicalDevice as PHYS, RequiresTapeLoaded as LOADED,
    RequiresTapeLoadedPlusDeviceEnd as LOADED_DE, TapeLoadOptional as OPT, Unsupported as NO,
};

/// Rows of `(opcode, [simple, full, streaming])`. Opcodes not listed are
/// unsupported everywhere.
#[rustfmt::skip]
const ROWS: &[(u8, [Disposition; 3])] = &[
    (WRITE,                       [LOADED, LOADED,    LOADED]),
    (READ_FORWARD,                [LOADED, LOADED,    LOADED]),
    (NOP,                         [NOOP,   LOADED,    NOOP]),
    (SENSE,                       [OPT,    OPT,       OPT]),
    (REWIND,                      [LOADED, LOADED_DE, LOADED]),
    (READ_BACKWARD,               [LOADED, LOADED,    LOADED]),
    (REWIND_UNLOAD,               [LOADED, LOADED,    LOADED]),
    (ERASE_GAP,                   [PHYS,   LOADED,    PHYS]),
    (WRITE_TAPEMARK,              [LOADED, LOADED,    LOADED]),
    (READ_BLOCK_ID,               [NO,     LOADED,    NO]),
    (SUSPEND_MULTIPATH,           [NO,     NOOP,      NO]),
    (BACKSPACE_BLOCK,             [LOADED, LOADED,    LOADED]),
    (BACKSPACE_FILE,              [LOADED, LOADED,    LOADED]),
    (SENSE_PATH_GROUP_ID,         [NO,     OPT,       NO]),
    (FORWARD_SPACE_BLOCK,         [LOADED, LOADED,    LOADED]),
    (READ_SUBSYSTEM_DATA,         [NO,     OPT,       NO]),
    (FORWARD_SPACE_FILE,          [LOADED, LOADED,    LOADED]),
    (SYNCHRONIZE,                 [NO,     LOADED,    LOADED]),
    (LOCATE_BLOCK,                [NO,     LOADED,    NO]),
    (READ_DEVICE_CHARACTERISTICS, [NO,     OPT,       OPT]),
    (PERFORM_SUBSYSTEM_FUNCTION,  [NO,     OPT,       NO]),
    (SET_DIAGNOSE,                [NO,     NOOP,      NO]),
    (DATA_SECURITY_ERASE,         [LOADED, LOADED,    LOADED]),
    (LOAD_DISPLAY,                [NO,     PHYS,      PHYS]),
    (READ_BUFFERED_LOG,           [NO,     OPT,       OPT]),
    (SET_PATH_GROUP_ID,           [NO,     OPT,       NO]),
    (ASSIGN,                      [NO,     OPT,       NO]),
    (MODE_SET_800,                [NOOP,   NO,        NO]),
    (UNASSIGN,                    [NO,     OPT,       NO]),
    (MODE_SET_1600,               [NOOP,   NO,        NO]),
    (MODE_SET_6250,               [NOOP,   NO,        NO]),
    (MODE_SET,                    [NOOP,   OPT,       NOOP]),
    (SENSE_ID,                    [NO,     OPT,       OPT]),
];

/// Dispositions of one device, built once when the device is created.
#[derive(Debug, Clone)]
pub struct CommandTable {
    model: DeviceModel,
    entries: BTreeMap<u8, Disposition>,
}

impl CommandTable {
    pub fn new(model: DeviceModel) -> Self {
        let column = match model.family() {
            DeviceFamily::Simple => 0,
            DeviceFamily::Full => 1,
            DeviceFamily::Streaming => 2,
        };
        let entries = ROWS
            .iter()
            .filter(|(_, dispositions)| dispositions[column] != NO)
            .map(|(opcode, dispositions)| (*opcode, dispositions[column]))
            .collect();
        Self { model, entries }
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn lookup(&self, opcode: u8) -> Disposition {
        self.entries.get(&opcode).copied().unwrap_or(NO)
    }

    /// Supported opcodes in ascending order.
    pub fn supported(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries.keys().copied()
    }
}
