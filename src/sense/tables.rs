//! Per-family sense tables, indexed by `ErrorKind` discriminant.

use super::{SenseByte0, UnitStatus};
use crate::error::ErrorKind;

/// Status and sense contents for one condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseEntry {
    pub status: UnitStatus,
    pub byte0: SenseByte0,
    /// Error recovery action (or family equivalent); ignored by families
    /// without a code byte.
    pub code: u8,
}

/// Layout of one family's sense buffer.
#[derive(Debug)]
pub struct FamilyTable {
    pub sense_len: usize,
    pub code_offset: Option<usize>,
    pub format_byte: Option<(usize, u8)>,
    /// Byte and bit raised for end of tape.
    pub eot_indicator: Option<(usize, u8)>,
    pub entries: [SenseEntry; ErrorKind::COUNT],
}

const fn entry(status: UnitStatus, byte0: SenseByte0, code: u8) -> SenseEntry {
    SenseEntry { status, byte0, code }
}

const CHECK: UnitStatus = UnitStatus::CE.union(UnitStatus::DE).union(UnitStatus::UC);
const NORMAL: UnitStatus = UnitStatus::CE.union(UnitStatus::DE);
const TAPEMARK: UnitStatus = NORMAL.union(UnitStatus::UX);
const NONE: SenseByte0 = SenseByte0::empty();

// Error recovery action codes
const ERA_PATH_EQUIPMENT_CHECK: u8 = 0x22;
const ERA_READ_DATA_CHECK: u8 = 0x23;
const ERA_WRITE_DATA_CHECK: u8 = 0x25;
const ERA_COMMAND_REJECT: u8 = 0x27;
const ERA_FUNCTION_INCOMPATIBLE: u8 = 0x29;
const ERA_UNSOLICITED_ENVIRONMENTAL: u8 = 0x2A;
const ERA_PERMANENT_EQUIPMENT_CHECK: u8 = 0x2C;
const ERA_WRITE_PROTECTED: u8 = 0x30;
const ERA_TAPE_VOID: u8 = 0x31;
const ERA_LOAD_FAILURE: u8 = 0x33;
const ERA_END_OF_DATA: u8 = 0x36;
const ERA_PHYSICAL_END_OF_TAPE: u8 = 0x38;
const ERA_BACKWARD_AT_BOT: u8 = 0x39;
const ERA_INTERVENTION_REQUIRED: u8 = 0x43;
const ERA_LOCATE_FAILURE: u8 = 0x44;
const ERA_VOLUME_FENCED: u8 = 0x47;
const ERA_FORMAT_INCOMPATIBLE: u8 = 0x5E;

/// 3480, 3490 and 3590: 32 bytes, ERA in byte 3, format 0x20 in byte 7.
pub static FULL: FamilyTable = FamilyTable {
    sense_len: 32,
    code_offset: Some(3),
    format_byte: Some((7, 0x20)),
    eot_indicator: None,
    entries: [
        entry(CHECK, SenseByte0::IR, ERA_INTERVENTION_REQUIRED),                      // TapeUnloaded
        entry(CHECK, SenseByte0::IR, ERA_LOAD_FAILURE),                               // TapeLoadFail
        entry(CHECK, SenseByte0::DC, ERA_READ_DATA_CHECK),                            // ReadFail
        entry(CHECK, SenseByte0::DC, ERA_WRITE_DATA_CHECK),                           // WriteFail
        entry(CHECK, SenseByte0::CR, ERA_COMMAND_REJECT),                             // BadCommand
        entry(CHECK, SenseByte0::CR, ERA_FUNCTION_INCOMPATIBLE),                      // Incompatible
        entry(CHECK, SenseByte0::CR, ERA_WRITE_PROTECTED),                            // WriteProtect
        entry(CHECK, SenseByte0::DC, ERA_TAPE_VOID),                                  // EmptyTape
        entry(CHECK, SenseByte0::EC, ERA_PHYSICAL_END_OF_TAPE),                       // EndOfTape
        entry(CHECK, NONE, ERA_BACKWARD_AT_BOT),                                      // LoadPointError
        entry(CHECK, SenseByte0::EC, ERA_VOLUME_FENCED),                              // Fenced
        entry(CHECK, SenseByte0::CR, ERA_FORMAT_INCOMPATIBLE),                        // BadAlgorithm
        entry(NORMAL, NONE, 0),                                                       // UnloadSuccess
        entry(NORMAL, NONE, 0),                                                       // StatusOnly
        entry(CHECK, SenseByte0::EC, ERA_LOCATE_FAILURE),                             // LocateError
        entry(TAPEMARK, NONE, 0),                                                     // ReadTapemark
        entry(CHECK, SenseByte0::DC, ERA_END_OF_DATA),                                // BlockShort
        entry(CHECK, SenseByte0::EC, ERA_PATH_EQUIPMENT_CHECK),                       // InterfaceError
        entry(CHECK, SenseByte0::EC, ERA_PERMANENT_EQUIPMENT_CHECK),                  // RewindFailed
        entry(NORMAL, NONE, ERA_UNSOLICITED_ENVIRONMENTAL),                           // Unsolicited
    ],
};

/// 3410, 3420, 3422 and 3430: 24 bytes, end of tape flagged in byte 4.
pub static SIMPLE: FamilyTable = FamilyTable {
    sense_len: 24,
    code_offset: None,
    format_byte: None,
    eot_indicator: Some((4, 0x20)),
    entries: [
        entry(CHECK, SenseByte0::IR, 0),                                             // TapeUnloaded
        entry(CHECK, SenseByte0::IR, 0),                                             // TapeLoadFail
        entry(CHECK, SenseByte0::DC, 0),                                             // ReadFail
        entry(CHECK, SenseByte0::DC, 0),                                             // WriteFail
        entry(CHECK, SenseByte0::CR, 0),                                             // BadCommand
        entry(CHECK, SenseByte0::CR, 0),                                             // Incompatible
        entry(CHECK, SenseByte0::CR, 0),                                             // WriteProtect
        entry(CHECK, SenseByte0::DC, 0),                                             // EmptyTape
        entry(CHECK, SenseByte0::EC, 0),                                             // EndOfTape
        entry(CHECK, NONE, 0),                                                       // LoadPointError
        entry(CHECK, SenseByte0::EC, 0),                                             // Fenced
        entry(CHECK, SenseByte0::CR, 0),                                             // BadAlgorithm
        entry(NORMAL, NONE, 0),                                                      // UnloadSuccess
        entry(NORMAL, NONE, 0),                                                      // StatusOnly
        entry(CHECK, SenseByte0::EC, 0),                                             // LocateError
        entry(TAPEMARK, NONE, 0),                                                    // ReadTapemark
        entry(CHECK, SenseByte0::DC, 0),                                             // BlockShort
        entry(CHECK, SenseByte0::BOC, 0),                                            // InterfaceError
        entry(CHECK, SenseByte0::EC, 0),                                             // RewindFailed
        entry(NORMAL, NONE, 0),                                                      // Unsolicited
    ],
};

/// 8809, 9347 and 9348: 32 bytes with a code byte, no volume fencing or
/// compaction, both of which report as command reject.
pub static STREAMING: FamilyTable = FamilyTable {
    sense_len: 32,
    code_offset: Some(3),
    format_byte: None,
    eot_indicator: Some((4, 0x20)),
    entries: [
        entry(CHECK, SenseByte0::IR, ERA_INTERVENTION_REQUIRED),                     // TapeUnloaded
        entry(CHECK, SenseByte0::IR, ERA_LOAD_FAILURE),                              // TapeLoadFail
        entry(CHECK, SenseByte0::DC, ERA_READ_DATA_CHECK),                           // ReadFail
        entry(CHECK, SenseByte0::DC, ERA_WRITE_DATA_CHECK),                          // WriteFail
        entry(CHECK, SenseByte0::CR, ERA_COMMAND_REJECT),                            // BadCommand
        entry(CHECK, SenseByte0::CR, ERA_COMMAND_REJECT),                            // Incompatible
        entry(CHECK, SenseByte0::CR, ERA_WRITE_PROTECTED),                           // WriteProtect
        entry(CHECK, SenseByte0::DC, ERA_TAPE_VOID),                                 // EmptyTape
        entry(CHECK, SenseByte0::EC, ERA_PHYSICAL_END_OF_TAPE),                      // EndOfTape
        entry(CHECK, NONE, ERA_BACKWARD_AT_BOT),                                     // LoadPointError
        entry(CHECK, SenseByte0::CR, ERA_COMMAND_REJECT),                            // Fenced
        entry(CHECK, SenseByte0::CR, ERA_COMMAND_REJECT),                            // BadAlgorithm
        entry(NORMAL, NONE, 0),                                                      // UnloadSuccess
        entry(NORMAL, NONE, 0),                                                      // StatusOnly
        entry(CHECK, SenseByte0::EC, ERA_LOCATE_FAILURE),                            // LocateError
        entry(TAPEMARK, NONE, 0),                                                    // ReadTapemark
        entry(CHECK, SenseByte0::DC, ERA_END_OF_DATA),                               // BlockShort
        entry(CHECK, SenseByte0::EC, ERA_PATH_EQUIPMENT_CHECK),                      // InterfaceError
        entry(CHECK, SenseByte0::EC, ERA_PERMANENT_EQUIPMENT_CHECK),                 // RewindFailed
        entry(NORMAL, NONE, 0),                                                      // Unsolicited
    ],
};
