// Channel command constants for the emulated tape control units

/// Opcodes accepted by at least one device family.
pub mod opcodes {
    pub const WRITE: u8 = 0x01;
    pub const READ_FORWARD: u8 = 0x02;
    pub const NOP: u8 = 0x03;
    pub const SENSE: u8 = 0x04;
    pub const REWIND: u8 = 0x07;
    pub const READ_BACKWARD: u8 = 0x0C;
    pub const REWIND_UNLOAD: u8 = 0x0F;
    pub const ERASE_GAP: u8 = 0x17;
    pub const WRITE_TAPEMARK: u8 = 0x1F;
    pub const READ_BLOCK_ID: u8 = 0x22;
    pub const SUSPEND_MULTIPATH: u8 = 0x23;
    pub const BACKSPACE_BLOCK: u8 = 0x27;
    pub const BACKSPACE_FILE: u8 = 0x2F;
    pub const SENSE_PATH_GROUP_ID: u8 = 0x34;
    pub const FORWARD_SPACE_BLOCK: u8 = 0x37;
    pub const READ_SUBSYSTEM_DATA: u8 = 0x3E;
    pub const FORWARD_SPACE_FILE: u8 = 0x3F;
    pub const SYNCHRONIZE: u8 = 0x43;
    pub const LOCATE_BLOCK: u8 = 0x4F;
    pub const READ_DEVICE_CHARACTERISTICS: u8 = 0x64;
    pub const PERFORM_SUBSYSTEM_FUNCTION: u8 = 0x77;
    pub const SET_DIAGNOSE: u8 = 0x87;
    pub const DATA_SECURITY_ERASE: u8 = 0x97;
    pub const LOAD_DISPLAY: u8 = 0x9F;
    pub const READ_BUFFERED_LOG: u8 = 0xA4;
    pub const SET_PATH_GROUP_ID: u8 = 0xAF;
    pub const ASSIGN: u8 = 0xB7;
    pub const MODE_SET_800: u8 = 0xC3;
    pub const UNASSIGN: u8 = 0xC7;
    pub const MODE_SET_1600: u8 = 0xCB;
    pub const MODE_SET_6250: u8 = 0xD3;
    /// Density mode set on reel drives, general mode set on cartridge drives.
    pub const MODE_SET: u8 = 0xDB;
    pub const SENSE_ID: u8 = 0xE4;
}

// Mode set byte 0
pub const MSET_WRITE_IMMED: u8 = 0x20;
pub const MSET_SUPVR_INHIBIT: u8 = 0x10;

/// Perform subsystem function orders.
pub mod psf_orders {
    pub const PREPARE_FOR_READ_SUBSYSTEM_DATA: u8 = 0x18;
    pub const FORCED_ERROR_LOGGING: u8 = 0x80;
    pub const FORCED_ERROR_LOGGING_DATA: u8 = 0x81;
    pub const RESET_VOLUME_FENCED: u8 = 0x9C;
}

// Fixed transfer lengths
pub const BLOCK_ID_LEN: usize = 8;
pub const PATH_GROUP_ID_LEN: usize = 11;
pub const DEVICE_CHARACTERISTICS_LEN: usize = 64;
pub const BUFFERED_LOG_LEN: usize = 64;
pub const SUBSYSTEM_DATA_LEN: usize = 32;
pub const SENSE_ID_LEN: usize = 7;

// Path state byte of Sense Path Group ID
pub const PATH_GROUPED: u8 = 0x80;

/// Opcodes that write to the volume; a successful completion reports the
/// early end-of-tape warning as unit exception.
pub fn is_write_class(opcode: u8) -> bool {
    matches!(opcode, opcodes::WRITE | opcodes::ERASE_GAP | opcodes::WRITE_TAPEMARK)
}

/// Opcodes refused while supervisor inhibit is set for the chain.
pub fn is_supervisor_only(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::DATA_SECURITY_ERASE
            | opcodes::LOAD_DISPLAY
            | opcodes::SET_DIAGNOSE
            | opcodes::PERFORM_SUBSYSTEM_FUNCTION
            | opcodes::MODE_SET
    )
}
