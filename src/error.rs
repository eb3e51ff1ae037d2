use thiserror::Error;

pub type Result<T> = std::result::Result<T, RustVtapeError>;

/// Result of a single media handler operation.
pub type MediaResult<T> = std::result::Result<T, ErrorKind>;

/// Host-level failures: mounting, configuration and description files.
#[derive(Error, Debug)]
pub enum RustVtapeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media error: {0}")]
    Media(#[from] ErrorKind),

    #[error("Tape description file error: {0}")]
    DescriptionFile(String),

    #[error("Unsupported tape image format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Parameter validation error: {0}")]
    ParameterValidation(String),
}

impl RustVtapeError {
    pub fn description_file<T: Into<String>>(msg: T) -> Self {
        Self::DescriptionFile(msg.into())
    }

    pub fn unsupported_format<T: Into<String>>(msg: T) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }

    pub fn parse<T: Into<String>>(msg: T) -> Self {
        Self::Parse(msg.into())
    }

    pub fn parameter_validation<T: Into<String>>(msg: T) -> Self {
        Self::ParameterValidation(msg.into())
    }
}

/// Channel-level conditions produced by media handlers and the command
/// processor, translated into unit status and sense bytes by the sense builder.
///
/// The discriminants index the per-family sense tables; keep them dense.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    #[error("no tape loaded")]
    TapeUnloaded = 0,
    #[error("tape load failed")]
    TapeLoadFail = 1,
    #[error("read failed (data check)")]
    ReadFail = 2,
    #[error("write failed")]
    WriteFail = 3,
    #[error("command rejected")]
    BadCommand = 4,
    #[error("incompatible media")]
    Incompatible = 5,
    #[error("tape is write protected")]
    WriteProtect = 6,
    #[error("tape is empty (no data written)")]
    EmptyTape = 7,
    #[error("end of tape reached")]
    EndOfTape = 8,
    #[error("already at load point")]
    LoadPointError = 9,
    #[error("volume fenced")]
    Fenced = 10,
    #[error("unsupported recording algorithm")]
    BadAlgorithm = 11,
    #[error("rewind unload completed")]
    UnloadSuccess = 12,
    #[error("normal completion")]
    StatusOnly = 13,
    #[error("positioning error")]
    LocateError = 14,
    #[error("tapemark read")]
    ReadTapemark = 15,
    #[error("block shorter than its header claims")]
    BlockShort = 16,
    #[error("interface error")]
    InterfaceError = 17,
    #[error("rewind failed")]
    RewindFailed = 18,
    #[error("unsolicited sense")]
    Unsolicited = 19,
}

impl ErrorKind {
    pub const COUNT: usize = 20;

    /// All kinds in discriminant order.
    pub const ALL: [ErrorKind; ErrorKind::COUNT] = [
        ErrorKind::TapeUnloaded,
        ErrorKind::TapeLoadFail,
        ErrorKind::ReadFail,
        ErrorKind::WriteFail,
        ErrorKind::BadCommand,
        ErrorKind::Incompatible,
        ErrorKind::WriteProtect,
        ErrorKind::EmptyTape,
        ErrorKind::EndOfTape,
        ErrorKind::LoadPointError,
        ErrorKind::Fenced,
        ErrorKind::BadAlgorithm,
        ErrorKind::UnloadSuccess,
        ErrorKind::StatusOnly,
        ErrorKind::LocateError,
        ErrorKind::ReadTapemark,
        ErrorKind::BlockShort,
        ErrorKind::InterfaceError,
        ErrorKind::RewindFailed,
        ErrorKind::Unsolicited,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Corruption and format errors are surfaced and never repaired.
    pub fn is_corruption(self) -> bool {
        matches!(self, ErrorKind::ReadFail | ErrorKind::BlockShort)
    }

    /// Errors after which the tape position can no longer be trusted.
    pub fn fences_volume(self) -> bool {
        matches!(self, ErrorKind::LocateError | ErrorKind::RewindFailed)
    }
}
