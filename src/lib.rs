//! RustVtape Library
//!
//! Emulation of channel-attached magnetic tape drives backed by tape image
//! files (AWS, FakeTape and read-only OMA volumes).

pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod sense;

#[cfg(test)]
mod tests;

// Re-export key types for easier use
pub use channel::{CcwFlags, CcwOutcome, CcwRequest, DeviceFamily, DeviceModel, TapeDevice};
pub use config::DeviceConfig;
pub use error::{ErrorKind, MediaResult, Result, RustVtapeError};
pub use media::{open_media, MediaHandler, MediaParameters, TapeFormat, TapePosition};
pub use sense::UnitStatus;
