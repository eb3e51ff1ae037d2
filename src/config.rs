//! Device Configuration
//!
//! JSON description of one emulated drive:
//!
//! ```json
//! {
//!   "model": "3490",
//!   "image": "/tapes/vol001.aws",
//!   "media": { "max_size": 104857600, "eot_margin": 1048576 },
//!   "deonirq": false
//! }
//! ```

use crate::channel::types::DeviceModel;
use crate::error::{Result, RustVtapeError};
use crate::media::MediaParameters;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub model: DeviceModel,
    /// Image to mount at start-up; absent or `*` leaves the drive empty.
    #[serde(default)]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub media: MediaParameters,
    /// Present device end with intervention required on read and write.
    #[serde(default)]
    pub deonirq: bool,
}

impl DeviceConfig {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            model,
            image: None,
            media: MediaParameters::default(),
            deonirq: false,
        }
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RustVtapeError::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        debug!("Loaded device configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| RustVtapeError::config(format!("Failed to parse device configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let media = &self.media;
        if media.max_size > 0 && media.eot_margin >= media.max_size {
            return Err(RustVtapeError::parameter_validation(format!(
                "eot_margin {} must be smaller than max_size {}",
                media.eot_margin, media.max_size
            )));
        }
        Ok(())
    }
}
