//! Detect Command Handler
//!
//! Handles the `detect` subcommand: report how an image would be mounted.

use crate::error::Result;
use crate::media::{detect_format, TapeDescription, TapeFormat};
use std::path::PathBuf;
use tracing::info;

pub fn execute(image: PathBuf) -> Result<()> {
    let format = detect_format(&image);
    info!("Detected {:?} for {}", format, image.display());

    println!("Image:  {}", image.display());
    println!("Format: {}", format.description());

    if format == TapeFormat::Oma {
        let description = TapeDescription::load(&image)?;
        for (index, entry) in description.entries().iter().enumerate() {
            println!("  file {:>3}: {:?} {}", index + 1, entry.format, entry.path.display());
        }
    }
    Ok(())
}
