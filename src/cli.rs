use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::channel::DeviceModel;

#[derive(Parser)]
#[command(name = "rustvtape")]
#[command(about = "Virtual tape drive: run channel programs against tape images")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Device configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a channel program (JSON list of CCWs) against a drive
    Exec {
        /// Channel program file
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,

        /// Image to mount, overriding the configuration
        #[arg(short, long, value_name = "IMAGE")]
        image: Option<PathBuf>,

        /// Device type when no configuration file is given
        #[arg(short, long, default_value = "3490")]
        model: DeviceModel,

        /// Print data transferred by read-type commands
        #[arg(short, long)]
        dump: bool,
    },

    /// Show the format an image would be mounted as
    Detect {
        /// Tape image or description file
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
