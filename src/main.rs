use rust_vtape::cli::{Cli, Commands};
use rust_vtape::error::Result;
use rust_vtape::{commands, logger};
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let args = Cli::parse_args();

    // Initialize logging system
    logger::init(args.verbose)?;

    debug!("rustvtape starting");

    match run(args) {
        Ok(_) => {
            info!("Operation completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: Cli) -> Result<()> {
    match args.command {
        Commands::Exec {
            program,
            image,
            model,
            dump,
        } => commands::exec::execute(args.config, program, image, model, dump),

        Commands::Detect { image } => commands::detect::execute(image),
    }
}
