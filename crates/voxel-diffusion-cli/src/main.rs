//! Voxel Diffusion CLI Entry Point

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voxel_diffusion_cli::{run, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run::execute(args)?,
        Commands::Schedule(args) => run::print_schedule(args)?,
        Commands::InitConfig(args) => run::init_config(args)?,
        Commands::Version => {
            println!("voxel-diffusion {}", env!("CARGO_PKG_VERSION"));
            println!("library version: {}", voxel_diffusion::VERSION);
        }
    }

    Ok(())
}
