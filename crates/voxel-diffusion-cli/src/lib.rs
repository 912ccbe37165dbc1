//! Voxel Diffusion CLI
//!
//! Command-line driver for the voxel diffusion worker. It plays the part of a
//! host application: it conditions a chunk, starts a run and polls progress,
//! capturing a snapshot whenever the timestep drops.
//!
//! # Usage
//!
//! ```bash
//! # Run the mock engine over a short schedule
//! voxel-diffusion run --timesteps 50 --floor-label 1
//!
//! # Run the exported model (requires the `onnx` feature)
//! voxel-diffusion run --engine onnx --config diffusion.json
//!
//! # Inspect the noise schedule
//! voxel-diffusion schedule --every 100
//!
//! # Write a default config file
//! voxel-diffusion init-config diffusion.json
//! ```

use clap::{Parser, Subcommand};

pub mod run;

/// Voxel Diffusion Command Line Interface
#[derive(Parser, Debug)]
#[command(name = "voxel-diffusion")]
#[command(author, version, about = "Background denoising of 16x16x16 voxel chunks")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Condition a chunk, run the worker and poll it to completion
    Run(run::RunArgs),

    /// Print the noise schedule
    Schedule(run::ScheduleArgs),

    /// Write the default configuration as JSON
    InitConfig(run::InitConfigArgs),

    /// Display version information
    Version,
}
