//! # Voxel Diffusion
//!
//! Orchestration for an iterative denoising model that fills in a 16x16x16
//! voxel chunk on a background thread while the host keeps running its own
//! loop.
//!
//! ## Features
//!
//! - **Single background worker**: provisions the engine once, then serves
//!   one run at a time from a single-slot command channel
//! - **Incremental conditioning**: known cells are written one at a time and
//!   handed to the next run as a unit
//! - **Lock-free progress**: the current timestep is an atomic read
//! - **Consistent snapshots**: the working volume is copied under its lock and
//!   classified back to discrete labels off the hot path
//! - **Integer status API**: a host facade returning stable error codes
//! - **ONNX Runtime engine** (feature `onnx`) with an optimized-model cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use voxel_diffusion::prelude::*;
//!
//! let ctx = DiffusionContext::create(DiffusionConfig::default(), OnnxProvisioner::new())?;
//! ctx.initialize()?;
//! for x in 0..CHUNK_WIDTH {
//!     for z in 0..CHUNK_WIDTH {
//!         ctx.set_conditioning_cell(x, 0, z, 1)?;
//!     }
//! }
//! ctx.start_run()?;
//!
//! // Later, from the host loop:
//! let t = ctx.current_timestep();
//! ctx.capture_snapshot()?;
//! let label = ctx.read_label(0, 0, 0)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classifier;
pub mod conditioning;
pub mod config;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod host;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod schedule;
pub mod snapshot;
pub mod status;
pub mod volume;
mod worker;

// Re-exports for convenience
pub use classifier::{classify_interior, nearest_label, LabelGrid};
pub use conditioning::{Conditioning, ConditioningAccumulator};
pub use config::{DiffusionConfig, EngineOptions};
pub use context::DiffusionContext;
pub use embedding::{EmbeddingTable, LabelId, EMPTY_LABEL};
pub use engine::{
    ComputeEngine, EngineProvisioner, MockBehavior, MockEngine, MockFailure, StepInputs, StepLog,
    StepRecord, StepStats,
};
pub use error::{DiffusionError, DiffusionResult, ErrorCode, ProvisioningStage};
pub use host::HostBridge;
#[cfg(feature = "onnx")]
pub use onnx::{OnnxEngine, OnnxProvisioner};
pub use schedule::{NoiseSchedule, ScheduleStep};
pub use status::WorkerState;
pub use volume::{Volume, VolumeShape, VolumeStats};
pub use worker::WORKER_THREAD_NAME;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DiffusionConfig, EngineOptions};
    pub use crate::context::DiffusionContext;
    pub use crate::embedding::LabelId;
    pub use crate::engine::{ComputeEngine, EngineProvisioner, MockBehavior, MockEngine};
    pub use crate::error::{DiffusionError, DiffusionResult, ErrorCode};
    pub use crate::host::HostBridge;
    #[cfg(feature = "onnx")]
    pub use crate::onnx::OnnxProvisioner;
    pub use crate::status::WorkerState;
    pub use crate::{CHUNK_WIDTH, INTERIOR_WIDTH};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Edge length of a chunk in cells
pub const CHUNK_WIDTH: usize = 16;

/// Edge length of the classified interior (the chunk minus a one-cell border)
pub const INTERIOR_WIDTH: usize = CHUNK_WIDTH - 2;

/// Dimensions of a label embedding, and channels of the working volume
pub const EMBEDDING_DIMENSIONS: usize = 3;

/// Number of discrete labels
pub const LABEL_COUNT: usize = 96;
