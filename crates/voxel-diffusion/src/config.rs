//! Runtime configuration for the diffusion worker.
//!
//! [`DiffusionConfig`] carries the noise schedule parameters, the iteration
//! counts and the engine provisioning options. It is serializable via
//! [`serde`] so a host can ship it as a JSON file next to the model.
//!
//! # Example
//!
//! ```rust
//! use voxel_diffusion::config::DiffusionConfig;
//!
//! let cfg = DiffusionConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.timesteps, 1000);
//! assert_eq!(cfg.inpaint_steps, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DiffusionError, DiffusionResult};

// ---------------------------------------------------------------------------
// DiffusionConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a diffusion context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionConfig {
    // -----------------------------------------------------------------------
    // Schedule
    // -----------------------------------------------------------------------
    /// Number of outer denoising timesteps T. Default: **1000**.
    #[serde(default = "default_timesteps")]
    pub timesteps: usize,

    /// Inner inpainting sub-steps U run at every outer timestep. Default: **5**.
    #[serde(default = "default_inpaint_steps")]
    pub inpaint_steps: usize,

    /// Noise variance at the first timestep. Default: **1e-4**.
    #[serde(default = "default_beta_min")]
    pub beta_min: f32,

    /// Noise variance at the last timestep. Default: **0.02**.
    #[serde(default = "default_beta_max")]
    pub beta_max: f32,

    // -----------------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------------
    /// Seed for the worker's noise generator. `None` seeds it once from OS
    /// entropy; later runs continue the same stream. Default: **None**.
    #[serde(default)]
    pub seed: Option<u64>,

    // -----------------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------------
    /// Options consumed by engine provisioners.
    #[serde(default)]
    pub engine: EngineOptions,
}

fn default_timesteps() -> usize {
    1000
}

fn default_inpaint_steps() -> usize {
    5
}

fn default_beta_min() -> f32 {
    1e-4
}

fn default_beta_max() -> f32 {
    0.02
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            timesteps: default_timesteps(),
            inpaint_steps: default_inpaint_steps(),
            beta_min: default_beta_min(),
            beta_max: default_beta_max(),
            seed: None,
            engine: EngineOptions::default(),
        }
    }
}

impl DiffusionConfig {
    /// Set the number of outer timesteps
    pub fn with_timesteps(mut self, timesteps: usize) -> Self {
        self.timesteps = timesteps;
        self
    }

    /// Set the number of inner sub-steps
    pub fn with_inpaint_steps(mut self, inpaint_steps: usize) -> Self {
        self.inpaint_steps = inpaint_steps;
        self
    }

    /// Fix the noise seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Total number of engine invocations in one run (T * U).
    pub fn steps_per_run(&self) -> usize {
        self.timesteps * self.inpaint_steps
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`DiffusionError::ConfigFile`] if the file cannot be read,
    /// [`DiffusionError::Serialization`] if it is not valid JSON, and
    /// [`DiffusionError::Config`] if validation fails.
    pub fn from_json(path: &Path) -> DiffusionResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| DiffusionError::ConfigFile {
                path: path.to_path_buf(),
                source,
            })?;
        let cfg: DiffusionConfig = serde_json::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    pub fn to_json(&self, path: &Path) -> DiffusionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DiffusionError::ConfigFile {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| DiffusionError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Validate all fields and return an error describing the first problem
    /// found.
    ///
    /// # Validated invariants
    ///
    /// - `timesteps` must be at least 2 (the schedule interpolates between two
    ///   endpoints).
    /// - `inpaint_steps` must be at least 1.
    /// - `0 < beta_min <= beta_max < 1`, both finite.
    /// - `engine.num_threads` must be at least 1.
    pub fn validate(&self) -> DiffusionResult<()> {
        if self.timesteps < 2 {
            return Err(DiffusionError::config("timesteps", "must be >= 2"));
        }
        if self.timesteps > i32::MAX as usize {
            return Err(DiffusionError::config(
                "timesteps",
                "must fit in a 32-bit status value",
            ));
        }
        if self.inpaint_steps == 0 {
            return Err(DiffusionError::config("inpaint_steps", "must be > 0"));
        }

        if !self.beta_min.is_finite() || self.beta_min <= 0.0 {
            return Err(DiffusionError::config(
                "beta_min",
                format!("must be finite and > 0, got {}", self.beta_min),
            ));
        }
        if !self.beta_max.is_finite() || self.beta_max >= 1.0 {
            return Err(DiffusionError::config(
                "beta_max",
                format!("must be finite and < 1, got {}", self.beta_max),
            ));
        }
        if self.beta_min > self.beta_max {
            return Err(DiffusionError::config(
                "beta_min",
                format!(
                    "must be <= beta_max ({}), got {}",
                    self.beta_max, self.beta_min
                ),
            ));
        }

        if self.engine.num_threads == 0 {
            return Err(DiffusionError::config("engine.num_threads", "must be > 0"));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// EngineOptions
// ---------------------------------------------------------------------------

/// Options for engine provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Exported single-step model. Default: **`model.onnx`**.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Location of the optimized engine artifact. Loaded when present,
    /// written after a build otherwise. Default: **`model.optimized.onnx`**.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Intra-op threads for CPU execution. Default: **4**.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Run graph optimization before execution. Default: **true**.
    #[serde(default = "default_optimize")]
    pub optimize: bool,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("model.onnx")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("model.optimized.onnx")
}

fn default_num_threads() -> usize {
    4
}

fn default_optimize() -> bool {
    true
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            cache_path: default_cache_path(),
            num_threads: default_num_threads(),
            optimize: default_optimize(),
        }
    }
}

impl EngineOptions {
    /// Options pointing at a model and its cache
    pub fn new(model_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            cache_path: cache_path.into(),
            ..Default::default()
        }
    }

    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}
