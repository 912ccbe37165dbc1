//! ONNX Runtime engine.
//!
//! Runs the exported single-step denoising model through the `ort` crate.
//! Provisioning follows a cache lifecycle: when the optimized artifact at
//! `cache_path` exists it is loaded directly, otherwise the model at
//! `model_path` is optimized and the result is written to `cache_path` for
//! the next start.

use crate::config::{DiffusionConfig, EngineOptions};
use crate::engine::{ComputeEngine, EngineProvisioner, StepInputs};
use crate::error::{DiffusionError, DiffusionResult, ProvisioningStage};
use crate::volume::Volume;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Model input names, in binding order
pub const INPUT_NAMES: [&str; 7] = [
    "t",
    "x_t",
    "context",
    "mask",
    "alpha_t",
    "alpha_bar_t",
    "beta_t",
];

/// Model output name
pub const OUTPUT_NAME: &str = "x_out";

fn volume_tensor(volume: &Volume) -> DiffusionResult<Tensor<f32>> {
    let shape: Vec<i64> = volume.shape().dims().iter().map(|&d| d as i64).collect();
    Tensor::from_array((shape, volume.as_slice().to_vec()))
        .map_err(|e| {
            DiffusionError::tensor_binding(format!("Failed to create volume tensor: {}", e))
        })
}

fn scalar_tensor(value: f32) -> DiffusionResult<Tensor<f32>> {
    Tensor::from_array((vec![1i64], vec![value]))
        .map_err(|e| {
            DiffusionError::tensor_binding(format!("Failed to create scalar tensor: {}", e))
        })
}

/// A compute engine backed by an ONNX Runtime session
pub struct OnnxEngine {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl std::fmt::Debug for OnnxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEngine")
            .field("input_names", &self.input_names)
            .field("output_names", &self.output_names)
            .finish()
    }
}

impl OnnxEngine {
    fn from_session(session: Session) -> DiffusionResult<Self> {
        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|input| input.name().to_string())
            .collect();

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|output| output.name().to_string())
            .collect();

        for required in INPUT_NAMES {
            if !input_names.iter().any(|n| n == required) {
                return Err(DiffusionError::tensor_binding(format!(
                    "model has no input named `{}` (inputs: {:?})",
                    required, input_names
                )));
            }
        }
        if !output_names.iter().any(|n| n == OUTPUT_NAME) {
            return Err(DiffusionError::tensor_binding(format!(
                "model has no output named `{}` (outputs: {:?})",
                OUTPUT_NAME, output_names
            )));
        }

        info!(
            inputs = ?input_names,
            outputs = ?output_names,
            "ONNX model bound"
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    /// Input names reported by the model
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Output names reported by the model
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

impl ComputeEngine for OnnxEngine {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn run_step(&mut self, inputs: &StepInputs<'_>, output: &mut Volume) -> DiffusionResult<()> {
        let timestep = i32::try_from(inputs.timestep).map_err(|_| {
            DiffusionError::invalid_argument(format!("timestep {} exceeds i32", inputs.timestep))
        })?;
        let t = Tensor::from_array((vec![1i64], vec![timestep]))
            .map_err(|e| {
                DiffusionError::tensor_binding(format!("Failed to create timestep tensor: {}", e))
            })?;

        let session_inputs = ort::inputs![
            "t" => t,
            "x_t" => volume_tensor(inputs.x)?,
            "context" => volume_tensor(inputs.context)?,
            "mask" => volume_tensor(inputs.mask)?,
            "alpha_t" => scalar_tensor(inputs.schedule.alpha)?,
            "alpha_bar_t" => scalar_tensor(inputs.schedule.alpha_bar)?,
            "beta_t" => scalar_tensor(inputs.schedule.beta)?,
        ];

        let session_outputs = self
            .session
            .run(session_inputs)
            .map_err(|e| DiffusionError::step_rejected(inputs.timestep, e.to_string()))?;

        let value = session_outputs.get(OUTPUT_NAME).ok_or_else(|| {
            DiffusionError::tensor_binding(format!("model produced no `{}` output", OUTPUT_NAME))
        })?;
        let (_, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                DiffusionError::tensor_binding(format!(
                    "Failed to read `{}`: {}",
                    OUTPUT_NAME, e
                ))
            })?;

        let target = output.as_slice_mut();
        if data.len() != target.len() {
            return Err(DiffusionError::shape_mismatch(vec![target.len()], vec![data.len()]));
        }
        target.copy_from_slice(data);
        Ok(())
    }
}

/// Provisions an [`OnnxEngine`] with an optimized-model cache
#[derive(Debug, Clone, Default)]
pub struct OnnxProvisioner {
    options: Option<EngineOptions>,
}

impl OnnxProvisioner {
    /// Use the engine options from the context config
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit options instead of the context config
    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            options: Some(options),
        }
    }

    fn builder(options: &EngineOptions) -> DiffusionResult<SessionBuilder> {
        Session::builder()
            .map_err(|e| {
                DiffusionError::provisioning(
                    ProvisioningStage::CreateRuntime,
                    format!("Failed to create session builder: {}", e),
                )
            })?
            .with_intra_threads(options.num_threads)
            .map_err(|e| {
                DiffusionError::provisioning(ProvisioningStage::CreateRuntime, e.to_string())
            })
    }

    fn load_cached(options: &EngineOptions) -> DiffusionResult<Session> {
        info!(path = ?options.cache_path, "Loading cached engine");
        Self::builder(options)?
            .commit_from_file(&options.cache_path)
            .map_err(|e| {
                DiffusionError::provisioning(
                    ProvisioningStage::DeserializeEngine,
                    format!("Failed to load {}: {}", options.cache_path.display(), e),
                )
            })
    }

    fn build_from_model(options: &EngineOptions) -> DiffusionResult<Session> {
        info!(
            model = ?options.model_path,
            cache = ?options.cache_path,
            "No cached engine, building from model (this can take a while)"
        );
        let cache = options.cache_path.as_path();
        if let Some(parent) = cache.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DiffusionError::provisioning(
                    ProvisioningStage::SaveEngine,
                    format!("Failed to create {}: {}", parent.display(), e),
                )
            })?;
        }

        let mut builder = Self::builder(options)?;
        if options.optimize {
            builder = builder
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| {
                    DiffusionError::provisioning(ProvisioningStage::BuildFromModel, e.to_string())
                })?;
        }
        let session = builder
            .with_optimized_model_path(cache)
            .map_err(|e| {
                DiffusionError::provisioning(ProvisioningStage::SaveEngine, e.to_string())
            })?
            .commit_from_file(&options.model_path)
            .map_err(|e| {
                DiffusionError::provisioning(
                    ProvisioningStage::BuildFromModel,
                    format!("Failed to build {}: {}", options.model_path.display(), e),
                )
            })?;

        if !Path::new(cache).exists() {
            warn!(path = ?cache, "Optimized model was not written");
            return Err(DiffusionError::provisioning(
                ProvisioningStage::SaveEngine,
                format!("{} was not written", cache.display()),
            ));
        }
        info!(path = ?cache, "Engine cache written");
        Ok(session)
    }
}

impl EngineProvisioner for OnnxProvisioner {
    #[instrument(skip_all)]
    fn provision(
        self: Box<Self>,
        config: &DiffusionConfig,
    ) -> DiffusionResult<Box<dyn ComputeEngine>> {
        let options = self.options.unwrap_or_else(|| config.engine.clone());
        let session = if options.cache_path.exists() {
            Self::load_cached(&options)?
        } else {
            Self::build_from_model(&options)?
        };
        Ok(Box::new(OnnxEngine::from_session(session)?))
    }
}
