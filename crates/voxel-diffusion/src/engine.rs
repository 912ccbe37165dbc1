//! Compute engine abstraction.
//!
//! The worker drives the model one step at a time through the
//! [`ComputeEngine`] trait and obtains the engine once, on the worker thread,
//! through an [`EngineProvisioner`]. Keeping both behind traits lets the run
//! loop be exercised with [`MockEngine`] when no accelerator is present.

use crate::config::DiffusionConfig;
use crate::error::{DiffusionError, DiffusionResult, ProvisioningStage};
use crate::schedule::ScheduleStep;
use crate::volume::Volume;
use parking_lot::Mutex;
use std::sync::Arc;

/// Inputs for one denoising step.
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<'a> {
    /// Current sample
    pub x: &'a Volume,
    /// Conditioning embeddings
    pub context: &'a Volume,
    /// 1 where the model may use or must fill a cell
    pub mask: &'a Volume,
    /// Outer timestep, descending from `T - 1` to 0
    pub timestep: usize,
    /// Inner sub-step within the timestep
    pub substep: usize,
    /// Schedule coefficients at `timestep`
    pub schedule: ScheduleStep,
}

/// A ready-to-run model executing single denoising steps.
pub trait ComputeEngine: Send {
    /// Engine name, for logs
    fn name(&self) -> &str;

    /// Run one step, writing the next sample into `output`.
    fn run_step(&mut self, inputs: &StepInputs<'_>, output: &mut Volume) -> DiffusionResult<()>;

    /// Warm up the engine before the first run
    fn warmup(&mut self) -> DiffusionResult<()> {
        Ok(())
    }
}

/// Produces the compute engine on the worker thread.
///
/// Provisioning may be slow (model optimization) and happens exactly once per
/// context. Any closure `FnOnce(&DiffusionConfig) -> DiffusionResult<Box<dyn
/// ComputeEngine>>` is a provisioner.
pub trait EngineProvisioner: Send + 'static {
    /// Build the engine
    fn provision(
        self: Box<Self>,
        config: &DiffusionConfig,
    ) -> DiffusionResult<Box<dyn ComputeEngine>>;
}

impl<F> EngineProvisioner for F
where
    F: FnOnce(&DiffusionConfig) -> DiffusionResult<Box<dyn ComputeEngine>> + Send + 'static,
{
    fn provision(
        self: Box<Self>,
        config: &DiffusionConfig,
    ) -> DiffusionResult<Box<dyn ComputeEngine>> {
        (*self)(config)
    }
}

/// Provisioner that always fails at `stage`
pub fn failing_provisioner(stage: ProvisioningStage) -> impl EngineProvisioner {
    move |_: &DiffusionConfig| -> DiffusionResult<Box<dyn ComputeEngine>> {
        Err(DiffusionError::provisioning(stage, "provisioning disabled"))
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Per-step latency statistics
#[derive(Debug, Default, Clone)]
pub struct StepStats {
    /// Total number of engine steps
    pub total_steps: u64,
    /// Total step time in milliseconds
    pub total_time_ms: f64,
    /// Average step time
    pub avg_time_ms: f64,
    /// Min step time
    pub min_time_ms: f64,
    /// Max step time
    pub max_time_ms: f64,
    /// Last step time
    pub last_time_ms: f64,
}

impl StepStats {
    /// Record a new step timing
    pub fn record(&mut self, time_ms: f64) {
        self.total_steps += 1;
        self.total_time_ms += time_ms;
        self.last_time_ms = time_ms;
        self.avg_time_ms = self.total_time_ms / self.total_steps as f64;

        if self.total_steps == 1 {
            self.min_time_ms = time_ms;
            self.max_time_ms = time_ms;
        } else {
            self.min_time_ms = self.min_time_ms.min(time_ms);
            self.max_time_ms = self.max_time_ms.max(time_ms);
        }
    }
}

// ---------------------------------------------------------------------------
// Mock engine
// ---------------------------------------------------------------------------

/// How [`MockEngine`] computes its output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Output equals the input sample
    Identity,
    /// Every output element is the given value
    Fill(f32),
    /// Move the sample toward the conditioning by `beta` each step
    PullToContext,
}

/// How an injected failure is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The engine rejects the step
    Reject,
    /// A device copy fails
    Device,
}

/// A recorded engine call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRecord {
    /// Outer timestep
    pub timestep: usize,
    /// Inner sub-step
    pub substep: usize,
}

/// Shared log of the steps an engine executed.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    records: Arc<Mutex<Vec<StepRecord>>>,
}

impl StepLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record
    pub fn push(&self, record: StepRecord) {
        self.records.lock().push(record);
    }

    /// Copy of all records so far
    pub fn records(&self) -> Vec<StepRecord> {
        self.records.lock().clone()
    }

    /// Number of recorded steps
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Forget all records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

/// Deterministic in-process engine for tests, benches and demos
#[derive(Debug)]
pub struct MockEngine {
    name: String,
    behavior: MockBehavior,
    fail_at: Option<(u64, MockFailure)>,
    calls: u64,
    log: Option<StepLog>,
}

impl MockEngine {
    /// Create a new mock engine
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            name: "mock".to_string(),
            behavior,
            fail_at: None,
            calls: 0,
            log: None,
        }
    }

    /// Set the engine name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fail the `call`-th step (0-based, counted over the engine's lifetime)
    pub fn fail_at(mut self, call: u64, failure: MockFailure) -> Self {
        self.fail_at = Some((call, failure));
        self
    }

    /// Record every step into `log`
    pub fn with_log(mut self, log: StepLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Number of steps attempted
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Wrap this engine in a provisioner that hands it over unchanged
    pub fn into_provisioner(self) -> impl EngineProvisioner {
        move |_: &DiffusionConfig| -> DiffusionResult<Box<dyn ComputeEngine>> { Ok(Box::new(self)) }
    }
}

impl ComputeEngine for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn run_step(&mut self, inputs: &StepInputs<'_>, output: &mut Volume) -> DiffusionResult<()> {
        let call = self.calls;
        self.calls += 1;

        if let Some((at, failure)) = self.fail_at {
            if call == at {
                return Err(match failure {
                    MockFailure::Reject => {
                        DiffusionError::step_rejected(inputs.timestep, "mock rejection")
                    }
                    MockFailure::Device => {
                        DiffusionError::failed_operation("mock device copy failed")
                    }
                });
            }
        }

        if let Some(log) = &self.log {
            log.push(StepRecord {
                timestep: inputs.timestep,
                substep: inputs.substep,
            });
        }

        match self.behavior {
            MockBehavior::Identity => output.copy_from(inputs.x)?,
            MockBehavior::Fill(value) => output.fill(value),
            MockBehavior::PullToContext => {
                let rate = inputs.schedule.beta.sqrt();
                let x = inputs.x.as_slice();
                let ctx = inputs.context.as_slice();
                if ctx.len() != x.len() {
                    return Err(DiffusionError::shape_mismatch(
                        inputs.x.shape().dims().to_vec(),
                        inputs.context.shape().dims().to_vec(),
                    ));
                }
                for ((o, &xi), &ci) in output.as_slice_mut().iter_mut().zip(x).zip(ctx) {
                    *o = xi + (ci - xi) * rate;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::NoiseSchedule;
    use crate::EMBEDDING_DIMENSIONS;

    fn step_at(t: usize) -> ScheduleStep {
        NoiseSchedule::new(1e-4, 0.02, 10).unwrap().at(t).unwrap()
    }

    #[test]
    fn test_step_stats() {
        let mut stats = StepStats::default();
        stats.record(10.0);
        stats.record(20.0);
        stats.record(15.0);

        assert_eq!(stats.total_steps, 3);
        assert_eq!(stats.min_time_ms, 10.0);
        assert_eq!(stats.max_time_ms, 20.0);
        assert_eq!(stats.avg_time_ms, 15.0);
        assert_eq!(stats.last_time_ms, 15.0);
    }

    #[test]
    fn test_identity_and_fill() {
        let mut x = Volume::zeros(EMBEDDING_DIMENSIONS);
        x.fill(0.25);
        let context = Volume::zeros(EMBEDDING_DIMENSIONS);
        let mask = Volume::zeros(1);
        let inputs = StepInputs {
            x: &x,
            context: &context,
            mask: &mask,
            timestep: 3,
            substep: 0,
            schedule: step_at(3),
        };

        let mut out = Volume::zeros(EMBEDDING_DIMENSIONS);
        MockEngine::new(MockBehavior::Identity)
            .run_step(&inputs, &mut out)
            .unwrap();
        assert_eq!(out, x);

        MockEngine::new(MockBehavior::Fill(-1.0))
            .run_step(&inputs, &mut out)
            .unwrap();
        assert!(out.as_slice().iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_pull_to_context_moves_toward_context() {
        let mut x = Volume::zeros(EMBEDDING_DIMENSIONS);
        x.fill(1.0);
        let context = Volume::zeros(EMBEDDING_DIMENSIONS);
        let mask = Volume::zeros(1);
        let inputs = StepInputs {
            x: &x,
            context: &context,
            mask: &mask,
            timestep: 9,
            substep: 0,
            schedule: step_at(9),
        };
        let mut out = Volume::zeros(EMBEDDING_DIMENSIONS);
        MockEngine::new(MockBehavior::PullToContext)
            .run_step(&inputs, &mut out)
            .unwrap();
        let v = out.get(0, 4, 4, 4).unwrap();
        assert!(v < 1.0 && v > 0.0);
    }

    #[test]
    fn test_failure_injection_and_log() {
        let x = Volume::zeros(EMBEDDING_DIMENSIONS);
        let context = Volume::zeros(EMBEDDING_DIMENSIONS);
        let mask = Volume::zeros(1);
        let log = StepLog::new();
        let mut engine = MockEngine::new(MockBehavior::Identity)
            .fail_at(1, MockFailure::Reject)
            .with_log(log.clone());
        let mut out = Volume::zeros(EMBEDDING_DIMENSIONS);

        let inputs = StepInputs {
            x: &x,
            context: &context,
            mask: &mask,
            timestep: 5,
            substep: 0,
            schedule: step_at(5),
        };
        assert!(engine.run_step(&inputs, &mut out).is_ok());
        let err = engine.run_step(&inputs, &mut out).unwrap_err();
        assert!(matches!(err, DiffusionError::StepRejected { timestep: 5, .. }));
        assert!(engine.run_step(&inputs, &mut out).is_ok());

        assert_eq!(engine.calls(), 3);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_closure_provisioner() {
        let provisioner: Box<dyn EngineProvisioner> =
            Box::new(MockEngine::new(MockBehavior::Identity).with_name("unit").into_provisioner());
        let engine = provisioner.provision(&DiffusionConfig::default()).unwrap();
        assert_eq!(engine.name(), "unit");
    }

    #[test]
    fn test_failing_provisioner() {
        let provisioner: Box<dyn EngineProvisioner> =
            Box::new(failing_provisioner(ProvisioningStage::BuildFromModel));
        let err = provisioner
            .provision(&DiffusionConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.code(), crate::error::ErrorCode::BuildingFromModel);
    }
}
