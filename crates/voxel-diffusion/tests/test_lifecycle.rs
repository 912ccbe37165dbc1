//! Integration tests for the worker lifecycle of [`DiffusionContext`].
//!
//! Runs use tiny schedules and in-process engines so every test finishes in
//! milliseconds. Tests that must observe a run mid-flight use a gated engine
//! that blocks on a channel until the test hands it a permit.

use crossbeam::channel::{self, Receiver, Sender};
use std::time::Duration;
use voxel_diffusion::engine::failing_provisioner;
use voxel_diffusion::prelude::*;
use voxel_diffusion::{ProvisioningStage, StepInputs, StepLog, Volume};

const WAIT: Duration = Duration::from_secs(10);

fn config(timesteps: usize, inpaint_steps: usize) -> DiffusionConfig {
    DiffusionConfig::default()
        .with_timesteps(timesteps)
        .with_inpaint_steps(inpaint_steps)
        .with_seed(42)
}

fn wait_for_progress(ctx: &DiffusionContext, target: usize) {
    let deadline = std::time::Instant::now() + WAIT;
    while ctx.current_timestep() != Some(target) {
        assert!(
            std::time::Instant::now() < deadline,
            "progress never reached {}",
            target
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ---------------------------------------------------------------------------
// Gated engine
// ---------------------------------------------------------------------------

/// Copies its input, but only after receiving one permit per step.
struct GatedEngine {
    permits: Receiver<()>,
}

impl ComputeEngine for GatedEngine {
    fn name(&self) -> &str {
        "gated"
    }

    fn run_step(&mut self, inputs: &StepInputs<'_>, output: &mut Volume) -> DiffusionResult<()> {
        self.permits
            .recv()
            .map_err(|_| DiffusionError::failed_operation("permit channel closed"))?;
        output.copy_from(inputs.x)
    }
}

fn gated_context(timesteps: usize) -> (DiffusionContext, Sender<()>) {
    let (tx, rx) = channel::unbounded();
    let provisioner = move |_: &DiffusionConfig| -> DiffusionResult<Box<dyn ComputeEngine>> {
        Ok(Box::new(GatedEngine { permits: rx }))
    };
    let ctx = DiffusionContext::create(config(timesteps, 1), provisioner).unwrap();
    (ctx, tx)
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// A fresh context reports no progress, no error and no active run.
#[test]
fn fresh_context_is_uninitialized() {
    let ctx = DiffusionContext::create(
        config(4, 1),
        MockEngine::new(MockBehavior::Identity).into_provisioner(),
    )
    .unwrap();

    assert_eq!(ctx.state(), WorkerState::Uninitialized);
    assert_eq!(ctx.current_timestep(), None);
    assert_eq!(ctx.last_error(), ErrorCode::None);
    assert!(!ctx.is_run_active());
}

/// After provisioning the worker is idle and progress reads 0.
#[test]
fn initialize_reaches_idle() {
    let ctx = DiffusionContext::create(
        config(4, 1),
        MockEngine::new(MockBehavior::Identity).into_provisioner(),
    )
    .unwrap();

    ctx.initialize().unwrap();
    assert!(ctx.wait_until_idle(WAIT));
    assert_eq!(ctx.state(), WorkerState::Idle);
    assert_eq!(ctx.current_timestep(), Some(0));
    assert_eq!(ctx.last_error(), ErrorCode::None);
    ctx.shutdown().unwrap();
}

/// A second initialize is rejected and leaves the running worker untouched.
#[test]
fn second_initialize_is_invalid_operation() {
    let ctx = DiffusionContext::create(
        config(4, 1),
        MockEngine::new(MockBehavior::Identity).into_provisioner(),
    )
    .unwrap();

    ctx.initialize().unwrap();
    assert!(ctx.wait_until_idle(WAIT));

    let err = ctx.initialize().unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidOperation);
    assert_eq!(ctx.last_error(), ErrorCode::InvalidOperation);
    assert_eq!(ctx.state(), WorkerState::Idle);

    ctx.start_run().unwrap();
    assert!(ctx.wait_until_idle(WAIT));
    assert_eq!(ctx.current_timestep(), Some(0));
    ctx.shutdown().unwrap();
}

/// Provisioning failure is reported asynchronously and disables the engine.
#[test]
fn provisioning_failure_is_terminal() {
    let ctx = DiffusionContext::create(
        config(4, 1),
        failing_provisioner(ProvisioningStage::BuildFromModel),
    )
    .unwrap();

    ctx.initialize().unwrap();
    assert!(!ctx.wait_until_idle(WAIT));
    assert_eq!(ctx.state(), WorkerState::Failed);
    assert_eq!(ctx.last_error(), ErrorCode::BuildingFromModel);
    assert_eq!(ctx.current_timestep(), None);

    assert_eq!(
        ctx.start_run().unwrap_err().code(),
        ErrorCode::InvalidOperation
    );
    assert!(!ctx.is_run_active());

    let outcome = ctx.shutdown().unwrap_err();
    assert_eq!(outcome.code(), ErrorCode::BuildingFromModel);
}

/// A run accepted while the engine is still provisioning starts once ready.
#[test]
fn start_during_provisioning_is_queued() {
    let log = StepLog::new();
    let engine = MockEngine::new(MockBehavior::Identity).with_log(log.clone());
    let provisioner = move |_: &DiffusionConfig| -> DiffusionResult<Box<dyn ComputeEngine>> {
        std::thread::sleep(Duration::from_millis(50));
        Ok(Box::new(engine))
    };
    let ctx = DiffusionContext::create(config(6, 2), provisioner).unwrap();

    ctx.initialize().unwrap();
    ctx.start_run().unwrap();
    assert!(ctx.is_run_active());
    assert_eq!(ctx.current_timestep(), Some(6));

    assert!(ctx.wait_until_idle(WAIT));
    assert_eq!(log.len(), 12);
    assert_eq!(ctx.current_timestep(), Some(0));
    ctx.shutdown().unwrap();
}

// ---------------------------------------------------------------------------
// At most one run
// ---------------------------------------------------------------------------

/// A second start while a run is in flight is rejected without resetting
/// progress.
#[test]
fn double_start_is_rejected_without_resetting_progress() {
    let (ctx, permits) = gated_context(3);
    ctx.initialize().unwrap();
    assert!(ctx.wait_until_idle(WAIT));

    ctx.start_run().unwrap();
    assert_eq!(ctx.current_timestep(), Some(3));
    assert_eq!(
        ctx.start_run().unwrap_err().code(),
        ErrorCode::InvalidOperation
    );
    assert_eq!(ctx.current_timestep(), Some(3));

    permits.send(()).unwrap();
    wait_for_progress(&ctx, 2);
    assert_eq!(ctx.state(), WorkerState::Running);

    assert_eq!(
        ctx.start_run().unwrap_err().code(),
        ErrorCode::InvalidOperation
    );
    assert_eq!(ctx.current_timestep(), Some(2));

    permits.send(()).unwrap();
    permits.send(()).unwrap();
    assert!(ctx.wait_until_idle(WAIT));
    assert_eq!(ctx.current_timestep(), Some(0));

    // The worker is reusable after completion.
    ctx.start_run().unwrap();
    for _ in 0..3 {
        permits.send(()).unwrap();
    }
    assert!(ctx.wait_until_idle(WAIT));
    assert_eq!(ctx.current_timestep(), Some(0));

    ctx.shutdown().unwrap();
}

/// Snapshots are served while a run is blocked mid-flight.
#[test]
fn snapshot_during_run_reports_current_progress() {
    let (ctx, permits) = gated_context(4);
    ctx.initialize().unwrap();
    assert!(ctx.wait_until_idle(WAIT));

    ctx.start_run().unwrap();
    permits.send(()).unwrap();
    wait_for_progress(&ctx, 3);

    assert_eq!(ctx.capture_snapshot().unwrap(), 3);
    for _ in 0..3 {
        permits.send(()).unwrap();
    }
    assert!(ctx.wait_until_idle(WAIT));
    assert_eq!(ctx.capture_snapshot().unwrap(), 0);
    ctx.shutdown().unwrap();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Shutdown waits for an in-flight run to finish.
#[test]
fn shutdown_waits_for_active_run() {
    let (ctx, permits) = gated_context(2);
    ctx.initialize().unwrap();
    assert!(ctx.wait_until_idle(WAIT));
    ctx.start_run().unwrap();

    let feeder = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        permits.send(()).unwrap();
        permits.send(()).unwrap();
    });

    ctx.shutdown().unwrap();
    feeder.join().unwrap();
}

/// Dropping an idle context joins the worker without blocking.
#[test]
fn drop_joins_idle_worker() {
    let ctx = DiffusionContext::create(
        config(4, 1),
        MockEngine::new(MockBehavior::Identity).into_provisioner(),
    )
    .unwrap();
    ctx.initialize().unwrap();
    assert!(ctx.wait_until_idle(WAIT));
    drop(ctx);
}
