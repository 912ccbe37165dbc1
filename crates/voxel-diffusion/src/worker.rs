//! Background diffusion worker.
//!
//! One long-lived thread owns the compute engine. It provisions the engine,
//! precomputes the noise schedule, then blocks on a single-slot command
//! channel. Each `Start` command carries the conditioning for one run; the
//! worker denoises from `T - 1` down to 0 and publishes progress after every
//! outer timestep. The thread exits when the command sender is dropped and
//! returns its outcome through the `JoinHandle`.

use crate::conditioning::Conditioning;
use crate::config::DiffusionConfig;
use crate::engine::{ComputeEngine, EngineProvisioner, StepInputs, StepStats};
use crate::error::{DiffusionError, DiffusionResult};
use crate::schedule::NoiseSchedule;
use crate::status::{LastError, Progress, StateCell, WorkerState};
use crate::volume::Volume;
use crate::EMBEDDING_DIMENSIONS;
use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "voxel-diffusion-worker";

/// Command sent from the host to the worker.
#[derive(Debug)]
pub(crate) enum Command {
    /// Run the denoising loop with the given conditioning.
    Start(Conditioning),
}

/// State visible to both the host and the worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    /// Set by the host when a run is accepted, cleared by the worker when it
    /// ends. Guarantees at most one run in flight.
    pub(crate) run_accepted: AtomicBool,
    pub(crate) progress: Progress,
    pub(crate) last_error: LastError,
    /// Working volume, written by the worker after every step.
    pub(crate) volume: Mutex<Volume>,
    pub(crate) stats: RwLock<StepStats>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: StateCell::new(WorkerState::Uninitialized),
            run_accepted: AtomicBool::new(false),
            progress: Progress::new(),
            last_error: LastError::new(),
            volume: Mutex::new(Volume::zeros(EMBEDDING_DIMENSIONS)),
            stats: RwLock::new(StepStats::default()),
        }
    }

    fn disable(&self, err: &DiffusionError) {
        error!(error = %err, code = %err.code(), "Engine provisioning failed; engine disabled");
        self.last_error.record(err.code());
        self.state.store(WorkerState::Failed);
        self.run_accepted.store(false, Ordering::Release);
    }
}

/// Spawn the worker thread.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    config: DiffusionConfig,
    provisioner: Box<dyn EngineProvisioner>,
    commands: Receiver<Command>,
) -> DiffusionResult<JoinHandle<DiffusionResult<()>>> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.into())
        .spawn(move || worker_main(shared, config, provisioner, commands))
        .map_err(|e| {
            DiffusionError::failed_operation(format!("Failed to spawn worker thread: {}", e))
        })
}

fn worker_main(
    shared: Arc<Shared>,
    config: DiffusionConfig,
    provisioner: Box<dyn EngineProvisioner>,
    commands: Receiver<Command>,
) -> DiffusionResult<()> {
    let mut worker = match Worker::provision(shared.clone(), &config, provisioner) {
        Ok(worker) => worker,
        Err(e) => {
            shared.disable(&e);
            return Err(e);
        }
    };

    shared.progress.mark_ready();
    shared.state.store(WorkerState::Idle);
    info!(
        engine = worker.engine.name(),
        timesteps = config.timesteps,
        inpaint_steps = config.inpaint_steps,
        "Diffusion worker ready"
    );

    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(conditioning) => {
                shared.state.store(WorkerState::Running);
                worker.execute(conditioning);
                shared.state.store(WorkerState::Idle);
                shared.run_accepted.store(false, Ordering::Release);
            }
        }
    }

    info!("Command channel closed, diffusion worker exiting");
    Ok(())
}

/// Engine, schedule and sampling state owned by the worker thread.
struct Worker {
    shared: Arc<Shared>,
    engine: Box<dyn ComputeEngine>,
    schedule: NoiseSchedule,
    inpaint_steps: usize,
    rng: StdRng,
    runs: u64,
}

impl Worker {
    #[instrument(skip_all, fields(timesteps = config.timesteps))]
    fn provision(
        shared: Arc<Shared>,
        config: &DiffusionConfig,
        provisioner: Box<dyn EngineProvisioner>,
    ) -> DiffusionResult<Self> {
        let started = Instant::now();
        let mut engine = provisioner.provision(config)?;
        engine.warmup()?;
        info!(
            engine = engine.name(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Compute engine provisioned"
        );

        let schedule = NoiseSchedule::from_config(config)?;
        debug!(
            alpha_bar_last = schedule.alpha_bar().last().copied().unwrap_or_default(),
            "Noise schedule computed"
        );

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            shared,
            engine,
            schedule,
            inpaint_steps: config.inpaint_steps,
            rng,
            runs: 0,
        })
    }

    /// Run once and report the outcome through the shared status.
    fn execute(&mut self, conditioning: Conditioning) {
        self.runs += 1;
        let run = self.runs;
        let started = Instant::now();
        info!(run, "Diffusion run started");

        match self.run(conditioning) {
            Ok(()) => info!(
                run,
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Diffusion run completed"
            ),
            Err(e) => {
                error!(run, error = %e, code = %e.code(), "Diffusion run aborted");
                self.shared.last_error.record(e.code());
            }
        }
    }

    fn run(&mut self, mut conditioning: Conditioning) -> DiffusionResult<()> {
        conditioning.open_interior()?;

        let mut x = Volume::zeros(EMBEDDING_DIMENSIONS);
        for value in x.as_slice_mut() {
            *value = self.rng.sample(StandardNormal);
        }
        self.shared.volume.lock().copy_from(&x)?;

        let mut staging = Volume::zeros(EMBEDDING_DIMENSIONS);
        for t in (0..self.schedule.len()).rev() {
            let step = self.schedule.at(t).ok_or_else(|| {
                DiffusionError::failed_operation(format!("timestep {} outside schedule", t))
            })?;

            for u in 0..self.inpaint_steps {
                let inputs = StepInputs {
                    x: &x,
                    context: &conditioning.context,
                    mask: &conditioning.mask,
                    timestep: t,
                    substep: u,
                    schedule: step,
                };

                let step_started = Instant::now();
                self.engine.run_step(&inputs, &mut staging)?;
                self.shared
                    .stats
                    .write()
                    .record(step_started.elapsed().as_secs_f64() * 1000.0);

                self.shared.volume.lock().copy_from(&staging)?;
                x.swap(&mut staging);
            }

            self.shared.progress.publish(t);
            debug!(timestep = t, "Timestep complete");
        }

        Ok(())
    }
}
