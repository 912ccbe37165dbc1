//! The owned diffusion context.
//!
//! [`DiffusionContext`] bundles everything a host needs: the conditioning
//! accumulator, the single background worker, the progress and last-error
//! slots and the snapshot cache. All methods take `&self` and are safe to
//! call from any thread.
//!
//! ```rust,no_run
//! use voxel_diffusion::prelude::*;
//!
//! let config = DiffusionConfig::default().with_timesteps(50);
//! let engine = MockEngine::new(MockBehavior::PullToContext);
//! let ctx = DiffusionContext::create(config, engine.into_provisioner())?;
//!
//! ctx.initialize()?;
//! ctx.set_conditioning_cell(0, 0, 0, 1)?;
//! ctx.start_run()?;
//! while ctx.is_run_active() {
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! ctx.capture_snapshot()?;
//! let label = ctx.read_label(0, 0, 0)?;
//! # Ok::<(), voxel_diffusion::DiffusionError>(())
//! ```

use crate::classifier::LabelGrid;
use crate::conditioning::ConditioningAccumulator;
use crate::config::DiffusionConfig;
use crate::embedding::LabelId;
use crate::engine::{EngineProvisioner, StepStats};
use crate::error::{DiffusionError, DiffusionResult, ErrorCode};
use crate::snapshot::SnapshotCache;
use crate::status::WorkerState;
use crate::volume::VolumeStats;
use crate::worker::{self, Command, Shared};
use crossbeam::channel::{self, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Poll interval used by [`DiffusionContext::wait_until_idle`]
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Owns the background worker and all buffers shared with it.
pub struct DiffusionContext {
    config: DiffusionConfig,
    shared: Arc<Shared>,
    conditioning: Mutex<ConditioningAccumulator>,
    snapshot: Mutex<SnapshotCache>,
    provisioner: Mutex<Option<Box<dyn EngineProvisioner>>>,
    commands: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<DiffusionResult<()>>>>,
}

impl std::fmt::Debug for DiffusionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffusionContext")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("progress", &self.current_timestep())
            .field("last_error", &self.last_error())
            .finish()
    }
}

impl DiffusionContext {
    /// Validate `config` and create an uninitialized context.
    ///
    /// No thread is started until [`initialize`](Self::initialize).
    pub fn create<P: EngineProvisioner>(
        config: DiffusionConfig,
        provisioner: P,
    ) -> DiffusionResult<Self> {
        Self::create_boxed(config, Box::new(provisioner))
    }

    /// Like [`create`](Self::create) for an already boxed provisioner
    pub fn create_boxed(
        config: DiffusionConfig,
        provisioner: Box<dyn EngineProvisioner>,
    ) -> DiffusionResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Arc::new(Shared::new()),
            conditioning: Mutex::new(ConditioningAccumulator::new()),
            snapshot: Mutex::new(SnapshotCache::default()),
            provisioner: Mutex::new(Some(provisioner)),
            commands: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Configuration this context was created with
    pub fn config(&self) -> &DiffusionConfig {
        &self.config
    }

    pub(crate) fn reject<T>(&self, err: DiffusionError) -> DiffusionResult<T> {
        warn!(error = %err, code = %err.code(), "Request rejected");
        self.shared.last_error.record(err.code());
        Err(err)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the background worker.
    ///
    /// Returns as soon as the thread is running; engine provisioning continues
    /// in the background and its failure is reported through
    /// [`last_error`](Self::last_error) and [`state`](Self::state). A second
    /// call fails with `InvalidOperation` and changes nothing.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> DiffusionResult<()> {
        if let Err(observed) = self
            .shared
            .state
            .transition(WorkerState::Uninitialized, WorkerState::Provisioning)
        {
            return self.reject(DiffusionError::invalid_operation(format!(
                "context already initialized (state: {})",
                observed
            )));
        }

        let provisioner = match self.provisioner.lock().take() {
            Some(provisioner) => provisioner,
            None => {
                return self.reject(DiffusionError::invalid_operation(
                    "engine provisioner already consumed",
                ))
            }
        };

        let (tx, rx) = channel::bounded(1);
        match worker::spawn(self.shared.clone(), self.config.clone(), provisioner, rx) {
            Ok(handle) => {
                *self.commands.lock() = Some(tx);
                *self.worker.lock() = Some(handle);
                info!(thread = worker::WORKER_THREAD_NAME, "Diffusion worker spawned");
                Ok(())
            }
            Err(e) => {
                self.shared.state.store(WorkerState::Failed);
                self.reject(e)
            }
        }
    }

    /// Stop the worker and return its outcome.
    ///
    /// Waits for an in-flight run to finish. Returns the provisioning error if
    /// the engine never became ready.
    pub fn shutdown(self) -> DiffusionResult<()> {
        self.stop_worker()
    }

    fn stop_worker(&self) -> DiffusionResult<()> {
        drop(self.commands.lock().take());
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| DiffusionError::failed_operation("diffusion worker panicked"))?,
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Conditioning and runs
    // -----------------------------------------------------------------------

    /// Record that cell `(x, y, z)` of the next run holds `label`.
    pub fn set_conditioning_cell(
        &self,
        x: usize,
        y: usize,
        z: usize,
        label: LabelId,
    ) -> DiffusionResult<()> {
        let result = self.conditioning.lock().set_cell(x, y, z, label);
        match result {
            Ok(()) => Ok(()),
            Err(e) => self.reject(e),
        }
    }

    /// Accept a new run using the accumulated conditioning.
    ///
    /// Fails with `InvalidOperation` when a run is already accepted or
    /// active, before [`initialize`](Self::initialize), or after provisioning
    /// failed. On success progress reads `T` until the first outer step
    /// completes.
    #[instrument(skip(self))]
    pub fn start_run(&self) -> DiffusionResult<()> {
        let state = self.state();
        if !state.is_usable() {
            return self.reject(DiffusionError::invalid_operation(format!(
                "cannot start a run while {}",
                state
            )));
        }

        if self
            .shared
            .run_accepted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.reject(DiffusionError::invalid_operation("a run is already active"));
        }

        let conditioning = self.conditioning.lock().take();
        let cells = conditioning.cells_written;
        self.shared.progress.publish(self.config.timesteps);

        let sent = match self.commands.lock().as_ref() {
            Some(tx) => tx.try_send(Command::Start(conditioning)),
            None => Err(TrySendError::Disconnected(Command::Start(conditioning))),
        };

        match sent {
            Ok(()) => {
                info!(
                    conditioning_cells = cells,
                    timesteps = self.config.timesteps,
                    "Diffusion run accepted"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.run_accepted.store(false, Ordering::Release);
                let Command::Start(conditioning) = e.into_inner();
                self.conditioning.lock().restore(conditioning);
                self.reject(DiffusionError::invalid_operation(
                    "diffusion worker is not accepting runs",
                ))
            }
        }
    }

    /// Whether a run is accepted or executing
    pub fn is_run_active(&self) -> bool {
        self.shared.run_accepted.load(Ordering::Acquire) && self.state() != WorkerState::Failed
    }

    /// Block until no run is active or the engine is unusable, up to
    /// `timeout`. Returns `true` when idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if state == WorkerState::Failed {
                return false;
            }
            if state == WorkerState::Idle && !self.is_run_active() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_POLL_INTERVAL);
        }
    }

    // -----------------------------------------------------------------------
    // Progress and results
    // -----------------------------------------------------------------------

    /// Current timestep of the active or last run.
    ///
    /// `None` until the schedule is ready. A lock-free read.
    pub fn current_timestep(&self) -> Option<usize> {
        self.shared.progress.get()
    }

    /// Copy the working volume, classify it and cache the labels.
    ///
    /// Returns the progress at the moment of the copy.
    pub fn capture_snapshot(&self) -> DiffusionResult<usize> {
        let state = self.state();
        if !state.is_usable() {
            return self.reject(DiffusionError::invalid_operation(format!(
                "cannot capture a snapshot while {}",
                state
            )));
        }

        let result = self
            .snapshot
            .lock()
            .capture(&self.shared.volume, &self.shared.progress);
        match result {
            Ok(progress) => Ok(progress),
            Err(e) => self.reject(e),
        }
    }

    /// Cached label at interior coordinates, each in `0..INTERIOR_WIDTH`.
    pub fn read_label(&self, x: usize, y: usize, z: usize) -> DiffusionResult<LabelId> {
        let result = self.snapshot.lock().label(x, y, z);
        match result {
            Ok(label) => Ok(label),
            Err(e) => self.reject(e),
        }
    }

    /// Copy of the whole cached label grid
    pub fn snapshot_labels(&self) -> LabelGrid {
        self.snapshot.lock().labels().clone()
    }

    /// Value statistics of the cached snapshot volume
    pub fn snapshot_stats(&self) -> VolumeStats {
        self.snapshot.lock().volume().stats()
    }

    /// Most recent failure, `ErrorCode::None` if nothing failed yet
    pub fn last_error(&self) -> ErrorCode {
        self.shared.last_error.get()
    }

    /// Worker lifecycle state
    pub fn state(&self) -> WorkerState {
        self.shared.state.load()
    }

    /// Engine step latency statistics
    pub fn step_stats(&self) -> StepStats {
        self.shared.stats.read().clone()
    }
}

impl Drop for DiffusionContext {
    fn drop(&mut self) {
        if let Err(e) = self.stop_worker() {
            warn!(error = %e, "Diffusion worker ended with an error");
        }
    }
}
