//! Lock-free status cells shared between the host and the worker.

use crate::error::ErrorCode;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU8, Ordering};

// ---------------------------------------------------------------------------
// WorkerState
// ---------------------------------------------------------------------------

/// Lifecycle of the background worker.
///
/// `Uninitialized -> Provisioning -> Idle <-> Running`, with `Failed` entered
/// only when provisioning fails. `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    /// `initialize` has not been called
    Uninitialized = 0,
    /// The worker is building its engine
    Provisioning = 1,
    /// Waiting for a start command
    Idle = 2,
    /// Executing a run
    Running = 3,
    /// Provisioning failed; the engine is disabled
    Failed = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WorkerState::Provisioning,
            2 => WorkerState::Idle,
            3 => WorkerState::Running,
            4 => WorkerState::Failed,
            _ => WorkerState::Uninitialized,
        }
    }

    /// Whether the engine can still serve runs and snapshots
    pub fn is_usable(self) -> bool {
        !matches!(self, WorkerState::Uninitialized | WorkerState::Failed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Uninitialized => "uninitialized",
            WorkerState::Provisioning => "provisioning",
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Atomic holder of a [`WorkerState`]
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: WorkerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `current` to `new`, returning the observed state on failure.
    pub(crate) fn transition(
        &self,
        current: WorkerState,
        new: WorkerState,
    ) -> Result<(), WorkerState> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(WorkerState::from_u8)
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

const PROGRESS_UNSET: i64 = -1;

/// The current timestep of the active or last run.
///
/// Unset until the schedule is ready, then `T` when a run is accepted and
/// counting down to 0 as outer steps complete.
#[derive(Debug)]
pub(crate) struct Progress(AtomicI64);

impl Progress {
    pub(crate) fn new() -> Self {
        Self(AtomicI64::new(PROGRESS_UNSET))
    }

    pub(crate) fn get(&self) -> Option<usize> {
        let value = self.0.load(Ordering::Acquire);
        usize::try_from(value).ok()
    }

    pub(crate) fn publish(&self, timestep: usize) {
        self.0.store(timestep as i64, Ordering::Release);
    }

    /// Set to 0 if still unset. A run accepted early keeps its value.
    pub(crate) fn mark_ready(&self) {
        let _ = self
            .0
            .compare_exchange(PROGRESS_UNSET, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

// ---------------------------------------------------------------------------
// LastError
// ---------------------------------------------------------------------------

/// Most recent failure code. Successes do not clear it.
#[derive(Debug)]
pub(crate) struct LastError(AtomicI32);

impl LastError {
    pub(crate) fn new() -> Self {
        Self(AtomicI32::new(ErrorCode::None.code()))
    }

    pub(crate) fn record(&self, code: ErrorCode) {
        self.0.store(code.code(), Ordering::Release);
    }

    pub(crate) fn get(&self) -> ErrorCode {
        ErrorCode::from_code(self.0.load(Ordering::Acquire)).unwrap_or(ErrorCode::FailedOperation)
    }
}
