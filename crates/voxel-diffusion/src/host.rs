//! Integer status API for foreign hosts.
//!
//! [`HostBridge`] exposes the context through plain `i32` calls so it can sit
//! behind a C or JNI boundary. Status-returning calls return 0 on success or
//! an [`ErrorCode`] value. Value-returning calls return the value, or `-1`
//! with the cause recorded in the last-error slot.

use crate::context::DiffusionContext;
use crate::embedding::LabelId;
use crate::error::{DiffusionError, DiffusionResult, ErrorCode};

/// Returned by value-producing calls on failure
pub const HOST_FAILURE: i32 = -1;

/// `i32` facade over a [`DiffusionContext`]
#[derive(Debug)]
pub struct HostBridge {
    ctx: DiffusionContext,
}

fn status(result: DiffusionResult<()>) -> i32 {
    match result {
        Ok(()) => ErrorCode::None.code(),
        Err(e) => e.code().code(),
    }
}

fn to_index(value: i32, what: &str) -> DiffusionResult<usize> {
    usize::try_from(value).map_err(|_| {
        DiffusionError::invalid_argument(format!("{} must be >= 0, got {}", what, value))
    })
}

fn to_coords(x: i32, y: i32, z: i32) -> DiffusionResult<(usize, usize, usize)> {
    Ok((to_index(x, "x")?, to_index(y, "y")?, to_index(z, "z")?))
}

impl HostBridge {
    /// Wrap a context
    pub fn new(ctx: DiffusionContext) -> Self {
        Self { ctx }
    }

    /// Underlying context
    pub fn context(&self) -> &DiffusionContext {
        &self.ctx
    }

    /// Release the context
    pub fn into_inner(self) -> DiffusionContext {
        self.ctx
    }

    /// Spawn the worker. 0 or an error code.
    pub fn initialize(&self) -> i32 {
        status(self.ctx.initialize())
    }

    /// Write one conditioning cell. 0 or an error code.
    pub fn set_conditioning_cell(&self, x: i32, y: i32, z: i32, label: i32) -> i32 {
        let parsed = to_coords(x, y, z).and_then(|coords| {
            let label = LabelId::try_from(label).map_err(|_| {
                DiffusionError::invalid_argument(format!("label must be >= 0, got {}", label))
            })?;
            Ok((coords, label))
        });

        let result = match parsed {
            Ok(((x, y, z), label)) => self.ctx.set_conditioning_cell(x, y, z, label),
            Err(e) => self.ctx.reject(e),
        };
        status(result)
    }

    /// Start a run. 0 or an error code.
    pub fn start_run(&self) -> i32 {
        status(self.ctx.start_run())
    }

    /// Current timestep in `[0, T]`. Never fails.
    pub fn current_timestep(&self) -> i32 {
        self.ctx
            .current_timestep()
            .and_then(|t| i32::try_from(t).ok())
            .unwrap_or(0)
    }

    /// Capture and classify a snapshot. Progress at capture, or `-1`.
    pub fn capture_snapshot(&self) -> i32 {
        match self.ctx.capture_snapshot() {
            Ok(progress) => i32::try_from(progress).unwrap_or(i32::MAX),
            Err(_) => HOST_FAILURE,
        }
    }

    /// Cached label at interior coordinates, or `-1`.
    pub fn read_label(&self, x: i32, y: i32, z: i32) -> i32 {
        let result = match to_coords(x, y, z) {
            Ok((x, y, z)) => self.ctx.read_label(x, y, z),
            Err(e) => self.ctx.reject(e),
        };
        match result {
            Ok(label) => i32::try_from(label).unwrap_or(HOST_FAILURE),
            Err(_) => HOST_FAILURE,
        }
    }

    /// Most recent error code, 0 if none
    pub fn last_error(&self) -> i32 {
        self.ctx.last_error().code()
    }
}
