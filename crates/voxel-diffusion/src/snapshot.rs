//! Host-side snapshot cache.
//!
//! A capture copies the shared working volume while holding its lock, then
//! classifies the private copy with the lock released so the worker is only
//! blocked for the duration of a memcpy.

use crate::classifier::{classify_interior, LabelGrid};
use crate::embedding::LabelId;
use crate::error::DiffusionResult;
use crate::status::Progress;
use crate::volume::Volume;
use crate::EMBEDDING_DIMENSIONS;
use parking_lot::Mutex;

/// Last captured volume and its labels
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    volume: Volume,
    labels: LabelGrid,
    captured_at: Option<usize>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self {
            volume: Volume::zeros(EMBEDDING_DIMENSIONS),
            labels: LabelGrid::empty(),
            captured_at: None,
        }
    }
}

impl SnapshotCache {
    /// Copy `working` and refresh the label grid.
    ///
    /// Returns the progress observed while the working volume was locked, or
    /// 0 when the schedule is not ready yet.
    pub(crate) fn capture(
        &mut self,
        working: &Mutex<Volume>,
        progress: &Progress,
    ) -> DiffusionResult<usize> {
        let observed = {
            let guard = working.lock();
            self.volume.copy_from(&guard)?;
            progress.get().unwrap_or(0)
        };

        self.labels = classify_interior(&self.volume)?;
        self.captured_at = Some(observed);
        Ok(observed)
    }

    /// Label at interior coordinates of the last capture
    pub fn label(&self, x: usize, y: usize, z: usize) -> DiffusionResult<LabelId> {
        self.labels.get(x, y, z)
    }

    /// Labels of the last capture
    pub fn labels(&self) -> &LabelGrid {
        &self.labels
    }

    /// Volume of the last capture
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// Progress at the last capture, `None` before the first
    pub fn captured_at(&self) -> Option<usize> {
        self.captured_at
    }
}
