//! Nearest-label classification.
//!
//! Converts continuous embedding-space output back into discrete labels by
//! picking the closest table entry under squared Euclidean distance. Entries
//! are scanned in id order with a strict `<` so ties go to the lowest id.

use crate::embedding::{EmbeddingTable, LabelId, EMPTY_LABEL};
use crate::error::{DiffusionError, DiffusionResult};
use crate::volume::Volume;
use crate::{EMBEDDING_DIMENSIONS, INTERIOR_WIDTH, LABEL_COUNT};
use ndarray::Array3;

/// Label of the table entry closest to `cell`.
///
/// Cells containing non-finite values classify as [`EMPTY_LABEL`].
pub fn nearest_label(cell: &[f32; EMBEDDING_DIMENSIONS]) -> LabelId {
    if cell.iter().any(|v| !v.is_finite()) {
        return EMPTY_LABEL;
    }

    let mut best = EMPTY_LABEL;
    let mut best_distance = f32::INFINITY;
    for (id, entry) in EmbeddingTable.entries().iter().enumerate() {
        let distance: f32 = entry
            .iter()
            .zip(cell.iter())
            .map(|(e, c)| (c - e) * (c - e))
            .sum();
        if distance < best_distance {
            best_distance = distance;
            best = id as LabelId;
        }
    }
    best
}

/// Classify every interior cell of an embedding volume.
///
/// The one-cell border is context padding and is skipped; grid index
/// `(x, y, z)` corresponds to volume cell `(x + 1, y + 1, z + 1)`.
pub fn classify_interior(volume: &Volume) -> DiffusionResult<LabelGrid> {
    if volume.channels() != EMBEDDING_DIMENSIONS {
        return Err(DiffusionError::shape_mismatch(
            vec![EMBEDDING_DIMENSIONS],
            vec![volume.channels()],
        ));
    }

    let data = volume.as_array();
    let labels = Array3::from_shape_fn(
        (INTERIOR_WIDTH, INTERIOR_WIDTH, INTERIOR_WIDTH),
        |(x, y, z)| {
            let mut cell = [0.0f32; EMBEDDING_DIMENSIONS];
            for (c, value) in cell.iter_mut().enumerate() {
                *value = data[[c, x + 1, y + 1, z + 1]];
            }
            nearest_label(&cell)
        },
    );
    Ok(LabelGrid { labels })
}

/// A cube of classified interior labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGrid {
    labels: Array3<LabelId>,
}

impl Default for LabelGrid {
    fn default() -> Self {
        Self::empty()
    }
}

impl LabelGrid {
    /// Grid with every cell set to [`EMPTY_LABEL`]
    pub fn empty() -> Self {
        Self {
            labels: Array3::from_elem(
                (INTERIOR_WIDTH, INTERIOR_WIDTH, INTERIOR_WIDTH),
                EMPTY_LABEL,
            ),
        }
    }

    /// Label at interior coordinates, each in `0..INTERIOR_WIDTH`.
    pub fn get(&self, x: usize, y: usize, z: usize) -> DiffusionResult<LabelId> {
        self.labels.get([x, y, z]).copied().ok_or_else(|| {
            DiffusionError::invalid_argument(format!(
                "interior coordinate ({}, {}, {}) out of range 0..{}",
                x, y, z, INTERIOR_WIDTH
            ))
        })
    }

    /// Underlying array
    pub fn as_array(&self) -> &Array3<LabelId> {
        &self.labels
    }

    /// Sum of all label ids, a cheap fingerprint of the grid
    pub fn label_sum(&self) -> u64 {
        self.labels.iter().map(|&l| u64::from(l)).sum()
    }

    /// Number of cells per label id
    pub fn histogram(&self) -> [usize; LABEL_COUNT] {
        let mut counts = [0usize; LABEL_COUNT];
        for &label in self.labels.iter() {
            if let Some(slot) = counts.get_mut(label as usize) {
                *slot += 1;
            }
        }
        counts
    }
}
