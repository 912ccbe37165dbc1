//! Conditioning accumulator.
//!
//! The host describes known cells one at a time before a run starts. Each
//! write places the label's embedding into the context volume and marks the
//! cell in the mask. The accumulated pair is handed to the worker as a unit
//! when a run is accepted, leaving the accumulator zeroed for the next run.

use crate::embedding::{EmbeddingTable, LabelId};
use crate::error::{DiffusionError, DiffusionResult};
use crate::volume::Volume;
use crate::{CHUNK_WIDTH, EMBEDDING_DIMENSIONS};

/// Context and mask volumes handed to a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditioning {
    /// Embeddings of host-supplied cells, zero elsewhere
    pub context: Volume,
    /// 1 for host-supplied cells, 0 elsewhere
    pub mask: Volume,
    /// Number of writes that produced this conditioning
    pub cells_written: usize,
}

impl Default for Conditioning {
    fn default() -> Self {
        Self {
            context: Volume::zeros(EMBEDDING_DIMENSIONS),
            mask: Volume::zeros(1),
            cells_written: 0,
        }
    }
}

impl Conditioning {
    /// Mark every interior cell as free for the model to fill.
    pub fn open_interior(&mut self) -> DiffusionResult<()> {
        self.mask.fill_interior(0, 1.0)
    }
}

/// Collects single-cell conditioning writes between runs.
#[derive(Debug, Default)]
pub struct ConditioningAccumulator {
    pending: Conditioning,
}

impl ConditioningAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that cell `(x, y, z)` holds `label`.
    ///
    /// Coordinates must be in `0..CHUNK_WIDTH` and the label a valid id.
    /// Invalid input is rejected before anything is written.
    pub fn set_cell(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        label: LabelId,
    ) -> DiffusionResult<()> {
        if x >= CHUNK_WIDTH || y >= CHUNK_WIDTH || z >= CHUNK_WIDTH {
            return Err(DiffusionError::invalid_argument(format!(
                "cell ({}, {}, {}) out of range 0..{}",
                x, y, z, CHUNK_WIDTH
            )));
        }
        let embedding = EmbeddingTable.lookup(label)?;

        for (c, value) in embedding.iter().enumerate() {
            self.pending.context.set(c, x, y, z, *value)?;
        }
        self.pending.mask.set(0, x, y, z, 1.0)?;
        self.pending.cells_written += 1;
        Ok(())
    }

    /// Number of writes since the last take
    pub fn cells_written(&self) -> usize {
        self.pending.cells_written
    }

    /// Read-only view of the pending conditioning
    pub fn pending(&self) -> &Conditioning {
        &self.pending
    }

    /// Hand over the accumulated conditioning and reset to zero.
    pub fn take(&mut self) -> Conditioning {
        std::mem::take(&mut self.pending)
    }

    /// Put back conditioning from a run that was never started.
    pub(crate) fn restore(&mut self, conditioning: Conditioning) {
        self.pending = conditioning;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_cell_writes_embedding_and_mask() {
        let mut acc = ConditioningAccumulator::new();
        acc.set_cell(0, 15, 3, 2).unwrap();

        let pending = acc.pending();
        assert_eq!(pending.context.get(0, 0, 15, 3), Some(2.0));
        assert_eq!(pending.context.get(1, 0, 15, 3), Some(-1.0));
        assert_eq!(pending.context.get(2, 0, 15, 3), Some(0.2));
        assert_eq!(pending.mask.get(0, 0, 15, 3), Some(1.0));
        assert_eq!(acc.cells_written(), 1);
    }

    #[test]
    fn test_rejects_out_of_range_without_mutation() {
        let mut acc = ConditioningAccumulator::new();
        assert!(acc.set_cell(16, 0, 0, 1).is_err());
        assert!(acc.set_cell(0, 16, 0, 1).is_err());
        assert!(acc.set_cell(0, 0, 16, 1).is_err());
        assert!(acc.set_cell(0, 0, 0, 96).is_err());
        assert_eq!(acc.pending(), &Conditioning::default());
        assert_eq!(acc.cells_written(), 0);
    }

    #[test]
    fn test_overwrite() {
        let mut acc = ConditioningAccumulator::new();
        acc.set_cell(4, 4, 4, 1).unwrap();
        acc.set_cell(4, 4, 4, 8).unwrap();
        assert_eq!(acc.pending().context.get(0, 4, 4, 4), Some(2.0));
        assert_eq!(acc.pending().context.get(2, 4, 4, 4), Some(2.0));
    }

    #[test]
    fn test_take_resets() {
        let mut acc = ConditioningAccumulator::new();
        acc.set_cell(1, 2, 3, 4).unwrap();
        let taken = acc.take();
        assert_eq!(taken.mask.get(0, 1, 2, 3), Some(1.0));
        assert_eq!(acc.pending(), &Conditioning::default());
        assert_eq!(acc.cells_written(), 0);
    }

    #[test]
    fn test_open_interior_keeps_border() {
        let mut cond = Conditioning::default();
        cond.open_interior().unwrap();
        assert_eq!(cond.mask.get(0, 7, 7, 7), Some(1.0));
        assert_eq!(cond.mask.get(0, 0, 7, 7), Some(0.0));
    }
}
