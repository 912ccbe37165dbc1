//! Label embedding table.
//!
//! Every discrete voxel label owns a fixed point in a small continuous space.
//! Conditioning writes place a label's point into the context volume; the
//! classifier maps continuous output back to the nearest point.
//!
//! The table contains duplicate points (for example ids 26 and 50). Lookups
//! by proximity always resolve to the lowest id.

use crate::error::{DiffusionError, DiffusionResult};
use crate::{EMBEDDING_DIMENSIONS, LABEL_COUNT};

/// Identifier of a discrete voxel label, in `0..LABEL_COUNT`.
pub type LabelId = u32;

/// The label written for empty space.
pub const EMPTY_LABEL: LabelId = 0;

#[rustfmt::skip]
const EMBEDDINGS: [[f32; EMBEDDING_DIMENSIONS]; LABEL_COUNT] = [
    [ 0.0,  0.0,  0.0], [-2.0, -1.0,  0.1], [ 2.0, -1.0,  0.2], [ 0.0, -1.0, -0.1],
    [-2.0,  2.0, -1.0], [-2.0, -1.0, -0.2], [ 0.0, -1.0, -0.3], [-2.0, -1.0,  0.4],
    [ 2.0,  2.0,  2.0], [ 2.0, -1.0,  0.5], [-2.0,  2.0,  0.0], [ 2.0,  0.0, -0.5],
    [ 0.0, -1.0, -0.6], [-1.5,  1.0,  0.6], [ 2.0,  0.0,  0.7], [-2.0, -1.0, -0.7],
    [ 0.0, -1.0,  0.8], [ 0.0, -1.0, -0.8], [ 0.0, -1.0, -0.9], [ 0.0, -1.0,  0.9],
    [ 0.0, -1.0, -1.0], [ 0.0, -1.0,  1.0], [ 0.0, -1.0,  0.0], [-2.0,  0.0,  0.1],
    [ 2.0,  0.0, -1.1], [-2.0, -1.0, -1.2], [ 0.0, -1.0,  1.1], [ 0.0, -1.0, -1.3],
    [ 0.0, -1.0,  1.2], [ 0.0, -1.0, -1.4], [-2.0,  1.0, -1.5], [ 0.5,  0.0,  0.5],
    [ 0.5,  1.0,  0.5], [ 0.5,  0.0,  1.5], [ 0.5,  1.0,  1.5], [ 0.0,  0.5,  1.5],
    [ 0.0,  0.5,  0.5], [ 1.0,  0.5,  1.5], [ 1.0,  0.5,  0.5], [-3.0,  1.0, -2.0],
    [-2.0,  1.0,  1.7], [ 1.5,  1.0, -0.5], [ 1.5,  2.0, -0.5], [ 1.5,  1.0, -1.5],
    [ 1.5,  2.0, -1.5], [ 2.0,  1.5, -0.5], [ 2.0,  1.5, -1.5], [ 1.0,  1.5, -0.5],
    [ 1.0,  1.5, -1.5], [ 0.0, -2.0,  1.0], [ 0.0, -1.0,  1.1], [ 0.0, -1.0, -1.1],
    [ 2.0,  0.0, -1.2], [ 0.0, -1.0,  1.2], [ 0.0, -1.0, -1.3], [ 0.0, -1.0,  1.3],
    [ 0.0, -1.0, -1.4], [ 0.0, -1.0,  1.4], [ 0.0, -1.0, -1.5], [ 2.0,  0.0,  1.2],
    [ 2.0,  0.0, -1.6], [ 2.0,  0.0,  1.3], [ 2.0,  0.0, -1.7], [ 2.0,  0.0,  1.4],
    [ 2.0,  0.0, -1.8], [ 2.0,  0.0,  1.5], [ 2.0,  0.0, -1.9], [ 2.0,  0.0,  1.6],
    [ 2.0,  0.0, -2.0], [ 2.0,  0.0,  1.7], [ 2.0,  0.0, -2.1], [ 0.0, -1.0, -2.2],
    [ 0.0, -1.0,  1.8], [ 0.0, -1.0, -2.3], [ 0.0, -1.0,  1.9], [ 0.0, -1.0, -2.4],
    [ 0.0, -1.0,  2.0], [ 0.0, -1.0, -2.5], [ 0.0, -1.0,  2.1], [ 0.0, -1.0, -2.6],
    [ 0.0, -1.0,  2.2], [ 0.0, -1.0, -2.7], [ 0.0, -1.0,  2.3], [ 0.0, -1.0, -2.8],
    [ 0.0, -1.0,  2.4], [ 0.0, -1.0, -2.9], [ 0.0, -1.0,  2.5], [ 0.0, -1.0, -3.0],
    [ 0.0, -1.0,  2.6], [ 0.0, -1.0, -3.1], [ 0.0, -1.0,  2.7], [ 0.0, -1.0, -3.2],
    [ 0.0, -1.0,  2.8], [ 0.0, -1.0, -3.3], [ 0.0, -1.0,  2.9], [ 2.0,  0.0, -3.4],
];

/// The fixed embedding table.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddingTable;

impl EmbeddingTable {
    /// Number of labels in the vocabulary
    pub const fn len(&self) -> usize {
        LABEL_COUNT
    }

    /// Always false
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Embedding vector of `label`, or `None` when out of range
    pub fn get(&self, label: LabelId) -> Option<&'static [f32; EMBEDDING_DIMENSIONS]> {
        EMBEDDINGS.get(label as usize)
    }

    /// All embeddings in id order
    pub fn entries(&self) -> &'static [[f32; EMBEDDING_DIMENSIONS]] {
        &EMBEDDINGS
    }

    /// Embedding vector of `label`, failing with `InvalidArgument` when out
    /// of range.
    pub fn lookup(&self, label: LabelId) -> DiffusionResult<&'static [f32; EMBEDDING_DIMENSIONS]> {
        self.get(label).ok_or_else(|| {
            DiffusionError::invalid_argument(format!(
                "label {} out of range 0..{}",
                label, LABEL_COUNT
            ))
        })
    }
}

/// Check that `label` is a valid vocabulary id
pub fn validate_label(label: LabelId) -> DiffusionResult<()> {
    EmbeddingTable.lookup(label).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size() {
        assert_eq!(EmbeddingTable.len(), 96);
        assert_eq!(EmbeddingTable.entries().len(), 96);
    }

    #[test]
    fn test_known_entries() {
        assert_eq!(EmbeddingTable.get(EMPTY_LABEL), Some(&[0.0, 0.0, 0.0]));
        assert_eq!(EmbeddingTable.get(1), Some(&[-2.0, -1.0, 0.1]));
        assert_eq!(EmbeddingTable.get(95), Some(&[2.0, 0.0, -3.4]));
        assert_eq!(EmbeddingTable.get(96), None);
    }

    #[test]
    fn test_duplicates_exist() {
        assert_eq!(EmbeddingTable.get(26), EmbeddingTable.get(50));
    }

    #[test]
    fn test_validate_label() {
        assert!(validate_label(0).is_ok());
        assert!(validate_label(95).is_ok());
        assert!(validate_label(96).is_err());
    }
}
