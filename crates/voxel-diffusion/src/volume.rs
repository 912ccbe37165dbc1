//! Dense voxel volumes.
//!
//! A [`Volume`] is a `channels x W x W x W` block of `f32` values stored as a
//! single contiguous `ndarray` buffer in `[channel][x][y][z]` order, the
//! layout the exported model consumes. Accessors are bounds-checked.

use crate::error::{DiffusionError, DiffusionResult};
use crate::CHUNK_WIDTH;
use ndarray::{s, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shape of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeShape {
    /// Number of channels
    pub channels: usize,
    /// Edge length of the cube
    pub width: usize,
}

impl VolumeShape {
    /// Shape with `channels` channels over a full chunk
    pub fn chunk(channels: usize) -> Self {
        Self {
            channels,
            width: CHUNK_WIDTH,
        }
    }

    /// Dimensions in storage order
    pub fn dims(&self) -> [usize; 4] {
        [self.channels, self.width, self.width, self.width]
    }

    /// Total number of elements
    pub fn numel(&self) -> usize {
        self.channels * self.width * self.width * self.width
    }
}

impl fmt::Display for VolumeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.channels, self.width, self.width, self.width
        )
    }
}

/// A multi-channel cube of `f32` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array4<f32>,
}

impl Volume {
    /// Zero-filled chunk volume with `channels` channels
    pub fn zeros(channels: usize) -> Self {
        Self {
            data: Array4::zeros(VolumeShape::chunk(channels).dims()),
        }
    }

    /// Wrap an existing array. All three spatial axes must be `CHUNK_WIDTH`.
    pub fn from_array(data: Array4<f32>) -> DiffusionResult<Self> {
        let (c, x, y, z) = data.dim();
        if x != CHUNK_WIDTH || y != CHUNK_WIDTH || z != CHUNK_WIDTH {
            return Err(DiffusionError::shape_mismatch(
                VolumeShape::chunk(c).dims().to_vec(),
                vec![c, x, y, z],
            ));
        }
        Ok(Self {
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// Shape of this volume
    pub fn shape(&self) -> VolumeShape {
        VolumeShape {
            channels: self.data.dim().0,
            width: self.data.dim().1,
        }
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Read one value, `None` when out of bounds
    pub fn get(&self, c: usize, x: usize, y: usize, z: usize) -> Option<f32> {
        self.data.get([c, x, y, z]).copied()
    }

    /// Write one value
    pub fn set(
        &mut self,
        c: usize,
        x: usize,
        y: usize,
        z: usize,
        value: f32,
    ) -> DiffusionResult<()> {
        let shape = self.shape();
        match self.data.get_mut([c, x, y, z]) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(DiffusionError::invalid_argument(format!(
                "index ({}, {}, {}, {}) out of bounds for volume {}",
                c, x, y, z, shape
            ))),
        }
    }

    /// Set every element
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Set every element of `channel` strictly inside the one-cell border.
    pub fn fill_interior(&mut self, channel: usize, value: f32) -> DiffusionResult<()> {
        if channel >= self.channels() {
            return Err(DiffusionError::invalid_argument(format!(
                "channel {} out of range for volume {}",
                channel,
                self.shape()
            )));
        }
        let w = self.shape().width;
        self.data
            .slice_mut(s![channel, 1..w - 1, 1..w - 1, 1..w - 1])
            .fill(value);
        Ok(())
    }

    /// Overwrite this volume with the contents of `other`.
    pub fn copy_from(&mut self, other: &Volume) -> DiffusionResult<()> {
        if self.shape() != other.shape() {
            return Err(DiffusionError::shape_mismatch(
                self.shape().dims().to_vec(),
                other.shape().dims().to_vec(),
            ));
        }
        self.data.assign(&other.data);
        Ok(())
    }

    /// Swap contents with a volume of identical shape.
    pub fn swap(&mut self, other: &mut Volume) {
        std::mem::swap(&mut self.data, &mut other.data);
    }

    /// Contiguous storage in `[channel][x][y][z]` order
    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .unwrap_or_else(|| unreachable!("volumes are always in standard layout"))
    }

    /// Mutable contiguous storage
    pub fn as_slice_mut(&mut self) -> &mut [f32] {
        self.data
            .as_slice_mut()
            .unwrap_or_else(|| unreachable!("volumes are always in standard layout"))
    }

    /// Underlying array
    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// Summary statistics over every element
    pub fn stats(&self) -> VolumeStats {
        let n = self.data.len() as f32;
        let mean = self.data.sum() / n;
        let var = self.data.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let min = self.data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        VolumeStats {
            mean,
            std: var.sqrt(),
            min,
            max,
        }
    }
}

/// Statistics about a volume
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    /// Mean value
    pub mean: f32,
    /// Standard deviation
    pub std: f32,
    /// Minimum value
    pub min: f32,
    /// Maximum value
    pub max: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_shape() {
        let v = Volume::zeros(3);
        assert_eq!(v.shape().dims(), [3, 16, 16, 16]);
        assert_eq!(v.as_slice().len(), 3 * 16 * 16 * 16);
        assert_eq!(v.shape().to_string(), "[3, 16, 16, 16]");
    }

    #[test]
    fn test_set_get_bounds() {
        let mut v = Volume::zeros(1);
        v.set(0, 15, 0, 7, 2.5).unwrap();
        assert_eq!(v.get(0, 15, 0, 7), Some(2.5));
        assert!(v.set(0, 16, 0, 0, 1.0).is_err());
        assert!(v.set(1, 0, 0, 0, 1.0).is_err());
        assert_eq!(v.get(0, 0, 16, 0), None);
    }

    #[test]
    fn test_storage_order_is_channel_major() {
        let mut v = Volume::zeros(2);
        v.set(1, 0, 0, 1, 4.0).unwrap();
        let idx = 16 * 16 * 16 + 1;
        assert_eq!(v.as_slice()[idx], 4.0);
    }

    #[test]
    fn test_fill_interior_leaves_border() {
        let mut v = Volume::zeros(1);
        v.fill_interior(0, 1.0).unwrap();
        assert_eq!(v.get(0, 1, 1, 1), Some(1.0));
        assert_eq!(v.get(0, 14, 14, 14), Some(1.0));
        assert_eq!(v.get(0, 0, 5, 5), Some(0.0));
        assert_eq!(v.get(0, 5, 15, 5), Some(0.0));
        let ones = v.as_slice().iter().filter(|&&x| x == 1.0).count();
        assert_eq!(ones, 14 * 14 * 14);
        assert!(v.fill_interior(1, 1.0).is_err());
    }

    #[test]
    fn test_copy_from_checks_shape() {
        let mut a = Volume::zeros(3);
        let mut b = Volume::zeros(3);
        b.fill(0.5);
        a.copy_from(&b).unwrap();
        assert_eq!(a, b);
        assert!(a.copy_from(&Volume::zeros(1)).is_err());
    }

    #[test]
    fn test_from_array_rejects_wrong_width() {
        assert!(Volume::from_array(Array4::zeros((3, 8, 16, 16))).is_err());
        assert!(Volume::from_array(Array4::zeros((3, 16, 16, 16))).is_ok());
    }

    #[test]
    fn test_stats() {
        let mut v = Volume::zeros(1);
        v.fill(2.0);
        let stats = v.stats();
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 2.0);
    }
}
