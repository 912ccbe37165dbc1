//! Noise schedule precomputation.
//!
//! The schedule interpolates linearly in `sqrt(beta)` space between
//! `beta_min` and `beta_max`, then derives `alpha = 1 - beta` and its running
//! product `alpha_bar`. All arithmetic is single precision so the values fed
//! to the engine match the ones the model was exported with.

use crate::config::DiffusionConfig;
use crate::error::{DiffusionError, DiffusionResult};

/// Coefficients for a single timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleStep {
    /// `1 - beta`
    pub alpha: f32,
    /// Noise variance at this step
    pub beta: f32,
    /// Product of `alpha` over steps `0..=t`
    pub alpha_bar: f32,
}

/// Precomputed per-timestep coefficients.
#[derive(Debug, Clone)]
pub struct NoiseSchedule {
    alpha: Vec<f32>,
    beta: Vec<f32>,
    alpha_bar: Vec<f32>,
}

impl NoiseSchedule {
    /// Compute a schedule with `timesteps` entries.
    ///
    /// # Errors
    ///
    /// Returns [`DiffusionError::Config`] when `timesteps < 2` or the betas
    /// fall outside `0 < beta_min <= beta_max < 1`.
    pub fn new(beta_min: f32, beta_max: f32, timesteps: usize) -> DiffusionResult<Self> {
        if timesteps < 2 {
            return Err(DiffusionError::config("timesteps", "must be >= 2"));
        }
        if !(beta_min.is_finite() && beta_max.is_finite()) {
            return Err(DiffusionError::config("beta_min", "betas must be finite"));
        }
        if beta_min <= 0.0 || beta_max >= 1.0 || beta_min > beta_max {
            return Err(DiffusionError::config(
                "beta_min",
                format!(
                    "require 0 < beta_min <= beta_max < 1, got {} and {}",
                    beta_min, beta_max
                ),
            ));
        }

        let start = beta_min.sqrt();
        let end = beta_max.sqrt();
        let step = (end - start) / (timesteps - 1) as f32;

        let beta: Vec<f32> = (0..timesteps)
            .map(|i| {
                let root = start + step * i as f32;
                root * root
            })
            .collect();
        let alpha: Vec<f32> = beta.iter().map(|b| 1.0 - b).collect();

        let mut alpha_bar = Vec::with_capacity(timesteps);
        let mut running = 1.0f32;
        for a in &alpha {
            running *= a;
            alpha_bar.push(running);
        }

        Ok(Self {
            alpha,
            beta,
            alpha_bar,
        })
    }

    /// Compute the schedule described by a config.
    pub fn from_config(config: &DiffusionConfig) -> DiffusionResult<Self> {
        Self::new(config.beta_min, config.beta_max, config.timesteps)
    }

    /// Number of timesteps.
    pub fn len(&self) -> usize {
        self.beta.len()
    }

    /// Always false; a schedule has at least two entries.
    pub fn is_empty(&self) -> bool {
        self.beta.is_empty()
    }

    /// Coefficients at timestep `t`, or `None` past the end.
    pub fn at(&self, t: usize) -> Option<ScheduleStep> {
        Some(ScheduleStep {
            alpha: *self.alpha.get(t)?,
            beta: self.beta[t],
            alpha_bar: self.alpha_bar[t],
        })
    }

    /// All `alpha` values
    pub fn alpha(&self) -> &[f32] {
        &self.alpha
    }

    /// All `beta` values
    pub fn beta(&self) -> &[f32] {
        &self.beta
    }

    /// All `alpha_bar` values
    pub fn alpha_bar(&self) -> &[f32] {
        &self.alpha_bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_endpoints_match_betas() {
        let schedule = NoiseSchedule::new(1e-4, 0.02, 1000).unwrap();
        assert_eq!(schedule.len(), 1000);
        assert_abs_diff_eq!(schedule.beta()[0], 1e-4, epsilon = 1e-7);
        assert_abs_diff_eq!(schedule.beta()[999], 0.02, epsilon = 1e-6);
    }

    #[test]
    fn test_first_alpha_bar_equals_first_alpha() {
        let schedule = NoiseSchedule::new(1e-4, 0.02, 1000).unwrap();
        let first = schedule.at(0).unwrap();
        assert_eq!(first.alpha_bar, first.alpha);
        assert_eq!(first.alpha, 1.0 - first.beta);
    }

    #[test]
    fn test_alpha_bar_non_increasing() {
        for &t in &[2usize, 3, 10, 1000] {
            let schedule = NoiseSchedule::new(1e-4, 0.02, t).unwrap();
            for pair in schedule.alpha_bar().windows(2) {
                assert!(pair[1] <= pair[0], "alpha_bar increased for T={}", t);
            }
        }
    }

    #[test]
    fn test_equal_betas_give_constant_schedule() {
        let schedule = NoiseSchedule::new(0.01, 0.01, 4).unwrap();
        for b in schedule.beta() {
            assert_abs_diff_eq!(*b, 0.01, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(NoiseSchedule::new(1e-4, 0.02, 1).is_err());
        assert!(NoiseSchedule::new(0.0, 0.02, 10).is_err());
        assert!(NoiseSchedule::new(0.03, 0.02, 10).is_err());
        assert!(NoiseSchedule::new(1e-4, 1.0, 10).is_err());
        assert!(NoiseSchedule::new(f32::NAN, 0.02, 10).is_err());
    }

    #[test]
    fn test_at_past_end_is_none() {
        let schedule = NoiseSchedule::new(1e-4, 0.02, 10).unwrap();
        assert!(schedule.at(9).is_some());
        assert!(schedule.at(10).is_none());
    }
}
