//! Integration tests for [`voxel_diffusion::config`] and the schedule it
//! describes.

use approx::assert_abs_diff_eq;
use tempfile::TempDir;
use voxel_diffusion::config::{DiffusionConfig, EngineOptions};
use voxel_diffusion::{DiffusionError, NoiseSchedule};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// The default configuration must pass its own validation.
#[test]
fn default_config_is_valid() {
    DiffusionConfig::default()
        .validate()
        .expect("default DiffusionConfig must be valid");
}

/// Defaults match the exported model's training schedule.
#[test]
fn default_schedule_parameters() {
    let cfg = DiffusionConfig::default();
    assert_eq!(cfg.timesteps, 1000);
    assert_eq!(cfg.inpaint_steps, 5);
    assert_abs_diff_eq!(cfg.beta_min, 1e-4);
    assert_abs_diff_eq!(cfg.beta_max, 0.02);
    assert_eq!(cfg.engine.num_threads, 4);
}

// ---------------------------------------------------------------------------
// JSON round-trip
// ---------------------------------------------------------------------------

/// Writing then reading a config file preserves every field.
#[test]
fn json_file_round_trip() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("nested").join("diffusion.json");

    let cfg = DiffusionConfig {
        engine: EngineOptions::new("models/step.onnx", "cache/step.opt.onnx").with_threads(2),
        ..DiffusionConfig::default().with_timesteps(250).with_seed(77)
    };
    cfg.to_json(&path).expect("to_json");
    let loaded = DiffusionConfig::from_json(&path).expect("from_json");

    assert_eq!(cfg, loaded);
}

/// Loading a file that fails validation reports the offending field.
#[test]
fn from_json_rejects_invalid_values() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("bad.json");
    std::fs::write(&path, r#"{ "timesteps": 1 }"#).unwrap();

    match DiffusionConfig::from_json(&path) {
        Err(DiffusionError::Config { field, .. }) => assert_eq!(field, "timesteps"),
        other => panic!("expected a config error, got {:?}", other.map(|_| ())),
    }
}

/// A missing file is an I/O error carrying the path.
#[test]
fn from_json_missing_file() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("missing.json");
    assert!(matches!(
        DiffusionConfig::from_json(&path),
        Err(DiffusionError::ConfigFile { .. })
    ));
}

// ---------------------------------------------------------------------------
// Schedule from config
// ---------------------------------------------------------------------------

/// The schedule built from the default config has T entries with a
/// non-increasing cumulative product.
#[test]
fn schedule_from_default_config() {
    let schedule = NoiseSchedule::from_config(&DiffusionConfig::default()).unwrap();
    assert_eq!(schedule.len(), 1000);

    let first = schedule.at(0).unwrap();
    assert_abs_diff_eq!(first.alpha_bar, 1.0 - first.beta);
    assert!(schedule
        .alpha_bar()
        .windows(2)
        .all(|pair| pair[1] <= pair[0]));
    assert!(*schedule.alpha_bar().last().unwrap() > 0.0);
}
