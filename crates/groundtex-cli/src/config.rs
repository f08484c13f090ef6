//! Capture configuration – TOML file, `GROUNDTEX_*` environment overrides.
//!
//! Precedence, lowest to highest: built-in defaults, the TOML file given with
//! `--config`, environment variables, explicit command-line flags.
//!
//! ```toml
//! camera_height = 0.3
//! output_dir = "runs/asphalt"
//! convergence_tolerance = 1e-8
//!
//! [camera_mount.position]
//! x = 0.1
//! y = 0.0
//! z = 0.02
//!
//! [camera_mount.orientation]
//! w = 1.0
//! x = 0.0
//! y = 0.0
//! z = 0.0
//!
//! [sequence]
//! sequence_type = "grid"
//! sequence_number = 4
//! texture_number = 11
//! camera_name = "c01"
//! date = "2025-02-14"
//!
//! [world]
//! settle_ticks = 5
//! publish_interval = 10
//!
//! [world.lens]
//! focal_length_mm = 35.0
//! sensor_width_mm = 36.0
//! sensor_height_mm = 24.0
//! resolution_x = 640
//! resolution_y = 480
//! resolution_percentage = 100.0
//! pixel_aspect_x = 1.0
//! pixel_aspect_y = 1.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use groundtex_dataset::SequenceNaming;
use groundtex_hal::sim::SimWorldConfig;
use groundtex_runtime::FollowerConfig;
use groundtex_types::Pose3D;
use serde::{Deserialize, Serialize};

/// Everything a capture or teleop run can be configured with.
///
/// Durations are whole milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera_height: f64,
    pub camera_model_name: String,
    pub image_topic: String,
    pub camera_info_topic: String,
    pub pose_topic: String,
    pub move_service: String,
    pub output_dir: PathBuf,
    pub move_timeout_ms: u64,
    pub convergence_tolerance: f64,
    pub convergence_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub sync_timeout_ms: u64,
    /// Camera pose on the robot; `camera_height` is added to its z.
    pub camera_mount: Pose3D,
    /// Sequence layout for images and list files; the date is a quoted
    /// `YYYY-MM-DD` string.
    pub sequence: Option<SequenceNaming>,
    /// Simulated world settings. Topic, model and service names are taken
    /// from the fields above.
    pub world: SimWorldConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let follower = FollowerConfig::default();
        Self {
            camera_height: follower.camera_height,
            camera_model_name: follower.camera_model_name,
            image_topic: follower.image_topic,
            camera_info_topic: follower.camera_info_topic,
            pose_topic: follower.pose_topic,
            move_service: follower.move_service,
            output_dir: follower.output_dir,
            move_timeout_ms: follower.move_timeout.as_millis() as u64,
            convergence_tolerance: follower.convergence_tolerance,
            convergence_timeout_ms: follower.convergence_timeout.as_millis() as u64,
            poll_interval_ms: follower.poll_interval.as_millis() as u64,
            max_poll_interval_ms: follower.max_poll_interval.as_millis() as u64,
            sync_timeout_ms: follower.sync_timeout.as_millis() as u64,
            camera_mount: follower.camera_mount,
            sequence: follower.sequence,
            world: SimWorldConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<(), String> {
        if !self.camera_height.is_finite() || self.camera_height < 0.0 {
            return Err(format!(
                "camera_height must be non-negative, got {}",
                self.camera_height
            ));
        }
        if !(self.convergence_tolerance > 0.0) {
            return Err(format!(
                "convergence_tolerance must be positive, got {}",
                self.convergence_tolerance
            ));
        }
        if self.camera_model_name.trim().is_empty() {
            return Err("camera_model_name must not be empty".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be at least 1".to_string());
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(format!(
                "max_poll_interval_ms ({}) is below poll_interval_ms ({})",
                self.max_poll_interval_ms, self.poll_interval_ms
            ));
        }
        if let Some(sequence) = &self.sequence {
            sequence.validate().map_err(|e| format!("sequence: {e}"))?;
        }
        Ok(())
    }

    pub fn follower_config(&self) -> FollowerConfig {
        FollowerConfig {
            camera_height: self.camera_height,
            camera_model_name: self.camera_model_name.clone(),
            image_topic: self.image_topic.clone(),
            camera_info_topic: self.camera_info_topic.clone(),
            pose_topic: self.pose_topic.clone(),
            move_service: self.move_service.clone(),
            output_dir: self.output_dir.clone(),
            move_timeout: Duration::from_millis(self.move_timeout_ms),
            convergence_tolerance: self.convergence_tolerance,
            convergence_timeout: Duration::from_millis(self.convergence_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_interval: Duration::from_millis(self.max_poll_interval_ms),
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
            camera_mount: self.camera_mount,
            sequence: self.sequence.clone(),
        }
    }

    /// World settings with names aligned to the capture side.
    pub fn world_config(&self) -> SimWorldConfig {
        let mut world = self.world.clone();
        world.model_name = self.camera_model_name.clone();
        world.service_name = self.move_service.clone();
        world.image_topic = self.image_topic.clone();
        world.camera_info_topic = self.camera_info_topic.clone();
        world.pose_topic = self.pose_topic.clone();
        world.initial_pose.position.z = self.follower_config().mount_pose().position.z;
        world
    }
}

/// Load defaults, then `path` if given, then the environment overrides.
pub fn load(path: Option<&Path>) -> Result<CaptureConfig, String> {
    let mut cfg = match path {
        Some(path) => load_from(path)?,
        None => CaptureConfig::default(),
    };
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

/// Load the config from a specific TOML file; missing keys take defaults.
pub fn load_from(path: &Path) -> Result<CaptureConfig, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw).map_err(|e| format!("Failed to parse config {}: {}", path.display(), e))
}

/// Apply `GROUNDTEX_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `GROUNDTEX_OUTPUT` | `output_dir` |
/// | `GROUNDTEX_HEIGHT` | `camera_height` |
/// | `GROUNDTEX_MODEL` | `camera_model_name` |
pub fn apply_env_overrides(cfg: &mut CaptureConfig) -> Result<(), String> {
    apply_overrides_from(cfg, |key| std::env::var(key).ok())
}

/// Same as [`apply_env_overrides`] with an injectable lookup.
/// Extracted for testability without mutating environment variables.
pub(crate) fn apply_overrides_from(
    cfg: &mut CaptureConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), String> {
    if let Some(v) = lookup("GROUNDTEX_OUTPUT") {
        cfg.output_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("GROUNDTEX_HEIGHT") {
        cfg.camera_height = v
            .trim()
            .parse()
            .map_err(|_| format!("GROUNDTEX_HEIGHT is not a number: {v:?}"))?;
    }
    if let Some(v) = lookup("GROUNDTEX_MODEL") {
        cfg.camera_model_name = v;
    }
    Ok(())
}

/// Write `cfg` as TOML, creating parent directories as needed.
pub fn save_to(cfg: &CaptureConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
