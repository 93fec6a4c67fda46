//! Monitor configuration – reads/writes `~/.workcell/config.toml`.
//!
//! The file location can be overridden with `WORKCELL_CONFIG`.  A missing
//! file yields the defaults, which describe the two logical cameras of the
//! standard cell layout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use workcell_perception::{Quaternion, RetryPolicy, Transform3D, Vec3};
use workcell_runtime::{CameraFeed, MonitorConfig};
use workcell_types::WorkcellError;

/// A logical camera to resolve detections from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Rosbridge topic carrying the camera's `LogicalCameraImage`.
    pub topic: String,
    /// Frame the camera reports model poses in.
    pub frame_id: String,
}

/// A transform published into the frame buffer at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticFrameConfig {
    pub parent: String,
    pub child: String,
    /// `[x, y, z]` in metres.
    #[serde(default)]
    pub translation: [f64; 3],
    /// `[x, y, z, w]`.
    #[serde(default = "identity_rotation")]
    pub rotation: [f64; 4],
}

/// Persisted monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket URL of the rosbridge server.
    #[serde(default = "default_rosbridge_url")]
    pub rosbridge_url: String,

    /// Frame every observation is resolved into.
    #[serde(default = "default_world_frame")]
    pub world_frame: String,

    /// Per-detection resolution deadline.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,

    /// Sleep between failed transform queries.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// How far behind "now" transform queries are stamped.
    #[serde(default = "default_lookback_ms")]
    pub lookback_ms: u64,

    /// How long stamped transforms are kept in the frame buffer.
    #[serde(default = "default_frame_cache_secs")]
    pub frame_cache_secs: u64,

    /// Batches each detection worker buffers before dropping new ones.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Call the competition-start service once connected.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraConfig>,

    #[serde(default)]
    pub static_frames: Vec<StaticFrameConfig>,
}

fn default_rosbridge_url() -> String {
    "ws://localhost:9090".to_string()
}
fn default_world_frame() -> String {
    workcell_types::WORLD_FRAME.to_string()
}
fn default_deadline_ms() -> u64 {
    2000
}
fn default_backoff_ms() -> u64 {
    200
}
fn default_lookback_ms() -> u64 {
    110
}
fn default_frame_cache_secs() -> u64 {
    10
}
fn default_queue_depth() -> usize {
    8
}
fn default_auto_start() -> bool {
    true
}
fn identity_rotation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
fn default_cameras() -> Vec<CameraConfig> {
    MonitorConfig::default()
        .cameras
        .into_iter()
        .map(|c| CameraConfig {
            topic: c.topic,
            frame_id: c.frame_id,
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rosbridge_url: default_rosbridge_url(),
            world_frame: default_world_frame(),
            deadline_ms: default_deadline_ms(),
            backoff_ms: default_backoff_ms(),
            lookback_ms: default_lookback_ms(),
            frame_cache_secs: default_frame_cache_secs(),
            queue_depth: default_queue_depth(),
            auto_start: default_auto_start(),
            cameras: default_cameras(),
            static_frames: Vec::new(),
        }
    }
}

impl Config {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            cameras: self
                .cameras
                .iter()
                .map(|c| CameraFeed {
                    topic: c.topic.clone(),
                    frame_id: c.frame_id.clone(),
                })
                .collect(),
            world_frame: self.world_frame.clone(),
            detection_deadline: Duration::from_millis(self.deadline_ms),
            retry: RetryPolicy {
                backoff: Duration::from_millis(self.backoff_ms),
                lookback: Duration::from_millis(self.lookback_ms),
            },
            queue_depth: self.queue_depth,
        }
    }

    pub fn camera_topics(&self) -> Vec<String> {
        self.cameras.iter().map(|c| c.topic.clone()).collect()
    }

    pub fn frame_cache_duration(&self) -> TimeDelta {
        TimeDelta::try_seconds(i64::try_from(self.frame_cache_secs).unwrap_or(i64::MAX))
            .unwrap_or(TimeDelta::MAX)
    }

    /// The configured static frames as transforms.
    ///
    /// # Errors
    ///
    /// [`WorkcellError::Config`] if a rotation is not a usable quaternion or
    /// a frame name is empty.
    pub fn static_transforms(&self) -> Result<Vec<(String, String, Transform3D)>, WorkcellError> {
        self.static_frames
            .iter()
            .map(|f| {
                if f.parent.is_empty() || f.child.is_empty() {
                    return Err(WorkcellError::Config(
                        "static frame with empty parent or child".to_string(),
                    ));
                }
                let [x, y, z, w] = f.rotation;
                let rotation = Quaternion::new(w, x, y, z).normalized().ok_or_else(|| {
                    WorkcellError::Config(format!(
                        "static frame '{}' has a degenerate rotation",
                        f.child
                    ))
                })?;
                let [tx, ty, tz] = f.translation;
                Ok((
                    f.parent.clone(),
                    f.child.clone(),
                    Transform3D::new(Vec3::new(tx, ty, tz), rotation),
                ))
            })
            .collect()
    }
}

/// `WORKCELL_CONFIG`, or `~/.workcell/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("WORKCELL_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".workcell").join("config.toml")
}

/// Load the config, falling back to defaults when the file is absent.
/// Environment overrides are applied either way.
pub fn load() -> Result<Config, WorkcellError> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, WorkcellError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        WorkcellError::Config(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| WorkcellError::Config(format!("failed to parse config: {e}")))?;
    Ok(Some(cfg))
}

/// Apply `WORKCELL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WORKCELL_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `WORKCELL_DEADLINE_MS` | `deadline_ms` |
/// | `WORKCELL_BACKOFF_MS` | `backoff_ms` |
/// | `WORKCELL_LOOKBACK_MS` | `lookback_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WORKCELL_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Ok(v) = std::env::var("WORKCELL_DEADLINE_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.deadline_ms = ms;
    }
    if let Ok(v) = std::env::var("WORKCELL_BACKOFF_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.backoff_ms = ms;
    }
    if let Ok(v) = std::env::var("WORKCELL_LOOKBACK_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.lookback_ms = ms;
    }
}

/// Write `cfg` to the default location, creating the directory if needed.
pub fn save(cfg: &Config) -> Result<PathBuf, WorkcellError> {
    let path = config_path();
    save_to(cfg, &path)?;
    Ok(path)
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), WorkcellError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            WorkcellError::Config(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| WorkcellError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        WorkcellError::Config(format!("failed to write config at {}: {e}", path.display()))
    })
}
