use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the single fixed frame every resolved pose is expressed in.
pub const WORLD_FRAME: &str = "world";

/// A 3-D point (metres), laid out like `geometry_msgs/Point`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A rotation quaternion, laid out like `geometry_msgs/Quaternion`
/// (`x, y, z, w` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Orientation {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// No rotation.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position plus orientation of an object in some reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Orientation,
}

/// Fixed-axis XYZ Euler angles (radians): roll about X, pitch about Y, yaw
/// about Z, all applied about the world axes in that order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rpy {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// One object reported by a logical camera, posed in the camera's frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Model label, e.g. `"gear_part"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub pose: Pose,
}

/// A detection whose pose has been resolved into the world frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedObservation {
    #[serde(rename = "type")]
    pub kind: String,
    pub world_pose: Pose,
    pub rpy: Rpy,
    /// Frame the detection was reported in.
    pub source_frame_id: String,
    /// Ordinal of the detection within its batch.
    pub sensor_index: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Arms
// ────────────────────────────────────────────────────────────────────────────

/// Identity of one of the two manipulator arms in the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmId {
    Arm1,
    Arm2,
}

impl ArmId {
    pub const ALL: [ArmId; 2] = [ArmId::Arm1, ArmId::Arm2];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArmId::Arm1 => "arm1",
            ArmId::Arm2 => "arm2",
        }
    }

    /// Topic carrying this arm's `sensor_msgs/JointState` feed.
    pub fn joint_state_topic(&self) -> String {
        format!("/ariac/{}/joint_states", self.as_str())
    }

    /// Topic accepting `trajectory_msgs/JointTrajectory` commands for this arm.
    pub fn command_topic(&self) -> String {
        format!("/ariac/{}/arm/command", self.as_str())
    }
}

impl std::fmt::Display for ArmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `sensor_msgs/JointState` sample.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JointState {
    #[serde(default)]
    pub name: Vec<String>,
    #[serde(default)]
    pub position: Vec<f64>,
    #[serde(default)]
    pub velocity: Vec<f64>,
    #[serde(default)]
    pub effort: Vec<f64>,
}

/// One waypoint of a joint trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub positions: Vec<f64>,
    pub time_from_start: Duration,
}

/// A joint trajectory addressed to one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryCommand {
    pub arm: ArmId,
    pub joint_names: Vec<String>,
    pub points: Vec<TrajectoryPoint>,
}

// ────────────────────────────────────────────────────────────────────────────
// Competition feeds
// ────────────────────────────────────────────────────────────────────────────

/// A work order. Only `order_id` is named; everything else is carried
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A `sensor_msgs/Range` reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeReading {
    pub range: f32,
    pub min_range: f32,
    pub max_range: f32,
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"workcell-middleware::feed/ariac/orders"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped now.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// All models seen by one logical camera in one frame.
    DetectionBatch {
        camera_topic: String,
        detections: Vec<Detection>,
    },
    JointState {
        arm: ArmId,
        state: JointState,
    },
    CompetitionState(String),
    Score(f64),
    Order(Order),
    Range(RangeReading),
    BreakBeam {
        object_detected: bool,
    },
    LaserScan {
        ranges: Vec<f32>,
    },
    ArmCommand(TrajectoryCommand),
    Observation(ResolvedObservation),
    LifecycleTransition {
        from: Option<String>,
        to: String,
    },
    CompetitionEnded,
    ScoreChanged {
        previous: f64,
        current: f64,
    },
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkcellError {
    #[error("Malformed message on {source_topic}: {details}")]
    MalformedMessage {
        source_topic: String,
        details: String,
    },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl WorkcellError {
    pub fn malformed(source_topic: impl Into<String>, details: impl Into<String>) -> Self {
        Self::MalformedMessage {
            source_topic: source_topic.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_parses_logical_camera_model() {
        let json = r#"{
            "type": "gear_part",
            "pose": {
                "position": {"x": 0.1, "y": -0.2, "z": 0.3},
                "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
            }
        }"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.kind, "gear_part");
        assert!((det.pose.position.y + 0.2).abs() < 1e-12);
        assert_eq!(det.pose.orientation, Orientation::identity());
    }

    #[test]
    fn arm_topics() {
        assert_eq!(ArmId::Arm1.joint_state_topic(), "/ariac/arm1/joint_states");
        assert_eq!(ArmId::Arm2.command_topic(), "/ariac/arm2/arm/command");
        assert_eq!(ArmId::Arm2.to_string(), "arm2");
    }

    #[test]
    fn order_keeps_unknown_fields() {
        let json = r#"{"order_id":"order_0","shipments":[{"shipment_type":"a"}]}"#;
        let order: Order = serde_json::from_str(json).unwrap();
        assert_eq!(order.order_id.as_deref(), Some("order_0"));
        assert!(order.fields.contains_key("shipments"));

        let back = serde_json::to_value(&order).unwrap();
        assert_eq!(back["shipments"][0]["shipment_type"], "a");
    }

    #[test]
    fn joint_state_missing_fields_default_to_empty() {
        let js: JointState = serde_json::from_str(r#"{"name":["elbow_joint"]}"#).unwrap();
        assert_eq!(js.name, vec!["elbow_joint".to_string()]);
        assert!(js.position.is_empty());
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "workcell-middleware::feed/ariac/competition_state",
            EventPayload::CompetitionState("go".to_string()),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert!(matches!(back.payload, EventPayload::CompetitionState(s) if s == "go"));
    }

    #[test]
    fn workcell_error_display() {
        let err = WorkcellError::malformed("/ariac/arm1/joint_states", "no joint names");
        assert!(err.to_string().contains("/ariac/arm1/joint_states"));

        let err2 = WorkcellError::ServiceUnavailable("start_competition".to_string());
        assert!(err2.to_string().contains("Service unavailable"));
    }
}
