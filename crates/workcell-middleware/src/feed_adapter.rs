//! Rosbridge feed ingestion.
//!
//! [`FeedAdapter`] turns rosbridge `publish` frames
//! (`{"op":"publish","topic":...,"msg":{...}}`) into bus events, and
//! `/tf` / `/tf_static` frames into [`SharedFrameBuffer`] updates.
//!
//! | Feed | Bus topic | Payload |
//! |---|---|---|
//! | `/ariac/current_score` | [`Topic::Competition`] | [`EventPayload::Score`] |
//! | `/ariac/competition_state` | [`Topic::Competition`] | [`EventPayload::CompetitionState`] |
//! | `/ariac/orders` | [`Topic::Competition`] | [`EventPayload::Order`] |
//! | `/ariac/arm{1,2}/joint_states` | [`Topic::JointStates`] | [`EventPayload::JointState`] |
//! | `/ariac/logical_camera_*` | [`Topic::SensorFeeds`] | [`EventPayload::DetectionBatch`] |
//! | `/ariac/proximity_sensor_1` | [`Topic::SensorFeeds`] | [`EventPayload::Range`] |
//! | `/ariac/break_beam_1_change` | [`Topic::SensorFeeds`] | [`EventPayload::BreakBeam`] |
//! | `/ariac/laser_profiler_1` | [`Topic::SensorFeeds`] | [`EventPayload::LaserScan`] |
//!
//! Frames on other topics are ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use workcell_perception::{Quaternion, SharedFrameBuffer, Transform3D, Vec3};
use workcell_types::{
    ArmId, Detection, Event, EventPayload, JointState, Order, Orientation, Point, RangeReading,
    WorkcellError,
};

use crate::bus::{EventBus, Topic};

pub const SCORE_TOPIC: &str = "/ariac/current_score";
pub const COMPETITION_STATE_TOPIC: &str = "/ariac/competition_state";
pub const ORDERS_TOPIC: &str = "/ariac/orders";
pub const PROXIMITY_TOPIC: &str = "/ariac/proximity_sensor_1";
pub const BREAK_BEAM_TOPIC: &str = "/ariac/break_beam_1_change";
pub const LASER_PROFILER_TOPIC: &str = "/ariac/laser_profiler_1";
pub const TF_TOPIC: &str = "/tf";
pub const TF_STATIC_TOPIC: &str = "/tf_static";
pub const LOGICAL_CAMERA_PREFIX: &str = "/ariac/logical_camera";

/// Maximum number of models accepted in one logical camera frame.
pub const MAX_MODELS_PER_FRAME: usize = 256;

/// Maximum number of range readings accepted in one laser scan.
pub const MAX_LASER_RANGES: usize = 4096;

/// A feed topic together with its rosbridge message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSubscription {
    pub topic: String,
    pub msg_type: &'static str,
}

impl FeedSubscription {
    fn new(topic: impl Into<String>, msg_type: &'static str) -> Self {
        Self {
            topic: topic.into(),
            msg_type,
        }
    }
}

/// Every feed the monitor listens to, including one logical camera topic per
/// entry of `camera_topics`.
pub fn feed_subscriptions(camera_topics: &[String]) -> Vec<FeedSubscription> {
    let mut subs = vec![
        FeedSubscription::new(SCORE_TOPIC, "std_msgs/Float32"),
        FeedSubscription::new(COMPETITION_STATE_TOPIC, "std_msgs/String"),
        FeedSubscription::new(ORDERS_TOPIC, "osrf_gear/Order"),
        FeedSubscription::new(PROXIMITY_TOPIC, "sensor_msgs/Range"),
        FeedSubscription::new(BREAK_BEAM_TOPIC, "osrf_gear/Proximity"),
        FeedSubscription::new(LASER_PROFILER_TOPIC, "sensor_msgs/LaserScan"),
        FeedSubscription::new(TF_TOPIC, "tf2_msgs/TFMessage"),
        FeedSubscription::new(TF_STATIC_TOPIC, "tf2_msgs/TFMessage"),
    ];
    for arm in ArmId::ALL {
        subs.push(FeedSubscription::new(arm.joint_state_topic(), "sensor_msgs/JointState"));
    }
    for topic in camera_topics {
        subs.push(FeedSubscription::new(topic.clone(), "osrf_gear/LogicalCameraImage"));
    }
    subs
}

/// What a single frame turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// An event was published on the given topic.
    Published(Topic),
    /// This many frame-graph edges were updated.
    Frames(usize),
    /// The frame is not a publish on a known feed.
    Ignored,
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Float32Msg {
    data: f64,
}

#[derive(Deserialize)]
struct StringMsg {
    data: String,
}

#[derive(Deserialize)]
struct LogicalCameraMsg {
    #[serde(default)]
    models: Vec<Detection>,
}

#[derive(Deserialize)]
struct ProximityMsg {
    object_detected: bool,
}

#[derive(Deserialize)]
struct LaserScanMsg {
    /// rosbridge encodes `inf` and `nan` as `null`.
    #[serde(default)]
    ranges: Vec<Option<f32>>,
}

#[derive(Deserialize)]
struct TfMsg {
    #[serde(default)]
    transforms: Vec<TransformStampedMsg>,
}

#[derive(Deserialize)]
struct TransformStampedMsg {
    #[serde(default)]
    header: HeaderMsg,
    child_frame_id: String,
    transform: TransformMsg,
}

#[derive(Deserialize, Default)]
struct HeaderMsg {
    #[serde(default)]
    stamp: Option<StampMsg>,
    #[serde(default)]
    frame_id: String,
}

/// Accepts both `secs`/`nsecs` and `sec`/`nanosec` layouts.
#[derive(Deserialize)]
struct StampMsg {
    #[serde(default, alias = "secs")]
    sec: i64,
    #[serde(default, alias = "nsecs")]
    nanosec: u32,
}

#[derive(Deserialize)]
struct TransformMsg {
    translation: Point,
    rotation: Orientation,
}

// ── Adapter ──────────────────────────────────────────────────────────────────

/// Translates rosbridge frames into bus events and frame-graph updates.
#[derive(Clone, Debug)]
pub struct FeedAdapter {
    bus: EventBus,
    frames: SharedFrameBuffer,
}

impl FeedAdapter {
    pub fn new(bus: EventBus, frames: SharedFrameBuffer) -> Self {
        Self { bus, frames }
    }

    /// Parse one raw rosbridge text frame and ingest it.
    ///
    /// # Errors
    ///
    /// [`WorkcellError::MalformedMessage`] if the frame is not JSON, or if a
    /// known feed carries a message of the wrong shape or size.
    pub fn ingest_frame(&self, text: &str) -> Result<Ingested, WorkcellError> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| WorkcellError::malformed("rosbridge", e.to_string()))?;
        if frame.get("op").and_then(Value::as_str) != Some("publish") {
            return Ok(Ingested::Ignored);
        }
        let Some(topic) = frame.get("topic").and_then(Value::as_str) else {
            return Err(WorkcellError::malformed("rosbridge", "publish frame without topic"));
        };
        let msg = frame.get("msg").cloned().unwrap_or(Value::Null);
        self.ingest(topic, msg)
    }

    /// Ingest the decoded `msg` of a publish on `topic`.
    pub fn ingest(&self, topic: &str, msg: Value) -> Result<Ingested, WorkcellError> {
        let (bus_topic, payload) = match topic {
            SCORE_TOPIC => {
                let m: Float32Msg = decode(topic, msg)?;
                (Topic::Competition, EventPayload::Score(m.data))
            }
            COMPETITION_STATE_TOPIC => {
                let m: StringMsg = decode(topic, msg)?;
                (Topic::Competition, EventPayload::CompetitionState(m.data))
            }
            ORDERS_TOPIC => {
                let order: Order = decode(topic, msg)?;
                (Topic::Competition, EventPayload::Order(order))
            }
            PROXIMITY_TOPIC => {
                let reading: RangeReading = decode(topic, msg)?;
                (Topic::SensorFeeds, EventPayload::Range(reading))
            }
            BREAK_BEAM_TOPIC => {
                let m: ProximityMsg = decode(topic, msg)?;
                (
                    Topic::SensorFeeds,
                    EventPayload::BreakBeam {
                        object_detected: m.object_detected,
                    },
                )
            }
            LASER_PROFILER_TOPIC => {
                let m: LaserScanMsg = decode(topic, msg)?;
                if m.ranges.len() > MAX_LASER_RANGES {
                    return Err(WorkcellError::malformed(
                        topic,
                        format!(
                            "laser scan has {} range readings, exceeding the limit of {MAX_LASER_RANGES}",
                            m.ranges.len()
                        ),
                    ));
                }
                let ranges = m
                    .ranges
                    .into_iter()
                    .map(|r| r.unwrap_or(f32::INFINITY))
                    .collect();
                (Topic::SensorFeeds, EventPayload::LaserScan { ranges })
            }
            TF_TOPIC | TF_STATIC_TOPIC => {
                let m: TfMsg = decode(topic, msg)?;
                let updated = self.apply_tf(topic, m, topic == TF_STATIC_TOPIC)?;
                return Ok(Ingested::Frames(updated));
            }
            t if t.starts_with(LOGICAL_CAMERA_PREFIX) => {
                let m: LogicalCameraMsg = decode(topic, msg)?;
                if m.models.len() > MAX_MODELS_PER_FRAME {
                    return Err(WorkcellError::malformed(
                        topic,
                        format!(
                            "camera frame has {} models, exceeding the limit of {MAX_MODELS_PER_FRAME}",
                            m.models.len()
                        ),
                    ));
                }
                (
                    Topic::SensorFeeds,
                    EventPayload::DetectionBatch {
                        camera_topic: topic.to_string(),
                        detections: m.models,
                    },
                )
            }
            t => match ArmId::ALL.into_iter().find(|arm| arm.joint_state_topic() == t) {
                Some(arm) => {
                    let state: JointState = decode(topic, msg)?;
                    (Topic::JointStates, EventPayload::JointState { arm, state })
                }
                None => {
                    trace!(topic, "ignoring frame on unknown topic");
                    return Ok(Ingested::Ignored);
                }
            },
        };

        let event = Event::new(format!("workcell-middleware::feed{topic}"), payload);
        if let Err(e) = self.bus.publish_to(bus_topic, event) {
            debug!(topic, error = %e, "feed event had no listeners");
        }
        Ok(Ingested::Published(bus_topic))
    }

    /// Validate every transform in `msg`, then commit them all.  A message
    /// with any malformed entry leaves the frame buffer untouched.
    fn apply_tf(&self, topic: &str, msg: TfMsg, is_static: bool) -> Result<usize, WorkcellError> {
        let mut validated = Vec::with_capacity(msg.transforms.len());
        for t in msg.transforms {
            let parent = strip_slash(&t.header.frame_id).to_string();
            let child = strip_slash(&t.child_frame_id).to_string();
            if parent.is_empty() || child.is_empty() {
                return Err(WorkcellError::malformed(topic, "transform with empty frame id"));
            }
            let rotation = Quaternion::from(t.transform.rotation)
                .normalized()
                .ok_or_else(|| {
                    WorkcellError::malformed(topic, format!("degenerate rotation for '{child}'"))
                })?;
            let transform = Transform3D::new(Vec3::from(t.transform.translation), rotation);
            if !transform.translation.is_finite() {
                return Err(WorkcellError::malformed(
                    topic,
                    format!("non-finite translation for '{child}'"),
                ));
            }
            let stamp = match t.header.stamp {
                Some(s) => Some(DateTime::<Utc>::from_timestamp(s.sec, s.nanosec).ok_or_else(
                    || WorkcellError::malformed(topic, format!("out-of-range stamp for '{child}'")),
                )?),
                None => None,
            };
            validated.push((parent, child, transform, stamp));
        }

        let updated = validated.len();
        for (parent, child, transform, stamp) in validated {
            if is_static {
                self.frames.set_static_transform(&parent, &child, transform);
            } else {
                let stamp = stamp.unwrap_or_else(Utc::now);
                self.frames.set_transform(&parent, &child, transform, stamp);
            }
        }
        Ok(updated)
    }
}

fn decode<T: serde::de::DeserializeOwned>(topic: &str, msg: Value) -> Result<T, WorkcellError> {
    serde_json::from_value(msg).map_err(|e| WorkcellError::malformed(topic, e.to_string()))
}

fn strip_slash(frame: &str) -> &str {
    frame.strip_prefix('/').unwrap_or(frame)
}
