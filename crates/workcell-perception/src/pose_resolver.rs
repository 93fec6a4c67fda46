//! [`PoseResolver`] – deadline-bound pose resolution into the world frame.
//!
//! A detection arrives posed in its camera's frame, but the camera frame may
//! not be connected to the world frame yet: the frame graph is filled in by
//! other processes at their own rate.  The resolver therefore keeps asking
//! the [`FrameGraphClient`] until a transform succeeds or the deadline runs
//! out.
//!
//! # Algorithm
//!
//! Each attempt builds a fresh [`TransformQuery`] stamped `now - lookback`,
//! where `now` is read from the frame graph's own time base
//! ([`FrameGraphClient::now`]), which is simulation time when the cell runs
//! in simulation.  The lookback keeps the query behind frame data that is
//! still in flight; the stamp is recomputed on every attempt so a retry never
//! asks for a time that the graph has since pruned.
//!
//! * success → return immediately;
//! * retryable failure → if the deadline has passed return
//!   [`ResolveError::TimedOut`], otherwise sleep `backoff`, re-check the
//!   deadline, and try again;
//! * non-retryable failure → return [`ResolveError::Rejected`].
//!
//! The loop is bounded by elapsed time only, never by attempt count.  A
//! timeout is reported at most one backoff interval after the deadline.
//!
//! Sleeping uses [`tokio::time::sleep`], so callers should run the resolver
//! on a task that does not also service time-critical events.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};
use workcell_types::{Detection, Pose, Rpy, WORLD_FRAME};

use crate::frame_buffer::{FrameGraphClient, TransformError};
use crate::transform::{Quaternion, Transform3D};

/// Maximum tolerated deviation of |q|² from 1 before a detection's
/// orientation is treated as malformed.
const QUATERNION_NORM_TOLERANCE: f64 = 1e-2;

// ─────────────────────────────────────────────────────────────────────────────
// Policy and query
// ─────────────────────────────────────────────────────────────────────────────

/// Timing knobs of the retry loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Sleep between failed attempts.
    pub backoff: Duration,
    /// How far behind "now" each query is stamped.
    pub lookback: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(200),
            lookback: Duration::from_millis(110),
        }
    }
}

/// One attempt at re-expressing a pose in the target frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformQuery {
    pub source_frame_id: String,
    pub target_frame_id: String,
    pub query_time: DateTime<Utc>,
    pub pose_in_source_frame: Pose,
}

impl TransformQuery {
    /// Build a query stamped `lookback` before `now`.
    pub fn stamped(
        source_frame_id: &str,
        target_frame_id: &str,
        pose_in_source_frame: Pose,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Self {
        let lookback = TimeDelta::from_std(lookback).unwrap_or(TimeDelta::zero());
        Self {
            source_frame_id: source_frame_id.to_string(),
            target_frame_id: target_frame_id.to_string(),
            query_time: now - lookback,
            pose_in_source_frame,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// A pose successfully re-expressed in the target frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPose {
    pub pose: Pose,
    /// Fixed-axis XYZ decomposition of `pose.orientation`.
    pub rpy: Rpy,
    /// Number of transform queries issued, including the successful one.
    pub attempts: u32,
}

/// Why a pose could not be resolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error(
        "timed out after {attempts} attempt(s) in {elapsed:?} resolving '{source_frame}' into '{target_frame}': {last_error}"
    )]
    TimedOut {
        source_frame: String,
        target_frame: String,
        attempts: u32,
        elapsed: Duration,
        last_error: TransformError,
    },

    #[error("malformed detection: {0}")]
    Malformed(String),

    #[error("transform query rejected: {0}")]
    Rejected(TransformError),
}

// ─────────────────────────────────────────────────────────────────────────────
// PoseResolver
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves sensor-frame detections into the world frame, retrying under a
/// deadline.
#[derive(Debug, Clone)]
pub struct PoseResolver<C> {
    client: C,
    target_frame: String,
    policy: RetryPolicy,
}

impl<C: FrameGraphClient> PoseResolver<C> {
    /// Resolver targeting [`WORLD_FRAME`] with the default [`RetryPolicy`].
    pub fn new(client: C) -> Self {
        Self {
            client,
            target_frame: WORLD_FRAME.to_string(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_target_frame(mut self, target_frame: impl Into<String>) -> Self {
        self.target_frame = target_frame.into();
        self
    }

    pub fn target_frame(&self) -> &str {
        &self.target_frame
    }

    /// Resolve `detection`, posed in `source_frame_id`, into the target frame.
    ///
    /// `deadline` counts from the first attempt.
    ///
    /// # Errors
    ///
    /// * [`ResolveError::Malformed`] – the detection's pose is non-finite or
    ///   its orientation is not a unit quaternion, or `source_frame_id` is
    ///   empty.  No query is issued.
    /// * [`ResolveError::TimedOut`] – the frame graph could not answer before
    ///   the deadline.
    /// * [`ResolveError::Rejected`] – the frame graph refused the query as
    ///   malformed.
    #[instrument(
        level = "debug",
        skip(self, detection),
        fields(kind = %detection.kind, target = %self.target_frame)
    )]
    pub async fn resolve(
        &self,
        detection: &Detection,
        source_frame_id: &str,
        deadline: Duration,
    ) -> Result<ResolvedPose, ResolveError> {
        let pose = validated_pose(detection, source_frame_id)?;

        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            let query = TransformQuery::stamped(
                source_frame_id,
                &self.target_frame,
                pose,
                self.client.now(),
                self.policy.lookback,
            );
            attempts += 1;

            let last_error = match self.client.query_transform(
                &query.source_frame_id,
                &query.target_frame_id,
                query.query_time,
            ) {
                Ok(transform) => {
                    let world_pose = transform.apply_to_pose(&query.pose_in_source_frame);
                    let rpy = Quaternion::from(world_pose.orientation).to_rpy();
                    debug!(attempts, "pose resolved");
                    return Ok(ResolvedPose {
                        pose: world_pose,
                        rpy,
                        attempts,
                    });
                }
                Err(e) if !e.is_retryable() => return Err(ResolveError::Rejected(e)),
                Err(e) => e,
            };

            if started.elapsed() >= deadline {
                return Err(self.timed_out(source_frame_id, attempts, started, last_error));
            }
            debug!(attempts, error = %last_error, backoff = ?self.policy.backoff, "transform unavailable; retrying");
            tokio::time::sleep(self.policy.backoff).await;
            if started.elapsed() >= deadline {
                return Err(self.timed_out(source_frame_id, attempts, started, last_error));
            }
        }
    }

    fn timed_out(
        &self,
        source_frame_id: &str,
        attempts: u32,
        started: Instant,
        last_error: TransformError,
    ) -> ResolveError {
        ResolveError::TimedOut {
            source_frame: source_frame_id.to_string(),
            target_frame: self.target_frame.clone(),
            attempts,
            elapsed: started.elapsed(),
            last_error,
        }
    }
}

/// Check the detection's pose and return it with a normalised orientation.
fn validated_pose(detection: &Detection, source_frame_id: &str) -> Result<Pose, ResolveError> {
    if source_frame_id.is_empty() {
        return Err(ResolveError::Malformed("empty source frame id".to_string()));
    }
    let transform = Transform3D::from_pose(&detection.pose);
    if !transform.translation.is_finite() {
        return Err(ResolveError::Malformed(format!(
            "non-finite position for '{}'",
            detection.kind
        )));
    }
    let norm_sq = transform.rotation.norm_squared();
    if !norm_sq.is_finite() || (norm_sq - 1.0).abs() > QUATERNION_NORM_TOLERANCE {
        return Err(ResolveError::Malformed(format!(
            "orientation of '{}' is not a unit quaternion (|q|² = {norm_sq})",
            detection.kind
        )));
    }
    let rotation = transform
        .rotation
        .normalized()
        .ok_or_else(|| ResolveError::Malformed("zero quaternion".to_string()))?;
    Ok(Transform3D::new(transform.translation, rotation).to_pose())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_buffer::{FrameBuffer, SharedFrameBuffer};
    use crate::transform::Vec3;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Mutex;
    use workcell_types::{Orientation, Point};

    /// Frame graph that refuses every query until `available_after` has
    /// elapsed on the Tokio clock, and records the stamp of every query.
    struct DelayedFrameGraph {
        created: Instant,
        available_after: Option<Duration>,
        transform: Transform3D,
        query_times: Mutex<Vec<DateTime<Utc>>>,
    }

    impl DelayedFrameGraph {
        fn new(available_after: Option<Duration>) -> Self {
            Self {
                created: Instant::now(),
                available_after,
                transform: Transform3D::new(Vec3::new(1.0, 2.0, 3.0), Quaternion::identity()),
                query_times: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> usize {
            self.query_times.lock().unwrap().len()
        }
    }

    impl FrameGraphClient for DelayedFrameGraph {
        fn query_transform(
            &self,
            source_frame: &str,
            _target_frame: &str,
            time: DateTime<Utc>,
        ) -> Result<Transform3D, TransformError> {
            self.query_times.lock().unwrap().push(time);
            match self.available_after {
                Some(after) if self.created.elapsed() >= after => Ok(self.transform),
                _ => Err(TransformError::FrameNotFound(source_frame.to_string())),
            }
        }
    }

    fn detection_at(x: f64) -> Detection {
        Detection {
            kind: "gear_part".to_string(),
            pose: Pose {
                position: Point::new(x, 0.0, 0.0),
                orientation: Orientation::identity(),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_once_frame_appears() {
        let graph = std::sync::Arc::new(DelayedFrameGraph::new(Some(Duration::from_millis(400))));
        let resolver = PoseResolver::new(graph.clone());

        let resolved = resolver
            .resolve(&detection_at(0.5), "cam1_frame", Duration::from_secs(1))
            .await
            .unwrap();

        assert!((resolved.pose.position.x - 1.5).abs() < 1e-9);
        assert!((resolved.pose.position.y - 2.0).abs() < 1e-9);
        assert_eq!(resolved.attempts, 3, "attempts at 0, 200 and 400 ms");
        assert_eq!(graph.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_within_deadline_plus_one_backoff() {
        let graph = std::sync::Arc::new(DelayedFrameGraph::new(None));
        let resolver = PoseResolver::new(graph.clone());
        let started = Instant::now();

        let err = resolver
            .resolve(&detection_at(0.0), "cam1_frame", Duration::from_millis(500))
            .await
            .unwrap_err();

        let waited = started.elapsed();
        assert!(waited <= Duration::from_millis(700), "waited {waited:?}");
        match err {
            ResolveError::TimedOut {
                attempts,
                last_error,
                ..
            } => {
                assert!((2..=3).contains(&attempts), "attempts = {attempts}");
                assert_eq!(last_error, TransformError::FrameNotFound("cam1_frame".to_string()));
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deadline_makes_exactly_one_attempt() {
        let graph = std::sync::Arc::new(DelayedFrameGraph::new(None));
        let resolver = PoseResolver::new(graph.clone());

        let err = resolver
            .resolve(&detection_at(0.0), "cam1_frame", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::TimedOut { attempts: 1, .. }));
        assert_eq!(graph.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_uses_a_fresh_past_timestamp() {
        let graph = std::sync::Arc::new(DelayedFrameGraph::new(Some(Duration::from_millis(600))));
        let resolver = PoseResolver::new(graph.clone());

        resolver
            .resolve(&detection_at(0.0), "cam1_frame", Duration::from_secs(2))
            .await
            .unwrap();

        let now = Utc::now();
        let times = graph.query_times.lock().unwrap().clone();
        assert!(times.len() >= 2);
        for pair in times.windows(2) {
            assert!(pair[0] <= pair[1], "query stamps must not go backwards");
        }
        for t in &times {
            assert!(*t <= now, "query stamp {t} lies in the future");
        }
    }

    #[tokio::test]
    async fn malformed_orientation_is_rejected_without_querying() {
        let graph = std::sync::Arc::new(DelayedFrameGraph::new(Some(Duration::ZERO)));
        let resolver = PoseResolver::new(graph.clone());
        let mut det = detection_at(0.0);
        det.pose.orientation = Orientation::new(0.0, 0.0, 0.0, 0.0);

        let err = resolver
            .resolve(&det, "cam1_frame", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
        assert_eq!(graph.attempts(), 0);
    }

    #[tokio::test]
    async fn non_finite_position_is_rejected() {
        let resolver = PoseResolver::new(SharedFrameBuffer::default());
        let det = detection_at(f64::NAN);
        let err = resolver
            .resolve(&det, "cam1_frame", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
    }

    #[tokio::test]
    async fn empty_target_frame_is_rejected_by_the_graph() {
        let buffer = SharedFrameBuffer::default();
        let resolver = PoseResolver::new(buffer).with_target_frame("");
        let err = resolver
            .resolve(&detection_at(0.0), "cam1_frame", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Rejected(TransformError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn resolves_against_frame_buffer_with_rotation() {
        let buffer = SharedFrameBuffer::new(FrameBuffer::default());
        buffer.set_static_transform(
            "world",
            "logical_camera_1_frame",
            Transform3D::new(Vec3::new(1.0, 0.0, 1.0), Quaternion::from_rpy(0.0, 0.0, FRAC_PI_2)),
        );
        let resolver = PoseResolver::new(buffer);

        let resolved = resolver
            .resolve(&detection_at(1.0), "logical_camera_1_frame", Duration::from_secs(1))
            .await
            .unwrap();

        assert!((resolved.pose.position.x - 1.0).abs() < 1e-9);
        assert!((resolved.pose.position.y - 1.0).abs() < 1e-9);
        assert!((resolved.pose.position.z - 1.0).abs() < 1e-9);
        assert!((resolved.rpy.yaw - FRAC_PI_2).abs() < 1e-9);
        assert_eq!(resolved.attempts, 1);
    }

    #[tokio::test]
    async fn queries_are_stamped_on_the_frame_graph_clock() {
        let buffer = SharedFrameBuffer::new(FrameBuffer::default());
        let sim_start = DateTime::from_timestamp(120, 0).unwrap();
        for i in 0..50 {
            buffer.set_transform(
                "world",
                "logical_camera_1_frame",
                Transform3D::new(Vec3::new(2.0, 0.0, 1.0), Quaternion::identity()),
                sim_start + TimeDelta::milliseconds(100 * i),
            );
        }
        let resolver = PoseResolver::new(buffer);

        let resolved = resolver
            .resolve(&detection_at(0.5), "logical_camera_1_frame", Duration::from_millis(600))
            .await
            .unwrap();

        assert_eq!(resolved.attempts, 1);
        assert!((resolved.pose.position.x - 2.5).abs() < 1e-9);
        assert!((resolved.pose.position.z - 1.0).abs() < 1e-9);
    }

    #[test]
    fn near_unit_quaternion_is_normalised() {
        let mut det = detection_at(0.0);
        det.pose.orientation = Orientation::new(0.0, 0.0, 0.0, 1.004);
        let pose = validated_pose(&det, "cam").unwrap();
        assert!((pose.orientation.w - 1.0).abs() < 1e-12);
    }
}
