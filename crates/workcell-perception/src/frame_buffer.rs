//! Time-aware frame tree.
//!
//! [`FrameBuffer`] keeps the transform from every child frame to its parent,
//! either as a static transform (valid at every time) or as a short history
//! of stamped samples.  [`FrameBuffer::lookup`] finds the path between two
//! frames with a breadth-first search and evaluates every edge on that path
//! at the requested time.
//!
//! Samples are published by other processes at their own pace, so a lookup
//! can legitimately fail for a while after start-up or when the requested
//! time lies outside the buffered window.  Those failures are reported as
//! [`TransformError`] values that the caller may retry; see
//! [`TransformError::is_retryable`].
//!
//! The buffer keeps its own clock: the newest stamp it has accepted on any
//! dynamic edge.  Feeds stamp transforms in simulation time while the cell
//! runs in simulation, and recordings carry historical stamps, so queries
//! must be stamped on this clock rather than the wall clock.  Until the
//! first dynamic sample arrives the clock falls back to [`Utc::now`].
//!
//! [`SharedFrameBuffer`] wraps the buffer in an `Arc<RwLock<…>>` so one
//! long-lived instance can be written by the feed adapter and read by every
//! pose resolver.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use workcell_perception::frame_buffer::{FrameBuffer, FrameGraphClient, SharedFrameBuffer};
//! use workcell_perception::transform::{Quaternion, Transform3D, Vec3};
//!
//! let buffer = SharedFrameBuffer::new(FrameBuffer::default());
//! buffer.set_static_transform(
//!     "world",
//!     "logical_camera_1_frame",
//!     Transform3D::new(Vec3::new(1.0, 0.0, 2.0), Quaternion::identity()),
//! );
//!
//! let t = buffer
//!     .query_transform("logical_camera_1_frame", "world", Utc::now())
//!     .unwrap();
//! assert!((t.translation.z - 2.0).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::debug;

use crate::transform::Transform3D;

/// How long dynamic samples are kept, measured back from the newest sample
/// on the same edge.
pub const DEFAULT_CACHE_DURATION: TimeDelta = TimeDelta::seconds(10);

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Why a transform query could not be answered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("frame '{0}' does not exist in the frame graph")]
    FrameNotFound(String),

    #[error("frames '{source_frame}' and '{target_frame}' are not connected")]
    Unconnected {
        source_frame: String,
        target_frame: String,
    },

    #[error("lookup of '{frame}' at {requested} predates the oldest sample at {oldest}")]
    ExtrapolationIntoPast {
        frame: String,
        requested: DateTime<Utc>,
        oldest: DateTime<Utc>,
    },

    #[error("lookup of '{frame}' at {requested} is newer than the latest sample at {newest}")]
    ExtrapolationIntoFuture {
        frame: String,
        requested: DateTime<Utc>,
        newest: DateTime<Utc>,
    },

    #[error("invalid transform query: {0}")]
    InvalidInput(String),
}

impl TransformError {
    /// Every failure except malformed input may succeed later, once the
    /// missing frame data has been published.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransformError::InvalidInput(_))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FrameGraphClient
// ────────────────────────────────────────────────────────────────────────────

/// Point-in-time transform queries against an eventually-consistent frame
/// graph.
pub trait FrameGraphClient: Send + Sync {
    /// Return T_target_source: the transform that re-expresses data given in
    /// `source_frame` in `target_frame`, evaluated at `time`.
    fn query_transform(
        &self,
        source_frame: &str,
        target_frame: &str,
        time: DateTime<Utc>,
    ) -> Result<Transform3D, TransformError>;

    /// Current time on the graph's time base.  Defaults to the wall clock.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<T: FrameGraphClient + ?Sized> FrameGraphClient for Arc<T> {
    fn query_transform(
        &self,
        source_frame: &str,
        target_frame: &str,
        time: DateTime<Utc>,
    ) -> Result<Transform3D, TransformError> {
        (**self).query_transform(source_frame, target_frame, time)
    }

    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Edge storage
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct StampedTransform {
    stamp: DateTime<Utc>,
    transform: Transform3D,
}

#[derive(Debug)]
enum EdgeData {
    Static(Transform3D),
    /// Sorted by ascending stamp.
    Dynamic(VecDeque<StampedTransform>),
}

#[derive(Debug)]
struct Edge {
    parent: String,
    data: EdgeData,
}

impl Edge {
    /// Evaluate T_parent_child at `time`.
    fn at(&self, child: &str, time: DateTime<Utc>) -> Result<Transform3D, TransformError> {
        let samples = match &self.data {
            EdgeData::Static(t) => return Ok(*t),
            EdgeData::Dynamic(samples) => samples,
        };

        let (Some(oldest), Some(newest)) = (samples.front(), samples.back()) else {
            return Err(TransformError::FrameNotFound(child.to_string()));
        };
        if time < oldest.stamp {
            return Err(TransformError::ExtrapolationIntoPast {
                frame: child.to_string(),
                requested: time,
                oldest: oldest.stamp,
            });
        }
        if time > newest.stamp {
            return Err(TransformError::ExtrapolationIntoFuture {
                frame: child.to_string(),
                requested: time,
                newest: newest.stamp,
            });
        }

        // First sample at or after `time`; `time <= newest` so one exists.
        let upper = samples.partition_point(|s| s.stamp < time);
        let after = samples[upper];
        if after.stamp == time || upper == 0 {
            return Ok(after.transform);
        }
        let before = samples[upper - 1];

        let span = (after.stamp - before.stamp).num_nanoseconds().unwrap_or(i64::MAX) as f64;
        let offset = (time - before.stamp).num_nanoseconds().unwrap_or(0) as f64;
        let ratio = if span > 0.0 { offset / span } else { 0.0 };
        Ok(before.transform.interpolate(after.transform, ratio))
    }
}

/// How the search reached a frame: from its child (`Up`) or from its
/// parent (`Down`).
#[derive(Debug, Clone, Copy)]
enum Step<'a> {
    Up { from: &'a str },
    Down { from: &'a str },
}

// ────────────────────────────────────────────────────────────────────────────
// FrameBuffer
// ────────────────────────────────────────────────────────────────────────────

/// A tree of named frames.  Every frame except the roots has exactly one
/// parent; re-publishing a child under a different parent re-parents it.
#[derive(Debug)]
pub struct FrameBuffer {
    /// `edges[child]` = transform from `parent` to `child`.
    edges: HashMap<String, Edge>,
    /// `children[parent]` = every frame whose edge points at `parent`.
    children: HashMap<String, HashSet<String>>,
    cache_duration: TimeDelta,
    /// Newest stamp accepted on any dynamic edge.
    latest_stamp: Option<DateTime<Utc>>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DURATION)
    }
}

impl FrameBuffer {
    /// Create an empty buffer that keeps `cache_duration` worth of samples
    /// per dynamic edge.
    pub fn new(cache_duration: TimeDelta) -> Self {
        Self {
            edges: HashMap::new(),
            children: HashMap::new(),
            cache_duration,
            latest_stamp: None,
        }
    }

    /// Register a transform from `parent_frame` to `child_frame` that holds
    /// at every point in time.
    pub fn set_static_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
    ) {
        self.link(parent_frame, child_frame);
        self.edges.insert(
            child_frame.to_string(),
            Edge {
                parent: parent_frame.to_string(),
                data: EdgeData::Static(transform),
            },
        );
    }

    /// Record a sample of the transform from `parent_frame` to `child_frame`
    /// stamped at `stamp`.
    ///
    /// Samples older than the cache window are discarded, and the window is
    /// pruned relative to the newest sample on the edge.
    pub fn set_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) {
        self.link(parent_frame, child_frame);
        let cache_duration = self.cache_duration;

        let edge = self
            .edges
            .entry(child_frame.to_string())
            .or_insert_with(|| Edge {
                parent: parent_frame.to_string(),
                data: EdgeData::Dynamic(VecDeque::new()),
            });
        edge.parent = parent_frame.to_string();
        if !matches!(edge.data, EdgeData::Dynamic(_)) {
            edge.data = EdgeData::Dynamic(VecDeque::new());
        }
        let EdgeData::Dynamic(samples) = &mut edge.data else {
            return;
        };

        if let Some(newest) = samples.back()
            && stamp < newest.stamp - cache_duration
        {
            debug!(child = child_frame, %stamp, "dropping sample older than the cache window");
            return;
        }

        let sample = StampedTransform { stamp, transform };
        let at = samples.partition_point(|s| s.stamp < stamp);
        if samples.get(at).is_some_and(|s| s.stamp == stamp) {
            samples[at] = sample;
        } else {
            samples.insert(at, sample);
        }
        if self.latest_stamp.is_none_or(|latest| stamp > latest) {
            self.latest_stamp = Some(stamp);
        }

        if let Some(newest) = samples.back().map(|s| s.stamp) {
            let horizon = newest - cache_duration;
            while samples.front().is_some_and(|s| s.stamp < horizon) {
                samples.pop_front();
            }
        }
    }

    /// The buffer's clock: the newest accepted dynamic stamp, or the wall
    /// clock before any dynamic sample has arrived.
    pub fn now(&self) -> DateTime<Utc> {
        self.latest_stamp.unwrap_or_else(Utc::now)
    }

    /// `true` if `frame` appears anywhere in the tree.
    pub fn has_frame(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.children.contains_key(frame)
    }

    /// Compute T_target_source at `time`: the transform that maps data in
    /// `source_frame` into `target_frame`.
    pub fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: DateTime<Utc>,
    ) -> Result<Transform3D, TransformError> {
        if target_frame.is_empty() || source_frame.is_empty() {
            return Err(TransformError::InvalidInput(
                "frame ids must not be empty".to_string(),
            ));
        }
        if source_frame == target_frame {
            return Ok(Transform3D::identity());
        }
        for frame in [source_frame, target_frame] {
            if !self.has_frame(frame) {
                return Err(TransformError::FrameNotFound(frame.to_string()));
            }
        }

        // BFS over the tree topology from the target.  Edges are evaluated
        // only along the path that reaches the source, so a stale edge on an
        // unrelated branch never fails the lookup.
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut came_from: HashMap<&str, Step<'_>> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        queue.push_back(target_frame);
        visited.insert(target_frame);

        let mut found = false;
        while let Some(current) = queue.pop_front() {
            if current == source_frame {
                found = true;
                break;
            }
            // Up: current is the child of its parent.
            if let Some(edge) = self.edges.get(current)
                && visited.insert(edge.parent.as_str())
            {
                came_from.insert(edge.parent.as_str(), Step::Up { from: current });
                queue.push_back(edge.parent.as_str());
            }
            // Down: current is the parent of each child.
            for child in self.children.get(current).into_iter().flatten() {
                let is_live = self.edges.get(child).is_some_and(|e| e.parent == current);
                if is_live && visited.insert(child.as_str()) {
                    came_from.insert(child.as_str(), Step::Down { from: current });
                    queue.push_back(child.as_str());
                }
            }
        }
        if !found {
            return Err(TransformError::Unconnected {
                source_frame: source_frame.to_string(),
                target_frame: target_frame.to_string(),
            });
        }

        // Walk back from the source, prepending each hop so the result is
        // T_target_source.
        let mut result = Transform3D::identity();
        let mut node = source_frame;
        while let Some(step) = came_from.get(node) {
            let hop = match *step {
                // `from` is the child of `node`: T_from_node = inverse(T_node_from).
                Step::Up { from } => self.edge_at(from, time)?.inverse(),
                // `node` is the child of `from`: T_from_node is the edge itself.
                Step::Down { from: _ } => self.edge_at(node, time)?,
            };
            result = hop.compose(result);
            node = match *step {
                Step::Up { from } | Step::Down { from } => from,
            };
        }
        Ok(result)
    }

    fn edge_at(&self, child: &str, time: DateTime<Utc>) -> Result<Transform3D, TransformError> {
        self.edges
            .get(child)
            .ok_or_else(|| TransformError::FrameNotFound(child.to_string()))?
            .at(child, time)
    }

    fn link(&mut self, parent_frame: &str, child_frame: &str) {
        if let Some(old) = self.edges.get(child_frame)
            && old.parent != parent_frame
            && let Some(siblings) = self.children.get_mut(&old.parent)
        {
            siblings.remove(child_frame);
        }
        self.children
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SharedFrameBuffer
// ────────────────────────────────────────────────────────────────────────────

/// A cloneable handle to one long-lived [`FrameBuffer`].
#[derive(Debug, Clone, Default)]
pub struct SharedFrameBuffer {
    inner: Arc<RwLock<FrameBuffer>>,
}

impl SharedFrameBuffer {
    pub fn new(buffer: FrameBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(buffer)),
        }
    }

    pub fn set_static_transform(&self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_static_transform(parent_frame, child_frame, transform);
    }

    pub fn set_transform(
        &self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform3D,
        stamp: DateTime<Utc>,
    ) {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_transform(parent_frame, child_frame, transform, stamp);
    }

    pub fn has_frame(&self, frame: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .has_frame(frame)
    }
}

impl FrameGraphClient for SharedFrameBuffer {
    fn query_transform(
        &self,
        source_frame: &str,
        target_frame: &str,
        time: DateTime<Utc>,
    ) -> Result<Transform3D, TransformError> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .lookup(target_frame, source_frame, time)
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .now()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Quaternion, Vec3};
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    fn shift_x(x: f64) -> Transform3D {
        Transform3D::new(Vec3::new(x, 0.0, 0.0), Quaternion::identity())
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn lookup_same_frame_returns_identity() {
        let buf = FrameBuffer::default();
        assert_eq!(buf.lookup("world", "world", t0()).unwrap(), Transform3D::identity());
    }

    #[test]
    fn static_chain_composes() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform("world", "bin_base", shift_x(1.0));
        buf.set_static_transform("bin_base", "camera", shift_x(0.5));

        let t = buf.lookup("world", "camera", t0()).unwrap();
        assert!((t.translation.x - 1.5).abs() < EPS);
    }

    #[test]
    fn lookup_walks_edges_in_reverse() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform("world", "camera", shift_x(2.0));

        // world origin seen from the camera sits at x = -2.
        let t = buf.lookup("camera", "world", t0()).unwrap();
        assert!((t.translation.x + 2.0).abs() < EPS);
    }

    #[test]
    fn lookup_across_sibling_branches() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform("world", "camera_a", shift_x(1.0));
        buf.set_static_transform("world", "camera_b", shift_x(4.0));

        let t = buf.lookup("camera_a", "camera_b", t0()).unwrap();
        assert!((t.translation.x - 3.0).abs() < EPS);
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform(
            "world",
            "robot_base",
            Transform3D::new(Vec3::zero(), Quaternion::from_rpy(0.0, 0.0, FRAC_PI_2)),
        );
        buf.set_static_transform("robot_base", "camera", shift_x(1.0));

        let t = buf.lookup("world", "camera", t0()).unwrap();
        assert!(t.translation.x.abs() < EPS, "x={}", t.translation.x);
        assert!((t.translation.y - 1.0).abs() < EPS, "y={}", t.translation.y);
    }

    #[test]
    fn unknown_frame_is_not_found() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform("world", "camera", shift_x(1.0));
        assert_eq!(
            buf.lookup("world", "ghost_frame", t0()),
            Err(TransformError::FrameNotFound("ghost_frame".to_string()))
        );
    }

    #[test]
    fn disjoint_trees_are_unconnected() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform("world", "camera", shift_x(1.0));
        buf.set_static_transform("map", "robot", shift_x(1.0));
        assert!(matches!(
            buf.lookup("world", "robot", t0()),
            Err(TransformError::Unconnected { .. })
        ));
    }

    #[test]
    fn empty_frame_id_is_not_retryable() {
        let buf = FrameBuffer::default();
        let err = buf.lookup("world", "", t0()).unwrap_err();
        assert!(!err.is_retryable());
        assert!(TransformError::FrameNotFound("x".into()).is_retryable());
    }

    #[test]
    fn dynamic_edge_interpolates_between_samples() {
        let mut buf = FrameBuffer::default();
        buf.set_transform("world", "tray", shift_x(0.0), t0());
        buf.set_transform("world", "tray", shift_x(1.0), t0() + TimeDelta::milliseconds(100));

        let mid = buf
            .lookup("world", "tray", t0() + TimeDelta::milliseconds(25))
            .unwrap();
        assert!((mid.translation.x - 0.25).abs() < 1e-6);
    }

    #[test]
    fn dynamic_edge_rejects_times_outside_the_window() {
        let mut buf = FrameBuffer::default();
        buf.set_transform("world", "tray", shift_x(0.0), t0());
        buf.set_transform("world", "tray", shift_x(1.0), t0() + TimeDelta::milliseconds(100));

        assert!(matches!(
            buf.lookup("world", "tray", t0() - TimeDelta::milliseconds(1)),
            Err(TransformError::ExtrapolationIntoPast { .. })
        ));
        assert!(matches!(
            buf.lookup("world", "tray", t0() + TimeDelta::milliseconds(101)),
            Err(TransformError::ExtrapolationIntoFuture { .. })
        ));
    }

    #[test]
    fn stale_unrelated_branch_does_not_fail_lookup() {
        let mut buf = FrameBuffer::default();
        buf.set_transform("world", "conveyor", shift_x(5.0), t0());
        buf.set_static_transform("world", "camera", shift_x(1.0));

        // conveyor has no sample at this time, but it is not on the path.
        let t = buf
            .lookup("world", "camera", t0() + TimeDelta::seconds(3))
            .unwrap();
        assert!((t.translation.x - 1.0).abs() < EPS);
    }

    #[test]
    fn samples_outside_cache_window_are_pruned() {
        let mut buf = FrameBuffer::new(TimeDelta::seconds(1));
        buf.set_transform("world", "tray", shift_x(0.0), t0());
        buf.set_transform("world", "tray", shift_x(1.0), t0() + TimeDelta::seconds(5));

        assert!(matches!(
            buf.lookup("world", "tray", t0() + TimeDelta::seconds(1)),
            Err(TransformError::ExtrapolationIntoPast { .. })
        ));
        let latest = buf.lookup("world", "tray", t0() + TimeDelta::seconds(5)).unwrap();
        assert!((latest.translation.x - 1.0).abs() < EPS);
    }

    #[test]
    fn republishing_under_new_parent_reparents() {
        let mut buf = FrameBuffer::default();
        buf.set_static_transform("world", "a", shift_x(1.0));
        buf.set_static_transform("world", "b", shift_x(10.0));
        buf.set_static_transform("a", "part", shift_x(1.0));
        buf.set_static_transform("b", "part", shift_x(1.0));

        let t = buf.lookup("world", "part", t0()).unwrap();
        assert!((t.translation.x - 11.0).abs() < EPS);
    }

    #[test]
    fn shared_buffer_answers_client_queries() {
        let shared = SharedFrameBuffer::default();
        shared.set_static_transform("world", "camera", shift_x(3.0));
        assert!(shared.has_frame("camera"));

        let t = shared.query_transform("camera", "world", t0()).unwrap();
        assert!((t.translation.x - 3.0).abs() < EPS);
    }

    #[test]
    fn clock_follows_newest_dynamic_stamp() {
        let mut buf = FrameBuffer::default();
        let before = Utc::now();
        assert!(buf.now() >= before, "empty buffer runs on the wall clock");

        buf.set_static_transform("world", "bin", shift_x(1.0));
        assert!(buf.now() >= before, "static edges do not move the clock");

        let sim = DateTime::from_timestamp(120, 0).unwrap();
        buf.set_transform("world", "tray", shift_x(0.0), sim + TimeDelta::seconds(4));
        buf.set_transform("world", "gripper", shift_x(0.0), sim + TimeDelta::seconds(2));
        assert_eq!(buf.now(), sim + TimeDelta::seconds(4));

        let shared = SharedFrameBuffer::new(buf);
        assert_eq!(FrameGraphClient::now(&shared), sim + TimeDelta::seconds(4));
    }
}
