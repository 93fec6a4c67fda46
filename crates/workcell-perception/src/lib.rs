//! `workcell-perception` – spatial reasoning for the work cell.
//!
//! Turns camera-frame detections into world-frame poses a planner can act on.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D] and friends:
//!   rigid-body transforms, quaternion maths, and the fixed-axis roll/pitch/yaw
//!   decomposition.
//! - [`frame_buffer`] – [`FrameBuffer`][frame_buffer::FrameBuffer]: a
//!   time-aware tree of named frames with static and stamped edges, queried
//!   through the [`FrameGraphClient`][frame_buffer::FrameGraphClient] trait.
//! - [`pose_resolver`] – [`PoseResolver`][pose_resolver::PoseResolver]:
//!   retries frame-graph queries under a deadline until a detection can be
//!   expressed in the world frame.

pub mod frame_buffer;
pub mod pose_resolver;
pub mod transform;

pub use frame_buffer::{FrameBuffer, FrameGraphClient, SharedFrameBuffer, TransformError};
pub use pose_resolver::{PoseResolver, ResolveError, ResolvedPose, RetryPolicy};
pub use transform::{Quaternion, Transform3D, Vec3};
