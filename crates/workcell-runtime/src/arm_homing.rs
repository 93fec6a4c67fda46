//! [`ArmHomingController`] – one-shot homing per arm.
//!
//! The first well-formed joint-state sample for an arm proves the arm's
//! controller is alive.  At that moment the controller emits a single
//! trajectory that sends every joint to zero, and it never fires again for
//! that arm.
//!
//! # Example
//!
//! ```rust
//! use workcell_runtime::arm_homing::{ArmHomingController, ArmHomingState};
//! use workcell_types::{ArmId, JointState};
//!
//! let mut arm = ArmHomingController::new(ArmId::Arm1);
//! let sample = JointState {
//!     name: vec!["elbow_joint".to_string()],
//!     position: vec![0.4],
//!     ..Default::default()
//! };
//!
//! assert!(arm.on_joint_state(sample.clone()).unwrap().is_some());
//! assert_eq!(arm.state(), ArmHomingState::Zeroed);
//! assert!(arm.on_joint_state(sample).unwrap().is_none());
//! ```

use std::time::Duration;

use workcell_types::{ArmId, JointState, TrajectoryCommand, TrajectoryPoint, WorkcellError};

/// Joints commanded by the home trajectory, in command order.
pub const HOME_JOINT_NAMES: [&str; 7] = [
    "shoulder_pan_joint",
    "shoulder_lift_joint",
    "elbow_joint",
    "wrist_1_joint",
    "wrist_2_joint",
    "wrist_3_joint",
    "linear_arm_actuator_joint",
];

/// Time allotted to reach the home waypoint.
pub const HOME_TIME_FROM_START: Duration = Duration::from_millis(1);

/// Homing progress of one arm.  `NotZeroed → Zeroed` is irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArmHomingState {
    #[default]
    NotZeroed,
    Zeroed,
}

/// The fixed trajectory that sends `arm` to all-zero joint positions.
pub fn home_command(arm: ArmId) -> TrajectoryCommand {
    TrajectoryCommand {
        arm,
        joint_names: HOME_JOINT_NAMES.iter().map(|n| n.to_string()).collect(),
        points: vec![TrajectoryPoint {
            positions: vec![0.0; HOME_JOINT_NAMES.len()],
            time_from_start: HOME_TIME_FROM_START,
        }],
    }
}

/// Homing state machine for a single arm.
#[derive(Debug)]
pub struct ArmHomingController {
    arm: ArmId,
    state: ArmHomingState,
    last_joint_state: Option<JointState>,
}

impl ArmHomingController {
    pub fn new(arm: ArmId) -> Self {
        Self {
            arm,
            state: ArmHomingState::NotZeroed,
            last_joint_state: None,
        }
    }

    pub fn arm(&self) -> ArmId {
        self.arm
    }

    pub fn state(&self) -> ArmHomingState {
        self.state
    }

    /// Most recent well-formed joint state.
    pub fn last_joint_state(&self) -> Option<&JointState> {
        self.last_joint_state.as_ref()
    }

    /// Feed one joint-state sample.
    ///
    /// Returns the home command on the first well-formed sample and `None`
    /// afterwards.
    ///
    /// # Errors
    ///
    /// [`WorkcellError::MalformedMessage`] if the sample names no joints, or
    /// carries positions whose count differs from the number of names.  The
    /// controller is left untouched.
    pub fn on_joint_state(
        &mut self,
        joint_state: JointState,
    ) -> Result<Option<TrajectoryCommand>, WorkcellError> {
        if joint_state.name.is_empty() {
            return Err(WorkcellError::malformed(
                self.arm.joint_state_topic(),
                "joint state names no joints",
            ));
        }
        if !joint_state.position.is_empty() && joint_state.position.len() != joint_state.name.len()
        {
            return Err(WorkcellError::malformed(
                self.arm.joint_state_topic(),
                format!(
                    "{} positions for {} joints",
                    joint_state.position.len(),
                    joint_state.name.len()
                ),
            ));
        }

        self.last_joint_state = Some(joint_state);
        match self.state {
            ArmHomingState::Zeroed => Ok(None),
            ArmHomingState::NotZeroed => {
                self.state = ArmHomingState::Zeroed;
                Ok(Some(home_command(self.arm)))
            }
        }
    }
}
