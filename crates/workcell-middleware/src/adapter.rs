//! Outbound seams of the monitor.
//!
//! The monitor never speaks directly to rosbridge.  It hands arm
//! trajectories to a [`CommandPublisher`] and asks a [`CompetitionStarter`]
//! to open the competition; the transport behind either is swappable.
//!
//! - [`BusCommandPublisher`] – publishes commands on
//!   [`Topic::ArmCommands`], where the
//!   [`RosbridgeLink`][crate::rosbridge::RosbridgeLink] picks them up.
//! - [`RosbridgeClient`][crate::rosbridge::RosbridgeClient] – issues the
//!   `start_competition` service call over the live link.

use async_trait::async_trait;
use workcell_types::{Event, EventPayload, TrajectoryCommand, WorkcellError};

use crate::bus::{EventBus, Topic};

/// Accepts trajectory commands keyed by the arm they address.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish_command(&self, command: TrajectoryCommand) -> Result<(), WorkcellError>;
}

/// Triggers the competition-start handshake.
#[async_trait]
pub trait CompetitionStarter: Send + Sync {
    /// # Errors
    ///
    /// [`WorkcellError::ServiceUnavailable`] if the service could not be
    /// reached or reported failure.
    async fn start_competition(&self) -> Result<(), WorkcellError>;
}

/// [`CommandPublisher`] that routes commands over the internal bus.
#[derive(Clone, Debug)]
pub struct BusCommandPublisher {
    bus: EventBus,
}

impl BusCommandPublisher {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl CommandPublisher for BusCommandPublisher {
    /// # Errors
    ///
    /// [`WorkcellError::Channel`] when nothing is forwarding
    /// [`Topic::ArmCommands`]; the command is lost in that case.
    async fn publish_command(&self, command: TrajectoryCommand) -> Result<(), WorkcellError> {
        let source = format!("workcell-middleware::command{}", command.arm.command_topic());
        let event = Event::new(source, EventPayload::ArmCommand(command));
        self.bus.publish_to(Topic::ArmCommands, event).map(|_| ())
    }
}
