//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! Traffic is partitioned into six [`Topic`] lanes so components only
//! receive the messages they care about:
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::SensorFeeds`] | Logical camera batches, proximity, break beam, laser profiler |
//! | [`Topic::JointStates`] | Per-arm `sensor_msgs/JointState` samples |
//! | [`Topic::Competition`] | Competition state, score, incoming orders |
//! | [`Topic::ArmCommands`] | Trajectory commands addressed to an arm |
//! | [`Topic::Observations`] | Detections resolved into the world frame |
//! | [`Topic::SystemAlerts`] | Lifecycle transitions, score changes, competition end |

use workcell_types::{Event, WorkcellError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Camera and presence-sensor traffic.
    SensorFeeds,
    /// Joint-state samples from both arms.
    JointStates,
    /// Competition state, score and orders.
    Competition,
    /// Outbound arm trajectories.
    ArmCommands,
    /// World-frame observations produced by the detection workers.
    Observations,
    /// Notifications derived by the monitor.
    SystemAlerts,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::SensorFeeds,
        Topic::JointStates,
        Topic::Competition,
        Topic::ArmCommands,
        Topic::Observations,
        Topic::SystemAlerts,
    ];
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    sensor_feeds: broadcast::Sender<Event>,
    joint_states: broadcast::Sender<Event>,
    competition: broadcast::Sender<Event>,
    arm_commands: broadcast::Sender<Event>,
    observations: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (sensor_feeds, _) = broadcast::channel(capacity);
        let (joint_states, _) = broadcast::channel(capacity);
        let (competition, _) = broadcast::channel(capacity);
        let (arm_commands, _) = broadcast::channel(capacity);
        let (observations, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            sensor_feeds,
            joint_states,
            competition,
            arm_commands,
            observations,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// [`WorkcellError::Channel`] when nobody is subscribed to the topic.
    /// Publishers that do not care whether anyone listens should discard it.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, WorkcellError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| WorkcellError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::SensorFeeds => &self.sensor_feeds,
            Topic::JointStates => &self.joint_states,
            Topic::Competition => &self.competition,
            Topic::ArmCommands => &self.arm_commands,
            Topic::Observations => &self.observations,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workcell_types::EventPayload;

    fn make_event(source: &str) -> Event {
        Event::new(source, EventPayload::Score(12.5))
    }

    #[test]
    fn publish_without_subscribers_returns_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Competition, make_event("test"));
        assert!(matches!(result, Err(WorkcellError::Channel(_))));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::Competition);
        let mut second = bus.subscribe_to(Topic::Competition);

        let event = make_event("feed/ariac/current_score");
        assert_eq!(bus.publish_to(Topic::Competition, event.clone())?, 2);

        assert_eq!(first.recv().await?.id, event.id);
        assert_eq!(second.recv().await?.id, event.id);
        assert_eq!(first.topic(), Topic::Competition);
        Ok(())
    }

    /// A subscriber on `SystemAlerts` must not receive events published to
    /// `SensorFeeds` because they are routed through separate channels.
    #[tokio::test]
    async fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _feeds = bus.subscribe_to(Topic::SensorFeeds);

        bus.publish_to(Topic::SensorFeeds, make_event("feed/ariac/logical_camera_1"))?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "SystemAlerts must not see a SensorFeeds event");
        Ok(())
    }

    /// Flooding a low-capacity channel while a subscriber sleeps must produce
    /// a `Lagged` error rather than panicking or blocking.
    #[tokio::test]
    async fn slow_subscriber_lags() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::JointStates);

        for _ in 0..1_000 {
            let _ = bus.publish_to(Topic::JointStates, make_event("flood"));
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }
}
