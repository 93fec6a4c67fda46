//! `workcell-middleware` – the plumbing between the cell and the monitor.
//!
//! Routes asynchronous data between the competition's rosbridge server and
//! the monitor's components without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`adapter`] – the [`CommandPublisher`] and [`CompetitionStarter`] seams.
//! - [`feed_adapter`] – decodes rosbridge feed frames into bus events and
//!   frame-graph updates.
//! - [`rosbridge`] – the live WebSocket link to a `rosbridge_server`.

pub mod adapter;
pub mod bus;
pub mod feed_adapter;
pub mod rosbridge;

pub use adapter::{BusCommandPublisher, CommandPublisher, CompetitionStarter};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use feed_adapter::{FeedAdapter, Ingested, feed_subscriptions};
pub use rosbridge::{RosbridgeClient, RosbridgeLink};
