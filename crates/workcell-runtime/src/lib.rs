//! `workcell-runtime` – the monitor's state machines and task orchestration.
//!
//! # Modules
//!
//! - [`monitor`] – [`CellMonitor`][monitor::CellMonitor]: one dispatch task
//!   per feed group, routing bus events to the components below.
//! - [`detection_processor`] –
//!   [`DetectionProcessor`][detection_processor::DetectionProcessor] resolves
//!   camera batches into world-frame observations;
//!   [`DetectionWorker`][detection_processor::DetectionWorker] runs one per
//!   camera off the dispatch path.
//! - [`arm_homing`] – [`ArmHomingController`][arm_homing::ArmHomingController]:
//!   sends each arm home once, on its first live joint state.
//! - [`lifecycle`] – [`LifecycleTracker`][lifecycle::LifecycleTracker]:
//!   competition state transitions and score changes.
//! - [`order_intake`] – [`OrderIntake`][order_intake::OrderIntake]: the
//!   append-only order log.
//! - [`proximity`] – presence heuristics for the range, break-beam and laser
//!   sensors.
//! - [`throttle`] – [`LogThrottle`][throttle::LogThrottle]: keeps high-rate
//!   feeds from flooding the log.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod arm_homing;
pub mod detection_processor;
pub mod lifecycle;
pub mod monitor;
pub mod order_intake;
pub mod proximity;
pub mod telemetry;
pub mod throttle;

pub use arm_homing::{ArmHomingController, ArmHomingState};
pub use detection_processor::{DetectionProcessor, DetectionWorker};
pub use lifecycle::LifecycleTracker;
pub use monitor::{CameraFeed, CellMonitor, MonitorConfig, MonitorState};
pub use order_intake::OrderIntake;
pub use telemetry::{TracerProviderGuard, init_tracing};
