//! [`CellMonitor`] – the feed dispatcher.
//!
//! Wires the cell's feeds to the monitor's components:
//!
//! | Bus topic | Handled by |
//! |---|---|
//! | [`Topic::Competition`] | [`LifecycleTracker`] and [`OrderIntake`] |
//! | [`Topic::JointStates`] | one [`ArmHomingController`] per arm, then the [`CommandPublisher`] |
//! | [`Topic::SensorFeeds`] | the camera's [`DetectionWorker`], proximity heuristics |
//!
//! Each topic is drained by its own dispatch task.  Every component's state
//! sits behind its own mutex, so a handler is atomic with respect to the
//! component it touches and never holds more than one lock.  Dispatch tasks
//! never wait on pose resolution: camera batches are handed to the workers
//! with a non-blocking submit.
//!
//! Derived notifications (state transitions, score changes, competition
//! end) are published on [`Topic::SystemAlerts`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use workcell_middleware::{CommandPublisher, EventBus, Topic, TopicReceiver};
use workcell_perception::{FrameGraphClient, PoseResolver, RetryPolicy};
use workcell_types::{ArmId, Event, EventPayload, Order, WorkcellError};

use crate::arm_homing::{ArmHomingController, ArmHomingState};
use crate::detection_processor::{
    DEFAULT_DETECTION_DEADLINE, DEFAULT_QUEUE_DEPTH, DetectionProcessor, DetectionWorker,
};
use crate::lifecycle::LifecycleTracker;
use crate::order_intake::OrderIntake;
use crate::proximity::{laser_detects_object, laser_hits, range_detects_object};
use crate::throttle::{FAST_LOG_PERIOD, LogThrottle, SLOW_LOG_PERIOD};

const SOURCE: &str = "workcell-runtime::monitor";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// A logical camera and the frame its detections are posed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFeed {
    pub topic: String,
    pub frame_id: String,
}

/// Configuration bundle for [`CellMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub cameras: Vec<CameraFeed>,
    /// Frame every observation is resolved into.
    pub world_frame: String,
    /// Resolver deadline per detection.
    pub detection_deadline: Duration,
    pub retry: RetryPolicy,
    /// Batches each detection worker buffers.
    pub queue_depth: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cameras: vec![
                CameraFeed {
                    topic: "/ariac/logical_camera_1".to_string(),
                    frame_id: "logical_camera_1_frame".to_string(),
                },
                CameraFeed {
                    topic: "/ariac/logical_camera_4".to_string(),
                    frame_id: "logical_camera_4_frame".to_string(),
                },
            ],
            world_frame: workcell_types::WORLD_FRAME.to_string(),
            detection_deadline: DEFAULT_DETECTION_DEADLINE,
            retry: RetryPolicy::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

/// Component state shared by the dispatch tasks.
#[derive(Debug)]
pub struct MonitorState {
    lifecycle: Mutex<LifecycleTracker>,
    orders: Mutex<OrderIntake>,
    arm1: Mutex<ArmHomingController>,
    arm2: Mutex<ArmHomingController>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            lifecycle: Mutex::new(LifecycleTracker::new()),
            orders: Mutex::new(OrderIntake::new()),
            arm1: Mutex::new(ArmHomingController::new(ArmId::Arm1)),
            arm2: Mutex::new(ArmHomingController::new(ArmId::Arm2)),
        }
    }
}

impl MonitorState {
    pub fn competition_state(&self) -> Option<String> {
        lock(&self.lifecycle).state().map(str::to_string)
    }

    pub fn score(&self) -> f64 {
        lock(&self.lifecycle).score()
    }

    pub fn competition_ended(&self) -> bool {
        lock(&self.lifecycle).has_ended()
    }

    pub fn orders(&self) -> Vec<Order> {
        lock(&self.orders).snapshot()
    }

    pub fn arm_state(&self, arm: ArmId) -> ArmHomingState {
        lock(self.arm(arm)).state()
    }

    fn arm(&self, arm: ArmId) -> &Mutex<ArmHomingController> {
        match arm {
            ArmId::Arm1 => &self.arm1,
            ArmId::Arm2 => &self.arm2,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─────────────────────────────────────────────────────────────────────────────
// CellMonitor
// ─────────────────────────────────────────────────────────────────────────────

/// Running monitor: shared state plus the handles of every task it started.
pub struct CellMonitor {
    state: Arc<MonitorState>,
    workers: Arc<HashMap<String, DetectionWorker>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Everything a dispatch task needs, cloned once per task.
#[derive(Clone)]
struct Dispatch {
    bus: EventBus,
    state: Arc<MonitorState>,
    publisher: Arc<dyn CommandPublisher>,
    workers: Arc<HashMap<String, DetectionWorker>>,
    slow_log: Arc<LogThrottle>,
    fast_log: Arc<LogThrottle>,
}

impl CellMonitor {
    /// Subscribe to every feed topic and start the dispatch and detection
    /// worker tasks.  Must be called from within a Tokio runtime.
    ///
    /// Subscriptions are in place when this returns, so events published
    /// afterwards are never missed.
    pub fn start<C>(
        bus: EventBus,
        frames: C,
        publisher: Arc<dyn CommandPublisher>,
        config: MonitorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self
    where
        C: FrameGraphClient + Clone + 'static,
    {
        let mut tasks = Vec::new();

        let mut workers = HashMap::new();
        for camera in &config.cameras {
            let resolver = PoseResolver::new(frames.clone())
                .with_policy(config.retry)
                .with_target_frame(config.world_frame.clone());
            let processor = DetectionProcessor::new(resolver, camera.frame_id.clone())
                .with_deadline(config.detection_deadline);
            let (worker, handle) = DetectionWorker::spawn(
                camera.topic.clone(),
                processor,
                bus.clone(),
                config.queue_depth,
                shutdown.clone(),
            );
            info!(camera = %camera.topic, frame = %camera.frame_id, "detection worker started");
            workers.insert(worker.camera_topic().to_string(), worker);
            tasks.push(handle);
        }

        let state = Arc::new(MonitorState::default());
        let workers = Arc::new(workers);
        let dispatch = Dispatch {
            bus: bus.clone(),
            state: Arc::clone(&state),
            publisher,
            workers: Arc::clone(&workers),
            slow_log: Arc::new(LogThrottle::every(SLOW_LOG_PERIOD)),
            fast_log: Arc::new(LogThrottle::every(FAST_LOG_PERIOD)),
        };

        for topic in [Topic::Competition, Topic::JointStates, Topic::SensorFeeds] {
            let rx = bus.subscribe_to(topic);
            tasks.push(tokio::spawn(run_dispatch(
                dispatch.clone(),
                rx,
                shutdown.clone(),
            )));
        }

        Self {
            state,
            workers,
            tasks,
        }
    }

    pub fn state(&self) -> Arc<MonitorState> {
        Arc::clone(&self.state)
    }

    /// Detection batches queued or being resolved across every camera.
    pub fn pending_batches(&self) -> usize {
        self.workers.values().map(DetectionWorker::pending).sum()
    }

    /// Poll every `poll` until the detection workers are idle or `shutdown`
    /// flips.  Returns the number of batches still pending, which is zero
    /// unless shutdown cut the wait short.
    pub async fn wait_idle(&self, poll: Duration, mut shutdown: watch::Receiver<bool>) -> usize {
        loop {
            let pending = self.pending_batches();
            if pending == 0 || *shutdown.borrow() {
                return pending;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return self.pending_batches();
                    }
                }
            }
        }
    }

    /// Wait for every task to finish.  Tasks finish once the shutdown signal
    /// flips.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "monitor task failed");
            }
        }
    }
}

async fn run_dispatch(
    dispatch: Dispatch,
    mut rx: TopicReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    let topic = rx.topic();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            result = rx.recv() => match result {
                Ok(event) => dispatch.handle(event.payload).await,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(?topic, lagged_by = n, "dispatcher lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!(?topic, "dispatcher exiting");
}

impl Dispatch {
    async fn handle(&self, payload: EventPayload) {
        match payload {
            EventPayload::CompetitionState(s) => self.on_competition_state(&s),
            EventPayload::Score(score) => self.on_score(score),
            EventPayload::Order(order) => {
                info!(order_id = order.order_id.as_deref().unwrap_or("?"), "order received");
                lock(&self.state.orders).on_order_received(order);
            }
            EventPayload::JointState { arm, state } => {
                if self.slow_log.allow(arm.as_str()) {
                    info!(%arm, joints = state.name.len(), positions = ?state.position, "joint state");
                }
                let outcome = lock(self.state.arm(arm)).on_joint_state(state);
                match outcome {
                    Ok(Some(command)) => {
                        info!(%arm, "sending arm to zero joint positions");
                        if let Err(e) = self.publisher.publish_command(command).await {
                            warn!(%arm, error = %e, "home command was not delivered");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%arm, error = %e, "dropping joint state"),
                }
            }
            EventPayload::DetectionBatch {
                camera_topic,
                detections,
            } => {
                if self.slow_log.allow(&camera_topic) {
                    info!(camera = %camera_topic, objects = detections.len(), "camera batch");
                }
                match self.workers.get(&camera_topic) {
                    Some(worker) => {
                        worker.try_submit(detections);
                    }
                    None => debug!(camera = %camera_topic, "no worker for camera"),
                }
            }
            EventPayload::Range(reading) => {
                if range_detects_object(&reading) && self.fast_log.allow("proximity") {
                    info!(range = reading.range, "proximity sensor sees something");
                }
            }
            EventPayload::BreakBeam { object_detected } => {
                if object_detected && self.fast_log.allow("break_beam") {
                    info!("break beam triggered");
                }
            }
            EventPayload::LaserScan { ranges } => {
                if laser_detects_object(&ranges) && self.fast_log.allow("laser_profiler") {
                    info!(hits = laser_hits(&ranges), "laser profiler sees something");
                }
            }
            other => debug!(?other, "ignoring payload"),
        }
    }

    fn on_competition_state(&self, new_state: &str) {
        let transition = lock(&self.state.lifecycle).on_state_update(new_state);
        let Some(transition) = transition else {
            return;
        };
        info!(from = ?transition.from, to = %transition.to, "competition state changed");
        self.alert(EventPayload::LifecycleTransition {
            from: transition.from,
            to: transition.to,
        });
        if transition.competition_ended {
            info!("Competition ended.");
            self.alert(EventPayload::CompetitionEnded);
        }
    }

    fn on_score(&self, score: f64) {
        let change = lock(&self.state.lifecycle).on_score_update(score);
        if let Some(change) = change {
            info!(previous = change.previous, current = change.current, "score changed");
            self.alert(EventPayload::ScoreChanged {
                previous: change.previous,
                current: change.current,
            });
        }
    }

    fn alert(&self, payload: EventPayload) {
        if let Err(e) = self
            .bus
            .publish_to(Topic::SystemAlerts, Event::new(SOURCE, payload))
        {
            debug!(error = %e, "alert had no listeners");
        }
    }
}

/// Log the outcome of a competition-start handshake.  Failure is reported
/// and the monitor keeps running.
pub fn report_start_outcome(outcome: Result<(), WorkcellError>) {
    match outcome {
        Ok(()) => info!("competition started"),
        Err(e) => warn!(error = %e, "failed to start the competition"),
    }
}
