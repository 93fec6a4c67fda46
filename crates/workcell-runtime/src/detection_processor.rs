//! Per-camera detection processing.
//!
//! A [`DetectionProcessor`] resolves every detection of one camera batch
//! into the world frame.  Detections are handled in batch order, each with
//! its own resolver deadline, and a detection that cannot be resolved is
//! skipped without affecting the rest of the batch.
//!
//! A [`DetectionWorker`] runs one processor on its own Tokio task so the
//! feed dispatcher never waits on a resolver.  Batches are handed over a
//! bounded queue; when the queue is full the incoming batch is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use workcell_middleware::{EventBus, Topic};
use workcell_perception::{FrameGraphClient, PoseResolver};
use workcell_types::{Detection, Event, EventPayload, ResolvedObservation};

/// Per-detection resolver deadline used when none is configured.
pub const DEFAULT_DETECTION_DEADLINE: Duration = Duration::from_secs(2);

/// Default number of batches a worker buffers before dropping new ones.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

// ─────────────────────────────────────────────────────────────────────────────
// DetectionProcessor
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves detection batches from one camera.
#[derive(Debug)]
pub struct DetectionProcessor<C> {
    resolver: PoseResolver<C>,
    source_frame_id: String,
    deadline: Duration,
}

impl<C: FrameGraphClient> DetectionProcessor<C> {
    pub fn new(resolver: PoseResolver<C>, source_frame_id: impl Into<String>) -> Self {
        Self {
            resolver,
            source_frame_id: source_frame_id.into(),
            deadline: DEFAULT_DETECTION_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn source_frame_id(&self) -> &str {
        &self.source_frame_id
    }

    /// Resolve a batch reported by this processor's camera.
    pub async fn process(&self, detections: &[Detection]) -> Vec<ResolvedObservation> {
        self.process_batch(detections, &self.source_frame_id).await
    }

    /// Resolve a batch reported in `source_frame_id`.
    ///
    /// Observations come back in batch order; `sensor_index` is the
    /// detection's position in `detections`, so skipped detections leave a
    /// gap.
    pub async fn process_batch(
        &self,
        detections: &[Detection],
        source_frame_id: &str,
    ) -> Vec<ResolvedObservation> {
        let mut observations = Vec::with_capacity(detections.len());
        for (sensor_index, detection) in detections.iter().enumerate() {
            match self
                .resolver
                .resolve(detection, source_frame_id, self.deadline)
                .await
            {
                Ok(resolved) => {
                    let p = resolved.pose.position;
                    info!(
                        kind = %detection.kind,
                        frame = source_frame_id,
                        target = self.resolver.target_frame(),
                        x = p.x,
                        y = p.y,
                        z = p.z,
                        roll = resolved.rpy.roll,
                        pitch = resolved.rpy.pitch,
                        yaw = resolved.rpy.yaw,
                        "object located in world frame"
                    );
                    observations.push(ResolvedObservation {
                        kind: detection.kind.clone(),
                        world_pose: resolved.pose,
                        rpy: resolved.rpy,
                        source_frame_id: source_frame_id.to_string(),
                        sensor_index,
                    });
                }
                Err(e) => {
                    warn!(
                        kind = %detection.kind,
                        frame = source_frame_id,
                        sensor_index,
                        error = %e,
                        "skipping detection"
                    );
                }
            }
        }
        observations
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DetectionWorker
// ─────────────────────────────────────────────────────────────────────────────

/// Sending side of a running worker.
#[derive(Debug, Clone)]
pub struct DetectionWorker {
    camera_topic: String,
    queue: mpsc::Sender<Vec<Detection>>,
    /// Batches accepted but not yet fully resolved.
    pending: Arc<AtomicUsize>,
}

impl DetectionWorker {
    /// Start a worker task for `camera_topic`.
    ///
    /// The task publishes every resolved observation on
    /// [`Topic::Observations`] and stops when `shutdown` flips to `true` or
    /// every [`DetectionWorker`] clone is dropped.
    pub fn spawn<C>(
        camera_topic: impl Into<String>,
        processor: DetectionProcessor<C>,
        bus: EventBus,
        queue_depth: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<()>)
    where
        C: FrameGraphClient + 'static,
    {
        let camera_topic = camera_topic.into();
        let (queue, rx) = mpsc::channel(queue_depth.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run_worker(
            camera_topic.clone(),
            Arc::new(processor),
            bus,
            rx,
            Arc::clone(&pending),
            shutdown,
        ));
        (
            Self {
                camera_topic,
                queue,
                pending,
            },
            handle,
        )
    }

    pub fn camera_topic(&self) -> &str {
        &self.camera_topic
    }

    /// Batches queued or being resolved.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Queue a batch without waiting.  Returns `false` if the batch was
    /// dropped because the queue is full or the worker has stopped.
    pub fn try_submit(&self, detections: Vec<Detection>) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let sent = self.queue.try_send(detections);
        if sent.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        match sent {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(batch)) => {
                warn!(
                    camera = %self.camera_topic,
                    dropped = batch.len(),
                    "detection queue full; dropping batch"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(camera = %self.camera_topic, "detection worker stopped");
                false
            }
        }
    }
}

async fn run_worker<C: FrameGraphClient>(
    camera_topic: String,
    processor: Arc<DetectionProcessor<C>>,
    bus: EventBus,
    mut rx: mpsc::Receiver<Vec<Detection>>,
    pending: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) {
    let source = format!("workcell-runtime::detection{camera_topic}");
    debug!(camera = %camera_topic, frame = processor.source_frame_id(), "detection worker running");
    loop {
        let batch = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            batch = rx.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        let observations = tokio::select! {
            observations = processor.process(&batch) => observations,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };
        for observation in observations {
            let event = Event::new(source.clone(), EventPayload::Observation(observation));
            if let Err(e) = bus.publish_to(Topic::Observations, event) {
                debug!(camera = %camera_topic, error = %e, "observation had no listeners");
            }
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    debug!(camera = %camera_topic, "detection worker exiting");
}
