//! Live rosbridge link.
//!
//! [`RosbridgeLink`] owns one WebSocket connection to a `rosbridge_server`:
//!
//! 1. **Inbound** – subscribes to every feed returned by
//!    [`feed_subscriptions`][crate::feed_adapter::feed_subscriptions] and
//!    hands each text frame to the [`FeedAdapter`].
//! 2. **Outbound** – advertises both arm command topics and forwards every
//!    [`Topic::ArmCommands`] event as a `trajectory_msgs/JointTrajectory`.
//! 3. **Services** – [`RosbridgeClient`] issues `call_service` requests over
//!    the same socket and matches the `service_response` by id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;
use workcell_types::{ArmId, EventPayload, TrajectoryCommand, WorkcellError};

use crate::adapter::CompetitionStarter;
use crate::bus::{EventBus, Topic};
use crate::feed_adapter::{FeedAdapter, FeedSubscription};

/// Service that opens the competition.
pub const START_COMPETITION_SERVICE: &str = "/ariac/start_competition";

/// Depth of the queue of frames waiting to be written to the socket.
const OUTBOUND_CAPACITY: usize = 64;

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

// ─────────────────────────────────────────────────────────────────────────────
// Frame builders
// ─────────────────────────────────────────────────────────────────────────────

pub fn subscribe_frame(sub: &FeedSubscription) -> Value {
    json!({ "op": "subscribe", "topic": sub.topic, "type": sub.msg_type })
}

pub fn advertise_frame(arm: ArmId) -> Value {
    json!({
        "op": "advertise",
        "topic": arm.command_topic(),
        "type": "trajectory_msgs/JointTrajectory",
    })
}

pub fn call_service_frame(id: &str, service: &str) -> Value {
    json!({ "op": "call_service", "id": id, "service": service, "args": {} })
}

/// Encode `command` as a publish of a `trajectory_msgs/JointTrajectory` on
/// the addressed arm's command topic.
pub fn joint_trajectory_frame(command: &TrajectoryCommand) -> Value {
    let points: Vec<Value> = command
        .points
        .iter()
        .map(|p| {
            json!({
                "positions": p.positions,
                "velocities": [],
                "accelerations": [],
                "effort": [],
                "time_from_start": {
                    "secs": p.time_from_start.as_secs(),
                    "nsecs": p.time_from_start.subsec_nanos(),
                },
            })
        })
        .collect();
    json!({
        "op": "publish",
        "topic": command.arm.command_topic(),
        "msg": {
            "joint_names": command.joint_names,
            "points": points,
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// RosbridgeClient
// ─────────────────────────────────────────────────────────────────────────────

/// Issues service calls over a running [`RosbridgeLink`].
#[derive(Clone, Debug)]
pub struct RosbridgeClient {
    outbound: mpsc::Sender<Value>,
    pending: PendingCalls,
    call_timeout: Duration,
}

impl RosbridgeClient {
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Call `service` with empty arguments and wait for its response.
    pub async fn call_service(&self, service: &str) -> Result<Value, WorkcellError> {
        let id = format!("call_service:{service}:{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), tx);

        let result: Result<Value, WorkcellError> = async {
            self.outbound
                .send(call_service_frame(&id, service))
                .await
                .map_err(|_| WorkcellError::ServiceUnavailable(format!("{service}: link closed")))?;
            match tokio::time::timeout(self.call_timeout, rx).await {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(WorkcellError::ServiceUnavailable(format!(
                    "{service}: link closed"
                ))),
                Err(_) => Err(WorkcellError::ServiceUnavailable(format!(
                    "{service}: no response within {:?}",
                    self.call_timeout
                ))),
            }
        }
        .await;

        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        result
    }
}

#[async_trait]
impl CompetitionStarter for RosbridgeClient {
    async fn start_competition(&self) -> Result<(), WorkcellError> {
        let response = self.call_service(START_COMPETITION_SERVICE).await?;
        trigger_outcome(&response)
    }
}

/// Interpret a `std_srvs/Trigger` service response.
fn trigger_outcome(response: &Value) -> Result<(), WorkcellError> {
    let called = response.get("result").and_then(Value::as_bool).unwrap_or(false);
    let values = response.get("values");
    let success = values
        .and_then(|v| v.get("success"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if called && success {
        return Ok(());
    }
    let message = values
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("service call failed");
    Err(WorkcellError::ServiceUnavailable(format!(
        "{START_COMPETITION_SERVICE}: {message}"
    )))
}

// ─────────────────────────────────────────────────────────────────────────────
// RosbridgeLink
// ─────────────────────────────────────────────────────────────────────────────

/// One WebSocket session with a rosbridge server.
pub struct RosbridgeLink {
    url: String,
    adapter: FeedAdapter,
    bus: EventBus,
    subscriptions: Vec<FeedSubscription>,
    outbound_tx: mpsc::Sender<Value>,
    outbound_rx: mpsc::Receiver<Value>,
    pending: PendingCalls,
}

impl RosbridgeLink {
    pub fn new(
        url: impl Into<String>,
        adapter: FeedAdapter,
        bus: EventBus,
        subscriptions: Vec<FeedSubscription>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            url: url.into(),
            adapter,
            bus,
            subscriptions,
            outbound_tx,
            outbound_rx,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A handle for service calls.  Calls made before [`run`](Self::run)
    /// connects are queued.
    pub fn client(&self) -> RosbridgeClient {
        RosbridgeClient {
            outbound: self.outbound_tx.clone(),
            pending: Arc::clone(&self.pending),
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Connect and pump frames until the server closes the socket or
    /// `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// [`WorkcellError::Transport`] if the connection cannot be opened or a
    /// write fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkcellError> {
        let RosbridgeLink {
            url,
            adapter,
            bus,
            subscriptions,
            outbound_tx,
            mut outbound_rx,
            pending,
        } = self;
        drop(outbound_tx);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| WorkcellError::Transport(format!("connect {url}: {e}")))?;
        info!(url = %url, "connected to rosbridge");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut commands = bus.subscribe_to(Topic::ArmCommands);

        let mut handshake: Vec<Value> = subscriptions.iter().map(subscribe_frame).collect();
        handshake.extend(ArmId::ALL.into_iter().map(advertise_frame));
        for frame in handshake {
            ws_tx
                .send(Message::Text(frame.to_string().into()))
                .await
                .map_err(|e| WorkcellError::Transport(e.to_string()))?;
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            handle_inbound(&adapter, &pending, text.as_str());
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("rosbridge closed the connection");
                            break;
                        }
                        Some(Err(e)) => return Err(WorkcellError::Transport(e.to_string())),
                        _ => {}
                    }
                }
                Some(frame) = outbound_rx.recv() => {
                    ws_tx
                        .send(Message::Text(frame.to_string().into()))
                        .await
                        .map_err(|e| WorkcellError::Transport(e.to_string()))?;
                }
                result = commands.recv() => {
                    match result {
                        Ok(event) => {
                            if let EventPayload::ArmCommand(cmd) = event.payload {
                                debug!(arm = %cmd.arm, "forwarding arm command");
                                let frame = joint_trajectory_frame(&cmd).to_string();
                                ws_tx
                                    .send(Message::Text(frame.into()))
                                    .await
                                    .map_err(|e| WorkcellError::Transport(e.to_string()))?;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(lagged_by = n, "arm command forwarder lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn handle_inbound(&self, text: &str) {
        handle_inbound(&self.adapter, &self.pending, text);
    }
}

/// Route one inbound text frame: service responses wake their caller,
/// everything else goes to the feed adapter.
fn handle_inbound(adapter: &FeedAdapter, pending: &PendingCalls, text: &str) {
    if let Some(id) = service_response_id(text) {
        let waiter = pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&id);
        match (waiter, serde_json::from_str::<Value>(text)) {
            (Some(tx), Ok(response)) => {
                let _ = tx.send(response);
            }
            _ => debug!(%id, "unmatched service response"),
        }
        return;
    }
    if let Err(e) = adapter.ingest_frame(text) {
        warn!(error = %e, "dropping malformed feed message");
    }
}

/// The id of a `service_response` frame, if `text` is one.
fn service_response_id(text: &str) -> Option<String> {
    let frame: Value = serde_json::from_str(text).ok()?;
    if frame.get("op").and_then(Value::as_str) != Some("service_response") {
        return None;
    }
    frame.get("id").and_then(Value::as_str).map(str::to_string)
}
