//! Offline replay of recorded rosbridge traffic.
//!
//! A recording is newline-delimited JSON, one rosbridge frame per line, as
//! the server would have sent it.  Blank lines and lines starting with `#`
//! are skipped.

use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use workcell_middleware::{FeedAdapter, Ingested};
use workcell_types::WorkcellError;

/// Counts of what a replay fed into the monitor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub published: usize,
    pub frame_updates: usize,
    pub ignored: usize,
    pub malformed: usize,
}

/// Feed every frame in `path` through `adapter`, sleeping `pace` between
/// frames.  Stops early when `shutdown` flips to `true`.
///
/// Malformed lines are logged with their line number and skipped.
///
/// # Errors
///
/// [`WorkcellError::Config`] if the file cannot be opened or read.
pub async fn replay_file(
    path: &Path,
    adapter: &FeedAdapter,
    pace: Duration,
    shutdown: &watch::Receiver<bool>,
) -> Result<ReplaySummary, WorkcellError> {
    let file = File::open(path).await.map_err(|e| {
        WorkcellError::Config(format!("failed to open recording {}: {e}", path.display()))
    })?;
    let mut lines = BufReader::new(file).lines();
    let mut summary = ReplaySummary::default();
    let mut line_no = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| WorkcellError::Config(format!("failed to read recording: {e}")))?
    {
        line_no += 1;
        if *shutdown.borrow() {
            info!(line = line_no, "replay interrupted");
            break;
        }
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match adapter.ingest_frame(line) {
            Ok(Ingested::Published(_)) => summary.published += 1,
            Ok(Ingested::Frames(n)) => summary.frame_updates += n,
            Ok(Ingested::Ignored) => summary.ignored += 1,
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed frame");
                summary.malformed += 1;
            }
        }

        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }

    info!(?summary, "replay finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use workcell_middleware::{EventBus, Topic};
    use workcell_perception::{FrameBuffer, SharedFrameBuffer};
    use workcell_types::EventPayload;

    fn recording(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tmp file");
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    #[tokio::test]
    async fn replays_feeds_and_counts_outcomes() {
        let bus = EventBus::default();
        let frames = SharedFrameBuffer::new(FrameBuffer::default());
        let adapter = FeedAdapter::new(bus.clone(), frames.clone());
        let mut competition = bus.subscribe_to(Topic::Competition);

        let file = recording(&[
            "# recorded at the cell".to_string(),
            json!({"op": "publish", "topic": "/ariac/competition_state", "msg": {"data": "go"}})
                .to_string(),
            String::new(),
            json!({"op": "publish", "topic": "/tf_static", "msg": {"transforms": [{
                "header": {"frame_id": "/world"},
                "child_frame_id": "logical_camera_1_frame",
                "transform": {
                    "translation": {"x": 1.0, "y": 0.0, "z": 1.0},
                    "rotation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
                }
            }]}})
            .to_string(),
            json!({"op": "publish", "topic": "/rosout", "msg": {}}).to_string(),
            "{not json".to_string(),
        ]);

        let (_tx, shutdown) = watch::channel(false);
        let summary = replay_file(file.path(), &adapter, Duration::ZERO, &shutdown)
            .await
            .unwrap();

        assert_eq!(
            summary,
            ReplaySummary {
                published: 1,
                frame_updates: 1,
                ignored: 1,
                malformed: 1,
            }
        );
        assert!(frames.has_frame("logical_camera_1_frame"));

        let event = competition.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::CompetitionState(ref s) if s == "go"));
    }

    #[tokio::test]
    async fn shutdown_stops_replay_before_the_first_frame() {
        let bus = EventBus::default();
        let adapter = FeedAdapter::new(bus, SharedFrameBuffer::new(FrameBuffer::default()));
        let file = recording(&[
            json!({"op": "publish", "topic": "/ariac/current_score", "msg": {"data": 3.0}})
                .to_string(),
        ]);

        let (_tx, shutdown) = watch::channel(true);
        let summary = replay_file(file.path(), &adapter, Duration::ZERO, &shutdown)
            .await
            .unwrap();
        assert_eq!(summary, ReplaySummary::default());
    }

    #[tokio::test]
    async fn missing_recording_is_an_error() {
        let bus = EventBus::default();
        let adapter = FeedAdapter::new(bus, SharedFrameBuffer::new(FrameBuffer::default()));
        let (_tx, shutdown) = watch::channel(false);
        let err = replay_file(
            Path::new("/nonexistent/recording.ndjson"),
            &adapter,
            Duration::ZERO,
            &shutdown,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkcellError::Config(_)));
    }
}
