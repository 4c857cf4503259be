use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::{StateSnapshot, StateUpdate};
use crate::state_machine::Node;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Event names - centralized for consistency
pub mod event_names {
    pub const RUN_STARTED: &str = "pipeline:started";
    pub const STAGE_STARTED: &str = "pipeline:stage-started";
    pub const STAGE_COMPLETED: &str = "pipeline:stage-completed";
    pub const STAGE_SKIPPED: &str = "pipeline:stage-skipped";
    pub const STAGE_FAILED: &str = "pipeline:stage-failed";
    pub const RUN_COMPLETED: &str = "pipeline:completed";
    pub const RUN_FAILED: &str = "pipeline:failed";
}

/// Receiving end of a run's event stream
pub type EventSink = mpsc::UnboundedSender<PipelineEvent>;

/// Run started event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStartedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub question: String,
    pub dataset_id: String,
    pub total_stages: usize,
    pub timestamp: String,
}

/// Stage started event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStartedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub node: Node,
    pub timestamp: String,
}

/// Stage completed event
///
/// `update` is this stage's increment; `snapshot` is the merged state after it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCompletedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub node: Node,
    pub duration_ms: u64,
    pub update: StateUpdate,
    pub snapshot: StateSnapshot,
    pub timestamp: String,
}

/// Stage skipped event (a required input was never produced)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSkippedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub node: Node,
    pub timestamp: String,
}

/// Stage failed event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFailedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub stage_name: String,
    pub node: Node,
    pub error: String,
    pub fatal: bool,
    pub duration_ms: u64,
    pub snapshot: StateSnapshot,
    pub timestamp: String,
}

/// Run completed event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCompletedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub total_duration_ms: u64,
    pub stages_completed: usize,
    pub stages_skipped: usize,
    pub stages_failed: usize,
    pub snapshot: StateSnapshot,
    pub timestamp: String,
}

/// Run failed event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailedEvent {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub failed_stage: String,
    pub error: String,
    pub snapshot: StateSnapshot,
    pub timestamp: String,
}

/// Everything a run reports, in emission order
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    #[serde(rename = "pipeline:started")]
    RunStarted(RunStartedEvent),
    #[serde(rename = "pipeline:stage-started")]
    StageStarted(StageStartedEvent),
    #[serde(rename = "pipeline:stage-completed")]
    StageCompleted(StageCompletedEvent),
    #[serde(rename = "pipeline:stage-skipped")]
    StageSkipped(StageSkippedEvent),
    #[serde(rename = "pipeline:stage-failed")]
    StageFailed(StageFailedEvent),
    #[serde(rename = "pipeline:completed")]
    RunCompleted(RunCompletedEvent),
    #[serde(rename = "pipeline:failed")]
    RunFailed(RunFailedEvent),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted(_) => event_names::RUN_STARTED,
            PipelineEvent::StageStarted(_) => event_names::STAGE_STARTED,
            PipelineEvent::StageCompleted(_) => event_names::STAGE_COMPLETED,
            PipelineEvent::StageSkipped(_) => event_names::STAGE_SKIPPED,
            PipelineEvent::StageFailed(_) => event_names::STAGE_FAILED,
            PipelineEvent::RunCompleted(_) => event_names::RUN_COMPLETED,
            PipelineEvent::RunFailed(_) => event_names::RUN_FAILED,
        }
    }

    /// Merged state carried by this event, if any
    pub fn snapshot(&self) -> Option<&StateSnapshot> {
        match self {
            PipelineEvent::StageCompleted(e) => Some(&e.snapshot),
            PipelineEvent::StageFailed(e) => Some(&e.snapshot),
            PipelineEvent::RunCompleted(e) => Some(&e.snapshot),
            PipelineEvent::RunFailed(e) => Some(&e.snapshot),
            _ => None,
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::RunCompleted(_) | PipelineEvent::RunFailed(_)
        )
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn emit(sink: &EventSink, event: PipelineEvent) -> QueryChartResult<()> {
    sink.send(event)
        .map_err(|_| QueryChartError::EventChannelClosed)
}

/// Event emitter helper functions
pub struct EventEmitter;

impl EventEmitter {
    /// Emit run started event
    pub fn run_started(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        question: &str,
        dataset_id: &str,
        total_stages: usize,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::RunStarted(RunStartedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                question: question.to_string(),
                dataset_id: dataset_id.to_string(),
                total_stages,
                timestamp: now(),
            }),
        )
    }

    /// Emit stage started event
    pub fn stage_started(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        node: Node,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::StageStarted(StageStartedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                stage_name: node.name().to_string(),
                node,
                timestamp: now(),
            }),
        )
    }

    /// Emit stage completed event
    pub fn stage_completed(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        node: Node,
        duration_ms: u64,
        update: StateUpdate,
        snapshot: StateSnapshot,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::StageCompleted(StageCompletedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                stage_name: node.name().to_string(),
                node,
                duration_ms,
                update,
                snapshot,
                timestamp: now(),
            }),
        )
    }

    /// Emit stage skipped event
    pub fn stage_skipped(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        node: Node,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::StageSkipped(StageSkippedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                stage_name: node.name().to_string(),
                node,
                timestamp: now(),
            }),
        )
    }

    /// Emit stage failed event
    #[allow(clippy::too_many_arguments)]
    pub fn stage_failed(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        node: Node,
        error: &str,
        fatal: bool,
        duration_ms: u64,
        snapshot: StateSnapshot,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::StageFailed(StageFailedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                stage_name: node.name().to_string(),
                node,
                error: error.to_string(),
                fatal,
                duration_ms,
                snapshot,
                timestamp: now(),
            }),
        )
    }

    /// Emit run completed event
    #[allow(clippy::too_many_arguments)]
    pub fn run_completed(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        total_duration_ms: u64,
        stages_completed: usize,
        stages_skipped: usize,
        stages_failed: usize,
        snapshot: StateSnapshot,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::RunCompleted(RunCompletedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                total_duration_ms,
                stages_completed,
                stages_skipped,
                stages_failed,
                snapshot,
                timestamp: now(),
            }),
        )
    }

    /// Emit run failed event
    pub fn run_failed(
        sink: &EventSink,
        run_id: Uuid,
        pipeline_name: &str,
        failed_stage: &str,
        error: &str,
        snapshot: StateSnapshot,
    ) -> QueryChartResult<()> {
        emit(
            sink,
            PipelineEvent::RunFailed(RunFailedEvent {
                run_id,
                pipeline_name: pipeline_name.to_string(),
                failed_stage: failed_stage.to_string(),
                error: error.to_string(),
                snapshot,
                timestamp: now(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::PipelineState;

    #[test]
    fn test_event_tag_matches_name() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_id = Uuid::new_v4();
        EventEmitter::stage_skipped(&tx, run_id, "question", Node::GetUniqueNouns).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), event_names::STAGE_SKIPPED);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event_names::STAGE_SKIPPED);
        assert_eq!(value["stageName"], "Get Unique Nouns");
        assert_eq!(value["node"], "GetUniqueNouns");
        assert!(event.snapshot().is_none());
    }

    #[test]
    fn test_completed_event_carries_update_and_snapshot() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = PipelineState::new("q", "d");
        let update = StateUpdate {
            answer: Some("Queen".into()),
            ..StateUpdate::default()
        };
        EventEmitter::stage_completed(
            &tx,
            state.run_id(),
            "question",
            Node::FormatResults,
            12,
            update,
            state.snapshot(),
        )
        .unwrap();

        let value = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["update"]["answer"], "Queen");
        assert_eq!(value["snapshot"]["question"], "q");
        assert_eq!(value["durationMs"], 12);
    }

    #[test]
    fn test_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let result = EventEmitter::stage_started(&tx, Uuid::new_v4(), "question", Node::ExecuteSql);
        assert!(matches!(result, Err(QueryChartError::EventChannelClosed)));
    }

    #[test]
    fn test_terminal_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = PipelineState::new("q", "d");
        EventEmitter::run_failed(&tx, state.run_id(), "question", "Parse Question", "bad json", state.snapshot())
            .unwrap();
        assert!(rx.try_recv().unwrap().is_terminal());
    }
}
