use crate::error::QueryChartResult;
use crate::pipeline::state::{PipelineState, StateSnapshot, StateUpdate};
use crate::state_machine::Node;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// A single stage in the question pipeline
///
/// Each stage reads the accumulated state and returns a partial update; the
/// executor merges it. Stages never mutate shared state directly.
///
/// # Example
/// ```ignore
/// use querychart::pipeline::{PipelineStage, PipelineState, StateUpdate};
/// use querychart::state_machine::Node;
///
/// struct Shout;
///
/// #[async_trait::async_trait]
/// impl PipelineStage for Shout {
///     fn node(&self) -> Node {
///         Node::FormatResults
///     }
///
///     async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
///         Ok(StateUpdate {
///             answer: Some(state.question().to_uppercase()),
///             ..StateUpdate::default()
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Graph node this stage runs at
    fn node(&self) -> Node;

    /// Run the stage against the current state
    ///
    /// An error is recorded into the state's `error` field. Only errors for
    /// which `is_fatal()` holds stop the branch.
    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate>;

    /// Get stage name for logging and progress tracking
    fn name(&self) -> &str {
        self.node().name()
    }

    /// Check if this stage should be skipped based on state
    ///
    /// Used when an upstream failure left a required input unset.
    fn should_skip(&self, _state: &PipelineState) -> bool {
        false
    }
}

/// Result of a pipeline stage execution
#[derive(Debug, Clone)]
pub struct StageResult {
    /// Stage name
    pub stage_name: String,

    /// Graph node
    pub node: Node,

    /// Whether the stage succeeded
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Whether the failure ended its branch
    pub fatal: bool,

    /// Duration of execution
    pub duration: Duration,

    /// Whether the stage was skipped
    pub skipped: bool,
}

impl StageResult {
    /// Create a successful stage result
    pub fn success(node: Node, duration: Duration) -> Self {
        Self {
            stage_name: node.name().to_string(),
            node,
            success: true,
            error: None,
            fatal: false,
            duration,
            skipped: false,
        }
    }

    /// Create a failed stage result
    pub fn failure(node: Node, error: impl Into<String>, fatal: bool, duration: Duration) -> Self {
        Self {
            stage_name: node.name().to_string(),
            node,
            success: false,
            error: Some(error.into()),
            fatal,
            duration,
            skipped: false,
        }
    }

    /// Create a skipped stage result
    pub fn skipped(node: Node) -> Self {
        Self {
            stage_name: node.name().to_string(),
            node,
            success: true,
            error: None,
            fatal: false,
            duration: Duration::from_secs(0),
            skipped: true,
        }
    }
}

/// Result of a complete pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Pipeline name
    pub pipeline_name: String,

    /// Run identifier
    pub run_id: Uuid,

    /// Whether the run finished without a fatal stage error
    pub success: bool,

    /// Results from each stage, in completion order
    pub stage_results: Vec<StageResult>,

    /// Total duration
    pub total_duration: Duration,

    /// Fatal error message if failed
    pub error: Option<String>,

    /// Merged state after the last stage
    pub final_state: PipelineState,
}

impl PipelineResult {
    /// Create a successful pipeline result
    pub fn success(
        pipeline_name: impl Into<String>,
        stage_results: Vec<StageResult>,
        total_duration: Duration,
        final_state: PipelineState,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            run_id: final_state.run_id(),
            success: true,
            stage_results,
            total_duration,
            error: None,
            final_state,
        }
    }

    /// Create a failed pipeline result
    pub fn failure(
        pipeline_name: impl Into<String>,
        stage_results: Vec<StageResult>,
        error: impl Into<String>,
        total_duration: Duration,
        final_state: PipelineState,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            run_id: final_state.run_id(),
            success: false,
            stage_results,
            total_duration,
            error: Some(error.into()),
            final_state,
        }
    }

    /// Get the number of stages that were executed (not skipped)
    pub fn executed_stages(&self) -> usize {
        self.stage_results.iter().filter(|r| !r.skipped).count()
    }

    /// Get the number of stages that were skipped
    pub fn skipped_stages(&self) -> usize {
        self.stage_results.iter().filter(|r| r.skipped).count()
    }

    /// Get the number of stages that recorded an error
    pub fn failed_stages(&self) -> usize {
        self.stage_results.iter().filter(|r| !r.success).count()
    }

    /// Get the first stage that failed fatally, else the first that failed
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stage_results
            .iter()
            .find(|r| r.fatal)
            .or_else(|| self.stage_results.iter().find(|r| !r.success))
    }

    /// Result for one node, if it ran or was skipped
    pub fn stage(&self, node: Node) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.node == node)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.final_state.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PipelineState {
        PipelineState::new("q", "d")
    }

    #[test]
    fn test_stage_result_success() {
        let result = StageResult::success(Node::GenerateSql, Duration::from_secs(1));
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(!result.skipped);
        assert_eq!(result.stage_name, "Generate SQL");
    }

    #[test]
    fn test_stage_result_failure() {
        let result = StageResult::failure(
            Node::ExecuteSql,
            "no such table",
            false,
            Duration::from_secs(1),
        );
        assert!(!result.success);
        assert_eq!(result.error, Some("no such table".to_string()));
        assert!(!result.fatal);
        assert!(!result.skipped);
    }

    #[test]
    fn test_stage_result_skipped() {
        let result = StageResult::skipped(Node::GetUniqueNouns);
        assert!(result.success);
        assert!(result.error.is_none());
        assert!(result.skipped);
        assert_eq!(result.duration, Duration::from_secs(0));
    }

    #[test]
    fn test_pipeline_result_success() {
        let stage_results = vec![
            StageResult::success(Node::ParseQuestion, Duration::from_secs(1)),
            StageResult::success(Node::GetUniqueNouns, Duration::from_secs(2)),
        ];
        let result = PipelineResult::success("question", stage_results, Duration::from_secs(3), state());

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.executed_stages(), 2);
        assert_eq!(result.skipped_stages(), 0);
        assert!(result.failed_stage().is_none());
        assert_eq!(result.run_id, result.final_state.run_id());
    }

    #[test]
    fn test_pipeline_result_with_skipped() {
        let stage_results = vec![
            StageResult::success(Node::ParseQuestion, Duration::from_secs(1)),
            StageResult::skipped(Node::GetUniqueNouns),
            StageResult::success(Node::GenerateSql, Duration::from_secs(2)),
        ];
        let result = PipelineResult::success("question", stage_results, Duration::from_secs(3), state());

        assert_eq!(result.executed_stages(), 2);
        assert_eq!(result.skipped_stages(), 1);
        assert!(result.stage(Node::GetUniqueNouns).unwrap().skipped);
    }

    #[test]
    fn test_pipeline_result_failure() {
        let stage_results = vec![
            StageResult::failure(Node::ExecuteSql, "engine", false, Duration::from_secs(1)),
            StageResult::failure(Node::ValidateAndFixSql, "bad json", true, Duration::from_secs(1)),
        ];
        let result = PipelineResult::failure(
            "question",
            stage_results,
            "bad json",
            Duration::from_secs(2),
            state(),
        );

        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(result.failed_stages(), 2);
        assert_eq!(result.failed_stage().unwrap().stage_name, "Validate and Fix SQL");
    }
}
