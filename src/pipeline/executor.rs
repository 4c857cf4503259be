use super::core::{PipelineResult, PipelineStage, StageResult};
use super::stages::{
    ChooseVisualizationStage, ExecuteSqlStage, FormatDataForVisualizationStage, FormatResultsStage,
    GenerateSqlStage, GetUniqueNounsStage, ParseQuestionStage, ValidateAndFixSqlStage,
};
use super::state::{PipelineState, StateUpdate};
use crate::error::{QueryChartError, QueryChartResult};
use crate::events::{EventEmitter, EventSink, PipelineEvent};
use crate::gateway::DatasetGateway;
use crate::llm::TextGenerator;
use crate::state_machine::{validate_graph, Node, Transition, TRANSITIONS};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const STANDARD_PIPELINE_NAME: &str = "question";

/// What a branch reports to the merger
#[derive(Debug)]
enum BranchMessage {
    Started(Node),
    Skipped(Node),
    Completed {
        node: Node,
        update: StateUpdate,
        duration: Duration,
    },
    Failed {
        node: Node,
        update: StateUpdate,
        error: String,
        fatal: bool,
        duration: Duration,
    },
}

/// Pipeline executor that walks the stage graph
///
/// Linear runs of the graph execute in order. Where a node has several
/// successors, each successor starts a branch with its own copy of the
/// state; branches run concurrently on the current task and report deltas to
/// one merger, which owns the authoritative state.
///
/// # Example
/// ```ignore
/// let pipeline = Pipeline::standard(gateway, generator)?;
/// let result = pipeline.ask("Who are the top selling artists?", "dataset-1").await;
/// println!("{}", result.final_state.answer().concatenated());
/// ```
pub struct Pipeline {
    name: String,
    stages: BTreeMap<Node, Arc<dyn PipelineStage>>,
    transitions: Vec<Transition>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// The full question pipeline over the given collaborators
    pub fn standard(
        gateway: Arc<dyn DatasetGateway>,
        generator: Arc<dyn TextGenerator>,
    ) -> QueryChartResult<Self> {
        Self::builder(STANDARD_PIPELINE_NAME)
            .add_stage(ParseQuestionStage::new(gateway.clone(), generator.clone()))
            .add_stage(GetUniqueNounsStage::new(gateway.clone()))
            .add_stage(GenerateSqlStage::new(gateway.clone(), generator.clone()))
            .add_stage(ValidateAndFixSqlStage::new(gateway.clone(), generator.clone()))
            .add_stage(ExecuteSqlStage::new(gateway))
            .add_stage(FormatResultsStage::new(generator.clone()))
            .add_stage(ChooseVisualizationStage::new(generator.clone()))
            .add_stage(FormatDataForVisualizationStage::new(generator))
            .build()
    }

    /// Get the pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn successors(&self, node: Node) -> Vec<Node> {
        self.transitions
            .iter()
            .filter(|t| t.from == node)
            .map(|t| t.to)
            .collect()
    }

    /// Answer one question without emitting events
    pub async fn ask(&self, question: &str, dataset_id: &str) -> PipelineResult {
        self.run(PipelineState::new(question, dataset_id)).await
    }

    /// Execute the pipeline without emitting events
    pub async fn run(&self, state: PipelineState) -> PipelineResult {
        self.execute_internal(state, None).await
    }

    /// Execute the pipeline with event emission
    ///
    /// Same as `run()` but reports every stage to `sink`.
    pub async fn run_with_events(&self, state: PipelineState, sink: &EventSink) -> PipelineResult {
        self.execute_internal(state, Some(sink)).await
    }

    /// Run on a background task, returning the event stream and the final result
    ///
    /// The stream ends after the terminal `pipeline:completed` or
    /// `pipeline:failed` event.
    pub fn spawn_stream(
        self: &Arc<Self>,
        state: PipelineState,
    ) -> (
        mpsc::UnboundedReceiver<PipelineEvent>,
        JoinHandle<PipelineResult>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.run_with_events(state, &tx).await });
        (rx, handle)
    }

    /// Internal execution method that optionally emits events
    async fn execute_internal(&self, state: PipelineState, sink: Option<&EventSink>) -> PipelineResult {
        let run_id = state.run_id();
        info!(
            target: "pipeline",
            "Starting pipeline '{}' with {} stages (run: {})",
            self.name,
            self.stages.len(),
            run_id
        );

        if let Some(sink) = sink {
            let _ = EventEmitter::run_started(
                sink,
                run_id,
                &self.name,
                state.question(),
                state.dataset_id(),
                self.stages.len(),
            );
        }

        let pipeline_start = Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let branches = self.run_branch(Node::Start, state.clone(), tx);
        let merger = self.merge(state, rx, sink);
        let ((), (final_state, stage_results, fatal)) = tokio::join!(branches, merger);
        let total_duration = pipeline_start.elapsed();

        if let Some((failed_node, error_msg)) = fatal {
            error!(
                target: "pipeline",
                "Pipeline '{}' failed at '{}': {} (run: {})",
                self.name,
                failed_node,
                error_msg,
                run_id
            );

            if let Some(sink) = sink {
                let _ = EventEmitter::run_failed(
                    sink,
                    run_id,
                    &self.name,
                    failed_node.name(),
                    &error_msg,
                    final_state.snapshot(),
                );
            }

            return PipelineResult::failure(
                &self.name,
                stage_results,
                error_msg,
                total_duration,
                final_state,
            );
        }

        let result = PipelineResult::success(&self.name, stage_results, total_duration, final_state);
        info!(
            target: "pipeline",
            "Pipeline '{}' completed in {:.2}s: {} executed, {} skipped, {} with errors (run: {})",
            self.name,
            total_duration.as_secs_f64(),
            result.executed_stages(),
            result.skipped_stages(),
            result.failed_stages(),
            run_id
        );

        if let Some(sink) = sink {
            let _ = EventEmitter::run_completed(
                sink,
                run_id,
                &self.name,
                total_duration.as_millis() as u64,
                result.executed_stages() - result.failed_stages(),
                result.skipped_stages(),
                result.failed_stages(),
                result.final_state.snapshot(),
            );
        }

        result
    }

    /// Walk the graph from `node`, forking at fan-out points
    fn run_branch<'a>(
        &'a self,
        node: Node,
        state: PipelineState,
        tx: mpsc::UnboundedSender<BranchMessage>,
    ) -> BoxFuture<'a, ()> {
        async move {
            let mut node = node;
            let mut state = state;

            loop {
                if let Some(stage) = self.stages.get(&node) {
                    if stage.should_skip(&state) {
                        let _ = tx.send(BranchMessage::Skipped(node));
                    } else {
                        let _ = tx.send(BranchMessage::Started(node));
                        let stage_start = Instant::now();
                        let outcome = stage.execute(&state).await;
                        let duration = stage_start.elapsed();

                        match outcome {
                            Ok(update) => {
                                state.apply(&update);
                                let _ = tx.send(BranchMessage::Completed {
                                    node,
                                    update,
                                    duration,
                                });
                            }
                            Err(e) => {
                                let fatal = e.is_fatal();
                                let update = StateUpdate::failure(e.to_string());
                                state.apply(&update);
                                let _ = tx.send(BranchMessage::Failed {
                                    node,
                                    update,
                                    error: e.to_string(),
                                    fatal,
                                    duration,
                                });
                                if fatal {
                                    return;
                                }
                            }
                        }
                    }
                }

                let mut next = self.successors(node);
                match next.len() {
                    0 => return,
                    1 => node = next.remove(0),
                    _ => {
                        join_all(
                            next.into_iter()
                                .map(|successor| self.run_branch(successor, state.clone(), tx.clone())),
                        )
                        .await;
                        return;
                    }
                }
            }
        }
        .boxed()
    }

    /// Apply branch deltas to the authoritative state and report them
    async fn merge(
        &self,
        mut state: PipelineState,
        mut rx: mpsc::UnboundedReceiver<BranchMessage>,
        sink: Option<&EventSink>,
    ) -> (PipelineState, Vec<StageResult>, Option<(Node, String)>) {
        let run_id = state.run_id();
        let mut stage_results = Vec::new();
        let mut fatal: Option<(Node, String)> = None;

        while let Some(message) = rx.recv().await {
            match message {
                BranchMessage::Started(node) => {
                    info!(target: "pipeline", "Executing stage: {} (run: {})", node, run_id);
                    if let Some(sink) = sink {
                        let _ = EventEmitter::stage_started(sink, run_id, &self.name, node);
                    }
                }
                BranchMessage::Skipped(node) => {
                    info!(
                        target: "pipeline",
                        "Skipping stage: {} (required input missing, run: {})",
                        node,
                        run_id
                    );
                    if let Some(sink) = sink {
                        let _ = EventEmitter::stage_skipped(sink, run_id, &self.name, node);
                    }
                    stage_results.push(StageResult::skipped(node));
                }
                BranchMessage::Completed {
                    node,
                    update,
                    duration,
                } => {
                    state.apply(&update);
                    info!(
                        target: "pipeline",
                        "Stage '{}' completed in {:.2}s (run: {})",
                        node,
                        duration.as_secs_f64(),
                        run_id
                    );
                    if let Some(sink) = sink {
                        let _ = EventEmitter::stage_completed(
                            sink,
                            run_id,
                            &self.name,
                            node,
                            duration.as_millis() as u64,
                            update,
                            state.snapshot(),
                        );
                    }
                    stage_results.push(StageResult::success(node, duration));
                }
                BranchMessage::Failed {
                    node,
                    update,
                    error,
                    fatal: is_fatal,
                    duration,
                } => {
                    state.apply(&update);
                    if is_fatal {
                        error!(target: "pipeline", "Stage '{}' failed: {} (run: {})", node, error, run_id);
                        fatal.get_or_insert((node, error.clone()));
                    } else {
                        warn!(
                            target: "pipeline",
                            "Stage '{}' recorded an error, continuing: {} (run: {})",
                            node,
                            error,
                            run_id
                        );
                    }
                    if let Some(sink) = sink {
                        let _ = EventEmitter::stage_failed(
                            sink,
                            run_id,
                            &self.name,
                            node,
                            &error,
                            is_fatal,
                            duration.as_millis() as u64,
                            state.snapshot(),
                        );
                    }
                    stage_results.push(StageResult::failure(node, error, is_fatal, duration));
                }
            }
        }

        (state, stage_results, fatal)
    }
}

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn PipelineStage>>,
    transitions: Vec<Transition>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder over the standard transition table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            transitions: TRANSITIONS.to_vec(),
        }
    }

    /// Add a stage to the pipeline
    pub fn add_stage<S: PipelineStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Add a shared stage to the pipeline
    pub fn add_shared_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Replace the transition table
    pub fn transitions(mut self, transitions: &[Transition]) -> Self {
        self.transitions = transitions.to_vec();
        self
    }

    /// Build the pipeline, validating the graph
    pub fn build(self) -> QueryChartResult<Pipeline> {
        let mut stages = BTreeMap::new();
        for stage in self.stages {
            let node = stage.node();
            if node.is_terminal() {
                return Err(QueryChartError::InvalidGraph(format!(
                    "stage '{}' is registered at terminal node {}",
                    stage.name(),
                    node
                )));
            }
            if stages.insert(node, stage).is_some() {
                return Err(QueryChartError::InvalidGraph(format!(
                    "two stages registered for node '{}'",
                    node
                )));
            }
        }

        let registered: BTreeSet<Node> = stages.keys().copied().collect();
        validate_graph(&self.transitions, &registered)?;

        Ok(Pipeline {
            name: self.name,
            stages,
            transitions: self.transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::SqlQuery;
    use async_trait::async_trait;

    // Test stage that records its node into the answer log
    struct SuccessStage {
        node: Node,
    }

    #[async_trait]
    impl PipelineStage for SuccessStage {
        fn node(&self) -> Node {
            self.node
        }

        async fn execute(&self, _state: &PipelineState) -> QueryChartResult<StateUpdate> {
            Ok(StateUpdate {
                answer: Some(format!("[{}]", self.node.name())),
                ..StateUpdate::default()
            })
        }
    }

    // Test stage that fails
    struct FailStage {
        node: Node,
        fatal: bool,
    }

    #[async_trait]
    impl PipelineStage for FailStage {
        fn node(&self) -> Node {
            self.node
        }

        async fn execute(&self, _state: &PipelineState) -> QueryChartResult<StateUpdate> {
            if self.fatal {
                Err(QueryChartError::malformed(self.node.name(), "expected value"))
            } else {
                Err(QueryChartError::QueryExecution("no such table: users".to_string()))
            }
        }
    }

    // Test stage that sets the query, skipped when an answer already exists
    struct SkippableStage {
        node: Node,
    }

    #[async_trait]
    impl PipelineStage for SkippableStage {
        fn node(&self) -> Node {
            self.node
        }

        async fn execute(&self, _state: &PipelineState) -> QueryChartResult<StateUpdate> {
            Ok(StateUpdate {
                sql_query: Some(SqlQuery::Query("SELECT 1".into())),
                ..StateUpdate::default()
            })
        }

        fn should_skip(&self, state: &PipelineState) -> bool {
            !state.answer().is_empty()
        }
    }

    fn linear() -> Vec<Transition> {
        vec![
            Transition { from: Node::Start, to: Node::ParseQuestion },
            Transition { from: Node::ParseQuestion, to: Node::GenerateSql },
            Transition { from: Node::GenerateSql, to: Node::ExecuteSql },
            Transition { from: Node::ExecuteSql, to: Node::End },
        ]
    }

    fn fan_out() -> Vec<Transition> {
        vec![
            Transition { from: Node::Start, to: Node::ExecuteSql },
            Transition { from: Node::ExecuteSql, to: Node::FormatResults },
            Transition { from: Node::ExecuteSql, to: Node::ChooseVisualization },
            Transition { from: Node::ChooseVisualization, to: Node::FormatDataForVisualization },
            Transition { from: Node::FormatResults, to: Node::End },
            Transition { from: Node::FormatDataForVisualization, to: Node::End },
        ]
    }

    fn success(node: Node) -> SuccessStage {
        SuccessStage { node }
    }

    #[tokio::test]
    async fn test_pipeline_success() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(success(Node::GenerateSql))
            .add_stage(success(Node::ExecuteSql))
            .build()
            .unwrap();

        let result = pipeline.ask("q", "d").await;

        assert!(result.success);
        assert_eq!(result.stage_results.len(), 3);
        assert_eq!(result.executed_stages(), 3);
        assert_eq!(
            result.final_state.answer().concatenated(),
            "[Parse Question][Generate SQL][Execute SQL]"
        );
    }

    #[tokio::test]
    async fn test_recorded_failure_continues() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(FailStage { node: Node::GenerateSql, fatal: false })
            .add_stage(success(Node::ExecuteSql))
            .build()
            .unwrap();

        let result = pipeline.ask("q", "d").await;

        assert!(result.success);
        assert_eq!(result.stage_results.len(), 3);
        assert_eq!(result.failed_stages(), 1);
        assert_eq!(
            result.final_state.error(),
            Some("Query execution failed: no such table: users")
        );
        assert!(result.final_state.answer().concatenated().ends_with("[Execute SQL]"));
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_branch() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(FailStage { node: Node::GenerateSql, fatal: true })
            .add_stage(success(Node::ExecuteSql))
            .build()
            .unwrap();

        let result = pipeline.ask("q", "d").await;

        assert!(!result.success);
        assert_eq!(result.stage_results.len(), 2); // Execute SQL never ran
        assert!(result.stage(Node::ExecuteSql).is_none());
        assert_eq!(result.failed_stage().unwrap().node, Node::GenerateSql);
    }

    #[tokio::test]
    async fn test_pipeline_with_skipped_stage() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(SkippableStage { node: Node::GenerateSql })
            .add_stage(success(Node::ExecuteSql))
            .build()
            .unwrap();

        let result = pipeline.ask("q", "d").await;

        assert!(result.success);
        assert_eq!(result.stage_results.len(), 3);
        assert_eq!(result.executed_stages(), 2);
        assert_eq!(result.skipped_stages(), 1);
        assert!(result.final_state.sql_query().is_none());
    }

    #[tokio::test]
    async fn test_fan_out_runs_both_branches() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&fan_out())
            .add_stage(success(Node::ExecuteSql))
            .add_stage(success(Node::FormatResults))
            .add_stage(success(Node::ChooseVisualization))
            .add_stage(success(Node::FormatDataForVisualization))
            .build()
            .unwrap();

        let result = pipeline.ask("q", "d").await;

        assert!(result.success);
        assert_eq!(result.stage_results.len(), 4);
        let answer = result.final_state.answer().concatenated();
        for node in [
            Node::ExecuteSql,
            Node::FormatResults,
            Node::ChooseVisualization,
            Node::FormatDataForVisualization,
        ] {
            assert!(answer.contains(node.name()), "missing {} in {}", node, answer);
        }

        // Format Data follows Choose Visualization within its branch
        let choose = result
            .stage_results
            .iter()
            .position(|r| r.node == Node::ChooseVisualization)
            .unwrap();
        let format = result
            .stage_results
            .iter()
            .position(|r| r.node == Node::FormatDataForVisualization)
            .unwrap();
        assert!(choose < format);
    }

    #[tokio::test]
    async fn test_fatal_failure_in_one_branch_keeps_other() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&fan_out())
            .add_stage(success(Node::ExecuteSql))
            .add_stage(success(Node::FormatResults))
            .add_stage(FailStage { node: Node::ChooseVisualization, fatal: true })
            .add_stage(success(Node::FormatDataForVisualization))
            .build()
            .unwrap();

        let result = pipeline.ask("q", "d").await;

        assert!(!result.success);
        assert!(result.stage(Node::FormatResults).unwrap().success);
        assert!(result.stage(Node::FormatDataForVisualization).is_none());
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let pipeline = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(FailStage { node: Node::GenerateSql, fatal: false })
            .add_stage(success(Node::ExecuteSql))
            .build()
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        pipeline.run_with_events(PipelineState::new("q", "d"), &tx).await;
        drop(tx);

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "pipeline:started",
                "pipeline:stage-started",
                "pipeline:stage-completed",
                "pipeline:stage-started",
                "pipeline:stage-failed",
                "pipeline:stage-started",
                "pipeline:stage-completed",
                "pipeline:completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_stream_ends_with_terminal_event() {
        let pipeline = Arc::new(
            Pipeline::builder("test-pipeline")
                .transitions(&linear())
                .add_stage(success(Node::ParseQuestion))
                .add_stage(success(Node::GenerateSql))
                .add_stage(success(Node::ExecuteSql))
                .build()
                .unwrap(),
        );

        let (mut rx, handle) = pipeline.spawn_stream(PipelineState::new("q", "d"));
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        let result = handle.await.unwrap();

        assert!(last.unwrap().is_terminal());
        assert!(result.success);
    }

    #[test]
    fn test_missing_stage_rejected() {
        let result = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(success(Node::ExecuteSql))
            .build();
        assert!(matches!(result, Err(QueryChartError::InvalidGraph(_))));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let result = Pipeline::builder("test-pipeline")
            .transitions(&linear())
            .add_stage(success(Node::ParseQuestion))
            .add_stage(success(Node::ParseQuestion))
            .add_stage(success(Node::GenerateSql))
            .add_stage(success(Node::ExecuteSql))
            .build();
        assert!(matches!(result, Err(QueryChartError::InvalidGraph(_))));
    }
}
