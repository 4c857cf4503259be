use crate::error::QueryChartResult;
use crate::gateway::DatasetGateway;
use crate::pipeline::state::{PipelineState, QueryResults, SqlQuery, StateUpdate};
use crate::pipeline::PipelineStage;
use crate::state_machine::Node;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Stage that runs the validated query against the dataset
///
/// # State Requirements
/// - Input: `sql_query`
///
/// # State Outputs
/// - `results` - Positional rows, or `NotRelevant`
///
/// An engine error is recorded into `error` by the executor and `results`
/// stays unset.
pub struct ExecuteSqlStage {
    gateway: Arc<dyn DatasetGateway>,
}

impl ExecuteSqlStage {
    pub fn new(gateway: Arc<dyn DatasetGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl PipelineStage for ExecuteSqlStage {
    fn node(&self) -> Node {
        Node::ExecuteSql
    }

    fn should_skip(&self, state: &PipelineState) -> bool {
        state.sql_query().is_none()
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let results = match state.sql_query() {
            Some(SqlQuery::Query(sql)) => {
                let rows = self.gateway.execute_query(state.dataset_id(), sql).await?;
                info!(
                    target: "pipeline::execute_sql",
                    "Query returned {} rows (run: {})",
                    rows.len(),
                    state.run_id()
                );
                QueryResults::Rows(rows)
            }
            _ => QueryResults::NotRelevant,
        };

        Ok(StateUpdate {
            results: Some(results),
            ..StateUpdate::default()
        })
    }
}
