use crate::error::QueryChartError;
use crate::shaping::FormattedData;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wire marker for "no query applies to this question"
pub const NOT_RELEVANT: &str = "NOT_RELEVANT";

/// One positional result row. Column roles are not tagged.
pub type Row = Vec<Value>;

/// Generated SQL, or the decision that the question has no query
#[derive(Debug, Clone, PartialEq)]
pub enum SqlQuery {
    Query(String),
    NotRelevant,
}

impl SqlQuery {
    pub fn as_query(&self) -> Option<&str> {
        match self {
            SqlQuery::Query(sql) => Some(sql),
            SqlQuery::NotRelevant => None,
        }
    }

    pub fn is_not_relevant(&self) -> bool {
        matches!(self, SqlQuery::NotRelevant)
    }
}

impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlQuery::Query(sql) => f.write_str(sql),
            SqlQuery::NotRelevant => f.write_str(NOT_RELEVANT),
        }
    }
}

impl Serialize for SqlQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlQuery::Query(sql) => serializer.serialize_str(sql),
            SqlQuery::NotRelevant => serializer.serialize_str(NOT_RELEVANT),
        }
    }
}

/// Rows returned by query execution, or the not-relevant marker
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResults {
    Rows(Vec<Row>),
    NotRelevant,
}

impl QueryResults {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            QueryResults::Rows(rows) => Some(rows),
            QueryResults::NotRelevant => None,
        }
    }

    pub fn is_not_relevant(&self) -> bool {
        matches!(self, QueryResults::NotRelevant)
    }

    /// JSON text handed to prompts
    pub fn to_prompt_text(&self) -> String {
        match self {
            QueryResults::Rows(rows) => {
                serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
            }
            QueryResults::NotRelevant => NOT_RELEVANT.to_string(),
        }
    }
}

impl Serialize for QueryResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueryResults::Rows(rows) => {
                let mut seq = serializer.serialize_seq(Some(rows.len()))?;
                for row in rows {
                    seq.serialize_element(row)?;
                }
                seq.end()
            }
            QueryResults::NotRelevant => serializer.serialize_str(NOT_RELEVANT),
        }
    }
}

/// Chart family chosen for a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visualization {
    None,
    Bar,
    HorizontalBar,
    Line,
    Scatter,
    Pie,
}

impl Visualization {
    pub const ALL: [Visualization; 6] = [
        Visualization::None,
        Visualization::Bar,
        Visualization::HorizontalBar,
        Visualization::Line,
        Visualization::Scatter,
        Visualization::Pie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Visualization::None => "none",
            Visualization::Bar => "bar",
            Visualization::HorizontalBar => "horizontal_bar",
            Visualization::Line => "line",
            Visualization::Scatter => "scatter",
            Visualization::Pie => "pie",
        }
    }
}

impl fmt::Display for Visualization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visualization {
    type Err = QueryChartError;

    /// Accepts `Bar`, `"line"`, `**scatter**`, `horizontal bar.` and similar
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_matches(|c| matches!(c, '"' | '\'' | '*' | '`' | '[' | ']'))
            .trim_end_matches('.')
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");

        Visualization::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == normalized)
            .ok_or_else(|| {
                QueryChartError::malformed(
                    "Choose Visualization",
                    format!("Unknown visualization type: {}", s.trim()),
                )
            })
    }
}

/// Model interpretation of the question against the schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedQuestion {
    #[serde(alias = "is_relevant")]
    pub is_relevant: bool,

    #[serde(default, alias = "relevant_tables")]
    pub relevant_tables: Vec<RelevantTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantTable {
    #[serde(alias = "table_name")]
    pub table_name: String,

    #[serde(default)]
    pub columns: Vec<String>,

    /// Columns holding names or categories, never purely numeric ones
    #[serde(default, alias = "noun_columns")]
    pub noun_columns: Vec<String>,
}

impl ParsedQuestion {
    pub fn not_relevant() -> Self {
        Self {
            is_relevant: false,
            relevant_tables: Vec::new(),
        }
    }
}

/// Append-only log for fields that accumulate across stages
///
/// Every update appends an entry; nothing is ever replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendLog<T> {
    entries: Vec<T>,
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> AppendLog<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    /// The most recent increment
    pub fn latest(&self) -> Option<&T> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl AppendLog<String> {
    /// Full accumulated text
    pub fn concatenated(&self) -> String {
        self.entries.concat()
    }
}

/// Partial update returned by one stage
///
/// Scalar fields replace the current value; `answer`, `visualization` and
/// `visualization_reason` are appended to their logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(skip)]
    pub schema: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_question: Option<ParsedQuestion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_nouns: Option<BTreeSet<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<SqlQuery>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_valid: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql_issues: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<QueryResults>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<Visualization>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_data: Option<FormattedData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that only records a stage failure
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// State threaded through one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineState {
    run_id: Uuid,
    question: String,
    dataset_id: String,
    schema: Option<String>,
    parsed_question: Option<ParsedQuestion>,
    unique_nouns: BTreeSet<String>,
    sql_query: Option<SqlQuery>,
    sql_valid: bool,
    sql_issues: Option<String>,
    results: Option<QueryResults>,
    answer: AppendLog<String>,
    visualization: AppendLog<Visualization>,
    visualization_reason: AppendLog<String>,
    formatted_data: Option<FormattedData>,
    error: Option<String>,
}

impl PipelineState {
    /// Fresh state for one question
    pub fn new(question: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            question: question.into(),
            dataset_id: dataset_id.into(),
            schema: None,
            parsed_question: None,
            unique_nouns: BTreeSet::new(),
            sql_query: None,
            sql_valid: false,
            sql_issues: None,
            results: None,
            answer: AppendLog::new(),
            visualization: AppendLog::new(),
            visualization_reason: AppendLog::new(),
            formatted_data: None,
            error: None,
        }
    }

    /// Merge a stage update into this state
    pub fn apply(&mut self, update: &StateUpdate) {
        if let Some(schema) = &update.schema {
            self.schema = Some(schema.clone());
        }
        if let Some(parsed) = &update.parsed_question {
            self.parsed_question = Some(parsed.clone());
        }
        if let Some(nouns) = &update.unique_nouns {
            self.unique_nouns = nouns.clone();
        }
        if let Some(query) = &update.sql_query {
            self.sql_query = Some(query.clone());
        }
        if let Some(valid) = update.sql_valid {
            self.sql_valid = valid;
        }
        if let Some(issues) = &update.sql_issues {
            self.sql_issues = Some(issues.clone());
        }
        if let Some(results) = &update.results {
            self.results = Some(results.clone());
        }
        if let Some(answer) = &update.answer {
            self.answer.push(answer.clone());
        }
        if let Some(visualization) = update.visualization {
            self.visualization.push(visualization);
        }
        if let Some(reason) = &update.visualization_reason {
            self.visualization_reason.push(reason.clone());
        }
        if let Some(data) = &update.formatted_data {
            self.formatted_data = Some(data.clone());
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn parsed_question(&self) -> Option<&ParsedQuestion> {
        self.parsed_question.as_ref()
    }

    pub fn unique_nouns(&self) -> &BTreeSet<String> {
        &self.unique_nouns
    }

    pub fn sql_query(&self) -> Option<&SqlQuery> {
        self.sql_query.as_ref()
    }

    pub fn sql_valid(&self) -> bool {
        self.sql_valid
    }

    pub fn sql_issues(&self) -> Option<&str> {
        self.sql_issues.as_deref()
    }

    pub fn results(&self) -> Option<&QueryResults> {
        self.results.as_ref()
    }

    pub fn answer(&self) -> &AppendLog<String> {
        &self.answer
    }

    pub fn visualization_log(&self) -> &AppendLog<Visualization> {
        &self.visualization
    }

    /// Latest chosen visualization, `none` until one is chosen
    pub fn visualization(&self) -> Visualization {
        self.visualization
            .latest()
            .copied()
            .unwrap_or(Visualization::None)
    }

    pub fn visualization_reason(&self) -> &AppendLog<String> {
        &self.visualization_reason
    }

    pub fn formatted_data(&self) -> Option<&FormattedData> {
        self.formatted_data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Serializable view with accumulators collapsed to their full value
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            run_id: self.run_id,
            question: self.question.clone(),
            dataset_id: self.dataset_id.clone(),
            parsed_question: self.parsed_question.clone(),
            unique_nouns: self.unique_nouns.iter().cloned().collect(),
            sql_query: self.sql_query.clone(),
            sql_valid: self.sql_valid,
            sql_issues: self.sql_issues.clone(),
            results: self.results.clone(),
            answer: self.answer.concatenated(),
            visualization: self.visualization(),
            visualization_reason: self.visualization_reason.concatenated(),
            formatted_data: self.formatted_data.clone(),
            error: self.error.clone(),
        }
    }
}

/// Cumulative state as seen by stream consumers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub run_id: Uuid,
    pub question: String,
    pub dataset_id: String,
    pub parsed_question: Option<ParsedQuestion>,
    pub unique_nouns: Vec<String>,
    pub sql_query: Option<SqlQuery>,
    pub sql_valid: bool,
    pub sql_issues: Option<String>,
    pub results: Option<QueryResults>,
    pub answer: String,
    pub visualization: Visualization,
    pub visualization_reason: String,
    pub formatted_data: Option<FormattedData>,
    pub error: Option<String>,
}
