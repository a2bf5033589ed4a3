//! Data models for analysis jobs and their results.
//!
//! This module contains the job definition the engine runs (tables,
//! components, descriptors) and the state records the monitor keeps
//! while the job is running.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Severity of a user-facing log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Regular progress information
    Info,
    /// Something unexpected that did not stop the job
    Warning,
    /// A failure the user should look at
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "Info"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Error => write!(f, "Error"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
        }
    }
}

/// Kind of pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Filter,
    Transformer,
    Analyzer,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Filter => write!(f, "filter"),
            ComponentKind::Transformer => write!(f, "transformer"),
            ComponentKind::Analyzer => write!(f, "analyzer"),
        }
    }
}

/// Stable identity of a component type.
///
/// Two component jobs built from the same descriptor share one result
/// collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Human readable name, e.g. "String analyzer".
    pub display_name: String,
    /// Kind of stage this descriptor builds.
    pub kind: ComponentKind,
    /// Key the presentation layer uses to pick an icon.
    #[serde(default = "default_icon")]
    pub icon: String,
}

fn default_icon() -> String {
    "component".to_string()
}

impl Descriptor {
    pub fn new(display_name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            display_name: display_name.into(),
            kind,
            icon: default_icon(),
        }
    }

    /// Set the icon key.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }
}

/// One stage of an analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentJob {
    /// Optional user-given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub descriptor: Descriptor,
    /// Columns this stage reads, in declaration order.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Virtual columns this stage produces (transformers only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Free-form configuration, handed to the engine untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub properties: serde_json::Value,
}

impl ComponentJob {
    pub fn new(descriptor: Descriptor, inputs: Vec<String>) -> Self {
        Self {
            name: None,
            descriptor,
            inputs,
            outputs: Vec::new(),
            properties: serde_json::Value::Null,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<String>) -> Self {
        self.outputs = outputs;
        self
    }

    /// The label shown to users: the given name, or the descriptor's name.
    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.descriptor.display_name,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.descriptor.kind
    }
}

/// A physical table in the datastore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    /// Number of rows the datastore holds.
    #[serde(default)]
    pub rows: u64,
    /// Whether the datastore can give an approximate row count up front.
    #[serde(default = "default_true")]
    pub countable: bool,
}

fn default_true() -> bool {
    true
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: u64) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
            countable: true,
        }
    }

    pub fn defines(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// The data source a job reads from. Opaque apart from its name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
}

/// A complete analysis pipeline over a datastore.
///
/// Components form an implicit DAG through the columns they share.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisJob {
    #[serde(default)]
    pub datastore: Datastore,
    #[serde(default, rename = "table")]
    pub tables: Vec<Table>,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentJob>,
}

impl AnalysisJob {
    /// Find the table a column originates from.
    ///
    /// Physical columns resolve to the table declaring them. Virtual
    /// columns resolve through the component producing them, scanning that
    /// component's inputs left to right.
    pub fn originating_table(&self, column: &str) -> Option<&Table> {
        let mut visited = HashSet::new();
        self.resolve_column(column, &mut visited)
    }

    fn resolve_column<'a>(
        &'a self,
        column: &str,
        visited: &mut HashSet<String>,
    ) -> Option<&'a Table> {
        if let Some(table) = self.tables.iter().find(|t| t.defines(column)) {
            return Some(table);
        }

        if !visited.insert(column.to_string()) {
            return None;
        }

        let producer = self
            .components
            .iter()
            .find(|c| c.outputs.iter().any(|o| o == column))?;

        producer
            .inputs
            .iter()
            .find_map(|input| self.resolve_column(input, visited))
    }

    /// Resolve the table a component reads from: the first input column
    /// whose originating table can be found.
    pub fn component_table(&self, component: &ComponentJob) -> Option<&Table> {
        component
            .inputs
            .iter()
            .find_map(|column| self.originating_table(column))
    }

    pub fn analyzers(&self) -> impl Iterator<Item = &ComponentJob> {
        self.components
            .iter()
            .filter(|c| c.kind() == ComponentKind::Analyzer)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Opaque payload produced by a component that finished successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalyzerResult(pub serde_json::Value);

impl AnalyzerResult {
    pub fn new(payload: serde_json::Value) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Expected row count reported when a table starts processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedRows {
    Known(u64),
    Unknown,
}

impl ExpectedRows {
    /// Map the engine's raw count, where `-1` means "cannot count".
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            ExpectedRows::Unknown
        } else {
            ExpectedRows::Known(raw as u64)
        }
    }

    pub fn known(&self) -> Option<u64> {
        match self {
            ExpectedRows::Known(n) => Some(*n),
            ExpectedRows::Unknown => None,
        }
    }
}

impl fmt::Display for ExpectedRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedRows::Known(n) => write!(f, "{}", n),
            ExpectedRows::Unknown => write!(f, "unknown"),
        }
    }
}

/// Row progress of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub expected_rows: ExpectedRows,
    pub current_row: u64,
    pub finished: bool,
}

impl ProgressState {
    pub fn new(expected_rows: ExpectedRows) -> Self {
        Self {
            expected_rows,
            current_row: 0,
            finished: false,
        }
    }

    /// Fraction of rows processed, when the expected count is known.
    pub fn ratio(&self) -> Option<f64> {
        match self.expected_rows {
            ExpectedRows::Known(0) => Some(if self.finished { 1.0 } else { 0.0 }),
            ExpectedRows::Known(n) => Some((self.current_row as f64 / n as f64).min(1.0)),
            ExpectedRows::Unknown => None,
        }
    }
}

/// Lifecycle of one run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    NotStarted,
    Running,
    Cancelled,
    Succeeded,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Cancelled | ExecutionState::Succeeded | ExecutionState::Failed
        )
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        match self {
            ExecutionState::NotStarted => {
                next == ExecutionState::Running || next == ExecutionState::Succeeded
            }
            ExecutionState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::NotStarted => write!(f, "not started"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Cancelled => write!(f, "cancelled"),
            ExecutionState::Succeeded => write!(f, "succeeded"),
            ExecutionState::Failed => write!(f, "failed"),
        }
    }
}

/// One descriptor's results in an [`AnalysisResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorResults {
    pub descriptor: Descriptor,
    pub results: Vec<ComponentResult>,
}

/// A component paired with the result it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub component: Arc<ComponentJob>,
    pub result: AnalyzerResult,
}

/// All results of a run, grouped by descriptor in the order their
/// collections were created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub collections: Vec<DescriptorResults>,
}

impl AnalysisResult {
    pub fn get(&self, descriptor: &Descriptor) -> Option<&DescriptorResults> {
        self.collections
            .iter()
            .find(|c| &c.descriptor == descriptor)
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Total number of component results across all descriptors.
    pub fn result_count(&self) -> usize {
        self.collections.iter().map(|c| c.results.len()).sum()
    }

    /// Flatten into (component, result) pairs in collection order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Arc<ComponentJob>, &AnalyzerResult)> {
        self.collections
            .iter()
            .flat_map(|c| c.results.iter().map(|r| (&r.component, &r.result)))
    }
}
