//! In-process job engine.
//!
//! Walks the rows of every table an analyzer reads from, one Tokio task
//! per table, and produces a small profile for each analyzer. It is the
//! engine used by the CLI and the integration tests.
//!
//! An analyzer whose `properties.fail` is a string fails with that message
//! instead of producing a result; the rest of the job carries on.

use crate::engine::{EventSink, JobEngine};
use crate::error::FailureCause;
use crate::models::{AnalysisJob, AnalyzerResult, ComponentJob, ExpectedRows, Table};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Settings for the local engine.
#[derive(Debug, Clone)]
pub struct LocalEngineConfig {
    /// Rows between two progress events.
    pub progress_interval: u64,
    /// Simulated work per row.
    pub row_delay: Duration,
}

impl Default for LocalEngineConfig {
    fn default() -> Self {
        Self {
            progress_interval: 100,
            row_delay: Duration::ZERO,
        }
    }
}

impl From<&crate::config::EngineConfig> for LocalEngineConfig {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            progress_interval: config.progress_interval.max(1),
            row_delay: Duration::from_micros(config.row_delay_micros),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalEngine {
    config: LocalEngineConfig,
}

/// Why a table task stopped early.
enum TableStop {
    Cancelled,
}

impl LocalEngine {
    /// A progress interval of 0 is treated as 1.
    pub fn new(mut config: LocalEngineConfig) -> Self {
        config.progress_interval = config.progress_interval.max(1);
        Self { config }
    }

    async fn run_job(
        config: LocalEngineConfig,
        job: Arc<AnalysisJob>,
        sink: EventSink,
        cancel: CancellationToken,
    ) {
        sink.job_begin();

        let mut by_table: HashMap<String, (Table, Vec<Arc<ComponentJob>>)> = HashMap::new();
        for component in job.analyzers() {
            let component = Arc::new(component.clone());
            match job.component_table(&component) {
                Some(table) => by_table
                    .entry(table.name.clone())
                    .or_insert_with(|| (table.clone(), Vec::new()))
                    .1
                    .push(component),
                None => {
                    sink.component_error(
                        &component,
                        None,
                        FailureCause::msg(format!(
                            "none of the input columns of '{}' come from a table",
                            component.label()
                        )),
                    );
                }
            }
        }

        info!(tables = by_table.len(), "Local engine processing tables");

        let mut tasks = JoinSet::new();
        for (_, (table, analyzers)) in by_table {
            tasks.spawn(Self::process_table(
                config.clone(),
                table,
                analyzers,
                sink.clone(),
                cancel.clone(),
            ));
        }

        let mut cancelled = false;
        let mut crash = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(TableStop::Cancelled)) => cancelled = true,
                Err(e) => crash = Some(e.to_string()),
            }
        }

        if cancelled || cancel.is_cancelled() {
            sink.job_error(FailureCause::Cancelled);
        } else if let Some(message) = crash {
            sink.job_error(FailureCause::msg(format!("table task failed: {}", message)));
        } else {
            sink.job_success();
        }
    }

    async fn process_table(
        config: LocalEngineConfig,
        table: Table,
        analyzers: Vec<Arc<ComponentJob>>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<(), TableStop> {
        let expected = if table.countable {
            ExpectedRows::Known(table.rows)
        } else {
            ExpectedRows::Unknown
        };
        sink.row_processing_begin(&table.name, expected);

        for row in 1..=table.rows {
            if cancel.is_cancelled() {
                debug!(table = %table.name, row, "Stopping table on cancellation");
                return Err(TableStop::Cancelled);
            }
            if !config.row_delay.is_zero() {
                tokio::time::sleep(config.row_delay).await;
            }
            if row % config.progress_interval == 0 || row == table.rows {
                sink.row_processing_progress(&table.name, row);
                tokio::task::yield_now().await;
            }
        }
        sink.row_processing_success(&table.name);

        for analyzer in analyzers {
            if cancel.is_cancelled() {
                return Err(TableStop::Cancelled);
            }
            sink.component_begin(&analyzer);

            match analyzer.properties.get("fail").and_then(|v| v.as_str()) {
                Some(message) => {
                    sink.component_error(&analyzer, None, FailureCause::msg(message));
                }
                None => {
                    sink.component_success(&analyzer, profile(&table, &analyzer));
                }
            }
        }

        Ok(())
    }
}

fn profile(table: &Table, analyzer: &ComponentJob) -> AnalyzerResult {
    AnalyzerResult::new(json!({
        "table": table.name,
        "rows": table.rows,
        "columns": analyzer.inputs,
    }))
}

impl JobEngine for LocalEngine {
    fn run(
        &self,
        job: Arc<AnalysisJob>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, ()> {
        Self::run_job(self.config.clone(), job, sink, cancel).boxed()
    }
}
