//! Result summary rendering.
//!
//! Turns an [`AnalysisResult`] snapshot into Markdown or JSON for the
//! console.

use crate::analysis::progress::ProgressTracker;
use crate::analysis::RunOutcome;
use crate::models::{AnalysisResult, DescriptorResults, ExecutionState};
use anyhow::{Context, Result};

/// Generate a Markdown summary of a run.
pub fn generate_markdown_summary(
    datastore: Option<&str>,
    outcome: &RunOutcome,
    progress: &ProgressTracker,
    max_payload_chars: usize,
) -> String {
    let mut output = String::new();

    output.push_str("# Analysis results\n\n");
    if let Some(name) = datastore {
        output.push_str(&format!("- **Datastore:** {}\n", name));
    }
    output.push_str(&format!(
        "- **Status:** {} {}\n",
        state_emoji(outcome.state()),
        outcome.state()
    ));

    if let RunOutcome::Failed(cause) = outcome {
        output.push_str(&format!("- **Cause:** {}\n", cause));
    }
    output.push('\n');

    output.push_str(&generate_progress_section(progress));

    if let Some(result) = outcome.result() {
        output.push_str(&generate_results_section(result, max_payload_chars));
    }

    output
}

fn state_emoji(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Succeeded => "✅",
        ExecutionState::Cancelled => "⏹️",
        ExecutionState::Failed => "❌",
        ExecutionState::NotStarted | ExecutionState::Running => "⏳",
    }
}

fn generate_progress_section(progress: &ProgressTracker) -> String {
    let states = progress.all();
    if states.is_empty() {
        return String::new();
    }

    let mut section = String::from("## Tables\n\n| Table | Rows | Expected | Finished |\n|---|---|---|---|\n");
    for (table, state) in states {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            table,
            state.current_row,
            state.expected_rows,
            if state.finished { "yes" } else { "no" }
        ));
    }
    section.push('\n');
    section
}

fn generate_results_section(result: &AnalysisResult, max_payload_chars: usize) -> String {
    let mut section = String::new();
    section.push_str(&format!(
        "## Results ({} collections, {} results)\n\n",
        result.collections.len(),
        result.result_count()
    ));

    if result.is_empty() {
        section.push_str("_No results._\n");
        return section;
    }

    for collection in &result.collections {
        section.push_str(&generate_collection(collection, max_payload_chars));
    }
    section
}

fn generate_collection(collection: &DescriptorResults, max_payload_chars: usize) -> String {
    let mut section = format!(
        "### {} ({})\n\n",
        collection.descriptor.display_name, collection.descriptor.kind
    );
    for entry in &collection.results {
        let payload = entry.result.payload().to_string();
        section.push_str(&format!(
            "- **{}**: `{}`\n",
            entry.component.label(),
            truncate(&payload, max_payload_chars)
        ));
    }
    section.push('\n');
    section
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max_chars).collect();
    short.push('…');
    short
}

/// Generate a JSON export of the results.
pub fn generate_json_summary(result: &AnalysisResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("Failed to serialize analysis result")
}

/// Parse a result previously produced by [`generate_json_summary`].
pub fn parse_json_result(content: &str) -> Result<AnalysisResult> {
    serde_json::from_str(content).context("Failed to parse analysis result")
}
