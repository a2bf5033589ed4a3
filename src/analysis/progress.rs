//! Per-table row progress.

use crate::error::ProgressError;
use crate::models::{ExpectedRows, ProgressState};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Keeps the row progress of every table with a known expected count.
///
/// Tables are independent of each other, so a single map lock is enough.
/// Updates for tables that were never registered are ignored and return
/// `Ok(None)`.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    tables: RwLock<HashMap<String, ProgressState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a table. Re-registering a table resets it.
    pub fn set_expected_rows(&self, table: &str, expected: u64) -> ProgressState {
        let state = ProgressState::new(ExpectedRows::Known(expected));
        self.write().insert(table.to_string(), state);
        state
    }

    /// Move a table's current row forward.
    ///
    /// Rows lower than the tracked value are rejected and leave the state
    /// untouched. A row past the expected count raises the expected count.
    pub fn update_progress(
        &self,
        table: &str,
        row: u64,
    ) -> Result<Option<ProgressState>, ProgressError> {
        let mut tables = self.write();
        let Some(state) = tables.get_mut(table) else {
            debug!(table, row, "Ignoring progress for untracked table");
            return Ok(None);
        };

        if state.finished {
            return Err(ProgressError::AlreadyFinished {
                table: table.to_string(),
            });
        }

        if row < state.current_row {
            return Err(ProgressError::Regression {
                table: table.to_string(),
                current: state.current_row,
                attempted: row,
            });
        }

        state.current_row = row;
        if let ExpectedRows::Known(expected) = state.expected_rows {
            if row > expected {
                state.expected_rows = ExpectedRows::Known(row);
            }
        }

        Ok(Some(*state))
    }

    /// Mark a table finished. The current row snaps to the expected count.
    pub fn mark_finished(&self, table: &str) -> Option<ProgressState> {
        let mut tables = self.write();
        let state = tables.get_mut(table)?;

        if let ExpectedRows::Known(expected) = state.expected_rows {
            state.current_row = state.current_row.max(expected);
            state.expected_rows = ExpectedRows::Known(state.current_row);
        }
        state.finished = true;

        Some(*state)
    }

    pub fn state_of(&self, table: &str) -> Option<ProgressState> {
        self.read().get(table).copied()
    }

    /// All tracked tables, sorted by name.
    pub fn all(&self) -> Vec<(String, ProgressState)> {
        let mut states: Vec<_> = self
            .read()
            .iter()
            .map(|(name, state)| (name.clone(), *state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    // Poisoned locks are recovered; the map only ever holds whole states.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ProgressState>> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, ProgressState>> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}
