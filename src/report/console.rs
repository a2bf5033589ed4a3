//! Console presentation of a running job.
//!
//! Follows the notification stream: one progress bar per table with a
//! known row count, log lines with severity markers, and a note when new
//! result collections appear.

use crate::analysis::notify::{LogEntry, Notification, TerminalState};
use crate::config::{DisplayConfig, PreferencesConfig};
use crate::models::{ExpectedRows, Severity};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

pub struct ConsolePresenter {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    show_progress: bool,
    show_icons: bool,
    focus_first_result: bool,
}

impl ConsolePresenter {
    pub fn new(display: &DisplayConfig, preferences: &PreferencesConfig) -> Self {
        let multi = if display.show_progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        Self {
            multi,
            bars: HashMap::new(),
            show_progress: display.show_progress,
            show_icons: preferences.show_icons,
            focus_first_result: preferences.focus_first_result,
        }
    }

    /// Render notifications until the run reaches a terminal state.
    ///
    /// Returns `None` if the notification channel closed first.
    pub async fn follow(
        mut self,
        mut notifications: broadcast::Receiver<Notification>,
    ) -> Option<TerminalState> {
        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    if let Some(terminal) = self.handle(notification) {
                        self.close_bars(&terminal);
                        return Some(terminal);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Console fell behind, skipped notifications");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn handle(&mut self, notification: Notification) -> Option<TerminalState> {
        match notification {
            Notification::Log(entry) => self.print_log(&entry),
            Notification::Progress {
                table,
                current,
                expected,
            } => self.update_bar(&table, current, expected),
            Notification::TableFinished { table } => {
                if let Some(bar) = self.bars.get(&table) {
                    bar.finish();
                }
            }
            Notification::ResultCollectionCreated {
                display_name, icon, ..
            } => {
                let line = if self.show_icons {
                    format!("📊 New results: {} [{}]", display_name, icon)
                } else {
                    format!("New results: {}", display_name)
                };
                self.print(&line);
            }
            Notification::SurfaceFirstResult { descriptor } => {
                if self.focus_first_result {
                    if let Some(descriptor) = descriptor {
                        self.print(&format!("👉 First results: {}", descriptor.display_name));
                    }
                }
            }
            Notification::Diagnostic(diagnostic) => {
                self.print(&format!("{} Internal: {}", Severity::Warning.emoji(), diagnostic));
            }
            Notification::Terminal(terminal) => return Some(terminal),
        }
        None
    }

    fn print_log(&self, entry: &LogEntry) {
        let mut line = format!(
            "{} [{}] {}",
            entry.severity.emoji(),
            entry.timestamp.format("%H:%M:%S"),
            entry.message
        );
        if let Some(cause) = &entry.cause {
            line.push_str(&format!("\n      {}", cause));
        }
        self.print(&line);
    }

    fn update_bar(&mut self, table: &str, current: u64, expected: ExpectedRows) {
        let Some(total) = expected.known() else {
            return;
        };

        let multi = &self.multi;
        let bar = self.bars.entry(table.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(total));
            bar.set_style(bar_style());
            bar.set_message(table.to_string());
            bar
        });
        bar.set_length(total);
        bar.set_position(current);
    }

    fn close_bars(&self, terminal: &TerminalState) {
        for bar in self.bars.values() {
            if bar.is_finished() {
                continue;
            }
            match terminal {
                TerminalState::Succeeded => bar.finish(),
                TerminalState::Cancelled | TerminalState::Failed(_) => bar.abandon(),
            }
        }
    }

    fn print(&self, line: &str) {
        if self.show_progress {
            if let Err(e) = self.multi.println(line) {
                debug!("Failed to print above progress bars: {}", e);
            }
        } else {
            eprintln!("{}", line);
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg:12} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}
