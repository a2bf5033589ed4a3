//! Presentation of runs and their results.

pub mod console;
pub mod summary;

pub use console::ConsolePresenter;
pub use summary::{generate_json_summary, generate_markdown_summary, parse_json_result};
