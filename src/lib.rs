//! Analysis Monitor - background execution and result aggregation for
//! data-analysis jobs.
//!
//! A [`JobExecutionCoordinator`](analysis::JobExecutionCoordinator) runs a
//! job on a [`JobEngine`](engine::JobEngine), turns the engine's events
//! into progress, log entries and per-descriptor result collections, and
//! resolves to a single [`RunOutcome`](analysis::RunOutcome).

pub mod analysis;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod report;
