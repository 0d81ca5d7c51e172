//! studysync - live task reconciliation library
//!
//! This library provides the core of the studysync CLI: it watches a shared
//! task list, turns consecutive snapshots into notifications for one viewer,
//! and arbitrates manual task ordering.
//!
//! # Core Concepts
//!
//! - **Snapshots**: the full list of tasks in a scope, pushed by a feed
//! - **Semantic events**: "assigned to you" and "due soon" transitions
//! - **Suppression**: a durable key → last-fired map that keeps alerts
//!   from repeating
//! - **Channels**: in-app toasts and permission-gated platform notifications
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.studysync.toml`
//! - `error`: Error types and result aliases
//! - `storage`, `lock`: Shared state directory, file locks and atomic writes
//! - `task`, `directory`: Task records, courses and user names
//! - `feed`: Live snapshot sources
//! - `diff`: Snapshot diffing into semantic events
//! - `suppression`: Duplicate-alert suppression
//! - `dispatch`, `channels`, `events`: Rendering and delivery
//! - `reorder`: Manual ordering
//! - `engine`: Per-subscription reconciliation loop

pub mod channels;
pub mod cli;
pub mod config;
pub mod diff;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod feed;
pub mod lock;
pub mod output;
pub mod reorder;
pub mod storage;
pub mod suppression;
pub mod task;

pub use error::{Error, Result};
