//! # ralph-proto
//!
//! Shared types, error definitions, and traits for Ralph Workers.
//!
//! This crate provides the foundational abstractions used across all Ralph crates,
//! including:
//! - Task identity (`TaskId`, `TaskSelector`)
//! - The observed Worker state
//! - The `ContainerRuntime` trait and its data types
//! - The `Notifier` trait
//! - Common error types

mod error;
mod notify;
mod runtime;
mod state;
mod task;

pub use error::{Result, RuntimeError};
pub use notify::{Notification, Notifier, NotifyError, Outcome};
pub use runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ImageBuild,
    LogLine, LogOptions, LogStream, Mount,
};
pub use state::ObservedState;
pub use task::{TaskId, TaskIdError, TaskKind, TaskSelector, normalize_segment};
