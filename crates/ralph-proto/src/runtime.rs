//! Container runtime contract.
//!
//! [`ContainerRuntime`] is the thin capability interface the orchestrator uses
//! to talk to a container engine. Implementations hold no state of their own:
//! the engine is the source of truth and is queried fresh on every call.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A bind mount from the host into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: PathBuf,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: true,
        }
    }

    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }
}

/// Everything needed to create and start a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// CPU limit in engine notation (e.g. `"2"` or `"1.5"`).
    pub cpus: String,
    /// Memory ceiling in engine notation (e.g. `"4g"`).
    pub memory: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub labels: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    /// Keep stdin open and allocate a TTY so the agent can be attached to.
    pub interactive: bool,
    /// Arguments appended after the image, passed to its entrypoint.
    pub args: Vec<String>,
}

/// Detailed state of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Engine status word (`running`, `exited`, `created`, ...).
    pub status: String,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// One row of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    /// Human status string as printed by the engine, e.g. `Up 5 minutes` or
    /// `Exited (1) 2 hours ago`.
    pub status: String,
}

impl ContainerSummary {
    pub fn is_up(&self) -> bool {
        self.status.starts_with("Up")
    }

    /// Exit code parsed from an `Exited (N) ...` status string.
    pub fn exit_code(&self) -> Option<i64> {
        let rest = self.status.strip_prefix("Exited (")?;
        let end = rest.find(')')?;
        rest[..end].trim().parse().ok()
    }
}

/// Captured result of a one-shot command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options for reading container logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Keep streaming new lines until the caller drops the stream.
    pub follow: bool,
    /// Ask the engine to prefix each line with its timestamp.
    pub timestamps: bool,
    /// Only return the last N lines.
    pub tail: Option<usize>,
}

/// A single log line, optionally stamped by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
}

impl LogLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            text: text.into(),
        }
    }

    pub fn at(timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            text: text.into(),
        }
    }

    /// Parses a raw engine line. With `timestamped`, a leading RFC 3339 stamp
    /// followed by a space is split off; lines without one are kept verbatim.
    pub fn parse(raw: &str, timestamped: bool) -> Self {
        if timestamped {
            if let Some((stamp, text)) = raw.split_once(' ') {
                if let Ok(ts) = DateTime::parse_from_rfc3339(stamp) {
                    return Self::at(ts.with_timezone(&Utc), text);
                }
            }
        }
        Self::new(raw)
    }
}

/// Stream of log lines. Ends when the engine closes the log, or never when
/// following.
pub type LogStream = BoxStream<'static, Result<LogLine>>;

/// Request to build a Worker image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    pub tag: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
}

/// Capability interface over a container engine.
///
/// All calls are synchronous from the caller's point of view. Errors keep the
/// engine's own cause attached.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn container_exists(&self, name: &str) -> Result<bool>;

    async fn container_running(&self, name: &str) -> Result<bool>;

    /// Returns [`RuntimeError::NotFound`](crate::RuntimeError::NotFound) when
    /// no container has this name.
    async fn inspect(&self, name: &str) -> Result<ContainerInfo>;

    /// Creates and starts a container. Fails with a conflict when the name is
    /// already taken; the engine guarantees this check is atomic.
    async fn create(&self, spec: &ContainerSpec) -> Result<()>;

    /// Runs a command inside the container and captures its output. A
    /// non-zero exit of the command itself is not an error.
    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput>;

    /// Runs a command inside the container on the caller's terminal and
    /// returns its exit code.
    async fn exec_interactive(&self, name: &str, command: &[String]) -> Result<i32>;

    /// Attaches the caller's terminal to the container's main process.
    async fn attach(&self, name: &str) -> Result<i32>;

    async fn logs(&self, name: &str, options: &LogOptions) -> Result<LogStream>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str) -> Result<()>;

    /// Lists containers (running or not) carrying label `key`, with exactly
    /// `value` when one is given.
    async fn list_by_label(&self, key: &str, value: Option<&str>) -> Result<Vec<ContainerSummary>>;

    async fn build_image(&self, request: &ImageBuild) -> Result<()>;
}
