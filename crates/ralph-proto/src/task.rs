//! Task identity.
//!
//! A task is the unit of work a Worker is bound to. Its canonical key is a
//! [`TaskId`] of the shape `<kind>-<value>`, while [`TaskSelector`] carries the
//! structured form (issue number, PRD path, prompt text) needed to launch or
//! relaunch the agent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a task comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// A GitHub issue.
    Issue,
    /// A PRD file in the project.
    Prd,
    /// Free-form prompt text.
    Prompt,
    /// The agent picks its own work.
    Auto,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Prd => "prd",
            Self::Prompt => "prompt",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(Self::Issue),
            "prd" => Ok(Self::Prd),
            "prompt" => Ok(Self::Prompt),
            "auto" => Ok(Self::Auto),
            other => Err(TaskIdError::UnknownKind(other.to_string())),
        }
    }
}

/// Error parsing a task identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskIdError {
    #[error("unknown task kind '{0}' (expected issue, prd, prompt or auto)")]
    UnknownKind(String),

    #[error("task identifier '{0}' has no value after the kind")]
    EmptyValue(String),
}

/// Lowercases `input` and collapses every run of non-alphanumeric characters
/// into a single `-`. Leading and trailing separators are dropped.
///
/// ```
/// use ralph_proto::normalize_segment;
///
/// assert_eq!(normalize_segment("My PRD.json"), "my-prd-json");
/// assert_eq!(normalize_segment("--Fix__the  bug!"), "fix-the-bug");
/// ```
pub fn normalize_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_sep = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Canonical task key, rendered as `<kind>-<value>`.
///
/// The value is normalized on construction so that the rendered form is also
/// valid inside a container name and parses back to an equal `TaskId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId {
    kind: TaskKind,
    value: String,
}

impl TaskId {
    pub fn new(kind: TaskKind, value: impl AsRef<str>) -> Self {
        Self {
            kind,
            value: normalize_segment(value.as_ref()),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.value)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once('-')
            .ok_or_else(|| TaskIdError::EmptyValue(s.to_string()))?;
        let kind: TaskKind = kind.parse()?;
        let id = Self::new(kind, value);
        if id.value.is_empty() {
            return Err(TaskIdError::EmptyValue(s.to_string()));
        }
        Ok(id)
    }
}

impl TryFrom<String> for TaskId {
    type Error = TaskIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

/// Structured task identity.
///
/// This is what gets persisted on the Worker (as a JSON label) so a restart
/// can relaunch the exact same task without re-deriving it from the
/// container name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskSelector {
    Issue { number: u64 },
    /// PRD file path, relative to the project root when it lives inside it.
    Prd { path: PathBuf },
    Prompt { id: String, text: String },
    Auto { id: String },
}

impl TaskSelector {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Issue { .. } => TaskKind::Issue,
            Self::Prd { .. } => TaskKind::Prd,
            Self::Prompt { .. } => TaskKind::Prompt,
            Self::Auto { .. } => TaskKind::Auto,
        }
    }

    /// Derives the canonical identifier. PRD tasks are keyed by the file's
    /// base name only, so `a/prd.json` and `b/prd.json` share an identifier.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Issue { number } => TaskId::new(TaskKind::Issue, number.to_string()),
            Self::Prd { path } => {
                let base = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string_lossy().into_owned());
                TaskId::new(TaskKind::Prd, base)
            }
            Self::Prompt { id, .. } => TaskId::new(TaskKind::Prompt, id),
            Self::Auto { id } => TaskId::new(TaskKind::Auto, id),
        }
    }

    /// Whether the agent needs GitHub access to work on this task.
    pub fn is_github_sourced(&self, github_mode: bool) -> bool {
        match self {
            Self::Issue { .. } => true,
            Self::Auto { .. } => github_mode,
            Self::Prd { .. } | Self::Prompt { .. } => false,
        }
    }

    /// Arguments handed to the Worker entrypoint. `prd_path` is where the PRD
    /// file is visible inside the container.
    pub fn entrypoint_args(&self, prd_path: Option<&Path>) -> Vec<String> {
        match self {
            Self::Issue { number } => vec!["--issue".to_string(), number.to_string()],
            Self::Prd { path } => {
                let shown = prd_path.unwrap_or(path);
                vec!["--prd".to_string(), shown.to_string_lossy().into_owned()]
            }
            Self::Prompt { text, .. } => vec!["--prompt".to_string(), text.clone()],
            Self::Auto { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for TaskSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue { number } => write!(f, "issue #{number}"),
            Self::Prd { path } => write!(f, "PRD {}", path.display()),
            Self::Prompt { id, .. } => write!(f, "prompt {id}"),
            Self::Auto { .. } => f.write_str("auto-selected task"),
        }
    }
}
