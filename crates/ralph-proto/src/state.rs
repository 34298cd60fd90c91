//! Observed Worker state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a Worker at observation time. Never stored; recomputed
/// on every `list`, `status` and `watch` tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedState {
    /// Agent is running and produced output recently.
    Working,
    /// Agent output ends in something that looks like an interactive prompt.
    Waiting,
    /// Agent is running but has been quiet for a while (or could not be inspected).
    Idle,
    /// Agent finished successfully.
    Done,
    /// Agent exited with a non-zero code.
    Failed,
}

impl ObservedState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// `done` and `failed` end a Worker's run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// States that prove the agent was live when observed.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Working | Self::Waiting)
    }
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
