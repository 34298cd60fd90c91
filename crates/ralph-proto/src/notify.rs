//! Notification contract.

use async_trait::async_trait;
use serde::Serialize;

/// How a Worker's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// A message about a Worker reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub worker: String,
    pub task_id: Option<String>,
    pub project: Option<String>,
    pub outcome: Outcome,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn for_outcome(
        worker: impl Into<String>,
        task_id: Option<String>,
        project: Option<String>,
        outcome: Outcome,
    ) -> Self {
        let worker = worker.into();
        let subject = task_id.clone().unwrap_or_else(|| worker.clone());
        let (title, message) = match outcome {
            Outcome::Success => (
                format!("Ralph: {subject} done"),
                format!("Worker {worker} finished successfully."),
            ),
            Outcome::Failure => (
                format!("Ralph: {subject} failed"),
                format!("Worker {worker} exited with an error. Run `ralph logs` to see why."),
            ),
        };
        Self {
            worker,
            task_id,
            project,
            outcome,
            title,
            message,
        }
    }
}

/// Delivery failure. Callers log these; a notification is never worth
/// aborting the watch loop for.
#[derive(Debug, thiserror::Error)]
#[error("{channel} notification failed: {reason}")]
pub struct NotifyError {
    pub channel: &'static str,
    pub reason: String,
}

/// A fire-and-forget notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_outcome_uses_task_id_in_title() {
        let n = Notification::for_outcome(
            "ralph-demo-issue-42",
            Some("issue-42".to_string()),
            Some("demo".to_string()),
            Outcome::Failure,
        );
        assert_eq!(n.title, "Ralph: issue-42 failed");
        assert!(n.message.contains("ralph-demo-issue-42"));
    }

    #[test]
    fn test_for_outcome_falls_back_to_worker_name() {
        let n = Notification::for_outcome("ralph-x", None, None, Outcome::Success);
        assert_eq!(n.title, "Ralph: ralph-x done");
    }
}
