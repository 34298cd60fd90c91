//! Classified listings of Workers.

use crate::classifier::{Classifier, Observation};
use crate::lifecycle::labels;
use crate::config::Project;
use chrono::{DateTime, Utc};
use ralph_proto::{
    ContainerInfo, ContainerRuntime, ContainerSummary, ObservedState, RuntimeError, TaskId,
};
use serde::Serialize;
use std::path::PathBuf;

/// Which Workers a listing covers.
///
/// Membership is decided by the `ralph.project` label every Worker is created
/// with, never by container name: `demo` and `demo-issue` share a name prefix
/// but not a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Workers of one project.
    Project { project: String },
    /// Every Worker, whatever its project or name prefix.
    All,
}

impl Scope {
    pub fn for_project(project: &Project) -> Self {
        Self::Project {
            project: project.name.clone(),
        }
    }

    /// Asks the engine for the containers in scope, sorted by name.
    pub async fn list(
        &self,
        runtime: &dyn ContainerRuntime,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let value = match self {
            Self::Project { project } => Some(project.as_str()),
            Self::All => None,
        };
        let mut summaries = runtime.list_by_label(labels::PROJECT, value).await?;
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

/// One Worker as shown by `list`, `status` and `watch`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: String,
    pub name: String,
    pub task_id: Option<TaskId>,
    pub project: Option<String>,
    pub folder: Option<PathBuf>,
    pub state: ObservedState,
    pub idle_secs: Option<i64>,
    /// Engine status string (`Up 3 minutes`, `Exited (0) ...`).
    pub status: String,
}

/// Lists and classifies every Worker in `scope`.
pub async fn survey(
    runtime: &dyn ContainerRuntime,
    classifier: &Classifier,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Result<Vec<WorkerStatus>, RuntimeError> {
    let summaries = scope.list(runtime).await?;
    let mut statuses = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let observation = classifier.classify(runtime, &summary.name, now).await;
        statuses.push(WorkerStatus::build(
            summary.id,
            summary.name,
            summary.status,
            observation,
        ));
    }
    Ok(statuses)
}

/// Classifies a single Worker already located by the caller.
pub async fn inspect_worker(
    runtime: &dyn ContainerRuntime,
    classifier: &Classifier,
    info: &ContainerInfo,
    now: DateTime<Utc>,
) -> WorkerStatus {
    let observation = classifier.classify(runtime, &info.name, now).await;
    let status = match info.exit_code {
        Some(code) if !info.running => format!("{} ({code})", info.status),
        _ => info.status.clone(),
    };
    WorkerStatus::build(info.id.clone(), info.name.clone(), status, observation)
}

impl WorkerStatus {
    fn build(id: String, name: String, status: String, observation: Observation) -> Self {
        let info = observation.info.as_ref();
        Self {
            id: info.map_or(id, |i| i.id.clone()),
            task_id: info
                .and_then(|i| i.label(labels::TASK_ID))
                .and_then(|v| v.parse().ok()),
            project: info.and_then(|i| i.label(labels::PROJECT)).map(str::to_string),
            folder: info.and_then(|i| i.label(labels::FOLDER)).map(PathBuf::from),
            state: observation.state,
            idle_secs: observation.idle_secs,
            status,
            name,
        }
    }
}
