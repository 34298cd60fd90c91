//! Worker naming grammar.
//!
//! ```text
//! <prefix>-<normalized project>-<kind>-<normalized value>
//! ```
//!
//! Lookup is always by recomputing this name; there is no side table. The
//! grammar must stay information-preserving for [`reverse_parse`], which
//! `restart` falls back to when a Worker carries no task label.

use ralph_proto::{TaskId, normalize_segment};

/// Name of the Worker bound to `task_id` in `project`.
pub fn worker_name(prefix: &str, project: &str, task_id: &TaskId) -> String {
    format!("{}{}", project_prefix(prefix, project), task_id)
}

/// Prefix shared by every Worker of `project`, trailing `-` included.
pub fn project_prefix(prefix: &str, project: &str) -> String {
    format!("{}-{}-", normalize_segment(prefix), normalize_segment(project))
}

/// Recovers the task identifier from a Worker name of `project`.
pub fn reverse_parse(name: &str, prefix: &str, project: &str) -> Option<TaskId> {
    name.strip_prefix(&project_prefix(prefix, project))?
        .parse()
        .ok()
}
