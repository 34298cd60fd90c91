//! Terminal rendering for worker listings.

use ralph_core::WorkerStatus;
use ralph_proto::ObservedState;
use std::io::{IsTerminal, stdout};

/// ANSI color codes for terminal output.
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
}

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    /// Returns true if colors should be used based on mode and terminal detection.
    pub fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal(),
        }
    }
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for programmatic access
    Json,
}

pub fn state_color(state: ObservedState) -> &'static str {
    match state {
        ObservedState::Working => colors::GREEN,
        ObservedState::Waiting => colors::YELLOW,
        ObservedState::Idle => colors::DIM,
        ObservedState::Done => colors::CYAN,
        ObservedState::Failed => colors::RED,
    }
}

/// Compact idle duration: `42s`, `7m`, `3h`, `2d`.
pub fn format_idle(secs: Option<i64>) -> String {
    match secs {
        None => "-".to_string(),
        Some(s) if s < 60 => format!("{s}s"),
        Some(s) if s < 3600 => format!("{}m", s / 60),
        Some(s) if s < 86_400 => format!("{}h", s / 3600),
        Some(s) => format!("{}d", s / 86_400),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

/// Table rows for `list` and `watch`. `show_project` adds a project column
/// for listings spanning several projects.
pub fn worker_table(
    statuses: &[WorkerStatus],
    show_project: bool,
    use_colors: bool,
) -> Vec<String> {
    use colors::{BOLD, DIM, RESET};

    let mut rows = Vec::with_capacity(statuses.len() + 1);
    let project_header = if show_project { format!("{:<16} ", "PROJECT") } else { String::new() };
    let header = format!(
        "{project_header}{:<24} {:<8} {:>5}  {:<22} {}",
        "TASK", "STATE", "IDLE", "STATUS", "WORKER"
    );
    rows.push(if use_colors {
        format!("{BOLD}{header}{RESET}")
    } else {
        header
    });

    for status in statuses {
        let task = status
            .task_id
            .as_ref()
            .map_or_else(|| "?".to_string(), ToString::to_string);
        let project = if show_project {
            format!(
                "{:<16} ",
                truncate(status.project.as_deref().unwrap_or("?"), 16)
            )
        } else {
            String::new()
        };
        let state = format!("{:<8}", status.state.as_str());
        let state = if use_colors {
            format!("{}{state}{RESET}", state_color(status.state))
        } else {
            state
        };
        let name = if use_colors {
            format!("{DIM}{}{RESET}", status.name)
        } else {
            status.name.clone()
        };
        rows.push(format!(
            "{project}{:<24} {state} {:>5}  {:<22} {name}",
            truncate(&task, 24),
            format_idle(status.idle_secs),
            truncate(&status.status, 22),
        ));
    }
    rows
}
