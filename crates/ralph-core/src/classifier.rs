//! Status Classifier.
//!
//! Agents expose no structured status channel, so a Worker's state is
//! inferred from what the engine can tell us: whether the container is up,
//! whether an agent process is in its process table, and what the last few
//! log lines look like. Any signal that cannot be read degrades the result
//! to `idle`; classification never fails.

use crate::config::WatchConfig;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use ralph_proto::{ContainerInfo, ContainerRuntime, LogLine, LogOptions, ObservedState};
use regex::Regex;
use std::time::Duration;
use tracing::debug;

/// Prompts commonly printed by agent CLIs when they block on the user.
pub const DEFAULT_PROMPT_PATTERNS: &[&str] = &[
    r"\[[Yy]/[Nn]\]",
    r"\([Yy]/[Nn]\)",
    r"(?i)do you want to (proceed|continue|allow|make this edit|create)",
    r"(?i)press enter to",
    r"(?i)waiting for (your )?(input|approval|confirmation)",
    r"(?i)approve (this|the) (action|command|change)",
    r"(?i)allow (once|always)",
    r"(?i)\bcontinue\?\s*$",
];

/// Shell snippet printing one process name per line. `/proc` works in
/// minimal images without `ps`.
const PROCESS_TABLE_SCRIPT: &str = "cat /proc/[0-9]*/comm 2>/dev/null || ps -eo comm=";

/// A list of regex rules marking a log line as an interactive prompt.
#[derive(Debug, Clone)]
pub struct PromptMatcher {
    rules: Vec<Regex>,
}

impl PromptMatcher {
    pub fn new(rules: Vec<Regex>) -> Self {
        Self { rules }
    }

    /// Built-in rules plus any extra patterns. Invalid extras are skipped
    /// (config validation reports them before we get here).
    pub fn with_defaults(extra: &[String]) -> Self {
        let rules = DEFAULT_PROMPT_PATTERNS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!(pattern = p, error = %e, "Skipping invalid prompt pattern");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.rules.iter().any(|re| re.is_match(line))
    }

    /// True if any of `lines` looks like a prompt.
    pub fn any_match<'a>(&self, mut lines: impl Iterator<Item = &'a str>) -> bool {
        lines.any(|l| self.is_match(l))
    }
}

impl Default for PromptMatcher {
    fn default() -> Self {
        Self::with_defaults(&[])
    }
}

/// Raw observations about one Worker. `None` means "could not be read".
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub up: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub processes: Option<Vec<String>>,
    pub recent_logs: Option<Vec<LogLine>>,
}

/// Result of classifying one Worker.
#[derive(Debug, Clone)]
pub struct Observation {
    pub state: ObservedState,
    /// Seconds since the last log line, when known.
    pub idle_secs: Option<i64>,
    /// Container details, when `inspect` succeeded.
    pub info: Option<ContainerInfo>,
}

/// Classifies Workers from runtime signals.
#[derive(Debug, Clone)]
pub struct Classifier {
    matcher: PromptMatcher,
    agent_processes: Vec<String>,
    idle_threshold: Duration,
    log_lines: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::from_config(&WatchConfig::default())
    }
}

impl Classifier {
    pub fn new(
        matcher: PromptMatcher,
        agent_processes: Vec<String>,
        idle_threshold: Duration,
        log_lines: usize,
    ) -> Self {
        Self {
            matcher,
            agent_processes,
            idle_threshold,
            log_lines,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(
            PromptMatcher::with_defaults(&config.prompt_patterns),
            config.agent_processes.clone(),
            Duration::from_secs(config.idle_threshold_secs),
            config.log_lines,
        )
    }

    /// Decides the state from already-gathered signals. First match wins:
    /// not up → done/failed by exit code; no agent process → done; prompt in
    /// recent logs → waiting; quiet past the threshold → idle; else working.
    pub fn decide(&self, signals: &Signals, now: DateTime<Utc>) -> (ObservedState, Option<i64>) {
        if !signals.up {
            let state = if signals.exit_code == Some(0) {
                ObservedState::Done
            } else {
                ObservedState::Failed
            };
            return (state, None);
        }

        let Some(processes) = &signals.processes else {
            return (ObservedState::Idle, None);
        };
        if !self.has_agent(processes) {
            return (ObservedState::Done, None);
        }

        let Some(logs) = &signals.recent_logs else {
            return (ObservedState::Idle, None);
        };
        let idle_secs = logs
            .iter()
            .rev()
            .find_map(|l| l.timestamp)
            .or(signals.started_at)
            .map(|last| (now - last).num_seconds().max(0));

        if self.matcher.any_match(logs.iter().map(|l| l.text.as_str())) {
            return (ObservedState::Waiting, idle_secs);
        }

        let state = match idle_secs {
            Some(secs) if secs > self.idle_threshold.as_secs() as i64 => ObservedState::Idle,
            Some(_) => ObservedState::Working,
            None => ObservedState::Idle,
        };
        (state, idle_secs)
    }

    fn has_agent(&self, processes: &[String]) -> bool {
        processes
            .iter()
            .any(|p| self.agent_processes.iter().any(|a| a == p.trim()))
    }

    /// Gathers signals for `name` and classifies it. Never fails.
    pub async fn classify(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
        now: DateTime<Utc>,
    ) -> Observation {
        let info = match runtime.inspect(name).await {
            Ok(info) => info,
            Err(e) => {
                debug!(worker = name, error = %e, "Inspect failed, assuming idle");
                return Observation {
                    state: ObservedState::Idle,
                    idle_secs: None,
                    info: None,
                };
            }
        };

        let mut signals = Signals {
            up: info.running,
            exit_code: info.exit_code,
            started_at: info.started_at,
            processes: None,
            recent_logs: None,
        };

        if signals.up {
            signals.processes = self.read_processes(runtime, name).await;
            if signals.processes.is_some() {
                signals.recent_logs = self.read_recent_logs(runtime, name).await;
            }
        }

        let (state, idle_secs) = self.decide(&signals, now);
        debug!(worker = name, state = %state, idle_secs = ?idle_secs, "Classified worker");
        Observation {
            state,
            idle_secs,
            info: Some(info),
        }
    }

    async fn read_processes(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
    ) -> Option<Vec<String>> {
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            PROCESS_TABLE_SCRIPT.to_string(),
        ];
        match runtime.exec(name, &command).await {
            Ok(output) => {
                let processes = parse_process_table(&output.stdout);
                if processes.is_empty() && !output.success() {
                    debug!(worker = name, code = output.exit_code, "Process table unreadable");
                    None
                } else {
                    Some(processes)
                }
            }
            Err(e) => {
                debug!(worker = name, error = %e, "Process table exec failed");
                None
            }
        }
    }

    async fn read_recent_logs(
        &self,
        runtime: &dyn ContainerRuntime,
        name: &str,
    ) -> Option<Vec<LogLine>> {
        let options = LogOptions {
            follow: false,
            timestamps: true,
            tail: Some(self.log_lines),
        };
        let stream = match runtime.logs(name, &options).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(worker = name, error = %e, "Log read failed");
                return None;
            }
        };
        let lines: Vec<_> = stream.collect().await;
        let mut cleaned = Vec::with_capacity(lines.len());
        for line in lines {
            match line {
                Ok(line) => cleaned.push(LogLine {
                    timestamp: line.timestamp,
                    text: strip_ansi(&line.text),
                }),
                Err(e) => {
                    debug!(worker = name, error = %e, "Log stream error");
                    return None;
                }
            }
        }
        Some(cleaned)
    }
}

/// One trimmed, non-empty process name per line.
pub fn parse_process_table(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_ansi(text: &str) -> String {
    let bytes = strip_ansi_escapes::strip(text.as_bytes());
    String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn running(processes: &[&str], logs: Vec<LogLine>) -> Signals {
        Signals {
            up: true,
            exit_code: None,
            started_at: None,
            processes: Some(processes.iter().map(|p| (*p).to_string()).collect()),
            recent_logs: Some(logs),
        }
    }

    fn secs_ago(secs: i64, text: &str) -> LogLine {
        LogLine::at(now() - chrono::Duration::seconds(secs), text)
    }

    #[test]
    fn test_not_up_uses_exit_code() {
        let c = Classifier::default();
        let mut signals = Signals {
            exit_code: Some(1),
            ..Signals::default()
        };
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Failed);

        signals.exit_code = Some(0);
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Done);

        signals.exit_code = None;
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Failed);
    }

    #[test]
    fn test_no_agent_process_is_done() {
        let c = Classifier::default();
        let signals = running(&["bash", "sleep", "tini"], vec![secs_ago(1, "hi")]);
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Done);
    }

    #[test]
    fn test_agent_name_matches_exactly() {
        let c = Classifier::default();
        let signals = running(&["claude-helper", "nodejs"], vec![secs_ago(1, "hi")]);
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Done);
    }

    #[test]
    fn test_prompt_pattern_means_waiting() {
        let c = Classifier::default();
        let signals = running(
            &["bash", "opencode"],
            vec![
                secs_ago(30, "Editing src/main.rs"),
                secs_ago(29, "Apply these changes? [Y/n]"),
            ],
        );
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Waiting);
    }

    #[test]
    fn test_quiet_agent_is_idle() {
        let c = Classifier::default();
        let signals = running(&["claude"], vec![secs_ago(200, "Thinking...")]);
        let (state, idle) = c.decide(&signals, now());
        assert_eq!(state, ObservedState::Idle);
        assert_eq!(idle, Some(200));
    }

    #[test]
    fn test_recent_output_is_working() {
        let c = Classifier::default();
        let signals = running(&["node"], vec![secs_ago(5, "Running tests")]);
        assert_eq!(c.decide(&signals, now()), (ObservedState::Working, Some(5)));
    }

    #[test]
    fn test_unreadable_signals_degrade_to_idle() {
        let c = Classifier::default();
        let mut signals = running(&["claude"], vec![]);
        signals.processes = None;
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Idle);

        let mut signals = running(&["claude"], vec![]);
        signals.recent_logs = None;
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Idle);

        // Running agent, no timestamped output and no start time.
        let signals = running(&["claude"], vec![LogLine::new("untimed")]);
        assert_eq!(c.decide(&signals, now()).0, ObservedState::Idle);
    }

    #[test]
    fn test_falls_back_to_start_time() {
        let c = Classifier::default();
        let mut signals = running(&["claude"], vec![]);
        signals.started_at = Some(now() - chrono::Duration::seconds(10));
        assert_eq!(c.decide(&signals, now()), (ObservedState::Working, Some(10)));
    }

    #[test]
    fn test_extra_patterns_extend_defaults() {
        let matcher = PromptMatcher::with_defaults(&["Proceed with deploy".to_string()]);
        assert!(matcher.is_match("Proceed with deploy to prod"));
        assert!(matcher.is_match("Overwrite file? (y/n)"));
        assert!(!matcher.is_match("Compiling ralph-core v0.3.0"));
    }

    #[test]
    fn test_default_matcher_known_prompts() {
        let matcher = PromptMatcher::default();
        for line in [
            "Do you want to proceed?",
            "  Do you want to make this edit to config.rs?",
            "Press Enter to continue",
            "Waiting for your approval",
            "❯ 1. Yes  2. Allow always",
        ] {
            assert!(matcher.is_match(line), "{line}");
        }
        assert!(!matcher.is_match("All 42 tests passed"));
    }

    #[test]
    fn test_parse_process_table() {
        let table = "tini\n  claude \n\nsh\n";
        assert_eq!(parse_process_table(table), vec!["tini", "claude", "sh"]);
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\u{1b}[32m[Y/n]\u{1b}[0m\r"), "[Y/n]");
    }
}
