//! Project configuration for Ralph Workers.
//!
//! A project is a directory containing `.ralph/config.yml`. The file is
//! created by `ralph init` (outside this crate) and is read-only here.
//! Resource limits can be overridden per invocation through `RALPH_CPUS` and
//! `RALPH_MEMORY`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding per-project Ralph files.
pub const RALPH_DIR: &str = ".ralph";

/// Config file name inside [`RALPH_DIR`].
pub const CONFIG_FILE: &str = "config.yml";

/// Agents the Worker image knows how to launch.
pub const KNOWN_AGENTS: &[&str] = &["claude", "opencode", "codex"];

/// Top-level project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name used in Worker names. Defaults to the directory name.
    #[serde(default)]
    pub name: Option<String>,

    /// Where tasks come from.
    #[serde(default)]
    pub mode: TaskSource,

    /// How the agent lands its changes.
    #[serde(default)]
    pub commit: CommitStrategy,

    /// Agent CLI to run inside the Worker.
    #[serde(default = "default_agent")]
    pub agent: String,

    /// Container settings.
    #[serde(default)]
    pub docker: DockerConfig,

    /// Where `ralph watch` sends notifications.
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Status classification and watch loop tuning.
    #[serde(default)]
    pub watch: WatchConfig,
}

fn default_agent() -> String {
    "claude".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: None,
            mode: TaskSource::default(),
            commit: CommitStrategy::default(),
            agent: default_agent(),
            docker: DockerConfig::default(),
            notifications: NotificationConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// Task source mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    /// Tasks are GitHub issues.
    #[default]
    Github,
    /// Tasks are stories in a PRD file.
    Prd,
    /// Tasks are free-form prompts.
    Prompt,
}

impl TaskSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Prd => "prd",
            Self::Prompt => "prompt",
        }
    }
}

/// Commit strategy handed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitStrategy {
    /// Commit straight to the current branch.
    Direct,
    /// Work on a branch and open a pull request.
    #[default]
    PullRequest,
    /// Leave changes uncommitted.
    None,
}

impl CommitStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::PullRequest => "pull-request",
            Self::None => "none",
        }
    }
}

/// Container settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Prefix for every Worker name.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Worker image. Defaults to `<prefix>-<project>:latest`.
    #[serde(default)]
    pub image: Option<String>,

    /// Dockerfile used by `ralph build`, relative to the project root.
    #[serde(default = "default_dockerfile")]
    pub dockerfile: PathBuf,

    /// CPU limit (overridden by `RALPH_CPUS`).
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Memory ceiling (overridden by `RALPH_MEMORY`).
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Mount the host docker socket into Workers when it exists.
    #[serde(default)]
    pub mount_docker_socket: bool,

    /// Extra host environment variables forwarded to Workers when set.
    #[serde(default)]
    pub passthrough_env: Vec<String>,
}

fn default_prefix() -> String {
    "ralph".to_string()
}

fn default_dockerfile() -> PathBuf {
    PathBuf::from("Dockerfile")
}

fn default_cpus() -> String {
    "2".to_string()
}

fn default_memory() -> String {
    "4g".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            image: None,
            dockerfile: default_dockerfile(),
            cpus: default_cpus(),
            memory: default_memory(),
            mount_docker_socket: false,
            passthrough_env: Vec::new(),
        }
    }
}

/// Notification endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Show a desktop notification.
    #[serde(default = "default_true")]
    pub desktop: bool,

    /// POST a JSON payload to this URL.
    #[serde(default)]
    pub webhook: Option<String>,

    /// Publish to an ntfy topic.
    #[serde(default)]
    pub ntfy: Option<NtfyConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            webhook: None,
            ntfy: None,
        }
    }
}

/// ntfy push settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtfyConfig {
    #[serde(default = "default_ntfy_server")]
    pub server: String,
    pub topic: String,
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".to_string()
}

/// Watch loop and classifier tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Seconds between watch ticks.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Quiet seconds after which a running agent counts as idle.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// How many recent log lines are scanned for prompts.
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,

    /// Extra regexes that mark an agent as waiting for input.
    #[serde(default)]
    pub prompt_patterns: Vec<String>,

    /// Process names that count as a live agent.
    #[serde(default = "default_agent_processes")]
    pub agent_processes: Vec<String>,
}

fn default_interval() -> u64 {
    5
}

fn default_idle_threshold() -> u64 {
    120
}

fn default_log_lines() -> usize {
    20
}

fn default_agent_processes() -> Vec<String> {
    vec!["opencode".to_string(), "claude".to_string(), "node".to_string()]
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            idle_threshold_secs: default_idle_threshold(),
            log_lines: default_log_lines(),
            prompt_patterns: Vec::new(),
            agent_processes: default_agent_processes(),
        }
    }
}

impl ProjectConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading project configuration");
        let content = std::fs::read_to_string(path_ref)?;
        let config: Self = serde_yaml::from_str(&content)?;
        debug!(
            mode = config.mode.as_str(),
            agent = %config.agent,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Validates the configuration and returns warnings.
    ///
    /// Prompt patterns that are not valid regexes are a hard error; everything
    /// else degrades to a warning.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        if !KNOWN_AGENTS.contains(&self.agent.as_str()) {
            warnings.push(ConfigWarning::InvalidValue {
                field: "agent".to_string(),
                message: format!(
                    "Unknown agent '{}', expected one of: {}. No credential files will be mounted.",
                    self.agent,
                    KNOWN_AGENTS.join(", ")
                ),
            });
        }

        if self.watch.interval_secs == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "watch.interval_secs".to_string(),
                message: "Interval of 0 would spin; using 1 second".to_string(),
            });
        }

        if self.watch.log_lines == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "watch.log_lines".to_string(),
                message: "No log lines scanned; waiting prompts will never be detected".to_string(),
            });
        }

        if let Some(url) = &self.notifications.webhook {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                warnings.push(ConfigWarning::InvalidValue {
                    field: "notifications.webhook".to_string(),
                    message: format!("'{url}' is not an http(s) URL; webhook disabled"),
                });
            }
        }

        for pattern in &self.watch.prompt_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(warnings)
    }

    /// Watch interval, never below one second.
    pub fn watch_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.watch.interval_secs.max(1))
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Field has an invalid value.
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("no Ralph project found in {} or any parent directory", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("invalid prompt pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// A project directory with its loaded configuration.
#[derive(Debug, Clone)]
pub struct Project {
    /// Absolute project root (the directory containing `.ralph/`).
    pub root: PathBuf,
    /// Effective project name.
    pub name: String,
    pub config: ProjectConfig,
}

impl Project {
    /// Loads the project rooted at `root`.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let config_path = root.join(RALPH_DIR).join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(ConfigError::ProjectNotFound(root));
        }
        let config = ProjectConfig::from_file(&config_path)?;
        Ok(Self::from_config(root, config))
    }

    /// Walks up from `start` to the first directory containing
    /// `.ralph/config.yml`.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let start = start.as_ref();
        let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
        for dir in start.ancestors() {
            if dir.join(RALPH_DIR).join(CONFIG_FILE).is_file() {
                debug!(root = %dir.display(), "Found Ralph project");
                return Self::load(dir);
            }
        }
        Err(ConfigError::ProjectNotFound(start))
    }

    /// Builds a project from an already-loaded config.
    pub fn from_config(root: PathBuf, config: ProjectConfig) -> Self {
        let name = config.name.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        });
        Self { root, name, config }
    }

    /// Worker name prefix from config.
    pub fn prefix(&self) -> &str {
        &self.config.docker.prefix
    }

    /// Image Workers are created from.
    pub fn image(&self) -> String {
        self.config.docker.image.clone().unwrap_or_else(|| {
            format!(
                "{}-{}:latest",
                self.prefix(),
                ralph_proto::normalize_segment(&self.name)
            )
        })
    }

    pub fn ralph_dir(&self) -> PathBuf {
        self.root.join(RALPH_DIR)
    }
}

/// Snapshot of the host environment the orchestrator runs in.
///
/// Everything that reads environment variables or the home directory goes
/// through this so it can be substituted in tests.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    pub vars: HashMap<String, String>,
    pub home: Option<PathBuf>,
}

impl HostEnvironment {
    /// Captures the current process environment.
    pub fn from_process() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let home = vars.get("HOME").map(PathBuf::from);
        Self { vars, home }
    }

    /// Returns a non-empty variable.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// First non-empty variable among `keys`, with its name.
    pub fn first_var<'a>(&'a self, keys: &[&'a str]) -> Option<(&'a str, &'a str)> {
        keys.iter().find_map(|k| self.var(k).map(|v| (*k, v)))
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }
}

/// Effective CPU and memory limits for a Worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpus: String,
    pub memory: String,
}

impl ResourceLimits {
    /// Config values, overridden by `RALPH_CPUS` / `RALPH_MEMORY`.
    pub fn resolve(docker: &DockerConfig, env: &HostEnvironment) -> Self {
        Self {
            cpus: env
                .var("RALPH_CPUS")
                .map_or_else(|| docker.cpus.clone(), str::to_string),
            memory: env
                .var("RALPH_MEMORY")
                .map_or_else(|| docker.memory.clone(), str::to_string),
        }
    }
}
