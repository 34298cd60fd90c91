//! # ralph-core
//!
//! Core orchestration functionality for Ralph Workers.
//!
//! This crate provides:
//! - Project discovery and configuration loading
//! - Task reference resolution from command-line tokens
//! - The Worker naming scheme and its reverse parse
//! - The Worker lifecycle manager (start, restart, stop, clean)
//! - Heuristic state classification and the watch/notify loop
//! - Test doubles for the container runtime and notifiers

mod classifier;
mod config;
mod lifecycle;
pub mod naming;
mod resolver;
mod status;
pub mod testing;
mod watch;

pub use classifier::{
    Classifier, DEFAULT_PROMPT_PATTERNS, Observation, PromptMatcher, Signals,
    parse_process_table,
};
pub use config::{
    CONFIG_FILE, CommitStrategy, ConfigError, ConfigWarning, DockerConfig, HostEnvironment,
    KNOWN_AGENTS, NotificationConfig, NtfyConfig, Project, ProjectConfig, RALPH_DIR,
    ResourceLimits, TaskSource, WatchConfig,
};
pub use lifecycle::{
    AGENT_PROFILES, AgentProfile, CONTAINER_HOME, GITHUB_TOKEN_VARS, LifecycleError, StopOutcome,
    WORKSPACE_DIR, WorkerHandle, WorkerManager, agent_profile, labels, recover_selector,
    selector_or_auto,
};
pub use resolver::{GENERATED_ID_FORMAT, ResolveError, Resolver};
pub use status::{Scope, WorkerStatus, inspect_worker, survey};
pub use watch::{TickReport, WatchState, Watcher};
