//! # ralph-adapters
//!
//! Host-side backends for Ralph Workers.
//!
//! This crate provides implementations of the `ralph-proto` capability traits:
//! - `DockerCli`, a `ContainerRuntime` driving the `docker` command line
//! - Notification channels for `ralph watch`: desktop, webhook, and ntfy
//!
//! ## Engine selection
//!
//! `DockerCli::from_env` honors `RALPH_DOCKER`, so any CLI-compatible engine
//! (for example `podman`) can stand in for Docker.

mod docker;
mod notify;

pub use docker::{
    DEFAULT_DOCKER_BIN, DOCKER_BIN_ENV, DockerCli, classify_engine_error, create_args, logs_args,
    parse_inspect, parse_log_output, parse_ps_line,
};
pub use notify::{
    DEFAULT_NTFY_SERVER, DesktopNotifier, FanoutNotifier, NtfyNotifier, WebhookNotifier,
};
