//! Docker CLI runtime.
//!
//! Drives the `docker` binary through `tokio::process`. The CLI is used
//! rather than the engine API because `attach` and interactive `exec` need
//! the CLI's TTY handling anyway. Secrets are handed to `docker run` through
//! the child's environment (`-e KEY`), never on its command line.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use ralph_proto::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ImageBuild,
    LogLine, LogOptions, LogStream, Result, RuntimeError,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Binary used when `RALPH_DOCKER` is unset.
pub const DEFAULT_DOCKER_BIN: &str = "docker";

/// Environment variable naming an alternative engine binary (e.g. `podman`).
pub const DOCKER_BIN_ENV: &str = "RALPH_DOCKER";

const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Status}}";

/// [`ContainerRuntime`] backed by the Docker command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER_BIN)
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Uses `$RALPH_DOCKER` when set.
    pub fn from_env() -> Self {
        std::env::var(DOCKER_BIN_ENV)
            .ok()
            .filter(|b| !b.trim().is_empty())
            .map_or_else(Self::default, Self::new)
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(args);
        command.stdin(Stdio::null());
        command
    }

    fn describe(&self, args: &[String]) -> String {
        let head: Vec<&str> = args.iter().take(2).map(String::as_str).collect();
        format!("{} {}", self.binary, head.join(" "))
    }

    fn spawn_error(&self, e: std::io::Error) -> RuntimeError {
        if e.kind() == std::io::ErrorKind::NotFound {
            RuntimeError::EngineUnavailable(format!("`{}` not found in PATH", self.binary))
        } else {
            RuntimeError::Io(e)
        }
    }

    async fn output(&self, mut command: Command) -> Result<Output> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.output().await.map_err(|e| self.spawn_error(e))
    }

    /// Runs `args` and returns stdout, mapping failures to runtime errors.
    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(args = ?args, "Running engine command");
        let output = self.output(self.command(args)).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(classify_engine_error(
            &self.describe(args),
            output.status.code(),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    /// Runs with the terminal attached and returns the exit code.
    async fn run_inherited(&self, args: &[String]) -> Result<i32> {
        debug!(args = ?args, "Running interactive engine command");
        let status = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;
        Ok(status.code().unwrap_or(1))
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Arguments for `docker run` creating a detached Worker. Environment
/// values are not included; pass `spec.env` to the child process.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut out = args(["run", "--detach", "--name"]);
    out.push(spec.name.clone());
    if !spec.cpus.is_empty() {
        out.push("--cpus".to_string());
        out.push(spec.cpus.clone());
    }
    if !spec.memory.is_empty() {
        out.push("--memory".to_string());
        out.push(spec.memory.clone());
    }
    if spec.interactive {
        out.push("--interactive".to_string());
        out.push("--tty".to_string());
    }
    if let Some(workdir) = &spec.workdir {
        out.push("--workdir".to_string());
        out.push(workdir.to_string_lossy().into_owned());
    }
    for key in spec.env.keys() {
        out.push("--env".to_string());
        out.push(key.clone());
    }
    for mount in &spec.mounts {
        let mut volume = format!("{}:{}", mount.host.display(), mount.container.display());
        if mount.read_only {
            volume.push_str(":ro");
        }
        out.push("--volume".to_string());
        out.push(volume);
    }
    for (key, value) in &spec.labels {
        out.push("--label".to_string());
        out.push(format!("{key}={value}"));
    }
    out.push(spec.image.clone());
    out.extend(spec.args.iter().cloned());
    out
}

/// Arguments for `docker container inspect`.
pub fn inspect_args(name: &str) -> Vec<String> {
    args(["container", "inspect", name])
}

/// Arguments for `docker exec`. `interactive` hands the caller's terminal to
/// the command.
pub fn exec_args(name: &str, command: &[String], interactive: bool) -> Vec<String> {
    let mut out = if interactive {
        args(["exec", "--interactive", "--tty", name])
    } else {
        args(["exec", name])
    };
    out.extend(command.iter().cloned());
    out
}

pub fn stop_args(name: &str) -> Vec<String> {
    args(["stop", name])
}

pub fn remove_args(name: &str) -> Vec<String> {
    args(["rm", name])
}

/// Arguments for `docker ps` over every container, running or not, that
/// matches `filter` (`name=...`, `label=...`).
pub fn ps_args(filter: &str) -> Vec<String> {
    args(["ps", "--all", "--filter", filter, "--format", PS_FORMAT])
}

/// The `label=` filter for `key`, or for `key` set to `value`.
pub fn label_filter(key: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("label={key}={value}"),
        None => format!("label={key}"),
    }
}

pub fn build_args(request: &ImageBuild) -> Vec<String> {
    let mut out = args(["build", "--tag", &request.tag, "--file"]);
    out.push(request.dockerfile.to_string_lossy().into_owned());
    out.push(request.context.to_string_lossy().into_owned());
    out
}

/// Arguments for `docker logs`.
pub fn logs_args(name: &str, options: &LogOptions) -> Vec<String> {
    let mut out = args(["logs"]);
    if options.follow {
        out.push("--follow".to_string());
    }
    if options.timestamps {
        out.push("--timestamps".to_string());
    }
    if let Some(tail) = options.tail {
        out.push("--tail".to_string());
        out.push(tail.to_string());
    }
    out.push(name.to_string());
    out
}

/// Maps a failed engine command to an error kind from its stderr.
pub fn classify_engine_error(command: &str, code: Option<i32>, stderr: &str) -> RuntimeError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("permission denied while trying to connect")
        || lower.contains("error during connect")
    {
        RuntimeError::EngineUnavailable(message)
    } else if lower.contains("no such container")
        || lower.contains("no such object")
        || lower.contains("no such image")
        || lower.contains("not found: manifest unknown")
    {
        RuntimeError::NotFound(message)
    } else if lower.contains("is already in use")
        || lower.contains("is not running")
        || lower.contains("cannot remove a running container")
        || lower.contains("conflict")
    {
        RuntimeError::Conflict(message)
    } else {
        RuntimeError::CommandFailed {
            command: command.to_string(),
            code,
            stderr: message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    name: String,
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
    running: bool,
    #[serde(default)]
    exit_code: Option<i64>,
    #[serde(default)]
    started_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Parses `docker inspect` output for a single container.
pub fn parse_inspect(json: &str) -> Result<ContainerInfo> {
    let records: Vec<InspectRecord> =
        serde_json::from_str(json).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::Parse("empty inspect output".to_string()))?;

    // The engine reports year 1 for containers that never started.
    let started_at = record
        .state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1);

    Ok(ContainerInfo {
        id: record.id,
        name: record.name.trim_start_matches('/').to_string(),
        running: record.state.running,
        status: record.state.status,
        exit_code: if record.state.running {
            None
        } else {
            record.state.exit_code
        },
        started_at,
        labels: record.config.labels.unwrap_or_default(),
    })
}

/// Parses one `docker ps` line in [`PS_FORMAT`].
pub fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let mut fields = line.splitn(3, '\t');
    let id = fields.next()?.trim();
    let name = fields.next()?.trim();
    let status = fields.next().unwrap_or_default().trim();
    if id.is_empty() || name.is_empty() {
        return None;
    }
    Some(ContainerSummary {
        id: id.to_string(),
        name: name.to_string(),
        status: status.to_string(),
    })
}

/// Parses captured log output. The engine writes the container's stdout and
/// stderr to separate pipes; with timestamps the two are merged in time
/// order, otherwise stdout comes first.
pub fn parse_log_output(stdout: &str, stderr: &str, timestamped: bool) -> Vec<LogLine> {
    let mut lines: Vec<LogLine> = stdout
        .lines()
        .chain(stderr.lines())
        .map(|raw| LogLine::parse(raw.trim_end_matches('\r'), timestamped))
        .collect();
    if timestamped {
        // Stable sort; untimed lines move to the front in their original order.
        lines.sort_by_key(|l| l.timestamp);
    }
    lines
}

fn line_stream<R>(reader: R, timestamped: bool) -> BoxStream<'static, Result<LogLine>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let segments = BufReader::new(reader).split(b'\n');
    stream::unfold(Some(segments), move |state| async move {
        let mut segments = state?;
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let raw = String::from_utf8_lossy(&bytes);
                let line = LogLine::parse(raw.trim_end_matches('\r'), timestamped);
                Some((Ok(line), Some(segments)))
            }
            Ok(None) => None,
            Err(e) => Some((Err(RuntimeError::Io(e)), None)),
        }
    })
    .boxed()
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let inspect_image = args(["image", "inspect", "--format", "{{.Id}}", image]);
        match self.run(&inspect_image).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        match self.inspect(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn container_running(&self, name: &str) -> Result<bool> {
        match self.inspect(name).await {
            Ok(info) => Ok(info.running),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        let stdout = self.run(&inspect_args(name)).await?;
        parse_inspect(&stdout)
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let run_args = create_args(spec);
        debug!(worker = %spec.name, image = %spec.image, "Creating container");
        let mut command = self.command(&run_args);
        command.envs(&spec.env);
        let output = self.output(command).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(classify_engine_error(
            &self.describe(&run_args),
            output.status.code(),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput> {
        let argv = exec_args(name, command, false);
        let output = self.output(self.command(&argv)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code();

        // Exit codes 125-127 come from the engine or the exec itself.
        if let Some(engine_code @ 125..=127) = code {
            let err = classify_engine_error(&self.describe(&argv), Some(engine_code), &stderr);
            if !matches!(err, RuntimeError::CommandFailed { .. }) || output.stdout.is_empty() {
                return Err(err);
            }
        }
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code: code.unwrap_or(-1),
        })
    }

    async fn exec_interactive(&self, name: &str, command: &[String]) -> Result<i32> {
        self.run_inherited(&exec_args(name, command, true)).await
    }

    async fn attach(&self, name: &str) -> Result<i32> {
        self.run_inherited(&args(["attach", name])).await
    }

    async fn logs(&self, name: &str, options: &LogOptions) -> Result<LogStream> {
        let log_args = logs_args(name, options);

        if !options.follow {
            let output = self.output(self.command(&log_args)).await?;
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !output.status.success() {
                return Err(classify_engine_error(
                    &self.describe(&log_args),
                    output.status.code(),
                    &stderr,
                ));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            let lines = parse_log_output(&stdout, &stderr, options.timestamps);
            return Ok(stream::iter(lines.into_iter().map(Ok)).boxed());
        }

        let mut command = self.command(&log_args);
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| self.spawn_error(e))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RuntimeError::Parse("log pipes unavailable".to_string()));
        };

        let merged = stream::select(
            line_stream(stdout, options.timestamps),
            line_stream(stderr, options.timestamps),
        );
        // The follower process lives exactly as long as the stream.
        Ok(merged
            .map(move |item| {
                let _follower = &child;
                item
            })
            .boxed())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.run(&stop_args(name)).await.map(drop)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.run(&remove_args(name)).await.map(drop)
    }

    async fn list_by_label(&self, key: &str, value: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let stdout = self.run(&ps_args(&label_filter(key, value))).await?;
        Ok(stdout.lines().filter_map(parse_ps_line).collect())
    }

    async fn build_image(&self, request: &ImageBuild) -> Result<()> {
        let argv = build_args(request);
        let code = self.run_inherited(&argv).await?;
        if code == 0 {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                command: self.describe(&argv),
                code: Some(code),
                stderr: "see build output above".to_string(),
            })
        }
    }
}
