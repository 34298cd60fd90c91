//! Worker Lifecycle Manager.
//!
//! Enforces one Worker per (project, task) and assembles the container spec
//! for new Workers. The container engine is the only source of truth: every
//! operation looks Workers up by recomputing their name and asking the
//! engine, never through a local registry.

use crate::config::{ConfigError, HostEnvironment, Project, ResourceLimits, TaskSource};
use crate::naming;
use crate::status::Scope;
use chrono::{DateTime, Local};
use ralph_proto::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary, ImageBuild, LogOptions,
    LogStream, Mount, RuntimeError, TaskId, TaskKind, TaskSelector, normalize_segment,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Label keys written on every Worker.
pub mod labels {
    /// Project name.
    pub const PROJECT: &str = "ralph.project";
    /// Absolute project root on the host.
    pub const FOLDER: &str = "ralph.folder";
    /// JSON-encoded `TaskSelector`.
    pub const TASK: &str = "ralph.task";
    /// Canonical task identifier.
    pub const TASK_ID: &str = "ralph.task-id";
}

/// Project mount point inside Workers.
pub const WORKSPACE_DIR: &str = "/workspace";

/// Home directory of the agent user inside Workers.
pub const CONTAINER_HOME: &str = "/home/ralph";

/// Where PRD files from outside the project are mounted.
pub const EXTERNAL_PRD_DIR: &str = "/ralph/prd";

/// Default engine control socket.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Variables that can carry the GitHub token, in lookup order.
pub const GITHUB_TOKEN_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];

/// Credentials an agent can authenticate with: an API key variable, or a
/// login file left in the host home directory.
#[derive(Debug, Clone, Copy)]
pub struct AgentProfile {
    pub name: &'static str,
    pub key_vars: &'static [&'static str],
    /// Paths relative to the home directory, mounted at the same relative
    /// path under [`CONTAINER_HOME`].
    pub auth_files: &'static [&'static str],
}

pub const AGENT_PROFILES: &[AgentProfile] = &[
    AgentProfile {
        name: "claude",
        key_vars: &["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN"],
        auth_files: &[".claude", ".claude.json"],
    },
    AgentProfile {
        name: "opencode",
        key_vars: &[
            "ANTHROPIC_API_KEY",
            "OPENAI_API_KEY",
            "OPENROUTER_API_KEY",
            "GEMINI_API_KEY",
        ],
        auth_files: &[".local/share/opencode/auth.json", ".config/opencode"],
    },
    AgentProfile {
        name: "codex",
        key_vars: &["OPENAI_API_KEY"],
        auth_files: &[".codex"],
    },
];

pub fn agent_profile(agent: &str) -> Option<&'static AgentProfile> {
    AGENT_PROFILES.iter().find(|p| p.name == agent)
}

/// Errors from lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("worker {name} is already running")]
    AlreadyRunning { name: String, task_id: TaskId },

    #[error("image {image} not found")]
    ImageMissing { image: String },

    #[error("missing credential: {credential}")]
    CredentialMissing { credential: String, hint: String },

    #[error("no worker found for {task_id}")]
    WorkerNotFound { task_id: TaskId },

    #[error("{task_id} matches several workers: {}", .names.join(", "))]
    AmbiguousWorker { task_id: TaskId, names: Vec<String> },

    #[error("worker {name} is not running")]
    NotRunning { name: String },

    #[error("cannot recover the task of worker {name}: {reason}")]
    UnrecoverableTask { name: String, reason: String },

    #[error("{what} not found at {}", .path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl LifecycleError {
    /// A one-line suggestion for the user, when there is an obvious fix.
    pub fn remediation(&self) -> Option<String> {
        match self {
            Self::AlreadyRunning { task_id, .. } => Some(format!(
                "stop it first with `ralph stop {task_id}`, or use `ralph restart {task_id}`"
            )),
            Self::ImageMissing { .. } => Some("build it first with `ralph build`".to_string()),
            Self::CredentialMissing { hint, .. } => Some(hint.clone()),
            Self::WorkerNotFound { .. } => {
                Some("run `ralph list` to see existing workers".to_string())
            }
            Self::AmbiguousWorker { .. } => {
                Some("run the command from inside the project directory".to_string())
            }
            Self::NotRunning { name } => Some(format!(
                "use `ralph logs` to read its output, or `ralph restart` to run it again ({name})"
            )),
            Self::UnrecoverableTask { .. } => {
                Some("stop it and start the task again with `ralph start`".to_string())
            }
            Self::Runtime(RuntimeError::EngineUnavailable(_)) => {
                Some("is the Docker daemon running?".to_string())
            }
            Self::Config(ConfigError::ProjectNotFound(_)) => {
                Some("run `ralph init` in your project first, or pass --project DIR".to_string())
            }
            _ => None,
        }
    }
}

/// A Worker created by [`WorkerManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub name: String,
    pub task_id: TaskId,
    pub selector: TaskSelector,
    pub project: String,
    pub folder: PathBuf,
}

/// Result of stopping one Worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub name: String,
    pub was_running: bool,
}

/// Picks the auto selector when no task was given.
pub fn selector_or_auto(selector: Option<TaskSelector>, now: DateTime<Local>) -> TaskSelector {
    selector.unwrap_or_else(|| TaskSelector::Auto {
        id: now.format(crate::resolver::GENERATED_ID_FORMAT).to_string(),
    })
}

/// Creates, finds and tears down Workers through a container runtime.
pub struct WorkerManager<'a> {
    runtime: &'a dyn ContainerRuntime,
    env: &'a HostEnvironment,
}

impl<'a> WorkerManager<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, env: &'a HostEnvironment) -> Self {
        Self { runtime, env }
    }

    /// Starts a Worker for `selector`.
    ///
    /// The running check is only a fast path: two concurrent starts can both
    /// pass it, and the engine's atomic name check on create settles the race
    /// as [`LifecycleError::AlreadyRunning`].
    pub async fn start(
        &self,
        project: &Project,
        selector: TaskSelector,
    ) -> Result<WorkerHandle, LifecycleError> {
        let selector = anchor_prd_path(project, selector)?;
        let task_id = selector.task_id();
        let name = naming::worker_name(project.prefix(), &project.name, &task_id);
        debug!(worker = %name, task = %task_id, "Starting worker");

        if self.runtime.container_running(&name).await? {
            return Err(LifecycleError::AlreadyRunning { name, task_id });
        }
        if self.runtime.container_exists(&name).await? {
            info!(worker = %name, "Removing stopped worker before restart");
            match self.runtime.remove(&name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let image = project.image();
        if !self.runtime.image_exists(&image).await? {
            return Err(LifecycleError::ImageMissing { image });
        }

        self.check_credentials(project, &selector)?;

        let spec = self.container_spec(project, &selector, &name);
        match self.runtime.create(&spec).await {
            Ok(()) => {}
            Err(RuntimeError::Conflict(reason)) => {
                debug!(worker = %name, reason = %reason, "Lost create race");
                return Err(LifecycleError::AlreadyRunning { name, task_id });
            }
            Err(e) => return Err(e.into()),
        }

        info!(worker = %name, task = %task_id, image = %image, "Worker started");
        Ok(WorkerHandle {
            name,
            task_id,
            selector,
            project: project.name.clone(),
            folder: project.root.clone(),
        })
    }

    /// Fails fast when the agent would not be able to authenticate.
    pub fn check_credentials(
        &self,
        project: &Project,
        selector: &TaskSelector,
    ) -> Result<(), LifecycleError> {
        let github_mode = project.config.mode == TaskSource::Github;
        if selector.is_github_sourced(github_mode)
            && self.env.first_var(GITHUB_TOKEN_VARS).is_none()
        {
            return Err(LifecycleError::CredentialMissing {
                credential: GITHUB_TOKEN_VARS.join(" or "),
                hint: "export GITHUB_TOKEN with access to the repository's issues".to_string(),
            });
        }

        let Some(profile) = agent_profile(&project.config.agent) else {
            warn!(agent = %project.config.agent, "Unknown agent, skipping credential check");
            return Ok(());
        };
        let has_key = self.env.first_var(profile.key_vars).is_some();
        let has_login = self
            .home_auth_files(profile)
            .next()
            .is_some();
        if !has_key && !has_login {
            return Err(LifecycleError::CredentialMissing {
                credential: profile.key_vars.join(" or "),
                hint: format!(
                    "export one of them, or log in with `{}` on this machine",
                    profile.name
                ),
            });
        }
        Ok(())
    }

    fn home_auth_files(
        &self,
        profile: &AgentProfile,
    ) -> impl Iterator<Item = (PathBuf, &'static str)> + '_ {
        let home = self.env.home.clone();
        profile.auth_files.iter().filter_map(move |rel| {
            let path = home.as_ref()?.join(rel);
            path.exists().then_some((path, *rel))
        })
    }

    /// Optional mounts found on this host. Only paths that exist are
    /// included; nothing is assumed to be installed.
    pub fn host_mounts(&self, project: &Project) -> Vec<Mount> {
        let mut mounts = Vec::new();

        if let Some(profile) = agent_profile(&project.config.agent) {
            for (path, rel) in self.home_auth_files(profile) {
                mounts.push(Mount::read_only(path, Path::new(CONTAINER_HOME).join(rel)));
            }
        }

        if let Some(home) = &self.env.home {
            let gitconfig = home.join(".gitconfig");
            if gitconfig.is_file() {
                mounts.push(Mount::read_only(
                    gitconfig,
                    Path::new(CONTAINER_HOME).join(".gitconfig"),
                ));
            }
        }

        let dotenv = project.root.join(".env");
        if dotenv.is_file() {
            mounts.push(Mount::read_only(dotenv, Path::new(WORKSPACE_DIR).join(".env")));
        }

        let ralph_dir = project.ralph_dir();
        if ralph_dir.is_dir() {
            mounts.push(Mount::read_only(
                ralph_dir,
                Path::new(WORKSPACE_DIR).join(crate::config::RALPH_DIR),
            ));
        }

        if project.config.docker.mount_docker_socket {
            let socket = self.docker_socket();
            if socket.exists() {
                mounts.push(Mount::read_write(socket, DOCKER_SOCKET));
            } else {
                debug!(socket = %socket.display(), "Docker socket not found, not mounting");
            }
        }

        mounts
    }

    fn docker_socket(&self) -> PathBuf {
        self.env
            .var("DOCKER_HOST")
            .and_then(|h| h.strip_prefix("unix://"))
            .map_or_else(|| PathBuf::from(DOCKER_SOCKET), PathBuf::from)
    }

    /// Assembles the full create spec for a Worker.
    pub fn container_spec(
        &self,
        project: &Project,
        selector: &TaskSelector,
        name: &str,
    ) -> ContainerSpec {
        let config = &project.config;
        let task_id = selector.task_id();
        let limits = ResourceLimits::resolve(&config.docker, self.env);

        let mut mounts = vec![Mount::read_write(&project.root, WORKSPACE_DIR)];
        let mut prd_container_path = None;
        if let TaskSelector::Prd { path } = selector {
            if path.is_absolute() {
                let target = Path::new(EXTERNAL_PRD_DIR).join(path.file_name().unwrap_or_default());
                mounts.push(Mount::read_only(path, &target));
                prd_container_path = Some(target);
            } else {
                prd_container_path = Some(Path::new(WORKSPACE_DIR).join(path));
            }
        }
        mounts.extend(self.host_mounts(project));

        let mut env = BTreeMap::new();
        env.insert("RALPH_TASK_ID".to_string(), task_id.to_string());
        env.insert("RALPH_TASK_KIND".to_string(), task_id.kind().to_string());
        env.insert("RALPH_PROJECT".to_string(), project.name.clone());
        env.insert("RALPH_AGENT".to_string(), config.agent.clone());
        env.insert("RALPH_MODE".to_string(), config.mode.as_str().to_string());
        env.insert(
            "RALPH_COMMIT_STRATEGY".to_string(),
            config.commit.as_str().to_string(),
        );
        if let Some((_, token)) = self.env.first_var(GITHUB_TOKEN_VARS) {
            for key in GITHUB_TOKEN_VARS {
                env.insert((*key).to_string(), token.to_string());
            }
        }
        let key_vars = agent_profile(&config.agent).map_or(&[][..], |p| p.key_vars);
        for key in key_vars
            .iter()
            .copied()
            .chain(config.docker.passthrough_env.iter().map(String::as_str))
        {
            if let Some(value) = self.env.var(key) {
                env.insert(key.to_string(), value.to_string());
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(labels::PROJECT.to_string(), project.name.clone());
        labels.insert(
            labels::FOLDER.to_string(),
            project.root.to_string_lossy().into_owned(),
        );
        labels.insert(labels::TASK_ID.to_string(), task_id.to_string());
        match serde_json::to_string(selector) {
            Ok(json) => {
                labels.insert(labels::TASK.to_string(), json);
            }
            Err(e) => warn!(error = %e, "Could not encode task label; restart will parse the name"),
        }

        ContainerSpec {
            name: name.to_string(),
            image: project.image(),
            cpus: limits.cpus,
            memory: limits.memory,
            env,
            mounts,
            labels,
            workdir: Some(PathBuf::from(WORKSPACE_DIR)),
            interactive: true,
            args: selector.entrypoint_args(prd_container_path.as_deref()),
        }
    }

    /// Finds the Worker for `task_id`. Inside a project the name is derived
    /// directly and the Worker must carry the project's label; outside one,
    /// every Worker labelled with the identifier is a candidate and the match
    /// must be unique.
    pub async fn locate(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
    ) -> Result<ContainerInfo, LifecycleError> {
        if let Some(project) = project {
            let name = naming::worker_name(project.prefix(), &project.name, task_id);
            let not_found = || LifecycleError::WorkerNotFound {
                task_id: task_id.clone(),
            };
            return match self.runtime.inspect(&name).await {
                Ok(info) if info.label(labels::PROJECT) == Some(project.name.as_str()) => Ok(info),
                Ok(info) => {
                    debug!(worker = %info.name, "Name matches but project label does not");
                    Err(not_found())
                }
                Err(e) if e.is_not_found() => Err(not_found()),
                Err(e) => Err(e.into()),
            };
        }

        let mut candidates = self
            .runtime
            .list_by_label(labels::TASK_ID, Some(&task_id.to_string()))
            .await?;
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        match candidates.as_slice() {
            [] => Err(LifecycleError::WorkerNotFound {
                task_id: task_id.clone(),
            }),
            [only] => Ok(self.runtime.inspect(&only.name).await?),
            many => Err(LifecycleError::AmbiguousWorker {
                task_id: task_id.clone(),
                names: many.iter().map(|s| s.name.clone()).collect(),
            }),
        }
    }

    /// Stops the Worker and starts it again with the same task, from the
    /// project folder recorded on the Worker.
    pub async fn restart(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
    ) -> Result<WorkerHandle, LifecycleError> {
        let info = self.locate(project, task_id).await?;

        let target = match (info.label(labels::FOLDER).map(PathBuf::from), project) {
            (Some(folder), Some(current)) if folder == current.root => current.clone(),
            (Some(folder), _) => Project::load(&folder)?,
            (None, Some(current)) => current.clone(),
            (None, None) => {
                return Err(LifecycleError::UnrecoverableTask {
                    name: info.name.clone(),
                    reason: format!("no {} label", labels::FOLDER),
                });
            }
        };

        let selector = recover_selector(&info, &target)?;
        info!(
            worker = %info.name,
            task = %selector.task_id(),
            folder = %target.root.display(),
            "Restarting worker"
        );

        if info.running {
            self.stop_container(&info.name).await?;
        }
        match self.runtime.remove(&info.name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        self.start(&target, selector).await
    }

    /// Stops one Worker. Stopping an already-stopped Worker is not an error.
    pub async fn stop(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
    ) -> Result<StopOutcome, LifecycleError> {
        let info = self.locate(project, task_id).await?;
        if !info.running {
            warn!(worker = %info.name, "Worker is not running");
            return Ok(StopOutcome {
                name: info.name,
                was_running: false,
            });
        }
        self.stop_container(&info.name).await?;
        Ok(StopOutcome {
            name: info.name,
            was_running: true,
        })
    }

    /// Stops every running Worker of the project.
    pub async fn stop_all(&self, project: &Project) -> Result<Vec<String>, LifecycleError> {
        let mut stopped = Vec::new();
        for summary in self.list(project).await? {
            if summary.is_up() {
                self.stop_container(&summary.name).await?;
                stopped.push(summary.name);
            }
        }
        Ok(stopped)
    }

    async fn stop_container(&self, name: &str) -> Result<(), LifecycleError> {
        match self.runtime.stop(name).await {
            Ok(()) => {
                info!(worker = name, "Worker stopped");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                warn!(worker = name, error = %e, "Stop conflicted, continuing");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Removes every stopped Worker of the project.
    pub async fn clean(&self, project: &Project) -> Result<Vec<String>, LifecycleError> {
        let mut removed = Vec::new();
        for summary in self.list(project).await? {
            if summary.is_up() {
                continue;
            }
            match self.runtime.remove(&summary.name).await {
                Ok(()) => {
                    debug!(worker = %summary.name, "Removed stopped worker");
                    removed.push(summary.name);
                }
                Err(e) if e.is_not_found() || e.is_conflict() => {
                    warn!(worker = %summary.name, error = %e, "Skipping worker");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Workers of the project, running or not, sorted by name.
    pub async fn list(&self, project: &Project) -> Result<Vec<ContainerSummary>, LifecycleError> {
        Ok(Scope::for_project(project).list(self.runtime).await?)
    }

    /// Log stream of a Worker.
    pub async fn logs(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
        options: &LogOptions,
    ) -> Result<LogStream, LifecycleError> {
        let info = self.locate(project, task_id).await?;
        Ok(self.runtime.logs(&info.name, options).await?)
    }

    /// Attaches the terminal to a running Worker's agent.
    pub async fn attach(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
    ) -> Result<i32, LifecycleError> {
        let info = self.running_worker(project, task_id).await?;
        Ok(self.runtime.attach(&info.name).await?)
    }

    /// Opens an interactive shell inside a running Worker.
    pub async fn shell(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
    ) -> Result<i32, LifecycleError> {
        let info = self.running_worker(project, task_id).await?;
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "command -v bash >/dev/null 2>&1 && exec bash || exec sh".to_string(),
        ];
        Ok(self.runtime.exec_interactive(&info.name, &command).await?)
    }

    async fn running_worker(
        &self,
        project: Option<&Project>,
        task_id: &TaskId,
    ) -> Result<ContainerInfo, LifecycleError> {
        let info = self.locate(project, task_id).await?;
        if !info.running {
            return Err(LifecycleError::NotRunning { name: info.name });
        }
        Ok(info)
    }

    /// Builds the project's Worker image.
    pub async fn build_image(&self, project: &Project) -> Result<ImageBuild, LifecycleError> {
        let dockerfile = project.root.join(&project.config.docker.dockerfile);
        if !dockerfile.is_file() {
            return Err(LifecycleError::MissingFile {
                what: "Dockerfile",
                path: dockerfile,
            });
        }
        let request = ImageBuild {
            tag: project.image(),
            context: project.root.clone(),
            dockerfile,
        };
        info!(image = %request.tag, "Building worker image");
        self.runtime.build_image(&request).await?;
        Ok(request)
    }
}

/// Makes PRD paths relative to the project root when the file lives inside
/// it, and checks the file exists. Relative paths are taken as given
/// relative to the project root.
fn anchor_prd_path(
    project: &Project,
    selector: TaskSelector,
) -> Result<TaskSelector, LifecycleError> {
    let TaskSelector::Prd { path } = selector else {
        return Ok(selector);
    };
    let absolute = if path.is_absolute() {
        path
    } else {
        project.root.join(path)
    };
    if !absolute.is_file() {
        return Err(LifecycleError::MissingFile {
            what: "PRD file",
            path: absolute,
        });
    }
    let absolute = absolute.canonicalize().unwrap_or(absolute);
    let path = match absolute.strip_prefix(&project.root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => absolute,
    };
    Ok(TaskSelector::Prd { path })
}

/// Recovers the task a Worker was started for: from its task label, or by
/// parsing its name when the label is missing or unreadable.
pub fn recover_selector(
    info: &ContainerInfo,
    project: &Project,
) -> Result<TaskSelector, LifecycleError> {
    if let Some(raw) = info.label(labels::TASK) {
        match serde_json::from_str::<TaskSelector>(raw) {
            Ok(selector) => return Ok(selector),
            Err(e) => warn!(worker = %info.name, error = %e, "Unreadable task label, parsing name"),
        }
    }

    let unrecoverable = |reason: String| LifecycleError::UnrecoverableTask {
        name: info.name.clone(),
        reason,
    };
    let task_id = naming::reverse_parse(&info.name, project.prefix(), &project.name)
        .ok_or_else(|| unrecoverable("name does not follow the worker naming scheme".to_string()))?;

    match task_id.kind() {
        TaskKind::Issue => task_id
            .value()
            .parse()
            .map(|number| TaskSelector::Issue { number })
            .map_err(|_| unrecoverable(format!("'{}' is not an issue number", task_id.value()))),
        TaskKind::Prd => find_prd_file(&project.root, task_id.value())
            .map(|path| TaskSelector::Prd { path })
            .ok_or_else(|| unrecoverable(format!("no file in the project matches {task_id}"))),
        TaskKind::Auto => Ok(TaskSelector::Auto {
            id: task_id.value().to_string(),
        }),
        TaskKind::Prompt => Err(unrecoverable(
            "prompt text is only kept in the task label".to_string(),
        )),
    }
}

/// Searches the project (a few levels deep) for a file whose normalized
/// base name equals `normalized`. Returns a root-relative path.
fn find_prd_file(root: &Path, normalized: &str) -> Option<PathBuf> {
    const MAX_DEPTH: usize = 3;
    const SKIP: &[&str] = &[".git", "node_modules", "target", "vendor"];

    let mut dirs = vec![(root.to_path_buf(), 0)];
    while let Some((dir, depth)) = dirs.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if depth < MAX_DEPTH && !SKIP.contains(&file_name.as_str()) {
                    dirs.push((path, depth + 1));
                }
            } else if normalize_segment(&file_name) == normalized {
                return path.strip_prefix(root).ok().map(Path::to_path_buf);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::testing::MockRuntime;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        project: Project,
        home: PathBuf,
    }

    fn fixture(config: ProjectConfig) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("demo");
        std::fs::create_dir_all(root.join(".ralph")).unwrap();
        std::fs::write(root.join(".ralph/config.yml"), "agent: claude\n").unwrap();
        let home = temp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();
        let root = root.canonicalize().unwrap();
        Fixture {
            project: Project::from_config(root, config),
            home,
            _temp: temp,
        }
    }

    fn env_with_tokens(home: &Path) -> HostEnvironment {
        HostEnvironment::default()
            .with_home(home)
            .with_var("GITHUB_TOKEN", "ghp_test")
            .with_var("ANTHROPIC_API_KEY", "sk-ant-test")
    }

    #[tokio::test]
    async fn test_start_creates_named_worker_with_issue_args() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        let handle = manager
            .start(&fx.project, TaskSelector::Issue { number: 42 })
            .await
            .unwrap();

        assert_eq!(handle.name, "ralph-demo-issue-42");
        let created = runtime.created();
        assert_eq!(created.len(), 1);
        let spec = &created[0];
        assert_eq!(spec.name, "ralph-demo-issue-42");
        assert_eq!(spec.args, vec!["--issue", "42"]);
        assert_eq!(spec.cpus, "2");
        assert_eq!(spec.memory, "4g");
        assert_eq!(spec.env.get("RALPH_TASK_ID").map(String::as_str), Some("issue-42"));
        assert_eq!(spec.env.get("GH_TOKEN").map(String::as_str), Some("ghp_test"));
        assert_eq!(spec.labels.get(labels::PROJECT).map(String::as_str), Some("demo"));
        assert_eq!(
            spec.labels.get(labels::FOLDER).map(PathBuf::from),
            Some(fx.project.root.clone())
        );
        assert!(spec.mounts.contains(&Mount::read_write(&fx.project.root, WORKSPACE_DIR)));
    }

    #[tokio::test]
    async fn test_second_start_is_already_running() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        manager
            .start(&fx.project, TaskSelector::Issue { number: 42 })
            .await
            .unwrap();
        let err = manager
            .start(&fx.project, TaskSelector::Issue { number: 42 })
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::AlreadyRunning { .. }));
        assert_eq!(runtime.created().len(), 1);
    }

    #[tokio::test]
    async fn test_create_conflict_maps_to_already_running() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new()
            .with_image("ralph-demo:latest")
            .with_create_race("ralph-demo-issue-7");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .start(&fx.project, TaskSelector::Issue { number: 7 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::AlreadyRunning { ref name, .. } if name == "ralph-demo-issue-7"
        ));
    }

    #[tokio::test]
    async fn test_stale_worker_is_removed_first() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        runtime.add_stopped("ralph-demo-issue-3", 1);
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        manager
            .start(&fx.project, TaskSelector::Issue { number: 3 })
            .await
            .unwrap();

        let calls = runtime.calls();
        let remove = calls.iter().position(|c| c == "remove ralph-demo-issue-3").unwrap();
        let create = calls.iter().position(|c| c == "create ralph-demo-issue-3").unwrap();
        assert!(remove < create);
        assert!(runtime.container("ralph-demo-issue-3").unwrap().running);
    }

    #[tokio::test]
    async fn test_missing_image() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new();
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .start(&fx.project, TaskSelector::Issue { number: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::ImageMissing { ref image } if image == "ralph-demo:latest"
        ));
        assert_eq!(err.remediation().unwrap(), "build it first with `ralph build`");
        assert!(runtime.created().is_empty());
    }

    #[tokio::test]
    async fn test_missing_github_token_fails_before_create() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = HostEnvironment::default()
            .with_home(&fx.home)
            .with_var("ANTHROPIC_API_KEY", "sk");
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .start(&fx.project, TaskSelector::Issue { number: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::CredentialMissing { ref credential, .. }
                if credential.contains("GITHUB_TOKEN")
        ));
        assert!(runtime.created().is_empty());

        // Prompt tasks don't need GitHub.
        manager
            .start(
                &fx.project,
                TaskSelector::Prompt {
                    id: "x".to_string(),
                    text: "do it".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_agent_login_file_satisfies_credentials() {
        let fx = fixture(ProjectConfig::default());
        std::fs::create_dir_all(fx.home.join(".claude")).unwrap();
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = HostEnvironment::default()
            .with_home(&fx.home)
            .with_var("GH_TOKEN", "ghp");
        let manager = WorkerManager::new(&runtime, &env);

        manager
            .start(&fx.project, TaskSelector::Issue { number: 9 })
            .await
            .unwrap();
        let spec = &runtime.created()[0];
        assert!(spec.mounts.contains(&Mount::read_only(
            fx.home.join(".claude"),
            "/home/ralph/.claude"
        )));
        assert!(!spec.env.contains_key("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn test_no_agent_credential() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = HostEnvironment::default()
            .with_home(&fx.home)
            .with_var("GH_TOKEN", "ghp");
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .start(&fx.project, TaskSelector::Issue { number: 9 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::CredentialMissing { ref credential, .. }
                if credential.contains("ANTHROPIC_API_KEY")
        ));
    }

    #[test]
    fn test_host_mounts_only_includes_existing_paths() {
        let mut config = ProjectConfig::default();
        config.docker.mount_docker_socket = true;
        let fx = fixture(config);
        std::fs::write(fx.project.root.join(".env"), "A=1\n").unwrap();
        std::fs::write(fx.home.join(".gitconfig"), "[user]\n").unwrap();
        let socket = fx.home.join("docker.sock");
        std::fs::write(&socket, "").unwrap();

        let runtime = MockRuntime::new();
        let env = HostEnvironment::default()
            .with_home(&fx.home)
            .with_var("DOCKER_HOST", format!("unix://{}", socket.display()));
        let manager = WorkerManager::new(&runtime, &env);

        let mounts = manager.host_mounts(&fx.project);
        let targets: Vec<_> = mounts.iter().map(|m| m.container.clone()).collect();
        assert_eq!(
            targets,
            vec![
                PathBuf::from("/home/ralph/.gitconfig"),
                PathBuf::from("/workspace/.env"),
                PathBuf::from("/workspace/.ralph"),
                PathBuf::from("/var/run/docker.sock"),
            ]
        );
        assert!(mounts[..3].iter().all(|m| m.read_only));
    }

    #[test]
    fn test_host_mounts_skips_socket_when_disabled() {
        let fx = fixture(ProjectConfig::default());
        let socket = fx.home.join("docker.sock");
        std::fs::write(&socket, "").unwrap();
        let runtime = MockRuntime::new();
        let env = HostEnvironment::default()
            .with_var("DOCKER_HOST", format!("unix://{}", socket.display()));
        let manager = WorkerManager::new(&runtime, &env);
        assert!(
            manager
                .host_mounts(&fx.project)
                .iter()
                .all(|m| m.container != Path::new(DOCKER_SOCKET))
        );
    }

    #[tokio::test]
    async fn test_prd_inside_project_is_passed_by_workspace_path() {
        let fx = fixture(ProjectConfig::default());
        std::fs::create_dir_all(fx.project.root.join("docs")).unwrap();
        std::fs::write(fx.project.root.join("docs/prd.json"), "{}").unwrap();
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        let handle = manager
            .start(
                &fx.project,
                TaskSelector::Prd {
                    path: fx.project.root.join("docs/prd.json"),
                },
            )
            .await
            .unwrap();

        assert_eq!(handle.name, "ralph-demo-prd-prd-json");
        assert_eq!(
            handle.selector,
            TaskSelector::Prd {
                path: PathBuf::from("docs/prd.json")
            }
        );
        assert_eq!(
            runtime.created()[0].args,
            vec!["--prd", "/workspace/docs/prd.json"]
        );
    }

    #[tokio::test]
    async fn test_missing_prd_file() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .start(
                &fx.project,
                TaskSelector::Prd {
                    path: PathBuf::from("nope.json"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::MissingFile { what: "PRD file", .. }));
    }

    #[tokio::test]
    async fn test_env_overrides_resources() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = env_with_tokens(&fx.home)
            .with_var("RALPH_CPUS", "6")
            .with_var("RALPH_MEMORY", "12g");
        let manager = WorkerManager::new(&runtime, &env);
        manager
            .start(&fx.project, TaskSelector::Issue { number: 5 })
            .await
            .unwrap();
        let spec = &runtime.created()[0];
        assert_eq!((spec.cpus.as_str(), spec.memory.as_str()), ("6", "12g"));
    }

    #[tokio::test]
    async fn test_restart_uses_task_label() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);
        let selector = TaskSelector::Prompt {
            id: "login".to_string(),
            text: "Fix the login redirect".to_string(),
        };
        manager.start(&fx.project, selector.clone()).await.unwrap();

        let task_id = TaskId::new(TaskKind::Prompt, "login");
        let handle = manager.restart(Some(&fx.project), &task_id).await.unwrap();

        assert_eq!(handle.selector, selector);
        let created = runtime.created();
        assert_eq!(created.len(), 2);
        assert_eq!(created[1].args, vec!["--prompt", "Fix the login redirect"]);
        let calls = runtime.calls();
        assert!(calls.contains(&"stop ralph-demo-prompt-login".to_string()));
        assert!(calls.contains(&"remove ralph-demo-prompt-login".to_string()));
    }

    #[tokio::test]
    async fn test_restart_without_label_parses_name() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_image("ralph-demo:latest");
        let name = runtime.add_worker("demo", "issue-12", &[]);
        runtime.finish(&name, 1);
        runtime.set_label(&name, labels::FOLDER, &fx.project.root.to_string_lossy());
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        // Invoked from outside the project: the folder label leads back to it.
        let task_id = TaskId::new(TaskKind::Issue, "12");
        let handle = manager.restart(None, &task_id).await.unwrap();

        assert_eq!(handle.selector, TaskSelector::Issue { number: 12 });
        assert_eq!(handle.folder, fx.project.root);
        assert_eq!(runtime.created()[0].args, vec!["--issue", "12"]);
    }

    #[test]
    fn test_recover_prd_selector_from_name() {
        let fx = fixture(ProjectConfig::default());
        std::fs::create_dir_all(fx.project.root.join("plans")).unwrap();
        std::fs::write(fx.project.root.join("plans/Auth Flow.json"), "{}").unwrap();
        let info = ContainerInfo {
            id: "c1".to_string(),
            name: "ralph-demo-prd-auth-flow-json".to_string(),
            running: false,
            status: "exited".to_string(),
            exit_code: Some(0),
            started_at: None,
            labels: BTreeMap::new(),
        };
        let selector = recover_selector(&info, &fx.project).unwrap();
        assert_eq!(
            selector,
            TaskSelector::Prd {
                path: PathBuf::from("plans/Auth Flow.json")
            }
        );

        let prompt = ContainerInfo {
            name: "ralph-demo-prompt-abc".to_string(),
            ..info
        };
        assert!(matches!(
            recover_selector(&prompt, &fx.project),
            Err(LifecycleError::UnrecoverableTask { .. })
        ));
    }

    #[tokio::test]
    async fn test_locate_outside_project_requires_unique_match() {
        let runtime = MockRuntime::new();
        runtime.add_worker("demo", "issue-1", &[]);
        runtime.add_worker("other", "issue-1", &[]);
        runtime.add_worker("demo", "issue-11", &[]);
        // Named like a Worker but never labelled as one.
        runtime.add_stopped("ralph-demo-issue-11-old", 0);
        let env = HostEnvironment::default();
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .locate(None, &TaskId::new(TaskKind::Issue, "1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::AmbiguousWorker { ref names, .. } if names.len() == 2
        ));

        let info = manager
            .locate(None, &TaskId::new(TaskKind::Issue, "11"))
            .await
            .unwrap();
        assert_eq!(info.name, "ralph-demo-issue-11");
    }

    #[tokio::test]
    async fn test_stop_clean_and_stop_all() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new();
        runtime.add_worker("demo", "issue-1", &["claude"]);
        runtime.add_worker("demo", "issue-2", &["claude"]);
        let done = runtime.add_worker("demo", "issue-3", &[]);
        runtime.finish(&done, 0);
        runtime.add_worker("demo-web", "issue-4", &["claude"]);
        let env = HostEnvironment::default();
        let manager = WorkerManager::new(&runtime, &env);

        let outcome = manager
            .stop(Some(&fx.project), &TaskId::new(TaskKind::Issue, "3"))
            .await
            .unwrap();
        assert!(!outcome.was_running);

        let stopped = manager.stop_all(&fx.project).await.unwrap();
        assert_eq!(stopped, vec!["ralph-demo-issue-1", "ralph-demo-issue-2"]);
        assert!(runtime.container("ralph-demo-web-issue-4").unwrap().running);

        let removed = manager.clean(&fx.project).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(runtime.container("ralph-demo-issue-3").is_none());
        assert!(runtime.container("ralph-demo-web-issue-4").is_some());
    }

    #[tokio::test]
    async fn test_project_commands_leave_prefix_sharing_project_alone() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new();
        runtime.add_worker("demo", "issue-1", &["claude"]);
        // Project `demo-issue` running task `issue-4` is named
        // `ralph-demo-issue-issue-4`, which also reads as a `demo` Worker.
        let neighbour = runtime.add_worker("demo-issue", "issue-4", &["claude"]);
        let finished = runtime.add_worker("demo-issue", "issue-5", &[]);
        runtime.finish(&finished, 0);
        let env = HostEnvironment::default();
        let manager = WorkerManager::new(&runtime, &env);

        let listed: Vec<_> = manager
            .list(&fx.project)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(listed, vec!["ralph-demo-issue-1"]);

        let stopped = manager.stop_all(&fx.project).await.unwrap();
        assert_eq!(stopped, vec!["ralph-demo-issue-1"]);
        assert!(runtime.container(&neighbour).unwrap().running);

        let removed = manager.clean(&fx.project).await.unwrap();
        assert_eq!(removed, vec!["ralph-demo-issue-1"]);
        assert!(runtime.container(&finished).is_some());

        // The derived name exists but belongs to the other project.
        let err = manager
            .stop(Some(&fx.project), &TaskId::new(TaskKind::Issue, "issue-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::WorkerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_custom_prefix_workers_found_from_anywhere() {
        let mut config = ProjectConfig::default();
        config.docker.prefix = "acme".to_string();
        config.docker.image = Some("acme-demo:latest".to_string());
        let fx = fixture(config);
        // Restart from elsewhere reloads the project from disk.
        std::fs::write(
            fx.project.root.join(".ralph/config.yml"),
            "agent: claude\ndocker:\n  prefix: acme\n  image: acme-demo:latest\n",
        )
        .unwrap();
        let runtime = MockRuntime::new().with_image("acme-demo:latest");
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);
        manager
            .start(&fx.project, TaskSelector::Issue { number: 21 })
            .await
            .unwrap();

        let task_id = TaskId::new(TaskKind::Issue, "21");
        let info = manager.locate(None, &task_id).await.unwrap();
        assert_eq!(info.name, "acme-demo-issue-21");

        let handle = manager.restart(None, &task_id).await.unwrap();
        assert_eq!(handle.name, "acme-demo-issue-21");
        assert_eq!(handle.folder, fx.project.root);
    }

    #[tokio::test]
    async fn test_attach_requires_running_worker() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new();
        let name = runtime.add_worker("demo", "issue-1", &[]);
        runtime.finish(&name, 0);
        let env = HostEnvironment::default();
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .attach(Some(&fx.project), &TaskId::new(TaskKind::Issue, "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotRunning { .. }));

        let err = manager
            .shell(Some(&fx.project), &TaskId::new(TaskKind::Issue, "99"))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::WorkerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_engine_unavailable_propagates() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new().with_engine_down();
        let env = env_with_tokens(&fx.home);
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager
            .start(&fx.project, TaskSelector::Issue { number: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Runtime(RuntimeError::EngineUnavailable(_))
        ));
        assert_eq!(err.remediation().unwrap(), "is the Docker daemon running?");
    }

    #[tokio::test]
    async fn test_build_image_requires_dockerfile() {
        let fx = fixture(ProjectConfig::default());
        let runtime = MockRuntime::new();
        let env = HostEnvironment::default();
        let manager = WorkerManager::new(&runtime, &env);

        let err = manager.build_image(&fx.project).await.unwrap_err();
        assert!(matches!(err, LifecycleError::MissingFile { what: "Dockerfile", .. }));

        std::fs::write(fx.project.root.join("Dockerfile"), "FROM alpine\n").unwrap();
        let request = manager.build_image(&fx.project).await.unwrap();
        assert_eq!(request.tag, "ralph-demo:latest");
        assert!(runtime.has_image("ralph-demo:latest"));
    }
}
