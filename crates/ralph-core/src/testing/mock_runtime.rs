//! In-memory container engine for deterministic tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use crate::lifecycle::labels;
use crate::naming;
use ralph_proto::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerSummary, ExecOutput, ImageBuild,
    LogLine, LogOptions, LogStream, Result, RuntimeError, TaskId,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// One container held by [`MockRuntime`].
#[derive(Debug, Clone)]
pub struct MockContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    /// Process table; `None` makes exec fail.
    pub processes: Option<Vec<String>>,
    pub logs: Vec<LogLine>,
    /// Make log reads fail.
    pub broken_logs: bool,
}

#[derive(Debug, Default)]
struct MockState {
    images: HashSet<String>,
    containers: BTreeMap<String, MockContainer>,
    calls: Vec<String>,
    created: Vec<ContainerSpec>,
    create_races: HashSet<String>,
    engine_down: bool,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("c{:04}", self.next_id)
    }
}

/// A [`ContainerRuntime`] backed by a map, recording every call.
///
/// `create` fails with a conflict when the name is taken, like a real
/// engine, so single-instance races can be exercised.
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.lock().images.insert(image.to_string());
        self
    }

    /// Every call fails as if the engine daemon were down.
    pub fn with_engine_down(self) -> Self {
        self.lock().engine_down = true;
        self
    }

    /// Existence checks for `name` pass, but `create` loses the race.
    pub fn with_create_race(self, name: &str) -> Self {
        self.lock().create_races.insert(name.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds a running container whose process table lists `processes`.
    pub fn add_running(&self, name: &str, processes: &[&str]) {
        let mut state = self.lock();
        let id = state.next_id();
        state.containers.insert(
            name.to_string(),
            MockContainer {
                id,
                spec: ContainerSpec {
                    name: name.to_string(),
                    ..ContainerSpec::default()
                },
                running: true,
                exit_code: None,
                started_at: None,
                processes: Some(processes.iter().map(ToString::to_string).collect()),
                logs: Vec::new(),
                broken_logs: false,
            },
        );
    }

    /// Adds an exited container.
    pub fn add_stopped(&self, name: &str, exit_code: i64) {
        self.add_running(name, &[]);
        self.finish(name, exit_code);
    }

    /// Adds a running Worker of `project` with the name and labels a real
    /// start would give it (default `ralph` prefix). Returns the name.
    pub fn add_worker(&self, project: &str, task_id: &str, processes: &[&str]) -> String {
        let task: TaskId = task_id
            .parse()
            .unwrap_or_else(|e| panic!("bad task id {task_id}: {e}"));
        let name = naming::worker_name("ralph", project, &task);
        self.add_running(&name, processes);
        self.set_label(&name, labels::PROJECT, project);
        self.set_label(&name, labels::TASK_ID, &task.to_string());
        name
    }

    /// Marks a container as exited with `exit_code`.
    pub fn finish(&self, name: &str, exit_code: i64) {
        self.update(name, |c| {
            c.running = false;
            c.exit_code = Some(exit_code);
        });
    }

    /// Mutates a container in place. Panics if it does not exist.
    pub fn update(&self, name: &str, f: impl FnOnce(&mut MockContainer)) {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(name)
            .unwrap_or_else(|| panic!("no mock container named {name}"));
        f(container);
    }

    pub fn set_label(&self, name: &str, key: &str, value: &str) {
        self.update(name, |c| {
            c.spec.labels.insert(key.to_string(), value.to_string());
        });
    }

    pub fn push_log(&self, name: &str, line: LogLine) {
        self.update(name, |c| c.logs.push(line));
    }

    pub fn container(&self, name: &str) -> Option<MockContainer> {
        self.lock().containers.get(name).cloned()
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.lock().images.contains(image)
    }

    /// Calls in order, as `"<operation> <target>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Specs passed to successful `create` calls.
    pub fn created(&self) -> Vec<ContainerSpec> {
        self.lock().created.clone()
    }

    fn enter(&self, operation: &str, target: &str) -> Result<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.calls.push(format!("{operation} {target}"));
        if state.engine_down {
            return Err(RuntimeError::EngineUnavailable(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        Ok(state)
    }
}

fn no_such_container(name: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("No such container: {name}"))
}

fn summary(name: &str, c: &MockContainer) -> ContainerSummary {
    ContainerSummary {
        id: c.id.clone(),
        name: name.to_string(),
        status: if c.running {
            "Up 2 minutes".to_string()
        } else {
            format!("Exited ({}) 1 minute ago", c.exit_code.unwrap_or(0))
        },
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let state = self.enter("image_exists", image)?;
        Ok(state.images.contains(image))
    }

    async fn container_exists(&self, name: &str) -> Result<bool> {
        let state = self.enter("container_exists", name)?;
        Ok(state.containers.contains_key(name))
    }

    async fn container_running(&self, name: &str) -> Result<bool> {
        let state = self.enter("container_running", name)?;
        Ok(state.containers.get(name).is_some_and(|c| c.running))
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo> {
        let state = self.enter("inspect", name)?;
        let c = state.containers.get(name).ok_or_else(|| no_such_container(name))?;
        Ok(ContainerInfo {
            id: c.id.clone(),
            name: name.to_string(),
            running: c.running,
            status: if c.running { "running" } else { "exited" }.to_string(),
            exit_code: c.exit_code,
            started_at: c.started_at,
            labels: c.spec.labels.clone(),
        })
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let mut state = self.enter("create", &spec.name)?;
        if state.create_races.contains(&spec.name) || state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        let id = state.next_id();
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                id,
                spec: spec.clone(),
                running: true,
                exit_code: None,
                started_at: Some(Utc::now()),
                processes: Some(vec!["sh".to_string(), "claude".to_string()]),
                logs: Vec::new(),
                broken_logs: false,
            },
        );
        state.created.push(spec.clone());
        Ok(())
    }

    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutput> {
        let state = self.enter("exec", name)?;
        let c = state.containers.get(name).ok_or_else(|| no_such_container(name))?;
        if !c.running {
            return Err(RuntimeError::Conflict(format!("Container {name} is not running")));
        }
        match &c.processes {
            Some(processes) => Ok(ExecOutput {
                stdout: processes.join("\n"),
                stderr: String::new(),
                exit_code: 0,
            }),
            None => Err(RuntimeError::CommandFailed {
                command: format!("exec {name} {}", command.join(" ")),
                code: Some(126),
                stderr: "OCI runtime exec failed".to_string(),
            }),
        }
    }

    async fn exec_interactive(&self, name: &str, _command: &[String]) -> Result<i32> {
        let state = self.enter("exec_interactive", name)?;
        state.containers.get(name).ok_or_else(|| no_such_container(name))?;
        Ok(0)
    }

    async fn attach(&self, name: &str) -> Result<i32> {
        let state = self.enter("attach", name)?;
        state.containers.get(name).ok_or_else(|| no_such_container(name))?;
        Ok(0)
    }

    async fn logs(&self, name: &str, options: &LogOptions) -> Result<LogStream> {
        let state = self.enter("logs", name)?;
        let c = state.containers.get(name).ok_or_else(|| no_such_container(name))?;
        if c.broken_logs {
            return Err(RuntimeError::CommandFailed {
                command: format!("logs {name}"),
                code: Some(1),
                stderr: "error from daemon".to_string(),
            });
        }
        let skip = options
            .tail
            .map_or(0, |tail| c.logs.len().saturating_sub(tail));
        let lines: Vec<Result<LogLine>> = c.logs[skip..]
            .iter()
            .map(|line| {
                let mut line = line.clone();
                if !options.timestamps {
                    line.timestamp = None;
                }
                Ok(line)
            })
            .collect();
        Ok(stream::iter(lines).boxed())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.enter("stop", name)?;
        let c = state
            .containers
            .get_mut(name)
            .ok_or_else(|| no_such_container(name))?;
        if c.running {
            c.running = false;
            c.exit_code.get_or_insert(137);
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.enter("remove", name)?;
        match state.containers.get(name) {
            None => Err(no_such_container(name)),
            Some(c) if c.running => Err(RuntimeError::Conflict(format!(
                "You cannot remove a running container {name}"
            ))),
            Some(_) => {
                state.containers.remove(name);
                Ok(())
            }
        }
    }

    async fn list_by_label(&self, key: &str, value: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let state = self.enter("list", &format!("label {key}"))?;
        Ok(state
            .containers
            .iter()
            .filter(|(_, c)| {
                c.spec
                    .labels
                    .get(key)
                    .is_some_and(|v| value.is_none_or(|wanted| v == wanted))
            })
            .map(|(name, c)| summary(name, c))
            .collect())
    }

    async fn build_image(&self, request: &ImageBuild) -> Result<()> {
        let mut state = self.enter("build", &request.tag)?;
        state.images.insert(request.tag.clone());
        Ok(())
    }
}
