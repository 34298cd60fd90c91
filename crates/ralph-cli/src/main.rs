//! # ralph-cli
//!
//! Binary entry point for Ralph Workers.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Project discovery and engine wiring
//! - Worker tables, log streaming and the live `ralph watch` view
//! - Mapping of failures to `error:`/`hint:` lines and exit codes

mod display;
mod watch;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use display::{ColorMode, OutputFormat, colors};
use futures::StreamExt;
use ralph_adapters::DockerCli;
use ralph_core::{
    Classifier, ConfigError, HostEnvironment, LifecycleError, Project, ResolveError, Resolver,
    Scope, TaskSource, WorkerManager, inspect_worker, selector_or_auto, survey,
};
use ralph_proto::{LogOptions, RuntimeError, TaskId, TaskSelector};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Ralph - run coding agents in isolated Docker workers, one per task
#[derive(Parser, Debug)]
#[command(name = "ralph", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    // ─────────────────────────────────────────────────────────────────────────
    // Global options (available for all subcommands)
    // ─────────────────────────────────────────────────────────────────────────

    /// Project directory (defaults to the nearest parent containing .ralph/)
    #[arg(short = 'C', long = "project", value_name = "DIR", global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a worker: `42`, `--issue 42`, `--prd FILE`, `--prompt TEXT [--id ID]`,
    /// or nothing to let the agent pick a task
    Start(TaskArgs),

    /// Stop a worker and start it again with the same task
    Restart(RefArgs),

    /// Stop a worker, or every worker of the project with --all
    Stop(StopArgs),

    /// List workers with their current state
    List(ListArgs),

    /// Show the state of one worker
    Status(StatusArgs),

    /// Print a worker's output
    Logs(LogsArgs),

    /// Attach to a running worker's agent session
    Attach(RefArgs),

    /// Open a shell inside a running worker
    Shell(RefArgs),

    /// Watch workers and notify when they finish
    Watch(WatchArgs),

    /// Remove stopped workers of the project
    Clean,

    /// Build the project's worker image
    Build,
}

/// Task selection. Clap only collects the values; picking a task out of
/// them (and rejecting ambiguous mixes) is the resolver's job.
#[derive(Args, Debug, Default)]
struct TaskArgs {
    /// GitHub issue number
    #[arg(short, long, value_name = "N")]
    issue: Vec<String>,

    /// PRD file, relative to the current directory
    #[arg(long, value_name = "FILE")]
    prd: Vec<String>,

    /// Free-form task description
    #[arg(short, long, value_name = "TEXT", allow_hyphen_values = true)]
    prompt: Vec<String>,

    /// Identifier of a prompt task
    #[arg(long, value_name = "ID")]
    id: Option<String>,

    /// Bare issue number, task id (`issue-42`), or `issue N` / `prd FILE`
    #[arg(value_name = "TASK")]
    task: Vec<String>,
}

impl TaskArgs {
    /// Flattens the parsed values back into resolver tokens.
    fn tokens(&self) -> Vec<String> {
        let flags = [
            ("--issue", &self.issue),
            ("--prd", &self.prd),
            ("--prompt", &self.prompt),
        ];
        let mut tokens = Vec::new();
        for (flag, values) in flags {
            for value in values {
                tokens.push(flag.to_string());
                tokens.push(value.clone());
            }
        }
        if let Some(id) = &self.id {
            tokens.push("--id".to_string());
            tokens.push(id.clone());
        }
        tokens.extend(self.task.iter().cloned());
        tokens
    }
}

/// Reference to an existing worker: `issue-42`, `42`, `--prd FILE`, `--id ID`.
#[derive(Args, Debug)]
struct RefArgs {
    #[command(flatten)]
    task: TaskArgs,
}

#[derive(Args, Debug)]
struct StopArgs {
    /// Stop every running worker of the project
    #[arg(long, conflicts_with_all = ["issue", "prd", "prompt", "id", "task"])]
    all: bool,

    #[command(flatten)]
    task: TaskArgs,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// List workers of every project
    #[arg(short, long)]
    all: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(flatten)]
    task: TaskArgs,
}

#[derive(Args, Debug)]
struct LogsArgs {
    /// Keep streaming new output
    #[arg(short, long)]
    follow: bool,

    /// Only show the last N lines
    #[arg(long, value_name = "N")]
    tail: Option<usize>,

    #[command(flatten)]
    task: TaskArgs,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Seconds between refreshes (default from config, 5)
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Watch workers of every project
    #[arg(short, long)]
    all: bool,
}

/// Everything a command needs from its surroundings.
struct AppContext {
    project: Option<Project>,
    env: HostEnvironment,
    runtime: DockerCli,
    cwd: PathBuf,
    use_colors: bool,
}

impl AppContext {
    fn load(cli: &Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let project = match &cli.project {
            Some(dir) => Some(Project::load(cwd.join(dir))?),
            None => match Project::discover(&cwd) {
                Ok(project) => Some(project),
                Err(ConfigError::ProjectNotFound(_)) => None,
                Err(e) => return Err(e.into()),
            },
        };

        if let Some(project) = &project {
            debug!(project = %project.name, root = %project.root.display(), "Using project");
            for warning in project.config.validate()? {
                warn!("{warning}");
            }
        }

        Ok(Self {
            project,
            env: HostEnvironment::from_process(),
            runtime: DockerCli::from_env(),
            cwd,
            use_colors: cli.color.should_use_colors(),
        })
    }

    fn require_project(&self) -> Result<&Project> {
        self.project
            .as_ref()
            .ok_or_else(|| ConfigError::ProjectNotFound(self.cwd.clone()).into())
    }

    fn manager(&self) -> WorkerManager<'_> {
        WorkerManager::new(&self.runtime, &self.env)
    }

    fn resolver(&self) -> Resolver {
        Resolver::new(
            self.project
                .as_ref()
                .map_or(TaskSource::Github, |p| p.config.mode),
        )
    }

    /// Task for `ralph start`. `now` seeds both prompt and auto ids.
    fn start_selector(&self, args: &TaskArgs, now: DateTime<Local>) -> Result<TaskSelector> {
        let selector = self.resolver().resolve(&args.tokens(), now)?;
        Ok(absolutize_selector(selector_or_auto(selector, now), &self.cwd))
    }

    /// An empty selection is a [`ResolveError::MissingReference`].
    fn reference(&self, args: &TaskArgs) -> Result<TaskId> {
        let tokens = absolutize_prd_tokens(&args.tokens(), &self.cwd);
        Ok(self.resolver().resolve_reference(&tokens)?)
    }

    fn classifier(&self) -> Classifier {
        self.project
            .as_ref()
            .map(|p| Classifier::from_config(&p.config.watch))
            .unwrap_or_default()
    }

    fn scope(&self, all: bool) -> Scope {
        match &self.project {
            Some(project) if !all => Scope::for_project(project),
            _ => Scope::All,
        }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{color}{text}{}", colors::RESET)
        } else {
            text.to_string()
        }
    }
}

/// PRD paths are typed relative to the shell's directory, not the project.
fn absolutize_prd_tokens(tokens: &[String], cwd: &Path) -> Vec<String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut after_prd = false;
    for token in tokens {
        if after_prd {
            out.push(cwd.join(token).to_string_lossy().into_owned());
            after_prd = false;
        } else if let Some(path) = token.strip_prefix("--prd=") {
            out.push(format!("--prd={}", cwd.join(path).display()));
        } else {
            after_prd = token == "--prd" || token == "prd";
            out.push(token.clone());
        }
    }
    out
}

fn absolutize_selector(selector: TaskSelector, cwd: &Path) -> TaskSelector {
    match selector {
        TaskSelector::Prd { path } if path.is_relative() => TaskSelector::Prd {
            path: cwd.join(path),
        },
        other => other,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so tables on stdout stay clean
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = AppContext::load(&cli)?;
    match cli.command {
        Commands::Start(args) => start_command(&ctx, &args).await,
        Commands::Restart(args) => restart_command(&ctx, &args).await,
        Commands::Stop(args) => stop_command(&ctx, &args).await,
        Commands::List(args) => list_command(&ctx, &args).await,
        Commands::Status(args) => status_command(&ctx, &args).await,
        Commands::Logs(args) => logs_command(&ctx, &args).await,
        Commands::Attach(args) => attach_command(&ctx, &args).await,
        Commands::Shell(args) => shell_command(&ctx, &args).await,
        Commands::Watch(args) => watch_command(&ctx, &args).await,
        Commands::Clean => clean_command(&ctx).await,
        Commands::Build => build_command(&ctx).await,
    }
}

fn report_error(error: &anyhow::Error) {
    eprintln!("error: {error:#}");
    if let Some(hint) = hint_for(error) {
        eprintln!("hint: {hint}");
    }
}

/// Targeted advice for the failures a user can fix.
fn hint_for(error: &anyhow::Error) -> Option<String> {
    if let Some(e) = error.downcast_ref::<LifecycleError>() {
        return e.remediation();
    }
    if let Some(RuntimeError::EngineUnavailable(_)) = error.downcast_ref::<RuntimeError>() {
        return Some(
            "is the Docker daemon running? Set RALPH_DOCKER to use another engine".to_string(),
        );
    }
    if let Some(ConfigError::ProjectNotFound(_)) = error.downcast_ref::<ConfigError>() {
        return Some("run `ralph init` in your project first, or pass --project DIR".to_string());
    }
    match error.downcast_ref::<ResolveError>() {
        Some(ResolveError::Ambiguous { .. }) => {
            Some("pass only one of an issue number, --prd or --prompt".to_string())
        }
        Some(ResolveError::BareNumberOutsideGithub { .. }) => {
            Some("use `ralph start --issue N` to name an issue explicitly".to_string())
        }
        _ => None,
    }
}

async fn start_command(ctx: &AppContext, args: &TaskArgs) -> Result<ExitCode> {
    let project = ctx.require_project()?;
    let selector = ctx.start_selector(args, Local::now())?;

    let handle = ctx.manager().start(project, selector).await?;
    println!(
        "{} {} ({})",
        ctx.paint(colors::GREEN, "Started"),
        handle.name,
        handle.selector
    );
    println!("  ralph logs -f {}", handle.task_id);
    println!("  ralph attach {}", handle.task_id);
    Ok(ExitCode::SUCCESS)
}

async fn restart_command(ctx: &AppContext, args: &RefArgs) -> Result<ExitCode> {
    let task_id = ctx.reference(&args.task)?;
    let handle = ctx.manager().restart(ctx.project.as_ref(), &task_id).await?;
    println!(
        "{} {} ({})",
        ctx.paint(colors::GREEN, "Restarted"),
        handle.name,
        handle.selector
    );
    Ok(ExitCode::SUCCESS)
}

async fn stop_command(ctx: &AppContext, args: &StopArgs) -> Result<ExitCode> {
    if args.all {
        let project = ctx.require_project()?;
        let stopped = ctx.manager().stop_all(project).await?;
        if stopped.is_empty() {
            println!("No running workers.");
        }
        for name in stopped {
            println!("{} {name}", ctx.paint(colors::YELLOW, "Stopped"));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let task_id = ctx.reference(&args.task)?;
    let outcome = ctx.manager().stop(ctx.project.as_ref(), &task_id).await?;
    if outcome.was_running {
        println!("{} {}", ctx.paint(colors::YELLOW, "Stopped"), outcome.name);
    } else {
        println!("{} is not running.", outcome.name);
    }
    Ok(ExitCode::SUCCESS)
}

async fn list_command(ctx: &AppContext, args: &ListArgs) -> Result<ExitCode> {
    let scope = ctx.scope(args.all);
    let statuses = survey(&ctx.runtime, &ctx.classifier(), &scope, chrono::Utc::now()).await?;

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        OutputFormat::Table => {
            if statuses.is_empty() {
                println!("{}", ctx.paint(colors::DIM, "No workers."));
            } else {
                let show_project = matches!(scope, Scope::All);
                for row in display::worker_table(&statuses, show_project, ctx.use_colors) {
                    println!("{row}");
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn status_command(ctx: &AppContext, args: &StatusArgs) -> Result<ExitCode> {
    let task_id = ctx.reference(&args.task)?;
    let info = ctx.manager().locate(ctx.project.as_ref(), &task_id).await?;
    let status = inspect_worker(&ctx.runtime, &ctx.classifier(), &info, chrono::Utc::now()).await;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Table => {
            let state = ctx.paint(display::state_color(status.state), status.state.as_str());
            println!("{} {state}", status.name);
            println!("  task    {}", status.task_id.as_ref().unwrap_or(&task_id));
            if let Some(project) = &status.project {
                println!("  project {project}");
            }
            if let Some(folder) = &status.folder {
                println!("  folder  {}", folder.display());
            }
            println!("  idle    {}", display::format_idle(status.idle_secs));
            println!("  engine  {}", status.status);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn logs_command(ctx: &AppContext, args: &LogsArgs) -> Result<ExitCode> {
    let task_id = ctx.reference(&args.task)?;
    let options = LogOptions {
        follow: args.follow,
        timestamps: false,
        tail: args.tail,
    };
    let mut lines = ctx
        .manager()
        .logs(ctx.project.as_ref(), &task_id, &options)
        .await?;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(line) => println!("{}", line?.text),
                None => break,
            },
            _ = &mut interrupted, if args.follow => break,
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn attach_command(ctx: &AppContext, args: &RefArgs) -> Result<ExitCode> {
    let task_id = ctx.reference(&args.task)?;
    eprintln!(
        "{}",
        ctx.paint(colors::DIM, "Attaching. Detach with Ctrl-P Ctrl-Q.")
    );
    let code = ctx.manager().attach(ctx.project.as_ref(), &task_id).await?;
    Ok(exit_code(code))
}

async fn shell_command(ctx: &AppContext, args: &RefArgs) -> Result<ExitCode> {
    let task_id = ctx.reference(&args.task)?;
    let code = ctx.manager().shell(ctx.project.as_ref(), &task_id).await?;
    Ok(exit_code(code))
}

async fn watch_command(ctx: &AppContext, args: &WatchArgs) -> Result<ExitCode> {
    let interval = match (args.interval, &ctx.project) {
        (Some(secs), _) => Duration::from_secs(secs.max(1)),
        (None, Some(project)) => project.config.watch_interval(),
        (None, None) => Duration::from_secs(ralph_core::WatchConfig::default().interval_secs),
    };
    let notifications = ctx
        .project
        .as_ref()
        .map(|p| p.config.notifications.clone())
        .unwrap_or_default();

    watch::run(
        &ctx.runtime,
        watch::WatchOptions {
            scope: ctx.scope(args.all),
            classifier: ctx.classifier(),
            notifications,
            interval,
            use_colors: ctx.use_colors,
        },
    )
    .await?;
    Ok(ExitCode::SUCCESS)
}

async fn clean_command(ctx: &AppContext) -> Result<ExitCode> {
    let project = ctx.require_project()?;
    let removed = ctx.manager().clean(project).await?;
    if removed.is_empty() {
        println!("Nothing to clean.");
    }
    for name in removed {
        println!("{} {name}", ctx.paint(colors::DIM, "Removed"));
    }
    Ok(ExitCode::SUCCESS)
}

async fn build_command(ctx: &AppContext) -> Result<ExitCode> {
    let project = ctx.require_project()?;
    let request = ctx.manager().build_image(project).await?;
    println!("{} {}", ctx.paint(colors::GREEN, "Built"), request.tag);
    Ok(ExitCode::SUCCESS)
}

/// Exit codes outside 0..=255 (signals, engine oddities) become 1.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ralph").chain(args.iter().copied())).unwrap()
    }

    fn start_tokens(args: &[&str]) -> Vec<String> {
        let cli = parse(args);
        let Commands::Start(task) = cli.command else {
            panic!("expected start");
        };
        task.tokens()
    }

    #[test]
    fn test_start_passes_selector_tokens_through() {
        assert_eq!(
            start_tokens(&["start", "--prompt", "fix the login bug", "--id", "login"]),
            vec!["--prompt", "fix the login bug", "--id", "login"]
        );
        assert_eq!(start_tokens(&["start", "-i", "7"]), vec!["--issue", "7"]);
        assert_eq!(
            start_tokens(&["start", "--prd=docs/prd.json"]),
            vec!["--prd", "docs/prd.json"]
        );
    }

    #[test]
    fn test_start_without_task() {
        assert!(start_tokens(&["start"]).is_empty());
    }

    #[test]
    fn test_bare_digits() {
        assert_eq!(start_tokens(&["start", "2", "1", "9"]), vec!["2", "1", "9"]);
    }

    #[test]
    fn test_global_flags_after_task() {
        let cli = parse(&["start", "42", "-v", "--color", "never"]);
        assert!(cli.verbose);
        assert_eq!(cli.color, ColorMode::Never);
        let Commands::Start(task) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(task.tokens(), vec!["42"]);

        let cli = parse(&["logs", "issue-42", "-C", "../demo"]);
        assert_eq!(cli.project, Some(PathBuf::from("../demo")));
    }

    #[test]
    fn test_prompt_may_start_with_a_dash() {
        assert_eq!(
            start_tokens(&["start", "--prompt", "-v output is too noisy", "--id", "quiet"]),
            vec!["--prompt", "-v output is too noisy", "--id", "quiet"]
        );
    }

    #[test]
    fn test_repeated_selector_is_kept_for_the_resolver() {
        assert_eq!(
            start_tokens(&["start", "--issue", "4", "--issue", "4"]),
            vec!["--issue", "4", "--issue", "4"]
        );
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["-C", "../demo", "--color", "never", "list", "--format", "json"]);
        assert_eq!(cli.project, Some(PathBuf::from("../demo")));
        assert_eq!(cli.color, ColorMode::Never);
        assert!(matches!(
            cli.command,
            Commands::List(ListArgs {
                format: OutputFormat::Json,
                all: false
            })
        ));
    }

    #[test]
    fn test_stop_all_conflicts_with_task() {
        assert!(Cli::try_parse_from(["ralph", "stop", "--all", "issue-1"]).is_err());
        assert!(Cli::try_parse_from(["ralph", "stop", "--all", "--issue", "1"]).is_err());
        let cli = parse(&["stop", "--all"]);
        assert!(matches!(cli.command, Commands::Stop(StopArgs { all: true, .. })));
    }

    #[test]
    fn test_logs_flags() {
        let cli = parse(&["logs", "-f", "--tail", "50", "issue-42"]);
        let Commands::Logs(args) = cli.command else {
            panic!("expected logs");
        };
        assert!(args.follow);
        assert_eq!(args.tail, Some(50));
        assert_eq!(args.task.tokens(), vec!["issue-42"]);
    }

    fn bare_context() -> AppContext {
        AppContext {
            project: None,
            env: HostEnvironment::default(),
            runtime: DockerCli::new("docker"),
            cwd: PathBuf::from("/tmp"),
            use_colors: false,
        }
    }

    #[test]
    fn test_start_ids_come_from_one_clock_reading() {
        use chrono::TimeZone;
        let ctx = bare_context();
        let now = Local.with_ymd_and_hms(2026, 10, 19, 9, 30, 59).unwrap();

        let Commands::Start(args) = parse(&["start"]).command else {
            panic!("expected start");
        };
        assert_eq!(
            ctx.start_selector(&args, now).unwrap(),
            TaskSelector::Auto {
                id: "20261019-093059".to_string()
            }
        );

        let Commands::Start(args) = parse(&["start", "--prompt", "tidy up"]).command else {
            panic!("expected start");
        };
        assert_eq!(
            ctx.start_selector(&args, now).unwrap(),
            TaskSelector::Prompt {
                id: "20261019-093059".to_string(),
                text: "tidy up".to_string()
            }
        );
    }

    #[test]
    fn test_worker_commands_require_a_task() {
        let ctx = bare_context();
        for command in ["restart", "status", "logs", "attach", "shell"] {
            let task = match parse(&[command]).command {
                Commands::Restart(args) | Commands::Attach(args) | Commands::Shell(args) => {
                    args.task
                }
                Commands::Status(args) => args.task,
                Commands::Logs(args) => args.task,
                other => panic!("unexpected {other:?}"),
            };
            let err = ctx.reference(&task).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<ResolveError>(),
                    Some(ResolveError::MissingReference)
                ),
                "{command}"
            );
        }
    }

    #[test]
    fn test_absolutize_prd_tokens() {
        let cwd = Path::new("/home/me/demo/docs");
        let tokens: Vec<String> = ["--prd", "prd.json"].iter().map(ToString::to_string).collect();
        assert_eq!(
            absolutize_prd_tokens(&tokens, cwd),
            vec!["--prd", "/home/me/demo/docs/prd.json"]
        );
        let tokens = vec!["--prd=/abs/prd.json".to_string()];
        assert_eq!(absolutize_prd_tokens(&tokens, cwd), vec!["--prd=/abs/prd.json"]);
        let tokens = vec!["issue-4".to_string()];
        assert_eq!(absolutize_prd_tokens(&tokens, cwd), vec!["issue-4"]);
    }

    #[test]
    fn test_hints() {
        let err = anyhow::Error::new(RuntimeError::EngineUnavailable("down".to_string()));
        assert!(hint_for(&err).unwrap().contains("Docker daemon"));

        let err = anyhow::Error::new(ConfigError::ProjectNotFound(PathBuf::from("/tmp")));
        assert!(hint_for(&err).unwrap().contains("ralph init"));

        let err = anyhow::Error::new(LifecycleError::ImageMissing {
            image: "ralph-demo:latest".to_string(),
        });
        assert_eq!(hint_for(&err).unwrap(), "build it first with `ralph build`");

        let err = anyhow::anyhow!("something else");
        assert_eq!(hint_for(&err), None);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code(0), ExitCode::SUCCESS);
        assert_eq!(exit_code(-1), ExitCode::FAILURE);
        assert_eq!(exit_code(3), ExitCode::from(3));
    }
}
