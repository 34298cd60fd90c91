//! `ralph watch`: a live table of Workers with completion notifications.

use crate::display::{self, colors};
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use ralph_adapters::{
    DEFAULT_NTFY_SERVER, DesktopNotifier, FanoutNotifier, NtfyNotifier, WebhookNotifier,
};
use ralph_core::{Classifier, NotificationConfig, Scope, TickReport, Watcher};
use ralph_proto::{ContainerRuntime, Notification};
use scopeguard::defer;
use std::io::{IsTerminal, Write, stdout};
use std::time::Duration;
use tracing::{debug, info};

/// Recent notifications kept on screen.
const NOTIFICATION_HISTORY: usize = 5;

/// Builds the notifier for the configured channels.
pub fn notifier_from_config(config: &NotificationConfig) -> FanoutNotifier {
    let mut fanout = FanoutNotifier::new();
    if config.desktop {
        fanout = fanout.with(DesktopNotifier);
    }
    if let Some(url) = config
        .webhook
        .as_deref()
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
    {
        fanout = fanout.with(WebhookNotifier::new(url));
    }
    if let Some(ntfy) = &config.ntfy {
        let server = if ntfy.server.is_empty() {
            DEFAULT_NTFY_SERVER
        } else {
            ntfy.server.as_str()
        };
        fanout = fanout.with(NtfyNotifier::new(server, ntfy.topic.clone()));
    }
    debug!(channels = fanout.len(), "Notification channels ready");
    fanout
}

pub struct WatchOptions {
    pub scope: Scope,
    pub classifier: Classifier,
    pub notifications: NotificationConfig,
    pub interval: Duration,
    pub use_colors: bool,
}

/// Runs until Ctrl-C. Engine errors end the loop.
pub async fn run(runtime: &dyn ContainerRuntime, options: WatchOptions) -> Result<()> {
    run_until(runtime, options, tokio::signal::ctrl_c()).await
}

/// Runs until `shutdown` resolves. The same future is polled across every
/// tick.
pub async fn run_until<F: Future>(
    runtime: &dyn ContainerRuntime,
    options: WatchOptions,
    shutdown: F,
) -> Result<()> {
    let notifier = notifier_from_config(&options.notifications);
    let mut watcher = Watcher::new(options.scope, options.classifier);
    let interactive = stdout().is_terminal();
    let mut history: Vec<(String, Notification)> = Vec::new();

    if interactive {
        execute!(stdout(), Hide).context("Failed to hide cursor")?;
    }
    defer! {
        if interactive {
            let _ = execute!(stdout(), Show);
        }
    }

    info!(interval_secs = options.interval.as_secs(), "Watching workers");
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = watcher
                    .tick(runtime, &notifier, Utc::now())
                    .await
                    .context("Watch tick failed")?;
                let stamp = Local::now().format("%H:%M:%S").to_string();
                for notification in &report.notifications {
                    history.push((stamp.clone(), notification.clone()));
                }
                let excess = history.len().saturating_sub(NOTIFICATION_HISTORY);
                history.drain(..excess);
                render(
                    &report,
                    &history,
                    watcher.scope(),
                    &stamp,
                    interactive,
                    options.use_colors,
                )?;
            }
            _ = &mut shutdown => {
                debug!("Interrupted, leaving watch");
                break;
            }
        }
    }
    Ok(())
}

fn render(
    report: &TickReport,
    history: &[(String, Notification)],
    scope: &Scope,
    stamp: &str,
    interactive: bool,
    use_colors: bool,
) -> Result<()> {
    let mut out = stdout().lock();
    if interactive {
        execute!(out, MoveTo(0, 0), Clear(ClearType::All))?;
    }
    let (dim, reset) = if use_colors {
        (colors::DIM, colors::RESET)
    } else {
        ("", "")
    };

    let target = match scope {
        Scope::Project { project } => project.clone(),
        Scope::All => "all projects".to_string(),
    };
    writeln!(out, "{dim}ralph watch · {target} · {stamp} · Ctrl-C to quit{reset}")?;
    writeln!(out)?;

    if report.statuses.is_empty() {
        writeln!(out, "No workers.")?;
    } else {
        let show_project = matches!(scope, Scope::All);
        for row in display::worker_table(&report.statuses, show_project, use_colors) {
            writeln!(out, "{row}")?;
        }
    }

    if !history.is_empty() {
        writeln!(out)?;
        for (at, notification) in history {
            writeln!(out, "{dim}{at}{reset} {}", notification.title)?;
        }
    }
    out.flush()?;
    Ok(())
}
