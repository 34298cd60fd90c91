//! Notification channels for `ralph watch`.
//!
//! Every channel is fire-and-forget: a failed delivery is reported to the
//! caller, who logs it and moves on.

use async_trait::async_trait;
use ralph_proto::{Notification, Notifier, NotifyError, Outcome};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default public ntfy server.
pub const DEFAULT_NTFY_SERVER: &str = "https://ntfy.sh";

/// Desktop notification through `notify-send` (Linux) or `osascript` (macOS).
#[derive(Debug, Clone, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    /// Program and arguments that show `notification` on this platform.
    pub fn command_line(notification: &Notification) -> (String, Vec<String>) {
        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\"",
                applescript_escape(&notification.message),
                applescript_escape(&notification.title)
            );
            ("osascript".to_string(), vec!["-e".to_string(), script])
        } else {
            let urgency = match notification.outcome {
                Outcome::Success => "normal",
                Outcome::Failure => "critical",
            };
            (
                "notify-send".to_string(),
                vec![
                    "--app-name=ralph".to_string(),
                    format!("--urgency={urgency}"),
                    notification.title.clone(),
                    notification.message.clone(),
                ],
            )
        }
    }
}

fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let (program, args) = Self::command_line(notification);
        let fail = |reason: String| NotifyError {
            channel: "desktop",
            reason,
        };
        let output = Command::new(&program)
            .args(&args)
            .output()
            .await
            .map_err(|e| fail(format!("{program}: {e}")))?;
        if !output.status.success() {
            return Err(fail(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(title = %notification.title, "Desktop notification shown");
        Ok(())
    }
}

/// POSTs the notification as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let fail = |reason: String| NotifyError {
            channel: "webhook",
            reason,
        };
        let response = self
            .client
            .post(&self.url)
            .timeout(HTTP_TIMEOUT)
            .json(notification)
            .send()
            .await
            .map_err(|e| fail(e.without_url().to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("server answered {status}")));
        }
        debug!(worker = %notification.worker, "Webhook delivered");
        Ok(())
    }
}

/// Publishes to an ntfy topic.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: reqwest::Client,
    server: String,
    topic: String,
}

impl NtfyNotifier {
    pub fn new(server: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server: server.into(),
            topic: topic.into(),
        }
    }

    pub fn topic_url(&self) -> String {
        format!("{}/{}", self.server.trim_end_matches('/'), self.topic)
    }

    /// `(Tags, Priority)` header values for an outcome.
    pub fn headers_for(outcome: Outcome) -> (&'static str, &'static str) {
        match outcome {
            Outcome::Success => ("white_check_mark", "default"),
            Outcome::Failure => ("x", "high"),
        }
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let fail = |reason: String| NotifyError {
            channel: "ntfy",
            reason,
        };
        let (tags, priority) = Self::headers_for(notification.outcome);
        let response = self
            .client
            .post(self.topic_url())
            .timeout(HTTP_TIMEOUT)
            .header("Title", &notification.title)
            .header("Tags", tags)
            .header("Priority", priority)
            .body(notification.message.clone())
            .send()
            .await
            .map_err(|e| fail(e.without_url().to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(format!("server answered {status}")));
        }
        debug!(topic = %self.topic, "ntfy message published");
        Ok(())
    }
}

/// Sends to every channel. All channels are tried even when one fails; the
/// first failure is returned.
#[derive(Default)]
pub struct FanoutNotifier {
    channels: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, channel: impl Notifier + 'static) -> Self {
        self.channels.push(Box::new(channel));
        self
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut first_error = None;
        for channel in &self.channels {
            if let Err(e) = channel.notify(notification).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
