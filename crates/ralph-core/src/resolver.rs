//! Task Identifier Resolver.
//!
//! Turns the loose argument list users type after `ralph start` (or after a
//! worker-targeting command like `ralph stop`) into a [`TaskSelector`] or a
//! [`TaskId`].
//!
//! Accepted forms:
//! - `--issue 42`, `--issue=42`, `issue 42`
//! - `--prd docs/prd.json`, `prd docs/prd.json`
//! - `--prompt "fix the login bug"`, `prompt "..."`, optionally with `--id NAME`
//! - bare numbers: `42`, or `4 2` which reads as issue `42`
//! - for references only: a full identifier such as `issue-42`

use crate::config::TaskSource;
use chrono::{DateTime, Local};
use ralph_proto::{TaskId, TaskKind, TaskSelector};
use std::path::PathBuf;
use tracing::debug;

/// Format for generated prompt and auto identifiers.
pub const GENERATED_ID_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Errors produced while resolving task arguments.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("'{flag}' needs a value")]
    MissingValue { flag: String },

    #[error("'{0}' is not a valid issue number")]
    InvalidIssueNumber(String),

    #[error("conflicting task selectors: {first} and {second}")]
    Ambiguous { first: String, second: String },

    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("--id only applies to prompt tasks")]
    IdWithoutPrompt,

    #[error("bare issue numbers only work in github mode (project mode is {mode}); use --prd or --prompt")]
    BareNumberOutsideGithub { mode: String },

    #[error("no task given; pass an issue number, --prd FILE, --prompt TEXT --id ID, or a task id like issue-42")]
    MissingReference,

    #[error("prompt tasks are referenced by id; pass --id ID or prompt-<id>")]
    PromptNeedsId,
}

/// Raw tokens sorted into buckets, before any precedence is applied.
#[derive(Debug, Default)]
struct ParsedArgs {
    selectors: Vec<Explicit>,
    id: Option<String>,
    digits: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Explicit {
    Issue(u64),
    Prd(PathBuf),
    Prompt(String),
}

impl Explicit {
    fn describe(&self) -> String {
        match self {
            Self::Issue(n) => format!("issue {n}"),
            Self::Prd(p) => format!("prd {}", p.display()),
            Self::Prompt(_) => "prompt".to_string(),
        }
    }
}

/// Resolves task arguments for one project.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    mode: TaskSource,
}

impl Resolver {
    pub fn new(mode: TaskSource) -> Self {
        Self { mode }
    }

    /// Resolves the arguments of `ralph start`.
    ///
    /// Returns `Ok(None)` when nothing selects a task, meaning the agent
    /// chooses its own work. `now` seeds generated prompt identifiers.
    pub fn resolve(
        &self,
        args: &[String],
        now: DateTime<Local>,
    ) -> Result<Option<TaskSelector>, ResolveError> {
        let parsed = parse_tokens(args)?;
        let explicit = single_explicit(&parsed.selectors)?;

        let selector = match explicit {
            Some(Explicit::Prompt(text)) => Some(TaskSelector::Prompt {
                id: parsed
                    .id
                    .clone()
                    .unwrap_or_else(|| now.format(GENERATED_ID_FORMAT).to_string()),
                text,
            }),
            Some(_) | None if parsed.id.is_some() => return Err(ResolveError::IdWithoutPrompt),
            Some(Explicit::Issue(number)) => Some(TaskSelector::Issue { number }),
            Some(Explicit::Prd(path)) => Some(TaskSelector::Prd { path }),
            None => self.bare_number(&parsed.digits)?,
        };

        if selector.is_some() && explicit_overrode_digits(&parsed) {
            debug!(digits = %parsed.digits, "Explicit selector takes precedence over bare number");
        }
        Ok(selector)
    }

    /// Resolves the arguments of a worker-targeting command (`stop`,
    /// `status`, `logs`, ...) to the identifier of an existing Worker.
    pub fn resolve_reference(&self, args: &[String]) -> Result<TaskId, ResolveError> {
        if let [single] = args {
            if !single.starts_with('-') && single.contains('-') {
                if let Ok(id) = single.parse::<TaskId>() {
                    return Ok(id);
                }
            }
        }

        let parsed = parse_tokens(args)?;
        match single_explicit(&parsed.selectors)? {
            Some(Explicit::Prompt(_)) | None if parsed.id.is_some() => {
                let id = parsed.id.unwrap_or_default();
                Ok(TaskId::new(TaskKind::Prompt, id))
            }
            Some(Explicit::Prompt(_)) => Err(ResolveError::PromptNeedsId),
            Some(Explicit::Issue(number)) => Ok(TaskSelector::Issue { number }.task_id()),
            Some(Explicit::Prd(path)) => Ok(TaskSelector::Prd { path }.task_id()),
            None => self
                .bare_number(&parsed.digits)?
                .map(|s| s.task_id())
                .ok_or(ResolveError::MissingReference),
        }
    }

    fn bare_number(&self, digits: &str) -> Result<Option<TaskSelector>, ResolveError> {
        if digits.is_empty() {
            return Ok(None);
        }
        if self.mode != TaskSource::Github {
            return Err(ResolveError::BareNumberOutsideGithub {
                mode: self.mode.as_str().to_string(),
            });
        }
        let number = parse_issue(digits)?;
        Ok(Some(TaskSelector::Issue { number }))
    }
}

fn explicit_overrode_digits(parsed: &ParsedArgs) -> bool {
    !parsed.selectors.is_empty() && !parsed.digits.is_empty()
}

fn parse_issue(value: &str) -> Result<u64, ResolveError> {
    value
        .trim_start_matches('#')
        .parse::<u64>()
        .map_err(|_| ResolveError::InvalidIssueNumber(value.to_string()))
}

fn is_bare_number(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

/// Collapses repeated selectors; two different ones are ambiguous.
fn single_explicit(selectors: &[Explicit]) -> Result<Option<Explicit>, ResolveError> {
    let mut chosen: Option<&Explicit> = None;
    for selector in selectors {
        match chosen {
            None => chosen = Some(selector),
            Some(first) if first == selector => {}
            Some(first) => {
                return Err(ResolveError::Ambiguous {
                    first: first.describe(),
                    second: selector.describe(),
                });
            }
        }
    }
    Ok(chosen.cloned())
}

fn parse_tokens(args: &[String]) -> Result<ParsedArgs, ResolveError> {
    let mut parsed = ParsedArgs::default();
    let mut iter = args.iter();

    while let Some(token) = iter.next() {
        let (name, inline) = match token.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value.to_string())),
            _ => (token.as_str(), None),
        };

        let mut value = |flag: &str| -> Result<String, ResolveError> {
            match inline.clone().or_else(|| iter.next().cloned()) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => Err(ResolveError::MissingValue {
                    flag: flag.to_string(),
                }),
            }
        };

        match name {
            "--issue" | "-i" | "issue" => {
                let raw = value(name)?;
                parsed.selectors.push(Explicit::Issue(parse_issue(&raw)?));
            }
            "--prd" | "prd" => {
                let raw = value(name)?;
                parsed.selectors.push(Explicit::Prd(PathBuf::from(raw)));
            }
            "--prompt" | "-p" | "prompt" => {
                let raw = value(name)?;
                parsed.selectors.push(Explicit::Prompt(raw));
            }
            "--id" => {
                let raw = value(name)?;
                if parsed.id.as_ref().is_some_and(|existing| *existing != raw) {
                    return Err(ResolveError::Ambiguous {
                        first: format!("--id {}", parsed.id.unwrap_or_default()),
                        second: format!("--id {raw}"),
                    });
                }
                parsed.id = Some(raw);
            }
            other if is_bare_number(other) => parsed.digits.push_str(other),
            other => return Err(ResolveError::UnexpectedArgument(other.to_string())),
        }
    }

    Ok(parsed)
}
