//! Action executor: turns one decided action into a browser operation or a
//! control signal.

use crate::config::AgentConfig;
use crate::error::{ActionError, PageError};
use crate::page::Page;
use crate::types::{AgentAction, CheckpointKind, Credentials, FileKind, ScrollDirection};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const DEFAULT_SCROLL_PIXELS: u32 = 600;
const DEFAULT_WAIT: Duration = Duration::from_millis(1000);
const PAGE_BUDGET_RATIO: f64 = 0.8;

pub const USERNAME_PLACEHOLDER: &str = "{{credentials.username}}";
pub const PASSWORD_PLACEHOLDER: &str = "{{credentials.password}}";

/// What the loop should do after an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Continue,
    Checkpoint(CheckpointRequest),
    Done(DoneSignal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRequest {
    pub kind: CheckpointKind,
    pub message: String,
    pub questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoneSignal {
    pub success: bool,
    pub message: String,
    pub confirmation_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub action: Duration,
    pub navigation: Duration,
    pub network_idle: Duration,
}

impl From<&AgentConfig> for Timeouts {
    fn from(config: &AgentConfig) -> Self {
        Self {
            action: config.action_timeout,
            navigation: config.navigation_timeout,
            network_idle: config.network_idle_timeout,
        }
    }
}

/// Files an `upload` action may attach, materialized for the duration of a run.
#[derive(Debug, Default)]
pub struct UploadFiles {
    _dir: Option<TempDir>,
    resume: Option<PathBuf>,
    cover_letter: Option<PathBuf>,
}

impl UploadFiles {
    /// Write the resume (unless an existing file is given) and cover letter
    /// into a private temporary directory.
    pub fn prepare(
        resume_text: &str,
        cover_letter_text: Option<&str>,
        resume_file: Option<&Path>,
    ) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("apply-agent-").tempdir()?;

        let resume = match resume_file {
            Some(path) => Some(path.to_path_buf()),
            None if !resume_text.trim().is_empty() => {
                let path = dir.path().join("resume.txt");
                std::fs::write(&path, resume_text)?;
                Some(path)
            }
            None => None,
        };

        let cover_letter = match cover_letter_text {
            Some(text) if !text.trim().is_empty() => {
                let path = dir.path().join("cover_letter.txt");
                std::fs::write(&path, text)?;
                Some(path)
            }
            _ => None,
        };

        Ok(Self {
            _dir: Some(dir),
            resume,
            cover_letter,
        })
    }

    pub fn path(&self, kind: FileKind) -> Option<&Path> {
        match kind {
            FileKind::Resume => self.resume.as_deref(),
            FileKind::CoverLetter => self.cover_letter.as_deref(),
        }
    }
}

/// Values the model refers to by placeholder and never sees.
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    credentials: Option<Credentials>,
}

impl Secrets {
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn resolve(&self, value: &str) -> String {
        match self.credentials {
            Some(ref c) => value
                .replace(USERNAME_PLACEHOLDER, &c.username)
                .replace(PASSWORD_PLACEHOLDER, &c.password),
            None => value.to_string(),
        }
    }
}

/// Everything an action needs besides the page.
pub struct ExecContext<'a> {
    pub timeouts: Timeouts,
    pub files: &'a UploadFiles,
    pub secrets: &'a Secrets,
}

/// Execute one action. Browser failures come back as `ActionError` for the
/// model to react to; control variants never touch the page.
pub async fn execute(
    page: &dyn Page,
    action: &AgentAction,
    ctx: &ExecContext<'_>,
) -> Result<ActionOutcome, ActionError> {
    let t = ctx.timeouts;
    let budget = page_budget(t.action);
    match action {
        AgentAction::Click { selector, .. } => {
            let selector = required("click", "selector", selector)?;
            info!("click: {}", selector);
            bounded("click", selector, t.action, page.click(selector, budget)).await?;
            settle(page, t.network_idle).await;
        }
        AgentAction::Fill {
            selector, value, ..
        } => {
            let selector = required("fill", "selector", selector)?;
            let value = ctx.secrets.resolve(present("fill", "value", value)?);
            info!("fill: {}", selector);
            bounded("fill", selector, t.action, page.fill(selector, &value, budget)).await?;
        }
        AgentAction::Select {
            selector, value, ..
        } => {
            let selector = required("select", "selector", selector)?;
            let value = present("select", "value", value)?;
            info!("select: {} = {}", selector, value);
            bounded(
                "select",
                selector,
                t.action,
                page.select_option(selector, value, budget),
            )
            .await?;
        }
        AgentAction::Check {
            selector, checked, ..
        } => {
            let selector = required("check", "selector", selector)?;
            info!("check: {} -> {}", selector, checked);
            bounded(
                "check",
                selector,
                t.action,
                page.set_checked(selector, *checked, budget),
            )
            .await?;
        }
        AgentAction::Upload {
            selector,
            file_type,
            ..
        } => {
            let selector = required("upload", "selector", selector)?;
            let kind = file_type.ok_or(ActionError::MissingField {
                action: "upload",
                field: "fileType",
            })?;
            let file = ctx
                .files
                .path(kind)
                .ok_or(ActionError::NoFile(kind.as_str()))?;
            info!("upload: {} <- {:?}", selector, file);
            bounded("upload", selector, t.action, page.upload(selector, file, budget)).await?;
        }
        AgentAction::Scroll {
            direction, amount, ..
        } => {
            let direction = direction.unwrap_or(ScrollDirection::Down);
            let pixels = amount.unwrap_or(DEFAULT_SCROLL_PIXELS);
            debug!("scroll: {:?} {}px", direction, pixels);
            bounded("scroll", "window", t.action, page.scroll(direction, pixels)).await?;
        }
        AgentAction::Wait { duration_ms, .. } => {
            let wait = duration_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WAIT)
                .min(t.action);
            debug!("wait: {:?}", wait);
            tokio::time::sleep(wait).await;
        }
        AgentAction::Navigate { url, .. } => {
            let url = required("navigate", "url", url)?;
            info!("navigate: {}", url);
            let budget = page_budget(t.navigation);
            bounded("navigate", url, t.navigation, page.goto(url, budget)).await?;
            settle(page, t.network_idle).await;
        }
        AgentAction::Checkpoint {
            checkpoint_type,
            message,
            questions,
            ..
        } => {
            return Ok(ActionOutcome::Checkpoint(CheckpointRequest {
                kind: *checkpoint_type,
                message: message.clone(),
                questions: questions.clone(),
            }));
        }
        AgentAction::Done {
            success,
            message,
            confirmation_id,
            ..
        } => {
            return Ok(ActionOutcome::Done(DoneSignal {
                success: *success,
                message: message.clone(),
                confirmation_id: confirmation_id.clone(),
            }));
        }
    }
    Ok(ActionOutcome::Continue)
}

fn required<'a>(
    action: &'static str,
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, ActionError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ActionError::MissingField { action, field }),
    }
}

/// Present, possibly empty. An empty value clears a field.
fn present<'a>(
    action: &'static str,
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, ActionError> {
    value
        .as_deref()
        .ok_or(ActionError::MissingField { action, field })
}

/// The deadline handed to the page itself, so its own waits give up before
/// the executor's.
fn page_budget(timeout: Duration) -> Duration {
    timeout.mul_f64(PAGE_BUDGET_RATIO)
}

/// Run a page operation under a deadline.
///
/// Page work may sit on a blocking thread that a dropped future cannot stop,
/// so an operation still running at the deadline is awaited for up to another
/// `timeout` before it is abandoned. Unless abandoned, a late action has landed
/// by the time this returns.
async fn bounded<F>(
    action: &'static str,
    selector: &str,
    timeout: Duration,
    op: F,
) -> Result<(), ActionError>
where
    F: Future<Output = Result<(), PageError>>,
{
    tokio::pin!(op);
    let outcome = match tokio::time::timeout(timeout, &mut op).await {
        Ok(outcome) => outcome,
        Err(_) => match tokio::time::timeout(timeout, &mut op).await {
            Ok(outcome) => {
                warn!(action, selector, "finished after its {:?} deadline", timeout);
                outcome
            }
            Err(_) => {
                warn!(action, selector, "abandoned after {:?}", timeout * 2);
                return Err(ActionError::Timeout {
                    action,
                    selector: selector.to_string(),
                    timeout,
                });
            }
        },
    };
    outcome.map_err(|source| ActionError::Page {
        action,
        selector: selector.to_string(),
        source,
    })
}

/// Best-effort wait for the network to go quiet. Never fails the action.
async fn settle(page: &dyn Page, timeout: Duration) {
    match tokio::time::timeout(timeout, page.wait_for_network_idle(timeout)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("network idle wait ended early: {}", e),
        Err(_) => debug!("network idle wait timed out after {:?}", timeout),
    }
}
