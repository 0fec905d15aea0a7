//! The observe → decide → act loop for one job application.

use crate::brain::{DecisionModel, DecisionRequest};
use crate::checkpoint::CheckpointBroker;
use crate::config::AgentConfig;
use crate::error::{DecisionError, PageError};
use crate::hands::{self, ActionOutcome, DoneSignal, ExecContext, Secrets, Timeouts, UploadFiles};
use crate::page::Page;
use crate::session::SessionManager;
use crate::state::{AgentState, Turn};
use crate::types::{
    AgentAction, ApplicantProfile, ApplyJobResult, CheckpointData, CheckpointKind,
    CheckpointReply, CheckpointResponse, FileKind, Outcome,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const MAX_BRIEF_DOCUMENT_CHARS: usize = 6000;
const MAX_ECHOED_OUTPUT_CHARS: usize = 500;

/// Caller-side collaborators of a run.
#[async_trait]
pub trait ApplyHooks: Send + Sync {
    /// Surface a checkpoint to a human and wait for the answer.
    ///
    /// The loop bounds this call by the checkpoint timeout and by `cancel`,
    /// so implementations may simply await their channel.
    async fn on_checkpoint(
        &self,
        data: CheckpointData,
        cancel: &CancellationToken,
    ) -> CheckpointResponse;

    /// Fire-and-forget progress telemetry.
    fn on_progress(&self, _step: u32, _action: &str, _reason: &str) {}
}

#[async_trait]
impl ApplyHooks for CheckpointBroker {
    async fn on_checkpoint(
        &self,
        data: CheckpointData,
        cancel: &CancellationToken,
    ) -> CheckpointResponse {
        self.request(data, cancel).await
    }
}

/// Inputs for one application run.
pub struct ApplyRequest {
    pub target_url: String,
    pub profile: ApplicantProfile,
    pub resume_text: String,
    pub cover_letter_text: Option<String>,
    /// Upload this file as the resume instead of the materialized text.
    pub resume_file: Option<PathBuf>,
    pub max_steps: Option<u32>,
    pub hooks: Arc<dyn ApplyHooks>,
    pub cancel: CancellationToken,
}

impl ApplyRequest {
    pub fn new(
        target_url: impl Into<String>,
        profile: ApplicantProfile,
        resume_text: impl Into<String>,
        hooks: Arc<dyn ApplyHooks>,
    ) -> Self {
        Self {
            target_url: target_url.into(),
            profile,
            resume_text: resume_text.into(),
            cover_letter_text: None,
            resume_file: None,
            max_steps: None,
            hooks,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cover_letter(mut self, text: impl Into<String>) -> Self {
        self.cover_letter_text = Some(text.into());
        self
    }

    pub fn with_resume_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.resume_file = Some(path.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// How a run ended, before it is flattened into an `ApplyJobResult`.
#[derive(Debug)]
enum Terminal {
    Done {
        signal: DoneSignal,
        url: String,
    },
    Cancelled(String),
    TimedOut(String),
    Fatal(String),
}

struct Observation {
    screenshot: String,
    url: String,
    title: String,
}

/// Drives applications. One instance may run many applications concurrently;
/// each run owns its own page and state.
pub struct ApplyAgent {
    session: Arc<SessionManager>,
    brain: Arc<dyn DecisionModel>,
    config: AgentConfig,
}

impl ApplyAgent {
    pub fn new(
        session: Arc<SessionManager>,
        brain: Arc<dyn DecisionModel>,
        config: AgentConfig,
    ) -> Self {
        Self {
            session,
            brain,
            config,
        }
    }

    /// Run one application to a terminal state. Never panics or errors:
    /// every failure ends up in the returned result.
    pub async fn apply_to_job(&self, request: ApplyRequest) -> ApplyJobResult {
        let started = Instant::now();
        let max_steps = request.max_steps.unwrap_or(self.config.max_steps);
        let mut state = AgentState::new(
            request.target_url.clone(),
            self.config.history_window,
            self.config.screenshot_window,
        );
        info!(url = %request.target_url, max_steps, "Starting application");

        let lease = match cancellable(&request.cancel, self.session.acquire_page()).await {
            None => {
                let terminal = Terminal::Cancelled("cancelled by caller".into());
                return self.finish(terminal, &state, started);
            }
            Some(Err(e)) => {
                let terminal = Terminal::Fatal(format!("could not acquire a page: {}", e));
                return self.finish(terminal, &state, started);
            }
            Some(Ok(lease)) => lease,
        };

        let run = self.drive(lease.page(), &request, max_steps, &mut state);
        let terminal = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(terminal) => terminal,
            Err(panic) => Terminal::Fatal(format!("agent loop panicked: {}", panic_message(&panic))),
        };

        lease.release().await;
        self.finish(terminal, &state, started)
    }

    async fn drive(
        &self,
        page: &dyn Page,
        request: &ApplyRequest,
        max_steps: u32,
        state: &mut AgentState,
    ) -> Terminal {
        let cancel = &request.cancel;
        let files = match UploadFiles::prepare(
            &request.resume_text,
            request.cover_letter_text.as_deref(),
            request.resume_file.as_deref(),
        ) {
            Ok(files) => files,
            Err(e) => return Terminal::Fatal(format!("could not prepare upload files: {}", e)),
        };
        let mut secrets = Secrets::default();
        let timeouts = Timeouts::from(&self.config);
        let brief = task_brief(request, &files);
        let mut review_approved = false;
        let mut transient_failures = 0u32;
        let mut last_failure: Option<String> = None;

        let open = AgentAction::Navigate {
            url: Some(request.target_url.clone()),
            reason: "open the application page".into(),
        };
        let ctx = ExecContext {
            timeouts,
            files: &files,
            secrets: &secrets,
        };
        match cancellable(cancel, hands::execute(page, &open, &ctx)).await {
            None => return Terminal::Cancelled("cancelled by caller".into()),
            Some(Err(e)) => return Terminal::Fatal(format!("could not open application page: {}", e)),
            Some(Ok(_)) => {}
        }

        loop {
            if cancel.is_cancelled() {
                return Terminal::Cancelled("cancelled by caller".into());
            }
            if state.step >= max_steps {
                return Terminal::TimedOut(format!(
                    "step budget of {} exhausted without finishing",
                    max_steps
                ));
            }

            // Observe. Capture failures retry the same step.
            let observation = match cancellable(cancel, self.observe(page)).await {
                None => return Terminal::Cancelled("cancelled by caller".into()),
                Some(Ok(observation)) => observation,
                Some(Err(e)) if e.is_closed() => {
                    return Terminal::Fatal(format!("page crashed: {}", e));
                }
                Some(Err(e)) => {
                    warn!(step = state.step + 1, "Observation failed: {}", e);
                    if let Some(terminal) = self.back_off(&mut transient_failures, cancel).await {
                        return terminal;
                    }
                    continue;
                }
            };
            state.current_url = observation.url;
            state.title = observation.title;
            state.record_screenshot(observation.screenshot);

            // Decide.
            let context = format!(
                "Step {}/{}\nURL: {}\nTitle: {}",
                state.step + 1,
                max_steps,
                state.current_url,
                state.title
            );
            let history = state.history.recent(self.config.decision_history_turns);
            let decision_request = DecisionRequest {
                brief: &brief,
                screenshot: state.last_screenshot.as_deref().unwrap_or_default(),
                context: &context,
                history: &history,
            };
            let decision = match cancellable(cancel, self.brain.decide(decision_request)).await {
                None => return Terminal::Cancelled("cancelled by caller".into()),
                Some(decision) => decision,
            };

            let action = match decision {
                Ok(action) => action,
                Err(DecisionError::Decode { reason, raw }) => {
                    transient_failures = 0;
                    state.step += 1;
                    warn!(step = state.step, "Undecodable model output: {}", reason);
                    request.hooks.on_progress(state.step, "invalid", &reason);
                    state.history.push(Turn::assistant(truncate(&raw, MAX_ECHOED_OUTPUT_CHARS)));
                    state.history.note(format!(
                        "Your last reply could not be used ({}). Reply with exactly one JSON object using one of the listed actions.",
                        reason
                    ));
                    continue;
                }
                Err(e) => {
                    warn!(step = state.step + 1, "Decision request failed: {}", e);
                    if let Some(terminal) = self.back_off(&mut transient_failures, cancel).await {
                        return terminal;
                    }
                    continue;
                }
            };

            transient_failures = 0;
            state.step += 1;
            let step = state.step;
            info!(step, action = action.kind(), "{}", action.reason());
            request.hooks.on_progress(step, action.kind(), action.reason());
            if let Ok(echo) = serde_json::to_string(&action) {
                state.history.push(Turn::assistant(echo));
            }

            // Act.
            let ctx = ExecContext {
                timeouts,
                files: &files,
                secrets: &secrets,
            };
            let outcome = match cancellable(cancel, hands::execute(page, &action, &ctx)).await {
                None => return Terminal::Cancelled("cancelled by caller".into()),
                Some(outcome) => outcome,
            };

            match outcome {
                Ok(ActionOutcome::Continue) => {
                    last_failure = None;
                    state.history.note(format!("{} succeeded.", describe(&action)));
                }
                Ok(ActionOutcome::Checkpoint(checkpoint)) => {
                    let kind = checkpoint.kind;
                    let data = CheckpointData {
                        kind,
                        message: checkpoint.message,
                        screenshot: state.last_screenshot.clone(),
                        url: Some(state.current_url.clone()),
                        questions: checkpoint.questions,
                        error: match kind {
                            CheckpointKind::Error => last_failure.clone(),
                            _ => None,
                        },
                    };
                    let response = self.checkpoint(request, data).await;
                    if !response.proceed {
                        if cancel.is_cancelled() {
                            return Terminal::Cancelled("cancelled by caller".into());
                        }
                        return Terminal::Cancelled(format!(
                            "{} checkpoint was declined or not answered in time",
                            kind
                        ));
                    }
                    if kind == CheckpointKind::Review {
                        review_approved = review_was_approved(&response);
                    }
                    let note = fold_response(kind, &response, &mut secrets);
                    state.history.note(note);
                }
                Ok(ActionOutcome::Done(signal)) => {
                    if signal.success && self.config.require_review_before_done && !review_approved {
                        warn!(step, "Refusing success before an approved review checkpoint");
                        state.history.note(
                            "You reported success without an approved review checkpoint. \
                             Request a \"review\" checkpoint before the final submission and \
                             finish only after it is approved.",
                        );
                        continue;
                    }
                    let limit = self.config.action_timeout;
                    let url = match tokio::time::timeout(limit, page.url()).await {
                        Ok(Ok(url)) => url,
                        _ => state.current_url.clone(),
                    };
                    return Terminal::Done { signal, url };
                }
                Err(e) if e.page_error().is_some_and(PageError::is_closed) => {
                    return Terminal::Fatal(format!("page crashed during {}: {}", action.kind(), e));
                }
                Err(e) => {
                    warn!(step, action = action.kind(), "Action failed: {}", e);
                    state.history.note(format!(
                        "Action {} failed with error: {}. Try a different approach.",
                        action.kind(),
                        e
                    ));
                    last_failure = Some(e.to_string());
                }
            }
        }
    }

    async fn observe(&self, page: &dyn Page) -> Result<Observation, PageError> {
        let limit = self.config.action_timeout;
        let png = tokio::time::timeout(limit, page.screenshot())
            .await
            .map_err(|_| PageError::Timeout(limit))??;
        let url = tokio::time::timeout(limit, page.url())
            .await
            .map_err(|_| PageError::Timeout(limit))??;
        let title = match tokio::time::timeout(limit, page.title()).await {
            Ok(Ok(title)) => title,
            _ => String::new(),
        };
        Ok(Observation {
            screenshot: BASE64.encode(png),
            url,
            title,
        })
    }

    /// Wait for a human, bounded by the checkpoint timeout and by cancellation.
    async fn checkpoint(&self, request: &ApplyRequest, data: CheckpointData) -> CheckpointResponse {
        let kind = data.kind;
        let limit = self.config.checkpoint_timeout + self.config.checkpoint_poll_interval;
        let wait = tokio::time::timeout(limit, request.hooks.on_checkpoint(data, &request.cancel));
        tokio::select! {
            _ = request.cancel.cancelled() => CheckpointResponse::cancel(),
            answered = wait => answered.unwrap_or_else(|_| {
                warn!(%kind, "Checkpoint handler did not answer within {:?}", limit);
                CheckpointResponse::cancel()
            }),
        }
    }

    /// Pause after a transport or capture failure. Returns a terminal state
    /// when the retry budget is spent or the run is cancelled meanwhile.
    async fn back_off(&self, failures: &mut u32, cancel: &CancellationToken) -> Option<Terminal> {
        *failures += 1;
        if *failures > self.config.max_transient_retries {
            return Some(Terminal::TimedOut(format!(
                "gave up after {} consecutive transient failures",
                *failures - 1
            )));
        }
        let jitter = 1.0 + rand::random::<f64>() * 0.5;
        let delay = self.config.transport_backoff.mul_f64(jitter);
        tokio::select! {
            _ = cancel.cancelled() => Some(Terminal::Cancelled("cancelled by caller".into())),
            _ = tokio::time::sleep(delay) => None,
        }
    }

    fn finish(&self, terminal: Terminal, state: &AgentState, started: Instant) -> ApplyJobResult {
        let mut result = ApplyJobResult {
            success: false,
            outcome: Outcome::Fatal,
            confirmation_url: None,
            confirmation_id: None,
            message: String::new(),
            steps: state.step,
            screenshots: state.screenshots(),
            duration: started.elapsed(),
        };
        match terminal {
            Terminal::Done { signal, url } => {
                result.success = signal.success;
                result.outcome = Outcome::Done;
                if signal.success {
                    result.confirmation_url = Some(url);
                }
                result.confirmation_id = signal.confirmation_id;
                result.message = signal.message;
            }
            Terminal::Cancelled(message) => {
                result.outcome = Outcome::Cancelled;
                result.message = message;
            }
            Terminal::TimedOut(message) => {
                result.outcome = Outcome::TimedOut;
                result.message = message;
            }
            Terminal::Fatal(message) => {
                error!("Application failed: {}", message);
                result.message = message;
            }
        }
        info!(
            outcome = ?result.outcome,
            success = result.success,
            steps = result.steps,
            elapsed = ?result.duration,
            "Application finished"
        );
        result
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn task_brief(request: &ApplyRequest, files: &UploadFiles) -> String {
    let profile = serde_json::to_string_pretty(&request.profile).unwrap_or_default();
    let mut brief = format!(
        "Task: complete the job application at {}\n\nApplicant profile:\n{}\n\nResume:\n{}",
        request.target_url,
        profile,
        truncate(&request.resume_text, MAX_BRIEF_DOCUMENT_CHARS)
    );
    if let Some(ref letter) = request.cover_letter_text {
        brief.push_str("\n\nCover letter:\n");
        brief.push_str(&truncate(letter, MAX_BRIEF_DOCUMENT_CHARS));
    }
    let uploads: Vec<&str> = [FileKind::Resume, FileKind::CoverLetter]
        .into_iter()
        .filter(|k| files.path(*k).is_some())
        .map(|k| match k {
            FileKind::Resume => "resume",
            FileKind::CoverLetter => "cover_letter",
        })
        .collect();
    if uploads.is_empty() {
        brief.push_str("\n\nNo files are available to upload.");
    } else {
        brief.push_str(&format!("\n\nFiles available to upload: {}", uploads.join(", ")));
    }
    brief
}

fn describe(action: &AgentAction) -> String {
    match action {
        AgentAction::Navigate { url: Some(url), .. } => format!("Action navigate to {}", url),
        other => match other.selector() {
            Some(selector) => format!("Action {} on '{}'", other.kind(), selector),
            None => format!("Action {}", other.kind()),
        },
    }
}

fn review_was_approved(response: &CheckpointResponse) -> bool {
    match response.reply {
        Some(CheckpointReply::Review { approved }) => approved,
        _ => response.proceed,
    }
}

/// Turn a human answer into a history note. Credentials go into `secrets`,
/// never into the note.
fn fold_response(kind: CheckpointKind, response: &CheckpointResponse, secrets: &mut Secrets) -> String {
    match response.reply {
        Some(CheckpointReply::Login {
            credentials: Some(ref credentials),
        }) => {
            secrets.set_credentials(credentials.clone());
            format!(
                "The user provided login credentials. Fill the username field with {} and the password field with {}.",
                hands::USERNAME_PLACEHOLDER,
                hands::PASSWORD_PLACEHOLDER
            )
        }
        Some(CheckpointReply::Login { credentials: None }) => {
            "The user logged in manually. Continue from the current page.".to_string()
        }
        Some(CheckpointReply::Captcha {
            solution: Some(ref solution),
        }) => format!("The user solved the CAPTCHA. Enter this solution: {}", solution),
        Some(CheckpointReply::Captcha { solution: None }) => {
            "The user solved the CAPTCHA in the browser. Continue.".to_string()
        }
        Some(CheckpointReply::Questions { ref answers }) => {
            let lines: Vec<String> = answers
                .iter()
                .map(|(q, a)| format!("- {}: {}", q, a))
                .collect();
            format!("The user answered the questions:\n{}", lines.join("\n"))
        }
        Some(CheckpointReply::Review { approved: true }) => {
            "The user reviewed and approved the application. Submit it now.".to_string()
        }
        Some(CheckpointReply::Review { approved: false }) => {
            "The user did not approve submission yet. Check the form for mistakes and request another review before submitting."
                .to_string()
        }
        Some(CheckpointReply::Error {
            instruction: Some(ref instruction),
        })
        | Some(CheckpointReply::Custom {
            instruction: Some(ref instruction),
        }) => format!("The user says: {}", instruction),
        Some(CheckpointReply::Upload { note: Some(ref note) }) => {
            format!("The user handled the upload: {}", note)
        }
        _ => format!(
            "The user completed the {} checkpoint and asked you to continue.",
            kind
        ),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}\n... [truncated]", head)
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
