#![allow(dead_code)]

use apply_agent::{
    AgentAction, AgentConfig, ApplyHooks, BrowserContext, BrowserLauncher, CheckpointData,
    CheckpointResponse, DecisionError, DecisionModel, DecisionRequest, Page, PageError,
    ScrollDirection, SessionError, Turn,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Behaviour knobs shared by every page a fake context opens.
#[derive(Clone, Default)]
pub struct PageScript {
    pub selectors: HashSet<String>,
    /// Selectors whose operations never finish.
    pub hanging: HashSet<String>,
    /// Clicks that run on a blocking thread and land after this delay.
    pub slow_clicks: HashMap<String, Duration>,
    pub idle_hangs: bool,
    pub url_hangs: bool,
    pub screenshot_crashes: bool,
}

impl PageScript {
    pub fn with_selectors(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

/// In-memory page. Records every operation and keeps field values.
pub struct FakePage {
    script: PageScript,
    url: Mutex<String>,
    pub values: Arc<Mutex<HashMap<String, String>>>,
    pub log: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
    cookies: Arc<Mutex<HashMap<String, String>>>,
}

impl FakePage {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            url: Mutex::new("about:blank".into()),
            values: Arc::default(),
            log: Arc::default(),
            closed: Arc::default(),
            cookies: Arc::default(),
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    async fn target(&self, selector: &str) -> Result<(), PageError> {
        if self.script.hanging.contains(selector) {
            std::future::pending::<()>().await;
        }
        if self.script.selectors.contains(selector) {
            Ok(())
        } else {
            Err(PageError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), PageError> {
        self.record(format!("goto {}", url));
        *self.url.lock().unwrap() = url.to_string();
        self.cookies
            .lock()
            .unwrap()
            .insert("last_visit".into(), url.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), PageError> {
        if let Some(delay) = self.script.slow_clicks.get(selector).copied() {
            let log = Arc::clone(&self.log);
            let entry = format!("click {}", selector);
            return tokio::task::spawn_blocking(move || {
                std::thread::sleep(delay);
                log.lock().unwrap().push(entry);
            })
            .await
            .map_err(|e| PageError::Closed(e.to_string()));
        }
        self.target(selector).await?;
        self.record(format!("click {}", selector));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str, _timeout: Duration) -> Result<(), PageError> {
        self.target(selector).await?;
        self.record(format!("fill {}", selector));
        self.values
            .lock()
            .unwrap()
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        _timeout: Duration,
    ) -> Result<(), PageError> {
        self.target(selector).await?;
        self.record(format!("select {}", selector));
        self.values
            .lock()
            .unwrap()
            .insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn set_checked(
        &self,
        selector: &str,
        checked: bool,
        _timeout: Duration,
    ) -> Result<(), PageError> {
        self.target(selector).await?;
        self.record(format!("check {} {}", selector, checked));
        Ok(())
    }

    async fn upload(&self, selector: &str, file: &Path, _timeout: Duration) -> Result<(), PageError> {
        self.target(selector).await?;
        let content = std::fs::read_to_string(file).unwrap_or_default();
        self.record(format!("upload {}", selector));
        self.values
            .lock()
            .unwrap()
            .insert(selector.to_string(), content);
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, pixels: u32) -> Result<(), PageError> {
        self.record(format!("scroll {:?} {}", direction, pixels));
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), PageError> {
        if self.script.idle_hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        if self.script.screenshot_crashes {
            return Err(PageError::Closed("target crashed".into()));
        }
        Ok(b"png".to_vec())
    }

    async fn url(&self) -> Result<String, PageError> {
        if self.script.url_hangs {
            std::future::pending::<()>().await;
        }
        Ok(self.url.lock().unwrap().clone())
    }

    async fn title(&self) -> Result<String, PageError> {
        Ok("Apply".into())
    }

    async fn close(&self) -> Result<(), PageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Pages opened by a fake context share its cookie jar, like a real profile.
pub struct FakeContext {
    script: PageScript,
    pub alive: AtomicBool,
    pub cookies: Arc<Mutex<HashMap<String, String>>>,
    pub pages_opened: AtomicUsize,
    pub page_closed: Mutex<Vec<Arc<AtomicBool>>>,
    pub page_values: Mutex<Vec<Arc<Mutex<HashMap<String, String>>>>>,
    pub page_logs: Mutex<Vec<Arc<Mutex<Vec<String>>>>>,
}

impl FakeContext {
    fn new(script: PageScript) -> Self {
        Self {
            script,
            alive: AtomicBool::new(true),
            cookies: Arc::default(),
            pages_opened: AtomicUsize::new(0),
            page_closed: Mutex::default(),
            page_values: Mutex::default(),
            page_logs: Mutex::default(),
        }
    }

    pub fn all_pages_closed(&self) -> bool {
        self.page_closed
            .lock()
            .unwrap()
            .iter()
            .all(|c| c.load(Ordering::SeqCst))
    }

    pub fn last_values(&self) -> HashMap<String, String> {
        self.page_values
            .lock()
            .unwrap()
            .last()
            .map(|v| v.lock().unwrap().clone())
            .unwrap_or_default()
    }

    pub fn last_log(&self) -> Vec<String> {
        self.page_logs
            .lock()
            .unwrap()
            .last()
            .map(|v| v.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn new_page(&self) -> Result<Box<dyn Page>, PageError> {
        self.pages_opened.fetch_add(1, Ordering::SeqCst);
        let mut page = FakePage::new(self.script.clone());
        page.cookies = Arc::clone(&self.cookies);
        self.page_closed
            .lock()
            .unwrap()
            .push(Arc::clone(&page.closed));
        self.page_values
            .lock()
            .unwrap()
            .push(Arc::clone(&page.values));
        self.page_logs.lock().unwrap().push(Arc::clone(&page.log));
        Ok(Box::new(page))
    }

    async fn close(&self) -> Result<(), PageError> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    script: PageScript,
    launch_hangs: bool,
    pub launches: AtomicUsize,
    pub contexts: Mutex<Vec<Arc<FakeContext>>>,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            launch_hangs: false,
            launches: AtomicUsize::new(0),
            contexts: Mutex::default(),
        }
    }

    /// A launcher whose browser never comes up.
    pub fn hanging() -> Self {
        Self {
            launch_hangs: true,
            ..Self::new(PageScript::default())
        }
    }

    pub fn context(&self, index: usize) -> Arc<FakeContext> {
        Arc::clone(&self.contexts.lock().unwrap()[index])
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _profile_dir: &Path) -> Result<Arc<dyn BrowserContext>, SessionError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.launch_hangs {
            std::future::pending::<()>().await;
        }
        let context = Arc::new(FakeContext::new(self.script.clone()));
        self.contexts.lock().unwrap().push(Arc::clone(&context));
        Ok(context)
    }
}

pub type Scripted = Result<AgentAction, DecisionError>;

/// What the model was shown for one decision.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub brief: String,
    pub context: String,
    pub history: Vec<Turn>,
}

/// Plays back a fixed list of decisions, then repeats a fallback.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<AgentAction>,
    panic_when_empty: bool,
    pub seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            panic_when_empty: false,
            seen: Mutex::default(),
        }
    }

    pub fn then_repeat(mut self, action: AgentAction) -> Self {
        self.fallback = Some(action);
        self
    }

    pub fn then_panic(mut self) -> Self {
        self.panic_when_empty = true;
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionModel for ScriptedModel {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<AgentAction, DecisionError> {
        self.seen.lock().unwrap().push(SeenRequest {
            brief: request.brief.to_string(),
            context: request.context.to_string(),
            history: request.history.to_vec(),
        });
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(decision) => decision,
            None if self.panic_when_empty => panic!("model exploded"),
            None => match self.fallback {
                Some(ref action) => Ok(action.clone()),
                None => Ok(done(false, "script exhausted")),
            },
        }
    }
}

/// Answers checkpoints from a queue; an empty queue means "never answer".
#[derive(Default)]
pub struct RecordingHooks {
    responses: Mutex<VecDeque<CheckpointResponse>>,
    pub checkpoints: Mutex<Vec<CheckpointData>>,
    pub progress: Mutex<Vec<(u32, String)>>,
}

impl RecordingHooks {
    pub fn answering(responses: Vec<CheckpointResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    pub fn progress_steps(&self) -> Vec<u32> {
        self.progress.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }
}

#[async_trait]
impl ApplyHooks for RecordingHooks {
    async fn on_checkpoint(
        &self,
        data: CheckpointData,
        _cancel: &CancellationToken,
    ) -> CheckpointResponse {
        self.checkpoints.lock().unwrap().push(data);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }

    fn on_progress(&self, step: u32, action: &str, _reason: &str) {
        self.progress
            .lock()
            .unwrap()
            .push((step, action.to_string()));
    }
}

pub fn test_config() -> AgentConfig {
    AgentConfig {
        transport_backoff: Duration::from_millis(10),
        network_idle_timeout: Duration::from_millis(200),
        ..AgentConfig::default()
    }
}

pub fn profile_dir() -> PathBuf {
    std::env::temp_dir().join("apply-agent-tests")
}

pub fn click(selector: &str) -> AgentAction {
    AgentAction::Click {
        selector: Some(selector.into()),
        reason: format!("click {}", selector),
    }
}

pub fn fill(selector: &str, value: &str) -> AgentAction {
    AgentAction::Fill {
        selector: Some(selector.into()),
        value: Some(value.into()),
        reason: format!("fill {}", selector),
    }
}

pub fn scroll() -> AgentAction {
    AgentAction::Scroll {
        direction: Some(ScrollDirection::Down),
        amount: None,
        reason: "look further down".into(),
    }
}

pub fn checkpoint(kind: apply_agent::CheckpointKind, message: &str) -> AgentAction {
    AgentAction::Checkpoint {
        checkpoint_type: kind,
        message: message.into(),
        questions: Vec::new(),
        reason: "need a human".into(),
    }
}

pub fn done(success: bool, message: &str) -> AgentAction {
    AgentAction::Done {
        success,
        message: message.into(),
        confirmation_id: None,
        reason: "finished".into(),
    }
}
