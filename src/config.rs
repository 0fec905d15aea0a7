use std::path::PathBuf;
use std::time::Duration;

/// Timeouts and budgets for one application run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Coarse circuit breaker on decided actions, independent of wall-clock time.
    pub max_steps: u32,
    pub action_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Best-effort wait after `navigate`/`click`. Expiry is not an error.
    pub network_idle_timeout: Duration,
    pub checkpoint_timeout: Duration,
    pub checkpoint_poll_interval: Duration,
    /// Entries kept in the sliding conversation window.
    pub history_window: usize,
    /// Most recent turns sent along with each decision.
    pub decision_history_turns: usize,
    /// Trailing screenshots kept for the final result.
    pub screenshot_window: usize,
    pub transport_backoff: Duration,
    /// Consecutive transport/capture failures tolerated before giving up.
    pub max_transient_retries: u32,
    /// Refuse `done(success: true)` until a review checkpoint was approved.
    pub require_review_before_done: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            action_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
            network_idle_timeout: Duration::from_secs(5),
            checkpoint_timeout: Duration::from_secs(300),
            checkpoint_poll_interval: Duration::from_secs(1),
            history_window: 20,
            decision_history_turns: 10,
            screenshot_window: 3,
            transport_backoff: Duration::from_secs(2),
            max_transient_retries: 10,
            require_review_before_done: true,
        }
    }
}

impl AgentConfig {
    /// Defaults, overridden by `APPLY_AGENT_*` variables where set and parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("APPLY_AGENT_MAX_STEPS") {
            config.max_steps = v;
        }
        if let Some(v) = env_secs("APPLY_AGENT_ACTION_TIMEOUT_SECS") {
            config.action_timeout = v;
        }
        if let Some(v) = env_secs("APPLY_AGENT_NAVIGATION_TIMEOUT_SECS") {
            config.navigation_timeout = v;
        }
        if let Some(v) = env_secs("APPLY_AGENT_CHECKPOINT_TIMEOUT_SECS") {
            config.checkpoint_timeout = v;
        }
        if let Some(v) = env_parse::<u64>("APPLY_AGENT_CHECKPOINT_POLL_MS") {
            config.checkpoint_poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("APPLY_AGENT_HISTORY_WINDOW") {
            config.history_window = v;
        }
        if let Some(v) = env_parse("APPLY_AGENT_REQUIRE_REVIEW") {
            config.require_review_before_done = v;
        }
        config
    }
}

/// Where and how the persistent browser context is launched.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Attach to an already running Chrome (e.g. `http://127.0.0.1:9222`) before launching.
    pub debugger_url: Option<String>,
    pub window_size: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        let profile_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("apply-agent")
            .join("profile");
        Self {
            profile_dir,
            headless: false,
            chrome_path: None,
            debugger_url: None,
            window_size: (1280, 900),
        }
    }
}

/// Connection settings for the OpenAI-compatible vision endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Reads `OPENAI_API_KEY`, plus optional `OPENAI_BASE_URL` and `APPLY_AGENT_MODEL`.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("APPLY_AGENT_MODEL") {
            config.model = model;
        }
        Some(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
