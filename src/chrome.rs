//! headless_chrome backend for the browser seams.
//!
//! headless_chrome is synchronous, so every call runs on the blocking pool.

use crate::config::BrowserConfig;
use crate::dom;
use crate::error::{PageError, SessionError};
use crate::page::{BrowserContext, BrowserLauncher, Page};
use crate::types::ScrollDirection;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::DOM;
use headless_chrome::protocol::cdp::Page as CdpPage;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Network is considered idle once the resource count is stable this long.
const IDLE_QUIET_WINDOW: Duration = Duration::from_millis(500);
const IDLE_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Must outlast the longest checkpoint wait, during which no CDP traffic flows.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, profile_dir: &Path) -> Result<Arc<dyn BrowserContext>, SessionError> {
        let config = self.config.clone();
        let profile_dir = profile_dir.to_path_buf();
        let browser = tokio::task::spawn_blocking(move || launch_blocking(&config, profile_dir))
            .await
            .map_err(|e| SessionError::Launch(format!("launch task failed: {e}")))??;
        Ok(Arc::new(ChromeContext::new(browser)))
    }
}

fn launch_blocking(config: &BrowserConfig, profile_dir: PathBuf) -> Result<Browser, SessionError> {
    if let Some(ref url) = config.debugger_url {
        info!("Attempting to attach to existing Chrome at {}", url);
        match Browser::connect(url.clone()) {
            Ok(browser) => {
                info!("Attached to existing Chrome");
                return Ok(browser);
            }
            Err(e) => warn!("Could not attach ({}), launching instead", e),
        }
    }

    std::fs::create_dir_all(&profile_dir)
        .map_err(|e| SessionError::Launch(format!("profile dir {:?}: {}", profile_dir, e)))?;

    let options = LaunchOptions {
        headless: config.headless,
        path: config.chrome_path.clone().or_else(find_chrome),
        user_data_dir: Some(profile_dir.clone()),
        window_size: Some(config.window_size),
        args: vec![
            OsStr::new("--no-first-run"),
            OsStr::new("--no-default-browser-check"),
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--password-store=basic"),
        ],
        idle_browser_timeout: IDLE_BROWSER_TIMEOUT,
        ..Default::default()
    };

    info!(profile = ?profile_dir, headless = config.headless, "Launching Chrome");
    Browser::new(options).map_err(|e| SessionError::Launch(e.to_string()))
}

/// Well-known install locations; `None` lets headless_chrome search on its own.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
        PathBuf::from("/usr/bin/chromium-browser"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
    }
    candidates.into_iter().find(|p| p.exists())
}

/// One launched (or attached) Chrome with its persistent profile.
pub struct ChromeContext {
    browser: Mutex<Option<Arc<Browser>>>,
}

impl ChromeContext {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser: Mutex::new(Some(Arc::new(browser))),
        }
    }

    fn browser(&self) -> Result<Arc<Browser>, PageError> {
        self.browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| PageError::Closed("browser context was closed".into()))
    }
}

#[async_trait]
impl BrowserContext for ChromeContext {
    async fn is_alive(&self) -> bool {
        let Ok(browser) = self.browser() else {
            return false;
        };
        tokio::task::spawn_blocking(move || browser.get_version().is_ok())
            .await
            .unwrap_or(false)
    }

    async fn new_page(&self) -> Result<Box<dyn Page>, PageError> {
        let browser = self.browser()?;
        let tab = tokio::task::spawn_blocking(move || browser.new_tab())
            .await
            .map_err(|e| PageError::Closed(format!("tab worker failed: {e}")))?
            .map_err(classify)?;
        debug!("Opened new tab");
        Ok(Box::new(ChromePage { tab }))
    }

    async fn close(&self) -> Result<(), PageError> {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(browser) = browser {
            // Dropping the last handle shuts down a launched process.
            tokio::task::spawn_blocking(move || drop(browser))
                .await
                .map_err(|e| PageError::Browser(e.to_string()))?;
        }
        Ok(())
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn run<T, F>(&self, op: F) -> Result<T, PageError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, PageError> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|e| PageError::Closed(format!("tab worker failed: {e}")))?
    }

    /// Evaluate a page-side helper and map its status string.
    async fn script(&self, selector: &str, script: String) -> Result<(), PageError> {
        let selector = selector.to_string();
        self.run(move |tab| run_helper(tab, &selector, &script)).await
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), PageError> {
        let url = url.to_string();
        self.run(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| match classify_within(e, timeout) {
                    PageError::Browser(reason) => PageError::Navigation { url, reason },
                    other => other,
                })
        })
        .await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), PageError> {
        let selector = selector.to_string();
        self.run(move |tab| {
            let el = find(tab, &selector, timeout)?;
            el.click().map_err(|e| classify_within(e, timeout))?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), PageError> {
        let selector = selector.to_string();
        let value = value.to_string();
        self.run(move |tab| {
            let el = find(tab, &selector, timeout)?;
            el.click().map_err(|e| classify_within(e, timeout))?;
            run_helper(tab, &selector, &dom::invoke(dom::CLEAR_JS, &[&selector]))?;
            tab.type_str(&value).map_err(|e| classify_within(e, timeout))?;
            Ok(())
        })
        .await
    }

    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let owned = selector.to_string();
        self.run(move |tab| find(tab, &owned, timeout).map(|_| ()))
            .await?;
        self.script(selector, dom::invoke(dom::SELECT_JS, &[selector, value]))
            .await
    }

    async fn set_checked(
        &self,
        selector: &str,
        checked: bool,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let owned = selector.to_string();
        self.run(move |tab| find(tab, &owned, timeout).map(|_| ()))
            .await?;
        let wanted = if checked { "true" } else { "false" };
        self.script(selector, dom::invoke(dom::CHECK_JS, &[selector, wanted]))
            .await
    }

    async fn upload(
        &self,
        selector: &str,
        file: &Path,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let selector = selector.to_string();
        let file = file.to_string_lossy().into_owned();
        self.run(move |tab| {
            let el = find(tab, &selector, timeout)?;
            tab.call_method(DOM::SetFileInputFiles {
                files: vec![file],
                node_id: None,
                backend_node_id: None,
                object_id: Some(el.remote_object_id.clone()),
            })
            .map_err(|e| classify_within(e, timeout))?;
            Ok(())
        })
        .await
    }

    async fn scroll(&self, direction: ScrollDirection, pixels: u32) -> Result<(), PageError> {
        let dy = match direction {
            ScrollDirection::Down => i64::from(pixels),
            ScrollDirection::Up => -i64::from(pixels),
        };
        self.script("window", dom::invoke(dom::SCROLL_JS, &[&dy.to_string()]))
            .await
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), PageError> {
        let deadline = Instant::now() + timeout;
        let mut last: Option<u64> = None;
        let mut quiet_since = Instant::now();
        loop {
            let sample = self
                .run(|tab| {
                    dom::eval_string(tab, &dom::invoke(dom::IDLE_PROBE_JS, &[])).map_err(classify)
                })
                .await?;
            let now = Instant::now();
            match dom::parse_idle_probe(&sample) {
                Some((true, count)) if last == Some(count) => {
                    if now.duration_since(quiet_since) >= IDLE_QUIET_WINDOW {
                        return Ok(());
                    }
                }
                Some((_, count)) => {
                    last = Some(count);
                    quiet_since = now;
                }
                None => quiet_since = now,
            }
            if now >= deadline {
                return Err(PageError::Timeout(timeout));
            }
            tokio::time::sleep(IDLE_PROBE_INTERVAL).await;
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        self.run(|tab| {
            tab.capture_screenshot(CdpPage::CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(classify)
        })
        .await
    }

    async fn url(&self) -> Result<String, PageError> {
        self.run(|tab| dom::get_current_url(tab).map_err(classify))
            .await
    }

    async fn title(&self) -> Result<String, PageError> {
        self.run(|tab| dom::get_page_title(tab).map_err(classify))
            .await
    }

    async fn close(&self) -> Result<(), PageError> {
        self.run(|tab| tab.close(true).map(|_| ()).map_err(classify))
            .await
    }
}

fn find<'a>(
    tab: &'a Tab,
    selector: &str,
    timeout: Duration,
) -> Result<headless_chrome::Element<'a>, PageError> {
    tab.wait_for_element_with_custom_timeout(selector, timeout)
        .map_err(|e| match classify(e) {
            closed @ PageError::Closed(_) => closed,
            _ => PageError::ElementNotFound {
                selector: selector.to_string(),
            },
        })
}

/// Map a helper script's status string.
fn run_helper(tab: &Tab, selector: &str, script: &str) -> Result<(), PageError> {
    let status = dom::eval_string(tab, script).map_err(classify)?;
    helper_status(selector, &status)
}

fn helper_status(selector: &str, status: &str) -> Result<(), PageError> {
    match status {
        "ok" => Ok(()),
        "missing" => Err(PageError::ElementNotFound {
            selector: selector.to_string(),
        }),
        other => Err(PageError::Script(format!("'{}': {}", selector, other))),
    }
}

/// headless_chrome reports everything as `anyhow::Error`; pick out dead
/// connections and keep the message for the rest.
fn classify(e: anyhow::Error) -> PageError {
    let text = format!("{:#}", e);
    let lower = text.to_lowercase();
    if lower.contains("connection is closed") || lower.contains("target closed") {
        PageError::Closed(text)
    } else {
        PageError::Browser(text)
    }
}

/// Like `classify`, for calls made under a known budget.
fn classify_within(e: anyhow::Error, budget: Duration) -> PageError {
    match classify(e) {
        PageError::Browser(text) if is_timeout(&text) => PageError::Timeout(budget),
        other => other,
    }
}

fn is_timeout(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("timed out") || lower.contains("timeout")
}
