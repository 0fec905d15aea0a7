//! Browser seams. The executor and session manager only see these traits;
//! `chrome` provides the headless_chrome backend.

use crate::error::{PageError, SessionError};
use crate::types::ScrollDirection;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One tab owned by one application run.
#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), PageError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), PageError>;

    /// Replace the value of a text input.
    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), PageError>;

    /// Choose an option by value or visible label.
    async fn select_option(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<(), PageError>;

    async fn set_checked(
        &self,
        selector: &str,
        checked: bool,
        timeout: Duration,
    ) -> Result<(), PageError>;

    async fn upload(&self, selector: &str, file: &Path, timeout: Duration)
    -> Result<(), PageError>;

    async fn scroll(&self, direction: ScrollDirection, pixels: u32) -> Result<(), PageError>;

    /// Resolves once network activity settles, or fails with `Timeout`.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), PageError>;

    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;

    async fn url(&self) -> Result<String, PageError>;

    async fn title(&self) -> Result<String, PageError>;

    async fn close(&self) -> Result<(), PageError>;
}

/// A persistent browser context: shared cookies and storage, many tabs.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Cheap liveness probe of the underlying connection.
    async fn is_alive(&self) -> bool;

    async fn new_page(&self) -> Result<Box<dyn Page>, PageError>;

    async fn close(&self) -> Result<(), PageError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile_dir: &Path) -> Result<Arc<dyn BrowserContext>, SessionError>;
}
