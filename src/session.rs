use crate::error::SessionError;
use crate::page::{BrowserContext, BrowserLauncher, Page};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};
use tracing::{debug, info, warn};

/// Owns the one persistent browser context for a profile directory and hands
/// out per-run pages from it.
///
/// The context is launched lazily, reused while alive, and relaunched once if
/// a health check finds it dead. `close` waits until every outstanding
/// [`PageLease`] has been released.
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    profile_dir: PathBuf,
    context: Mutex<Option<Arc<dyn BrowserContext>>>,
    leases: Arc<RwLock<()>>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            profile_dir: profile_dir.into(),
            context: Mutex::new(None),
            leases: Arc::new(RwLock::new(())),
        }
    }

    /// Launch the context now instead of on first use.
    pub async fn open(&self) -> Result<(), SessionError> {
        self.live_context().await.map(|_| ())
    }

    /// A fresh page from the shared context.
    pub async fn acquire_page(&self) -> Result<PageLease, SessionError> {
        let guard = Arc::clone(&self.leases).read_owned().await;
        let context = self.live_context().await?;
        let page = context.new_page().await?;
        debug!(profile = ?self.profile_dir, "Page acquired");
        Ok(PageLease {
            page,
            _guard: guard,
        })
    }

    /// Close the context once all leased pages are released.
    pub async fn close(&self) -> Result<(), SessionError> {
        let _exclusive = self.leases.write().await;
        let context = self.context.lock().await.take();
        if let Some(context) = context {
            info!(profile = ?self.profile_dir, "Closing browser context");
            context.close().await?;
        }
        Ok(())
    }

    async fn live_context(&self) -> Result<Arc<dyn BrowserContext>, SessionError> {
        let mut slot = self.context.lock().await;
        if let Some(context) = slot.as_ref() {
            if context.is_alive().await {
                return Ok(Arc::clone(context));
            }
            warn!(profile = ?self.profile_dir, "Browser context disconnected, relaunching");
            if let Some(dead) = slot.take() {
                if let Err(e) = dead.close().await {
                    debug!("Closing dead context failed: {}", e);
                }
            }
        }

        info!(profile = ?self.profile_dir, "Launching browser context");
        let context = self.launcher.launch(&self.profile_dir).await?;
        *slot = Some(Arc::clone(&context));
        Ok(context)
    }
}

/// A page checked out of the session. Holding it blocks `SessionManager::close`.
pub struct PageLease {
    page: Box<dyn Page>,
    _guard: OwnedRwLockReadGuard<()>,
}

impl PageLease {
    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }

    /// Close the tab and give the lease back.
    pub async fn release(self) {
        if let Err(e) = self.page.close().await {
            warn!("Failed to close page: {}", e);
        }
    }
}
