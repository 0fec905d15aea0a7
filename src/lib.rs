//! # apply-agent
//!
//! Fills in online job applications by driving a browser through an
//! observe → decide → act loop. Each decision comes from a vision model; the
//! loop pauses for a human at login, CAPTCHA, unclear questions and before
//! the final submission.
//!
//! ```rust,no_run
//! use apply_agent::{
//!     AgentConfig, ApplicantProfile, ApplyAgent, ApplyRequest, BrokerConfig, BrowserConfig,
//!     CheckpointBroker, ChromeLauncher, MemoryCheckpointStore, OpenAiConfig, OpenAiVision,
//!     SessionManager,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let browser = BrowserConfig::default();
//! let profile_dir = browser.profile_dir.clone();
//! let session = Arc::new(SessionManager::new(Arc::new(ChromeLauncher::new(browser)), profile_dir));
//! let brain = Arc::new(OpenAiVision::new(OpenAiConfig::new("sk-..."))?);
//! let agent = ApplyAgent::new(session.clone(), brain, AgentConfig::default());
//!
//! let store = Arc::new(MemoryCheckpointStore::new());
//! let notify = |r: &apply_agent::CheckpointRecord| println!("checkpoint {} waiting", r.id);
//! let broker = Arc::new(CheckpointBroker::new(store, Arc::new(notify), BrokerConfig::default()));
//!
//! let request = ApplyRequest::new(
//!     "https://jobs.example.com/apply/123",
//!     ApplicantProfile::default(),
//!     "resume text",
//!     broker,
//! );
//! let result = agent.apply_to_job(request).await;
//! println!("{:?}: {}", result.outcome, result.message);
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod brain;
pub mod checkpoint;
pub mod chrome;
pub mod config;
pub mod dom;
pub mod error;
pub mod hands;
pub mod page;
pub mod session;
pub mod state;
pub mod types;

pub use agent::{ApplyAgent, ApplyHooks, ApplyRequest};
pub use brain::{DecisionModel, DecisionRequest, OpenAiVision};
pub use checkpoint::{
    BrokerConfig, CheckpointBroker, CheckpointNotifier, CheckpointStore, MemoryCheckpointStore,
};
pub use chrome::ChromeLauncher;
pub use config::{AgentConfig, BrowserConfig, OpenAiConfig};
pub use error::{ActionError, DecisionError, PageError, SessionError, StoreError};
pub use hands::{ActionOutcome, ExecContext, Secrets, Timeouts, UploadFiles};
pub use page::{BrowserContext, BrowserLauncher, Page};
pub use session::{PageLease, SessionManager};
pub use state::{AgentState, History, Role, Turn};
pub use types::{
    AgentAction, ApplicantProfile, ApplyJobResult, CheckpointData, CheckpointId, CheckpointKind,
    CheckpointRecord, CheckpointReply, CheckpointResponse, CheckpointStatus, Credentials,
    FileKind, Outcome, ScrollDirection,
};
