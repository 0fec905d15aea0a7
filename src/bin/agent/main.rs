mod face;

use anyhow::{Context, Result};
use apply_agent::{
    AgentConfig, ApplicantProfile, ApplyAgent, ApplyHooks, ApplyRequest, BrokerConfig,
    BrowserConfig, CheckpointBroker, CheckpointData, CheckpointRecord, CheckpointResponse,
    ChromeLauncher, MemoryCheckpointStore, OpenAiConfig, OpenAiVision, SessionManager,
};
use async_trait::async_trait;
use clap::Parser;
use dotenvy::dotenv;
use face::AgentEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "apply-agent")]
#[command(about = "Fill in an online job application with a human in the loop")]
#[command(version)]
struct Cli {
    /// Application page to start from
    url: String,

    /// Applicant profile (JSON)
    #[arg(long, value_name = "FILE")]
    profile: PathBuf,

    /// Resume as plain text, given to the model and used for uploads
    #[arg(long, value_name = "FILE")]
    resume: PathBuf,

    /// Upload this file as the resume instead of the plain-text version
    #[arg(long, value_name = "FILE")]
    resume_file: Option<PathBuf>,

    /// Cover letter as plain text
    #[arg(long, value_name = "FILE")]
    cover_letter: Option<PathBuf>,

    /// Step budget for this run
    #[arg(long)]
    max_steps: Option<u32>,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Persistent browser profile directory
    #[arg(long, env = "APPLY_AGENT_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    /// Chrome executable
    #[arg(long, env = "APPLY_AGENT_CHROME")]
    chrome_path: Option<PathBuf>,

    /// WebSocket debugger URL of a running Chrome to attach to
    #[arg(long, env = "APPLY_AGENT_DEBUGGER_URL")]
    debugger_url: Option<String>,

    /// First port to try for the responder API
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Routes checkpoints through the broker and mirrors progress onto the SSE stream.
struct UiHooks {
    broker: CheckpointBroker,
    events: broadcast::Sender<AgentEvent>,
}

#[async_trait]
impl ApplyHooks for UiHooks {
    async fn on_checkpoint(
        &self,
        data: CheckpointData,
        cancel: &CancellationToken,
    ) -> CheckpointResponse {
        self.broker.request(data, cancel).await
    }

    fn on_progress(&self, step: u32, action: &str, reason: &str) {
        let _ = self.events.send(AgentEvent::Step {
            number: step,
            action: action.to_string(),
            reason: reason.to_string(),
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let profile: ApplicantProfile = serde_json::from_str(
        &std::fs::read_to_string(&cli.profile)
            .with_context(|| format!("reading profile {:?}", cli.profile))?,
    )
    .context("parsing applicant profile")?;
    let resume_text = std::fs::read_to_string(&cli.resume)
        .with_context(|| format!("reading resume {:?}", cli.resume))?;
    let cover_letter = match cli.cover_letter {
        Some(ref path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading cover letter {:?}", path))?,
        ),
        None => None,
    };

    let openai = OpenAiConfig::from_env().context("OPENAI_API_KEY not set in environment")?;
    let agent_config = AgentConfig::from_env();

    let mut browser = BrowserConfig {
        headless: cli.headless,
        chrome_path: cli.chrome_path,
        debugger_url: cli.debugger_url,
        ..Default::default()
    };
    if let Some(dir) = cli.profile_dir {
        browser.profile_dir = dir;
    }

    // 1. Responder API first, so a human can watch from the start.
    let store = Arc::new(MemoryCheckpointStore::new());
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);
    let port = face::start_server(
        face::AppState {
            store: Arc::clone(&store),
            event_tx: event_tx.clone(),
        },
        cli.port,
    )
    .await?;

    let notifier = {
        let event_tx = event_tx.clone();
        move |record: &CheckpointRecord| {
            info!(
                "Checkpoint {} ({}): {} -- answer with POST http://127.0.0.1:{}/checkpoints/{}",
                record.id, record.data.kind, record.data.message, port, record.id
            );
            let _ = event_tx.send(AgentEvent::Checkpoint {
                id: record.id.clone(),
                kind: record.data.kind,
                message: record.data.message.clone(),
            });
        }
    };
    let broker = CheckpointBroker::new(
        store,
        Arc::new(notifier),
        BrokerConfig {
            poll_interval: agent_config.checkpoint_poll_interval,
            timeout: agent_config.checkpoint_timeout,
        },
    );
    let hooks = Arc::new(UiHooks {
        broker,
        events: event_tx.clone(),
    });

    // 2. Browser session and decision model.
    let profile_dir = browser.profile_dir.clone();
    let session = Arc::new(SessionManager::new(
        Arc::new(ChromeLauncher::new(browser)),
        profile_dir,
    ));
    session.open().await?;
    let brain = Arc::new(OpenAiVision::new(openai)?);
    let agent = ApplyAgent::new(Arc::clone(&session), brain, agent_config);

    // 3. Ctrl-C cancels the run, including any checkpoint wait.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling application");
                cancel.cancel();
            }
        });
    }

    let mut request = ApplyRequest::new(cli.url, profile, resume_text, hooks).with_cancel(cancel);
    if let Some(text) = cover_letter {
        request = request.with_cover_letter(text);
    }
    if let Some(path) = cli.resume_file {
        request = request.with_resume_file(path);
    }
    if let Some(max_steps) = cli.max_steps {
        request = request.with_max_steps(max_steps);
    }

    let result = agent.apply_to_job(request).await;
    let _ = event_tx.send(AgentEvent::Finished {
        outcome: result.outcome,
        success: result.success,
        message: result.message.clone(),
    });

    session.close().await?;

    let mut summary = serde_json::to_value(&result)?;
    if let Some(obj) = summary.as_object_mut() {
        // Base64 screenshots would drown the terminal.
        obj.insert("screenshots".into(), serde_json::json!(result.screenshots.len()));
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
