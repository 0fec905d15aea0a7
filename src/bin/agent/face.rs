use anyhow::{Result, anyhow};
use apply_agent::{
    CheckpointId, CheckpointKind, CheckpointRecord, CheckpointResponse, CheckpointStore,
    MemoryCheckpointStore, Outcome, StoreError,
};
use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Events streamed to the responder via SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Step {
        number: u32,
        action: String,
        reason: String,
    },
    Checkpoint {
        id: CheckpointId,
        kind: CheckpointKind,
        message: String,
    },
    Finished {
        outcome: Outcome,
        success: bool,
        message: String,
    },
}

impl AgentEvent {
    fn to_sse_event(&self) -> Event {
        let name = match self {
            AgentEvent::Step { .. } => "step",
            AgentEvent::Checkpoint { .. } => "checkpoint",
            AgentEvent::Finished { .. } => "finished",
        };
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(name).data(data)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryCheckpointStore>,
    pub event_tx: broadcast::Sender<AgentEvent>,
}

/// Serve the responder API on the first free port from `port`. Returns the bound port.
pub async fn start_server(state: AppState, port: u16) -> Result<u16> {
    let app = Router::new()
        .route("/checkpoints", get(list_handler))
        .route("/checkpoints/{id}", get(get_handler).post(respond_handler))
        .route("/events", get(sse_handler))
        .with_state(Arc::new(state));

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                bound = Some((l, p));
                break;
            }
            Err(e) => debug!("Port {} unavailable: {}", p, e),
        }
    }
    let (listener, port) =
        bound.ok_or_else(|| anyhow!("could not bind any port in {}..{}", port, port.saturating_add(10)))?;

    info!("Responder API listening on http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Responder API stopped: {}", e);
        }
    });

    Ok(port)
}

async fn list_handler(State(state): State<Arc<AppState>>) -> Json<Vec<CheckpointRecord>> {
    Json(state.store.waiting().await)
}

async fn get_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckpointRecord>, (StatusCode, String)> {
    let id = CheckpointId(id);
    match state.store.get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("checkpoint {} not found", id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn respond_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(response): Json<CheckpointResponse>,
) -> Result<Json<CheckpointRecord>, (StatusCode, String)> {
    let id = CheckpointId(id);
    info!(checkpoint = %id, proceed = response.proceed, "Response received");
    state
        .store
        .respond(&id, response)
        .await
        .map(Json)
        .map_err(|e| {
            let status = match e {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::AlreadyResponded(_) => StatusCode::CONFLICT,
            };
            (status, e.to_string())
        })
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream)
}
