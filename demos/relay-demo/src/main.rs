//! Relay demo: a scripted agent streamed to browsers over SSE.
//!
//! Run with: cargo run -p relay-demo
//!
//! Then open http://localhost:3000, type a prompt and watch the reply
//! arrive fragment by fragment.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use agent_stream_core::{
    AgentStreamEvent, MemoryLogStore, ModelMessage, ModelRequest, ModelResponse, SessionKey,
    StreamConfig,
    messages::{
        PartDelta, RequestPart, ResponsePart, TextPart, ToolArgs, ToolCallPart, ToolReturnPart,
    },
};
use agent_stream_reassembler::StreamDeps;
use agent_stream_session::{
    Agent, AgentError, AgentNode, AgentRun, HistoryStorage, MemoryStorage, Session,
    StoredSession, run,
};
use agent_stream_transport::{ListenOptions, SessionListener, SessionRegistry, StreamWriter};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        Html, IntoResponse,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCOPE_ID: i64 = 1;
const USER_ID: i64 = 1;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    writer: StreamWriter,
    listener: SessionListener,
    registry: SessionRegistry,
    storage: Arc<dyn HistoryStorage>,
}

/// Dependencies handed to the agent for one run.
struct DemoDeps {
    session_id: String,
    delay: Duration,
    writer: StreamWriter,
}

impl StreamDeps for DemoDeps {
    fn scope_id(&self) -> i64 {
        SCOPE_ID
    }

    fn user_id(&self) -> i64 {
        USER_ID
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(StreamConfig::from_env());
    let store = Arc::new(MemoryLogStore::new());

    let state = AppState {
        writer: StreamWriter::new(store.clone(), Arc::clone(&config)),
        listener: SessionListener::new(store.clone(), Arc::clone(&config)),
        registry: SessionRegistry::new(store, config),
        storage: Arc::new(MemoryStorage::new()),
    };

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/sessions", get(list_handler))
        .route("/sessions/{session_id}/run", post(run_handler))
        .route("/sessions/{session_id}/events", get(events_handler))
        .route("/sessions/{session_id}/cancel", post(cancel_handler))
        .route("/sessions/{session_id}/history", get(history_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {addr}: {e}");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {e}");
    }
}

fn session_key(session_id: &str) -> SessionKey {
    SessionKey::new(SCOPE_ID, USER_ID, session_id)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    let live: Result<Vec<SessionKey>, _> = state
        .registry
        .query(Some(SCOPE_ID), Some(USER_ID))
        .try_collect()
        .await;
    let stored = state.storage.list(Some(SCOPE_ID), Some(USER_ID)).await;

    match (live, stored) {
        (Ok(live), Ok(stored)) => {
            let sessions: Vec<_> = stored
                .iter()
                .map(|record| {
                    json!({
                        "session_id": record.key.session_id,
                        "title": record.title,
                        "updated_at": record.updated_at,
                        "live": live.contains(&record.key),
                    })
                })
                .collect();
            Json(json!({ "live": live, "sessions": sessions })).into_response()
        }
        (Err(e), _) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        (_, Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct RunRequest {
    prompt: String,
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

const fn default_delay_ms() -> u64 {
    150
}

async fn run_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<RunRequest>,
) -> impl IntoResponse {
    let deps = DemoDeps {
        session_id: session_id.clone(),
        delay: Duration::from_millis(req.delay_ms),
        writer: state.writer.clone(),
    };

    tokio::spawn(async move {
        let mut session = StoredSession::new(deps.session_key(), state.storage);
        match run(&mut session, &EchoAgent, &req.prompt, &deps, &state.writer).await {
            Ok(messages) => tracing::info!(
                session_id = %deps.session_id,
                new_messages = messages.len(),
                title = %session.get_user_prompt(),
                "Demo run complete"
            ),
            Err(e) => tracing::warn!(session_id = %deps.session_id, "Demo run failed: {e}"),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({ "session_id": session_id })))
}

async fn events_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let stream = state
        .listener
        .sse_stream(&session_key(&session_id), ListenOptions::default());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn cancel_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.writer.cancel(&session_key(&session_id)).await {
        Ok(cancelled) => Json(json!({ "cancelled": cancelled })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn history_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let mut session = StoredSession::new(session_key(&session_id), state.storage);
    if let Err(e) = session.load().await {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    match session.history().to_nodes() {
        Ok(nodes) => Json(json!({
            "title": session.get_user_prompt(),
            "nodes": nodes,
        }))
        .into_response(),
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response(),
    }
}

/// Agent that "looks up" the prompt with a fake tool, then echoes it back
/// word by word. Stops between nodes once the session is cancelled.
struct EchoAgent;

#[async_trait]
impl Agent<DemoDeps> for EchoAgent {
    async fn iter(
        &self,
        prompt: &str,
        history: &[ModelMessage],
        deps: &DemoDeps,
    ) -> Result<Box<dyn AgentRun>, AgentError> {
        if prompt.trim().is_empty() {
            return Err(AgentError::Model("prompt is empty".into()));
        }
        Ok(Box::new(EchoRun {
            prompt: prompt.to_string(),
            turn: history.len() / 2,
            delay: deps.delay,
            writer: deps.writer.clone(),
            key: deps.session_key(),
            step: 0,
            messages: Vec::new(),
        }))
    }
}

struct EchoRun {
    prompt: String,
    turn: usize,
    delay: Duration,
    writer: StreamWriter,
    key: SessionKey,
    step: u8,
    messages: Vec<ModelMessage>,
}

impl EchoRun {
    fn paced(
        &self,
        events: Vec<AgentStreamEvent>,
    ) -> BoxStream<'static, Result<AgentStreamEvent, AgentError>> {
        let delay = self.delay;
        futures::stream::iter(events)
            .then(move |event| async move {
                tokio::time::sleep(delay).await;
                Ok(event)
            })
            .boxed()
    }

    fn lookup_node(&mut self) -> AgentNode {
        let call_id = format!("lookup-{}", self.turn);
        let args = json!({ "query": self.prompt }).to_string();
        let mid = args
            .char_indices()
            .nth(args.chars().count() / 2)
            .map_or(args.len(), |(i, _)| i);
        let (head, tail) = args.split_at(mid);

        let events = vec![
            AgentStreamEvent::PartStart {
                index: 0,
                part: ResponsePart::ToolCall(ToolCallPart {
                    tool_name: "look".into(),
                    args: None,
                    tool_call_id: call_id.clone(),
                }),
            },
            tool_delta(&call_id, Some("up"), head),
            tool_delta(&call_id, None, tail),
        ];

        let request = ModelRequest::user_prompt(self.prompt.clone());
        self.messages.push(ModelMessage::Request(request.clone()));
        self.messages.push(ModelMessage::Response(ModelResponse {
            parts: vec![ResponsePart::ToolCall(ToolCallPart {
                tool_name: "lookup".into(),
                args: Some(ToolArgs::Json(args.clone())),
                tool_call_id: call_id,
            })],
            model_name: Some("echo".into()),
        }));

        AgentNode::ModelRequest {
            request,
            events: self.paced(events),
        }
    }

    fn answer_node(&mut self) -> AgentNode {
        let call_id = format!("lookup-{}", self.turn);
        let request = ModelRequest {
            parts: vec![RequestPart::ToolReturn(ToolReturnPart {
                tool_name: "lookup".into(),
                content: json!({ "found": self.prompt.split_whitespace().count() }),
                tool_call_id: call_id,
            })],
            instructions: None,
        };

        let mut events = vec![
            AgentStreamEvent::FinalResult {
                tool_name: None,
                tool_call_id: None,
            },
            AgentStreamEvent::PartStart {
                index: 0,
                part: ResponsePart::Text(TextPart {
                    content: "You said:".into(),
                }),
            },
        ];
        events.extend(self.prompt.split_whitespace().map(|word| {
            AgentStreamEvent::PartDelta {
                index: 0,
                delta: PartDelta::Text {
                    content_delta: format!(" {word}"),
                },
            }
        }));

        self.messages.push(ModelMessage::Request(request.clone()));
        self.messages.push(ModelMessage::Response(ModelResponse {
            parts: vec![ResponsePart::Text(TextPart {
                content: format!("You said: {}", self.prompt),
            })],
            model_name: Some("echo".into()),
        }));

        AgentNode::ModelRequest {
            request,
            events: self.paced(events),
        }
    }
}

fn tool_delta(call_id: &str, name: Option<&str>, args: &str) -> AgentStreamEvent {
    AgentStreamEvent::PartDelta {
        index: 0,
        delta: PartDelta::ToolCall {
            tool_name_delta: name.map(str::to_string),
            args_delta: Some(args.to_string()),
            tool_call_id: Some(call_id.to_string()),
        },
    }
}

#[async_trait]
impl AgentRun for EchoRun {
    async fn next_node(&mut self) -> Option<Result<AgentNode, AgentError>> {
        match self.writer.is_live(&self.key).await {
            Ok(true) => {}
            Ok(false) => return Some(Err(AgentError::Cancelled)),
            Err(e) => return Some(Err(AgentError::Model(e.to_string()))),
        }
        self.step += 1;
        match self.step {
            1 => Some(Ok(self.lookup_node())),
            2 => Some(Ok(AgentNode::Other)),
            3 => Some(Ok(self.answer_node())),
            _ => None,
        }
    }

    fn new_messages(&self) -> Vec<ModelMessage> {
        self.messages.clone()
    }
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Agent Stream - Relay Demo</title>
    <style>
        body { margin: 0; padding: 20px; background: #1e1e1e; color: #d4d4d4; font-family: system-ui, sans-serif; }
        h1 { color: #fff; margin-bottom: 10px; }
        #log { font-family: Menlo, Monaco, monospace; font-size: 13px; white-space: pre-wrap; }
        #answer { font-size: 18px; margin: 16px 0; color: #fff; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
    </style>
</head>
<body>
    <h1>Agent Stream Relay</h1>
    <form id="form">
        <input id="prompt" size="60" placeholder="Say something" />
        <button type="submit">Run</button>
        <button type="button" id="cancel">Cancel</button>
    </form>
    <div class="status" id="status">Idle</div>
    <div id="answer"></div>
    <div id="log"></div>

    <script>
        const sessionId = crypto.randomUUID();
        const status = document.getElementById('status');
        const answer = document.getElementById('answer');
        const log = document.getElementById('log');

        function listen() {
            const source = new EventSource(`/sessions/${sessionId}/events`);
            for (const type of ['begin', 'event', 'error', 'info']) {
                source.addEventListener(type, (e) => {
                    const wrapper = JSON.parse(e.data);
                    const body = wrapper.body ? JSON.parse(atob(wrapper.body)) : null;
                    log.textContent += `${wrapper.type} ${wrapper.origin} ${JSON.stringify(body)}\n`;
                    if (body && body.part_kind === 'text') answer.textContent = body.content;
                    if (body && body.part_delta_kind === 'text') answer.textContent += body.content_delta;
                });
            }
            source.onerror = () => {
                source.close();
                status.textContent = 'Done';
            };
        }

        document.getElementById('form').addEventListener('submit', async (e) => {
            e.preventDefault();
            answer.textContent = '';
            log.textContent = '';
            status.textContent = 'Running';
            await fetch(`/sessions/${sessionId}/run`, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ prompt: document.getElementById('prompt').value }),
            });
            listen();
        });

        document.getElementById('cancel').addEventListener('click', () => {
            fetch(`/sessions/${sessionId}/cancel`, { method: 'POST' });
        });
    </script>
</body>
</html>
"#;
