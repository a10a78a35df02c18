use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::diagram::fallback_svg;
use crate::error::ReferenceError;
use crate::export::{build_pptx, pptx_filename, PPTX_CONTENT_TYPE};
use crate::render::{RenderEvent, Typewriter};
use crate::session::{Reply, SessionContext, SessionSnapshot};

/// Event pushed to every connected page.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastMessage {
    fn new(message_type: &str, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            payload,
        }
    }
}

/// Message sent by the page over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat { text: String },
    Clear,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub accepted: bool,
    pub detail: String,
}

#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    session: Arc<Mutex<SessionContext>>,
    settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(1024);
        Self {
            templates: Arc::new(create_minijinja_env(settings.template_dir.clone())),
            broadcast_tx,
            session: Arc::new(Mutex::new(SessionContext::new(&settings))),
            settings: Arc::new(settings),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.broadcast_tx.subscribe()
    }

    fn broadcast(&self, message_type: &str, payload: serde_json::Value) {
        if self
            .broadcast_tx
            .send(BroadcastMessage::new(message_type, payload))
            .is_err()
        {
            debug!(message_type, "No WebSocket clients to receive broadcast");
        }
    }
}

fn create_minijinja_env(template_dir: PathBuf) -> AutoReloader {
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&template_dir));
        notifier.watch_path(&template_dir, true);
        Ok(env)
    })
}

async fn index_handler(State(state): State<AppState>) -> Response {
    let rendered = state.templates.acquire_env().and_then(|env| {
        env.get_template("index.html").and_then(|tmpl| {
            tmpl.render(minijinja::context! {
                title => "LP企画チャット",
                text_provider => state.settings.text.provider.to_string(),
                text_model => state.settings.text.model.clone(),
                diagram_provider => state.settings.diagram.provider.to_string(),
                diagram_model => state.settings.diagram.model.clone(),
            })
        })
    });

    match rendered {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
                .into_response()
        }
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.subscribe();
    let (client_tx, _worker) = spawn_client_worker(state.clone());

    let welcome = BroadcastMessage::new("Info", json!({ "message": "Connected" }));
    if let Ok(json_msg) = serde_json::to_string(&welcome) {
        if sender.send(Message::Text(json_msg)).await.is_err() {
            warn!("Failed to send welcome message to new WebSocket client");
            return;
        }
    }

    loop {
        tokio::select! {
            received = broadcast_rx.recv() => {
                let msg = match received {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged behind broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match serde_json::to_string(&msg) {
                    Ok(json_msg) => {
                        if sender.send(Message::Text(json_msg)).await.is_err() {
                            warn!("WebSocket client disconnected or send error. Closing connection.");
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize broadcast message: {}", e),
                }
            }

            Some(Ok(msg)) = receiver.next() => {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => {
                            if client_tx.send(message).is_err() {
                                error!("Client message worker stopped. Closing connection.");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed client message"),
                    },
                    Message::Binary(_) => warn!("Received unexpected binary message from client"),
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                }
            }

            else => {
                info!("WebSocket client disconnected");
                break;
            }
        }
    }
    info!("WebSocket connection closed");
}

/// Start the task that handles one connection's messages in arrival order.
///
/// The task drains whatever is queued and exits once every sender is dropped.
pub fn spawn_client_worker(state: AppState) -> (mpsc::UnboundedSender<ClientMessage>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ClientMessage>();
    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                ClientMessage::Chat { text } => process_chat(&state, text).await,
                ClientMessage::Clear => {
                    clear_session(&state).await;
                }
            }
        }
        debug!("Client message worker finished");
    });
    (tx, handle)
}

/// Run one chat message through the session and broadcast the rendered reply.
///
/// The session lock is held until the last event is sent, so requests are
/// answered one at a time and clear/upload wait for the reply to finish.
pub async fn process_chat(state: &AppState, text: String) {
    let text = text.trim().to_string();
    if text.is_empty() {
        return;
    }

    let mut session = state.session.lock().await;
    state.broadcast("UserMessage", json!({ "text": text }));

    let reply = session.respond(&text, state.settings.as_ref()).await;
    let Some(reply_text) = reply.text() else {
        return;
    };

    if let Reply::Failed(err) = &reply {
        state.broadcast(
            "Error",
            json!({ "kind": err.kind(), "message": err.user_message() }),
        );
        state.broadcast("Diagram", json!({ "svg": fallback_svg(), "fallback": true }));
    }

    let typewriter = Typewriter::new(state.settings.chunk_chars, state.settings.render_delay);
    let mut events = Box::pin(typewriter.render(&reply_text, reply.diagram()));
    while let Some(event) = events.next().await {
        match event {
            RenderEvent::Text(chunk) => state.broadcast("AssistantChunk", json!({ "text": chunk })),
            RenderEvent::Diagram(svg) => {
                state.broadcast("Diagram", json!({ "svg": svg, "fallback": false }))
            }
            RenderEvent::Done => state.broadcast("AssistantDone", json!({ "text": reply_text })),
        }
    }
}

async fn clear_session(state: &AppState) -> SessionSnapshot {
    let mut session = state.session.lock().await;
    session.clear();
    let snapshot = session.snapshot();
    state.broadcast("Cleared", json!(snapshot));
    snapshot
}

async fn clear_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(clear_session(&state).await)
}

async fn session_handler(State(state): State<AppState>) -> Json<SessionSnapshot> {
    let session = state.session.lock().await;
    Json(session.snapshot())
}

fn upload_response<T>(kind: &str, result: Result<T, ReferenceError>, accepted: impl FnOnce(T) -> String) -> Json<UploadResponse> {
    match result {
        Ok(value) => Json(UploadResponse {
            accepted: true,
            detail: accepted(value),
        }),
        Err(e) => Json(UploadResponse {
            accepted: false,
            detail: format!("{}を利用できません: {}", kind, e),
        }),
    }
}

async fn upload_csv_handler(State(state): State<AppState>, body: Bytes) -> Json<UploadResponse> {
    let mut session = state.session.lock().await;
    let result = session
        .upload_csv(&body)
        .map(|csv| (csv.total_rows, csv.num_columns()));
    let response = upload_response("CSV", result, |(rows, columns)| {
        format!("CSVを読み込みました: {}行 × {}列", rows, columns)
    });
    info!(accepted = response.accepted, bytes = body.len(), "CSV upload");
    response
}

async fn upload_svg_handler(State(state): State<AppState>, body: Bytes) -> Json<UploadResponse> {
    let mut session = state.session.lock().await;
    let result = session.upload_svg(&body).map(|_| ());
    let response = upload_response("SVG", result, |_| {
        "SVGを参考レイアウトとして読み込みました".to_string()
    });
    info!(accepted = response.accepted, bytes = body.len(), "SVG upload");
    response
}

async fn diagram_handler(State(state): State<AppState>) -> Response {
    let session = state.session.lock().await;
    match session.last_diagram() {
        Some(svg) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg.to_string()).into_response(),
        None => (StatusCode::NOT_FOUND, "No diagram yet").into_response(),
    }
}

async fn pptx_handler(State(state): State<AppState>) -> Response {
    let outcome = {
        let session = state.session.lock().await;
        session.last_outcome().cloned()
    };
    let Some(outcome) = outcome else {
        return (StatusCode::NOT_FOUND, "No diagram yet").into_response();
    };

    let created = Local::now();
    let filename = pptx_filename(&outcome.theme, created);
    match tokio::task::spawn_blocking(move || build_pptx(&outcome, created)).await {
        Ok(Ok(bytes)) => (
            [
                (header::CONTENT_TYPE, PPTX_CONTENT_TYPE.to_string()),
                (header::CONTENT_DISPOSITION, attachment_header(&filename)),
            ],
            bytes,
        )
            .into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "PowerPoint export failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "PowerPoint export failed").into_response()
        }
        Err(e) => {
            error!("PowerPoint export task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "PowerPoint export failed").into_response()
        }
    }
}

/// `Content-Disposition` with an ASCII fallback name and the UTF-8 name.
fn attachment_header(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
        .collect();
    let encoded: String = filename
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => (b as char).to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect();
    format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", fallback, encoded)
}

/// All routes, with state attached.
pub fn router(state: AppState) -> Router {
    let static_files_service = ServeDir::new(&state.settings.static_dir).not_found_service(
        tower::service_fn(|_| async {
            Ok::<_, Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
        }),
    );

    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/upload/csv", post(upload_csv_handler))
        .route("/api/upload/svg", post(upload_svg_handler))
        .route("/api/clear", post(clear_handler))
        .route("/api/session", get(session_handler))
        .route("/api/diagram.svg", get(diagram_handler))
        .route("/api/diagram.pptx", get(pptx_handler))
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(host: &str, port: u16, settings: Settings) -> Result<()> {
    let app = router(AppState::new(settings));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;
    info!("Web server listening on http://{}", addr);

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}
