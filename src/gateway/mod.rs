//! Axum-based HTTP + WebSocket boundary server.
//!
//! Every request follows the same lifecycle: parse → validate →
//! authenticate → dispatch → respond. Errors become JSON `{error}` bodies;
//! auth rejections answer 403 without error-level logging so probe traffic
//! cannot flood the logs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::bridge::OpenClawBridge;
use crate::config::Config;
use crate::egress::EgressStore;
use crate::ingress::asterisk::{
    EgressChunkBody, EgressQuery, EndCallBody, InboundCallBody, MediaFrameBody,
};
use crate::ingress::twilio::{
    self, dial_response_xml, media_frame, outbound_media_json, parse_stream_message,
    parse_voice_form, StreamMessage,
};
use crate::pipeline::VoiceOrchestrator;
use crate::providers::create_providers;
use crate::session::{now_epoch_ms, IngressSource, LanguageCode, SessionMode, SessionStore};
use crate::util::constant_time_eq;

/// Maximum request body size. Media frames arrive base64-encoded; 256 KiB
/// fits a few seconds of 8 kHz audio per request.
pub const MAX_BODY_SIZE: usize = 262_144;
/// Per-request timeout.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<VoiceOrchestrator>,
    pub store: Arc<SessionStore>,
    pub egress: Arc<EgressStore>,
    pub bridge: Option<Arc<OpenClawBridge>>,
    pub asterisk_secret: Option<Arc<str>>,
    pub control_secret: Option<Arc<str>>,
    pub twilio_auth_token: Option<Arc<str>>,
    pub public_base_url: Option<String>,
}

/// Wire the core together: store, egress, providers, bridge, orchestrator.
pub fn build_state(config: &Config) -> AppState {
    let store = Arc::new(SessionStore::new());
    let egress = Arc::new(EgressStore::new(config.egress_max_queue_per_session));
    let bridge = config.openclaw_bridge.clone().map(OpenClawBridge::start);
    let providers = create_providers(config);

    let mut orchestrator = VoiceOrchestrator::new(
        store.clone(),
        providers,
        config.outbound_target_e164.clone(),
        config.pipeline_min_frame_interval_ms,
    );

    let egress_for_sink = egress.clone();
    orchestrator = orchestrator.with_tts_sink(Arc::new(
        move |chunk: &crate::session::TtsChunk| Some(egress_for_sink.enqueue(chunk.clone())),
    ));

    if let Some(bridge) = &bridge {
        let bridge_for_sink = bridge.clone();
        orchestrator = orchestrator.with_event_sink(Arc::new(move |event| {
            bridge_for_sink.publish_session_event(event);
        }));
    }

    AppState {
        orchestrator: Arc::new(orchestrator),
        store,
        egress,
        bridge,
        asterisk_secret: config.asterisk_shared_secret.as_deref().map(Arc::from),
        control_secret: config.control_api_secret.as_deref().map(Arc::from),
        twilio_auth_token: config.twilio_auth_token.as_deref().map(Arc::from),
        public_base_url: config.public_base_url.clone(),
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-asterisk-secret"),
            header::HeaderName::from_static("x-control-secret"),
            header::HeaderName::from_static("x-twilio-signature"),
        ]);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", get(handle_sessions))
        .route("/metrics", get(handle_metrics))
        .route("/twilio/voice", post(handle_twilio_voice))
        .route("/twilio/stream", get(handle_twilio_stream_ws))
        .route("/asterisk/inbound", post(handle_asterisk_inbound))
        .route("/asterisk/media", post(handle_asterisk_media))
        .route("/asterisk/end", post(handle_asterisk_end))
        .route("/asterisk/egress/next", get(handle_asterisk_egress_next))
        .route("/sessions/control", post(handle_sessions_control))
        .route("/openclaw/command", post(handle_openclaw_command))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
}

/// Bind, serve until SIGINT/SIGTERM, then stop the bridge drainer. Active
/// sessions are not torn down; in-memory state dies with the process.
pub async fn run_gateway(config: Config) -> Result<()> {
    let state = build_state(&config);
    let bridge = state.bridge.clone();
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        outbound_target = %config.outbound_target_e164,
        "Gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(bridge) = bridge {
        bridge.shutdown();
    }
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown signal received; draining in-flight requests");
}

// ── Response helpers ─────────────────────────────────────────────

fn json_error(status: StatusCode, error: &str) -> Response {
    (status, Json(serde_json::json!({ "error": error }))).into_response()
}

fn invalid_payload() -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_payload")
}

fn forbidden() -> Response {
    json_error(StatusCode::FORBIDDEN, "forbidden")
}

fn unknown_session() -> Response {
    json_error(StatusCode::NOT_FOUND, "unknown_session")
}

/// Constant-time shared-secret check. An unset secret disables the check
/// (local development).
fn check_secret(headers: &HeaderMap, header_name: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let provided = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

fn require_asterisk_secret(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if check_secret(headers, "x-asterisk-secret", state.asterisk_secret.as_deref()) {
        Ok(())
    } else {
        tracing::debug!("Rejected request with bad x-asterisk-secret");
        Err(forbidden())
    }
}

fn require_control_secret(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    if check_secret(headers, "x-control-secret", state.control_secret.as_deref()) {
        Ok(())
    } else {
        tracing::debug!("Rejected request with bad x-control-secret");
        Err(forbidden())
    }
}

// ── Observability routes ─────────────────────────────────────────

/// GET /health — liveness, always public.
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.store.count(),
    }))
}

/// GET /sessions — snapshot of every session.
async fn handle_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.store.all();
    Json(serde_json::json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

/// GET /metrics — per-session pipeline metrics snapshot.
async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "sessions": state.orchestrator.metrics_snapshot(),
    }))
}

// ── SIP-bridge routes ────────────────────────────────────────────

/// POST /asterisk/inbound — handshake from the PBX-side bridge.
async fn handle_asterisk_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<InboundCallBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(resp) = require_asterisk_secret(&state, &headers) {
        return resp;
    }
    let Ok(Json(body)) = body else {
        return invalid_payload();
    };
    if let Err(reason) = body.validate() {
        tracing::debug!(reason, "Rejected asterisk inbound payload");
        return invalid_payload();
    }

    let event = body.into_event(now_epoch_ms());
    let session = state.orchestrator.on_incoming_call(&event);
    Json(serde_json::json!({
        "sessionId": session.id,
        "dialTarget": session.outbound_target,
    }))
    .into_response()
}

/// POST /asterisk/media — one audio frame from the bridge.
async fn handle_asterisk_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MediaFrameBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(resp) = require_asterisk_secret(&state, &headers) {
        return resp;
    }
    let Ok(Json(body)) = body else {
        return invalid_payload();
    };

    let Some(session) = state
        .store
        .get_by_external(IngressSource::SipBridge, &body.call_id)
    else {
        return unknown_session();
    };

    let frame = match body.into_frame(&session.id, now_epoch_ms()) {
        Ok(frame) => frame,
        Err(reason) => {
            tracing::debug!(reason, "Rejected asterisk media payload");
            return invalid_payload();
        }
    };

    state.orchestrator.on_audio_frame(&frame).await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "accepted": true,
            "sessionId": session.id,
        })),
    )
        .into_response()
}

/// GET /asterisk/egress/next — poll one translated chunk for delivery.
async fn handle_asterisk_egress_next(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<EgressQuery>, axum::extract::rejection::QueryRejection>,
) -> Response {
    if let Err(resp) = require_asterisk_secret(&state, &headers) {
        return resp;
    }
    let Ok(Query(query)) = query else {
        return invalid_payload();
    };

    let Some(session) = state.store.get_by_external(query.source(), &query.call_id) else {
        return unknown_session();
    };

    match state.egress.dequeue(&session.id) {
        Some(chunk) => {
            let remaining = state.egress.size(&session.id);
            Json(EgressChunkBody::from_chunk(chunk, remaining)).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// POST /asterisk/end — terminate a call and discard queued egress.
async fn handle_asterisk_end(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<EndCallBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(resp) = require_asterisk_secret(&state, &headers) {
        return resp;
    }
    let Ok(Json(body)) = body else {
        return invalid_payload();
    };
    if body.validate().is_err() {
        return invalid_payload();
    }

    let session = match (&body.session_id, &body.call_id) {
        (Some(id), _) => state.store.get(id),
        (None, Some(call_id)) => {
            let source = body.source.unwrap_or(IngressSource::SipBridge);
            state.store.get_by_external(source, call_id)
        }
        (None, None) => None,
    };
    let Some(session) = session else {
        return unknown_session();
    };

    let ended = state.orchestrator.end_session(&session.id);
    state.egress.clear(&session.id);
    Json(serde_json::json!({
        "sessionId": session.id,
        "state": ended.map(|s| s.state).unwrap_or(session.state),
    }))
    .into_response()
}

// ── Control routes ───────────────────────────────────────────────

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlBody {
    session_id: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    source_language: Option<String>,
    #[serde(default)]
    target_language: Option<String>,
}

/// POST /sessions/control — patch mode and/or languages.
async fn handle_sessions_control(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ControlBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(resp) = require_control_secret(&state, &headers) {
        return resp;
    }
    let Ok(Json(body)) = body else {
        return invalid_payload();
    };

    let mode = match body.mode.as_deref() {
        Some(raw) => match SessionMode::from_str_code(raw) {
            Some(mode) => Some(mode),
            None => return invalid_payload(),
        },
        None => None,
    };
    let source_language = match body.source_language.as_deref() {
        Some(raw) => match LanguageCode::from_str_code(raw) {
            Some(lang) => Some(lang),
            None => return invalid_payload(),
        },
        None => None,
    };
    let target_language = match body.target_language.as_deref() {
        Some(raw) => match LanguageCode::from_str_code(raw) {
            Some(lang) => Some(lang),
            None => return invalid_payload(),
        },
        None => None,
    };

    let patch = crate::session::ControlPatch {
        mode,
        source_language,
        target_language,
    };
    match state
        .orchestrator
        .update_session_control(&body.session_id, patch)
    {
        Some(session) => Json(session).into_response(),
        None => unknown_session(),
    }
}

#[derive(serde::Deserialize)]
struct CommandBody {
    text: String,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

/// POST /openclaw/command — relay an operator command to the orchestrator.
async fn handle_openclaw_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CommandBody>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(resp) = require_control_secret(&state, &headers) {
        return resp;
    }
    let Ok(Json(body)) = body else {
        return invalid_payload();
    };
    if body.text.trim().is_empty() {
        return invalid_payload();
    }

    let Some(bridge) = &state.bridge else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "bridge_unconfigured");
    };
    bridge.send_command(
        body.text,
        body.context.unwrap_or_else(|| serde_json::json!({})),
    );
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true })),
    )
        .into_response()
}

// ── Twilio routes ────────────────────────────────────────────────

/// The URL Twilio signed: public base URL + path, or `http://<host><path>`
/// when no base URL is configured.
fn twilio_request_url(state: &AppState, headers: &HeaderMap, uri: &Uri) -> String {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    match &state.public_base_url {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{host}{path}")
        }
    }
}

/// The wss:// URL clients should stream media to, when externally reachable.
fn stream_url(state: &AppState) -> Option<String> {
    let base = state.public_base_url.as_deref()?;
    let ws_base = base
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    Some(format!("{}/twilio/stream", ws_base.trim_end_matches('/')))
}

/// POST /twilio/voice — voice webhook; answers with dial XML.
async fn handle_twilio_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&body) else {
        return invalid_payload();
    };

    if let Some(token) = &state.twilio_auth_token {
        let url = twilio_request_url(&state, &headers, &uri);
        let provided = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !twilio::verify_signature(token, &url, &pairs, provided) {
            tracing::debug!("Rejected Twilio webhook with bad signature");
            return forbidden();
        }
    }

    let Some(webhook) = parse_voice_form(&pairs) else {
        return invalid_payload();
    };

    let event = webhook.into_event(now_epoch_ms());
    let session = state.orchestrator.on_incoming_call(&event);
    let xml = dial_response_xml(&session.outbound_target, stream_url(&state).as_deref());
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], xml).into_response()
}

/// GET /twilio/stream — media-stream WebSocket upgrade.
async fn handle_twilio_stream_ws(
    State(state): State<AppState>,
    ws: axum::extract::WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_twilio_stream(socket, state))
}

/// Drive one media-stream connection: inbound `media` frames feed the
/// pipeline, translated chunks flow back as outbound `media` messages, and
/// `stop` (or the socket dying) ends the session.
async fn handle_twilio_stream(socket: axum::extract::ws::WebSocket, state: AppState) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut session_id: Option<String> = None;
    let mut stream_sid: Option<String> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match parse_stream_message(&text) {
                Some(StreamMessage::Connected) => {}
                Some(StreamMessage::Start { start }) => {
                    match state
                        .store
                        .get_by_external(IngressSource::WebhookStream, &start.call_sid)
                    {
                        Some(session) => {
                            tracing::info!(
                                session_id = %session.id,
                                call_sid = %start.call_sid,
                                "Media stream attached"
                            );
                            session_id = Some(session.id);
                            stream_sid = start.stream_sid;
                        }
                        None => {
                            tracing::warn!(
                                call_sid = %start.call_sid,
                                "Media stream for unknown call; ignoring"
                            );
                        }
                    }
                }
                Some(StreamMessage::Media { media }) => {
                    let Some(id) = session_id.as_deref() else {
                        continue;
                    };
                    let Some(frame) = media_frame(id, &media, now_epoch_ms()) else {
                        tracing::debug!(session_id = %id, "Undecodable media payload dropped");
                        continue;
                    };
                    state.orchestrator.on_audio_frame(&frame).await;

                    // Return-delivery for this ingress: push whatever the
                    // pipeline has queued straight back down the stream.
                    while let Some(chunk) = state.egress.dequeue(id) {
                        let out = outbound_media_json(stream_sid.as_deref(), &chunk);
                        if sender.send(Message::Text(out.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(StreamMessage::Stop) => break,
                None => {
                    tracing::debug!("Unrecognized stream message dropped");
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(id) = session_id {
        state.orchestrator.end_session(&id);
        state.egress.clear(&id);
        tracing::info!(session_id = %id, "Media stream closed");
    }
}
