//! External Event Bridge: delivery of session events and operator commands
//! to the OpenClaw orchestrator.
//!
//! ## Design
//! - Publish never blocks the pipeline: envelopes are queued on a bounded
//!   channel and a single drainer task delivers them FIFO (order matters
//!   more than throughput for a control stream)
//! - At-least-once delivery with exponential backoff; session-event
//!   idempotency keys are deterministic so a retried envelope replays the
//!   same key and the server can de-duplicate
//! - Exhausted retries are logged and dropped; bridge failures never reach
//!   the caller
//! - Shutdown cancels the drainer (including a pending backoff sleep)

use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::pipeline::SessionEvent;
use crate::session::now_epoch_ms;

/// Bounded queue depth; overflow drops the newest envelope with a warning.
const MAX_QUEUE: usize = 256;
/// Total delivery attempts per envelope.
const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_INITIAL: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_millis(2_000);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_200);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Full endpoint URL envelopes are POSTed to.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Per-attempt request deadline.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum EnvelopeKind {
    SessionEvent,
    Command,
}

/// Free-form operator command relayed through the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPayload {
    pub text: String,
    pub context: serde_json::Value,
}

/// Outer wrapper carried on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    kind: EnvelopeKind,
    idempotency_key: String,
    at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_event: Option<SessionEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<CommandPayload>,
}

impl Envelope {
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }
}

/// Deterministic key for a session event: a retry after transient failure
/// replays the same key. serde_json maps serialize with sorted keys, so the
/// payload hash is stable across processes.
pub fn session_event_idempotency_key(event: &SessionEvent) -> String {
    let payload_digest = hex::encode(Sha256::digest(event.payload.to_string().as_bytes()));
    let mut hasher = Sha256::new();
    hasher.update(event.kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(event.session_id.as_bytes());
    hasher.update(b"|");
    hasher.update(event.at_ms.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(payload_digest.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct OpenClawBridge {
    tx: mpsc::Sender<Envelope>,
    shutdown_tx: watch::Sender<bool>,
    client: reqwest::Client,
    config: BridgeConfig,
}

impl OpenClawBridge {
    /// Create the bridge and spawn its drainer task.
    pub fn start(config: BridgeConfig) -> std::sync::Arc<Self> {
        let (tx, rx) = mpsc::channel::<Envelope>(MAX_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = reqwest::Client::new();

        let bridge = std::sync::Arc::new(Self {
            tx,
            shutdown_tx,
            client: client.clone(),
            config: config.clone(),
        });

        tokio::spawn(drain_loop(rx, shutdown_rx, client, config));
        bridge
    }

    /// Queue a session event. Returns as soon as the envelope is enqueued.
    pub fn publish_session_event(&self, event: SessionEvent) {
        let envelope = Envelope {
            kind: EnvelopeKind::SessionEvent,
            idempotency_key: session_event_idempotency_key(&event),
            at_ms: event.at_ms,
            session_event: Some(event),
            command: None,
        };
        self.enqueue(envelope);
    }

    /// Queue an operator command with a fresh random idempotency key.
    pub fn send_command(&self, text: String, context: serde_json::Value) {
        let envelope = Envelope {
            kind: EnvelopeKind::Command,
            idempotency_key: Uuid::new_v4().to_string(),
            at_ms: now_epoch_ms(),
            session_event: None,
            command: Some(CommandPayload { text, context }),
        };
        self.enqueue(envelope);
    }

    fn enqueue(&self, envelope: Envelope) {
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(env)) => {
                tracing::warn!(
                    idempotency_key = %env.idempotency_key,
                    "Bridge queue full; envelope dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(env)) => {
                tracing::warn!(
                    idempotency_key = %env.idempotency_key,
                    "Bridge drainer gone; envelope dropped"
                );
            }
        }
    }

    /// Probe `<origin>/health` on the configured endpoint.
    pub async fn health_check(&self) -> bool {
        let Ok(mut url) = reqwest::Url::parse(&self.config.endpoint) else {
            return false;
        };
        url.set_path("/health");
        url.set_query(None);

        match self
            .client
            .get(url)
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Stop the drainer, cancelling any in-flight backoff sleep.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn drain_loop(
    mut rx: mpsc::Receiver<Envelope>,
    mut shutdown_rx: watch::Receiver<bool>,
    client: reqwest::Client,
    config: BridgeConfig,
) {
    loop {
        let envelope = tokio::select! {
            _ = shutdown_rx.changed() => break,
            received = rx.recv() => match received {
                Some(env) => env,
                None => break,
            },
        };
        deliver_with_retry(&client, &config, envelope, &mut shutdown_rx).await;
        if *shutdown_rx.borrow() {
            break;
        }
    }
    tracing::debug!("Bridge drainer stopped");
}

async fn deliver_with_retry(
    client: &reqwest::Client,
    config: &BridgeConfig,
    envelope: Envelope,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut backoff = BACKOFF_INITIAL;

    for attempt in 1..=MAX_ATTEMPTS {
        let mut request = client
            .post(&config.endpoint)
            .header("idempotency-key", &envelope.idempotency_key)
            .json(&envelope)
            .timeout(config.timeout);
        if let Some(key) = &config.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => return,
            Ok(resp) => {
                tracing::debug!(
                    attempt,
                    status = resp.status().as_u16(),
                    idempotency_key = %envelope.idempotency_key,
                    "Bridge delivery attempt failed"
                );
            }
            Err(e) => {
                tracing::debug!(
                    attempt,
                    error = %e,
                    idempotency_key = %envelope.idempotency_key,
                    "Bridge delivery attempt errored"
                );
            }
        }

        if attempt < MAX_ATTEMPTS {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    tracing::warn!(
        idempotency_key = %envelope.idempotency_key,
        attempts = MAX_ATTEMPTS,
        "Bridge envelope dropped after retry exhaustion"
    );
}
