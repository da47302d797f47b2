//! In-memory session store: the single authoritative owner of call state.
//!
//! Two indexes are kept in lockstep: internal id → session, and
//! `(ingress, external-id)` → internal id. Mutation goes through the
//! orchestrator (single writer); readers snapshot under the shared lock.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use super::types::{
    now_epoch_ms, CallSession, IncomingCallEvent, IngressSource, LanguageCode, SessionMode,
    SessionState,
};

/// Partial update applied by `POST /sessions/control`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlPatch {
    pub mode: Option<SessionMode>,
    pub source_language: Option<LanguageCode>,
    pub target_language: Option<LanguageCode>,
}

impl ControlPatch {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && self.source_language.is_none() && self.target_language.is_none()
    }
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, CallSession>,
    by_external: HashMap<(IngressSource, String), String>,
}

/// Owns every `CallSession` and the external-id mapping for both ingresses.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<Indexes>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a session for an incoming call. Not idempotent by itself:
    /// de-duplication of repeated handshakes is the orchestrator's job.
    pub fn create_from_incoming(
        &self,
        event: &IncomingCallEvent,
        outbound_target: &str,
    ) -> CallSession {
        let session = CallSession {
            id: Uuid::new_v4().to_string(),
            source: event.source,
            inbound_caller: event.from.clone(),
            outbound_target: outbound_target.to_string(),
            started_at_ms: now_epoch_ms(),
            mode: SessionMode::PrivateTranslation,
            source_language: LanguageCode::Es,
            target_language: LanguageCode::En,
            state: SessionState::Pending,
        };

        let mut inner = self.inner.write();
        inner.by_external.insert(
            (event.source, event.external_call_id.clone()),
            session.id.clone(),
        );
        inner.by_id.insert(session.id.clone(), session.clone());
        session
    }

    pub fn get(&self, id: &str) -> Option<CallSession> {
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn get_by_external(&self, source: IngressSource, external_id: &str) -> Option<CallSession> {
        let inner = self.inner.read();
        inner
            .by_external
            .get(&(source, external_id.to_string()))
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Apply a state transition. Terminal states are immutable: a further
    /// update returns the stored session unchanged.
    pub fn update_state(&self, id: &str, state: SessionState) -> Option<CallSession> {
        let mut inner = self.inner.write();
        let session = inner.by_id.get_mut(id)?;
        if !session.state.is_terminal() {
            session.state = state;
        }
        Some(session.clone())
    }

    /// Apply a control patch. Mode and languages may change only while the
    /// session is `pending` or `active`; afterwards this is a no-op that
    /// returns the session as stored.
    pub fn update_control(&self, id: &str, patch: ControlPatch) -> Option<CallSession> {
        let mut inner = self.inner.write();
        let session = inner.by_id.get_mut(id)?;
        if !session.state.is_terminal() {
            if let Some(mode) = patch.mode {
                session.mode = mode;
            }
            if let Some(lang) = patch.source_language {
                session.source_language = lang;
            }
            if let Some(lang) = patch.target_language {
                session.target_language = lang;
            }
        }
        Some(session.clone())
    }

    /// Snapshot of every session, for `GET /sessions`.
    pub fn all(&self) -> Vec<CallSession> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().by_id.len()
    }
}
