//! Per-connection session: authentication state, outbound path, and the
//! table of calls awaiting a response from the station.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use {
    serde_json::Value,
    tokio::sync::{mpsc, oneshot},
    tokio_util::sync::{CancellationToken, WaitForCancellationFuture},
    tracing::{debug, info},
};

use chargegate_protocol::{AUTH_FAILED_REASON, ErrorCode, Frame, encode};

use crate::auth::CredentialStore;

/// Normal closure (RFC 6455).
pub const CLOSE_NORMAL: u16 = 1000;
/// Policy violation (RFC 6455), used for rejected credentials.
pub const CLOSE_POLICY: u16 = 1008;

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed { reason: String },
}

/// One unit on the outbound path. Each is written to the transport whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// How the station answered a call we sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Result(Value),
    Error {
        code: ErrorCode,
        description: String,
        details: Value,
    },
}

/// Caller context kept for an outstanding server-to-station call.
#[derive(Debug)]
pub struct PendingCall {
    pub action: String,
    pub reply: oneshot::Sender<CallOutcome>,
    pub created_at: Instant,
}

impl PendingCall {
    pub fn new(action: impl Into<String>) -> (Self, oneshot::Receiver<CallOutcome>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                action: action.into(),
                reply,
                created_at: Instant::now(),
            },
            rx,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{}", AUTH_FAILED_REASON)]
    Authentication,
    #[error("authentication already attempted on this session")]
    AlreadyAttempted,
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("unique id {0} is already outstanding")]
    DuplicateId(String),
    #[error("no outstanding call with unique id {0}")]
    UnmatchedId(String),
    #[error("frame is not a call result or call error")]
    NotAResponse,
    #[error("session closed")]
    Closed,
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct Session {
    identity: String,
    conn_id: String,
    remote_addr: Option<SocketAddr>,
    connected_at: Instant,
    state: Mutex<SessionState>,
    outstanding: Mutex<HashMap<String, PendingCall>>,
    sender: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(identity: impl Into<String>, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            identity: identity.into(),
            conn_id: uuid::Uuid::new_v4().to_string(),
            remote_addr: None,
            connected_at: Instant::now(),
            state: Mutex::new(SessionState::Unauthenticated),
            outstanding: Mutex::new(HashMap::new()),
            sender,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*lock(&self.state), SessionState::Authenticated)
    }

    pub fn is_open(&self) -> bool {
        !matches!(*lock(&self.state), SessionState::Closed { .. })
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// One-shot credential check. A failed check closes the session with the
    /// authentication close reason.
    pub fn authenticate(
        &self,
        store: &dyn CredentialStore,
        token: Option<&str>,
    ) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Unauthenticated {
                return Err(SessionError::AlreadyAttempted);
            }
            if token.is_some_and(|t| store.is_valid(t)) {
                *state = SessionState::Authenticated;
                info!(identity = %self.identity, conn_id = %self.conn_id, "station authenticated");
                return Ok(());
            }
        }
        self.close(CLOSE_POLICY, AUTH_FAILED_REASON);
        Err(SessionError::Authentication)
    }

    /// Queue a text message. Returns false once the session is closed.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        let state = lock(&self.state);
        if matches!(*state, SessionState::Closed { .. }) {
            return false;
        }
        self.sender.send(Outbound::Text(text.into())).is_ok()
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_text(encode(frame))
    }

    /// Transition to `Closed`, queue a close frame, and fail every
    /// outstanding call. Returns false if the session was already closed.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        {
            let mut state = lock(&self.state);
            if matches!(*state, SessionState::Closed { .. }) {
                return false;
            }
            *state = SessionState::Closed {
                reason: reason.to_string(),
            };
            // Queued under the state lock so no text can follow it.
            let _ = self.sender.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
        self.cancel.cancel();
        let dropped = std::mem::take(&mut *lock(&self.outstanding));
        debug!(
            identity = %self.identity,
            conn_id = %self.conn_id,
            reason,
            outstanding = dropped.len(),
            "session closed"
        );
        true
    }

    // ── Outstanding calls ────────────────────────────────────────────────

    pub fn register_outstanding(
        &self,
        unique_id: impl Into<String>,
        call: PendingCall,
    ) -> Result<(), SessionError> {
        let unique_id = unique_id.into();
        // Hold the state lock so a concurrent close either refuses or drains us.
        let state = lock(&self.state);
        if matches!(*state, SessionState::Closed { .. }) {
            return Err(SessionError::Closed);
        }
        let mut outstanding = lock(&self.outstanding);
        if outstanding.contains_key(&unique_id) {
            return Err(SessionError::DuplicateId(unique_id));
        }
        outstanding.insert(unique_id, call);
        Ok(())
    }

    pub fn resolve(&self, unique_id: &str) -> Result<PendingCall, SessionError> {
        lock(&self.outstanding)
            .remove(unique_id)
            .ok_or_else(|| SessionError::UnmatchedId(unique_id.to_string()))
    }

    pub fn outstanding_count(&self) -> usize {
        lock(&self.outstanding).len()
    }

    /// Route a CallResult / CallError from the station to its waiting caller.
    pub fn deliver_response(&self, frame: Frame) -> Result<(), SessionError> {
        let (unique_id, outcome) = match frame {
            Frame::CallResult { unique_id, payload } => (unique_id, CallOutcome::Result(payload)),
            Frame::CallError {
                unique_id,
                code,
                description,
                details,
            } => (unique_id, CallOutcome::Error {
                code,
                description,
                details,
            }),
            Frame::Call { .. } => return Err(SessionError::NotAResponse),
        };
        let pending = self.resolve(&unique_id)?;
        debug!(
            identity = %self.identity,
            unique_id = %unique_id,
            action = %pending.action,
            elapsed_ms = pending.created_at.elapsed().as_millis() as u64,
            "call answered"
        );
        // The caller may have given up; that is not the station's fault.
        let _ = pending.reply.send(outcome);
        Ok(())
    }

    /// Send a call to the station and wait for its answer.
    ///
    /// The id is registered before the frame is queued, so a fast reply always
    /// finds it. Dropping the returned future releases the id.
    pub async fn call(
        &self,
        action: impl Into<String>,
        payload: Value,
    ) -> Result<CallOutcome, SessionError> {
        if !self.is_authenticated() {
            return Err(if self.is_open() {
                SessionError::NotAuthenticated
            } else {
                SessionError::Closed
            });
        }
        let action = action.into();
        let unique_id = uuid::Uuid::new_v4().to_string();
        let (pending, rx) = PendingCall::new(action.clone());
        self.register_outstanding(unique_id.clone(), pending)?;
        let _guard = OutstandingGuard {
            session: self,
            unique_id: &unique_id,
        };

        if !self.send_frame(&Frame::call(unique_id.clone(), action, payload)) {
            return Err(SessionError::Closed);
        }
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// Removes an outstanding entry when its caller stops waiting.
struct OutstandingGuard<'a> {
    session: &'a Session,
    unique_id: &'a str,
}

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        // Already gone if the station answered or the session closed.
        let _ = self.session.resolve(self.unique_id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("conn_id", &self.conn_id)
            .field("state", &self.state())
            .field("outstanding", &self.outstanding_count())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::auth::StaticCredentialStore, serde_json::json, std::sync::Arc};

    fn new_session() -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new("station-7", tx), rx)
    }

    fn store() -> StaticCredentialStore {
        StaticCredentialStore::new(["TOKEN123"])
    }

    #[test]
    fn valid_token_authenticates() {
        let (session, _rx) = new_session();
        assert_eq!(session.state(), SessionState::Unauthenticated);
        session.authenticate(&store(), Some("TOKEN123")).unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
        assert!(session.is_open());
    }

    #[test]
    fn invalid_token_closes_with_reason() {
        let (session, mut rx) = new_session();
        let err = session.authenticate(&store(), Some("wrong")).unwrap_err();
        assert_eq!(err, SessionError::Authentication);
        assert_eq!(session.state(), SessionState::Closed {
            reason: AUTH_FAILED_REASON.into()
        });
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close {
            code: CLOSE_POLICY,
            reason: AUTH_FAILED_REASON.into(),
        });
        assert!(!session.send_text("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn missing_token_is_rejected() {
        let (session, _rx) = new_session();
        assert_eq!(
            session.authenticate(&store(), None),
            Err(SessionError::Authentication)
        );
    }

    #[test]
    fn authentication_is_one_shot() {
        let (session, _rx) = new_session();
        session.authenticate(&store(), Some("TOKEN123")).unwrap();
        assert_eq!(
            session.authenticate(&store(), Some("TOKEN123")),
            Err(SessionError::AlreadyAttempted)
        );

        let (rejected, _rx) = new_session();
        let _ = rejected.authenticate(&store(), None);
        assert_eq!(
            rejected.authenticate(&store(), Some("TOKEN123")),
            Err(SessionError::AlreadyAttempted)
        );
        assert!(!rejected.is_open());
    }

    #[test]
    fn duplicate_outstanding_id_is_refused() {
        let (session, _rx) = new_session();
        session.authenticate(&store(), Some("TOKEN123")).unwrap();
        let (first, _a) = PendingCall::new("Reset");
        let (second, _b) = PendingCall::new("Reset");
        session.register_outstanding("1", first).unwrap();
        assert_eq!(
            session.register_outstanding("1", second),
            Err(SessionError::DuplicateId("1".into()))
        );
        assert_eq!(session.outstanding_count(), 1);
    }

    #[test]
    fn resolve_removes_and_rejects_unknown() {
        let (session, _rx) = new_session();
        let (pending, _rx2) = PendingCall::new("Reset");
        session.register_outstanding("abc", pending).unwrap();
        assert_eq!(session.resolve("abc").unwrap().action, "Reset");
        assert_eq!(
            session.resolve("abc").unwrap_err(),
            SessionError::UnmatchedId("abc".into())
        );
    }

    #[test]
    fn unmatched_response_is_reported() {
        let (session, _rx) = new_session();
        let err = session
            .deliver_response(Frame::result("ghost", json!({})))
            .unwrap_err();
        assert_eq!(err, SessionError::UnmatchedId("ghost".into()));
        assert_eq!(
            session.deliver_response(Frame::call("1", "Heartbeat", json!({}))),
            Err(SessionError::NotAResponse)
        );
    }

    #[test]
    fn close_is_idempotent_and_cancels() {
        let (session, mut rx) = new_session();
        assert!(session.close(CLOSE_NORMAL, "bye"));
        assert!(!session.close(CLOSE_NORMAL, "again"));
        assert!(session.cancel.is_cancelled());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close { code: CLOSE_NORMAL, .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn call_round_trips_through_outstanding_table() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("station-7", tx));
        session.authenticate(&store(), Some("TOKEN123")).unwrap();

        let caller = Arc::clone(&session);
        let call = tokio::spawn(async move {
            caller
                .call("GetVariables", json!({"getVariableData": []}))
                .await
        });

        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected call frame");
        };
        let Frame::Call {
            unique_id, action, ..
        } = chargegate_protocol::decode(&text).unwrap()
        else {
            panic!("expected call");
        };
        assert_eq!(action, "GetVariables");
        assert_eq!(session.outstanding_count(), 1);

        session
            .deliver_response(Frame::result(unique_id, json!({"getVariableResult": []})))
            .unwrap();
        let outcome = call.await.unwrap().unwrap();
        assert_eq!(outcome, CallOutcome::Result(json!({"getVariableResult": []})));
        assert_eq!(session.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn call_error_is_delivered_as_outcome() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("station-7", tx));
        session.authenticate(&store(), Some("TOKEN123")).unwrap();

        let caller = Arc::clone(&session);
        let call = tokio::spawn(async move { caller.call("Reset", json!({"type": "Immediate"})).await });

        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected call frame");
        };
        let frame = chargegate_protocol::decode(&text).unwrap();
        session
            .deliver_response(Frame::error(
                frame.unique_id(),
                ErrorCode::NotSupported,
                "reset refused",
            ))
            .unwrap();
        assert_eq!(call.await.unwrap().unwrap(), CallOutcome::Error {
            code: ErrorCode::NotSupported,
            description: "reset refused".into(),
            details: json!({}),
        });
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("station-7", tx));
        session.authenticate(&store(), Some("TOKEN123")).unwrap();

        let caller = Arc::clone(&session);
        let call = tokio::spawn(async move { caller.call("Reset", json!({})).await });
        let _ = rx.recv().await;

        session.close(CLOSE_NORMAL, "peer went away");
        assert_eq!(call.await.unwrap(), Err(SessionError::Closed));
    }

    #[tokio::test]
    async fn abandoned_call_releases_its_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new("station-7", tx);
        session.authenticate(&store(), Some("TOKEN123")).unwrap();

        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            session.call("GetVariables", json!({})),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(session.outstanding_count(), 0);

        // A late answer to the abandoned call is reported as unmatched.
        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected call frame");
        };
        let id = chargegate_protocol::decode(&text).unwrap().unique_id().to_string();
        assert_eq!(
            session.deliver_response(Frame::result(id.clone(), json!({}))),
            Err(SessionError::UnmatchedId(id))
        );
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn call_requires_authentication() {
        let (session, _rx) = new_session();
        assert_eq!(
            session.call("Reset", json!({})).await,
            Err(SessionError::NotAuthenticated)
        );
        session.close(CLOSE_NORMAL, "done");
        assert_eq!(
            session.call("Reset", json!({})).await,
            Err(SessionError::Closed)
        );
    }
}
