use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use {
    serde_json::Value,
    tokio::sync::{RwLock, mpsc},
    tracing::{info, warn},
};

use {
    chargegate_config::ChargegateConfig,
    chargegate_protocol::{SUPERSEDED_REASON, WELCOME_MESSAGE},
};

use crate::{
    actions::ActionRegistry,
    auth::{AdmissionRequest, CredentialStore, Rejection},
    session::{CLOSE_NORMAL, CLOSE_POLICY, CallOutcome, Outbound, Session, SessionError},
    telemetry::{self, TelemetryPlan},
};

/// Errors from server-initiated calls addressed by station identity.
#[derive(Debug, thiserror::Error)]
pub enum StationCallError {
    #[error("no connected station with identity '{0}'")]
    NotConnected(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Authenticated sessions, keyed by station identity.
    pub sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Token check used at admission.
    pub credentials: Arc<dyn CredentialStore>,
    /// Inbound call handlers.
    pub actions: Arc<ActionRegistry>,
    /// Telemetry push settings; `None` disables the push task.
    pub telemetry: Option<TelemetryPlan>,
    /// WebSocket sub-protocol offered during the upgrade.
    pub subprotocol: String,
    /// Server version string.
    pub version: String,
}

impl GatewayState {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        actions: ActionRegistry,
        telemetry: Option<TelemetryPlan>,
        subprotocol: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            credentials,
            actions: Arc::new(actions),
            telemetry,
            subprotocol: subprotocol.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// State with the default action set and telemetry from `config`.
    pub fn from_config(
        config: &ChargegateConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        Self::new(
            credentials,
            ActionRegistry::with_defaults(config.registration.heartbeat_interval_secs),
            TelemetryPlan::from_config(&config.telemetry),
            config.gateway.subprotocol.clone(),
        )
    }

    /// Admit a freshly upgraded connection.
    ///
    /// On success the station has been greeted, registered (closing any
    /// previous session with the same identity), and its telemetry task is
    /// running. On rejection a close frame has been queued on `sender`.
    pub async fn admit(
        &self,
        request: &AdmissionRequest,
        sender: mpsc::UnboundedSender<Outbound>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Arc<Session>, Rejection> {
        let Some(identity) = request.identity() else {
            let _ = sender.send(Outbound::Close {
                code: CLOSE_POLICY,
                reason: Rejection::MissingIdentity.reason().to_string(),
            });
            return Err(Rejection::MissingIdentity);
        };

        let mut session = Session::new(identity, sender);
        if let Some(addr) = remote_addr {
            session = session.with_remote_addr(addr);
        }
        if session
            .authenticate(self.credentials.as_ref(), request.token.as_deref())
            .is_err()
        {
            return Err(Rejection::InvalidToken);
        }

        let session = Arc::new(session);
        session.send_text(WELCOME_MESSAGE);

        if let Some(previous) = self.register_session(Arc::clone(&session)).await {
            warn!(
                identity = %previous.identity(),
                old_conn_id = %previous.conn_id(),
                new_conn_id = %session.conn_id(),
                "identity reconnected, superseding previous session"
            );
            previous.close(CLOSE_NORMAL, SUPERSEDED_REASON);
        }

        if let Some(plan) = &self.telemetry {
            telemetry::spawn(Arc::clone(&session), plan.clone());
        }
        Ok(session)
    }

    /// Register an authenticated session. Returns the session it replaced.
    pub async fn register_session(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let identity = session.identity().to_string();
        self.sessions.write().await.insert(identity, session)
    }

    /// Remove `session` from the registry if it is still the one registered
    /// under its identity. A superseded session never evicts its successor.
    pub async fn remove_session(&self, session: &Session) -> bool {
        let mut sessions = self.sessions.write().await;
        let is_current = sessions
            .get(session.identity())
            .is_some_and(|current| current.conn_id() == session.conn_id());
        if is_current {
            sessions.remove(session.identity());
            info!(identity = %session.identity(), conn_id = %session.conn_id(), "session removed");
        }
        is_current
    }

    pub async fn session(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(identity).cloned()
    }

    /// Number of authenticated sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a call to the station registered under `identity` and wait for
    /// its answer.
    pub async fn call_station(
        &self,
        identity: &str,
        action: &str,
        payload: Value,
    ) -> Result<CallOutcome, StationCallError> {
        let session = self
            .session(identity)
            .await
            .ok_or_else(|| StationCallError::NotConnected(identity.to_string()))?;
        Ok(session.call(action, payload).await?)
    }

    /// Close every session, e.g. on shutdown.
    pub async fn close_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close(CLOSE_NORMAL, reason);
        }
        drained.len()
    }
}
