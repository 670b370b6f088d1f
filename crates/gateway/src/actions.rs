use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {
    anyhow::Context,
    chrono::{SecondsFormat, Utc},
    serde_json::Value,
    tracing::{debug, error, info, warn},
};

use chargegate_protocol::{
    ErrorCode, Frame,
    messages::{
        BootNotificationRequest, BootNotificationResponse, HeartbeatResponse, RegistrationStatus,
        actions,
    },
};

use crate::session::Session;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every action handler.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub unique_id: String,
    pub action: String,
    /// Identity of the station that sent the call.
    pub identity: String,
    pub payload: Value,
}

/// The result an action handler produces. Any error becomes an
/// `InternalError` CallError.
pub type ActionResult = anyhow::Result<Value>;

/// A boxed async action handler.
pub type HandlerFn =
    Box<dyn Fn(ActionContext) -> Pin<Box<dyn Future<Output = ActionResult> + Send>> + Send + Sync>;

/// Current time as ISO-8601 UTC with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Action registry ──────────────────────────────────────────────────────────

/// Action name → handler. Filled at startup, shared read-only afterwards.
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<HandlerFn>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in station actions.
    pub fn with_defaults(heartbeat_interval_secs: u32) -> Self {
        let mut reg = Self::new();
        reg.register_station_actions(heartbeat_interval_secs);
        reg
    }

    pub fn register(&mut self, action: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(action.into(), Arc::new(handler));
    }

    pub fn action_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the handler for `ctx.action` and build the reply frame.
    ///
    /// The handler is invoked and awaited on its own task, so a panic either
    /// while building its future or while polling it is reported as
    /// `InternalError`.
    pub async fn dispatch(&self, ctx: ActionContext) -> Frame {
        let action = ctx.action.clone();
        let unique_id = ctx.unique_id.clone();
        let identity = ctx.identity.clone();

        let Some(handler) = self.handlers.get(&action) else {
            warn!(action = %action, identity = %identity, unique_id = %unique_id, "action not implemented");
            return Frame::error(
                unique_id,
                ErrorCode::NotImplemented,
                format!("action not implemented: {action}"),
            );
        };

        debug!(action = %action, identity = %identity, unique_id = %unique_id, "dispatching action");
        let handler = Arc::clone(handler);
        match tokio::spawn(async move { handler(ctx).await }).await {
            Ok(Ok(payload)) => {
                debug!(action = %action, unique_id = %unique_id, "action ok");
                Frame::result(unique_id, payload)
            },
            Ok(Err(err)) => {
                let message = format!("{err:#}");
                warn!(action = %action, identity = %identity, unique_id = %unique_id, error = %message, "action failed");
                Frame::error(unique_id, ErrorCode::InternalError, message)
            },
            Err(join_err) => {
                error!(action = %action, identity = %identity, unique_id = %unique_id, error = %join_err, "action handler panicked");
                Frame::error(
                    unique_id,
                    ErrorCode::InternalError,
                    "internal error while handling action",
                )
            },
        }
    }

    /// Handle one inbound call on `session` and write the reply back to it.
    pub async fn handle(
        &self,
        session: &Session,
        unique_id: String,
        action: String,
        payload: Value,
    ) -> Frame {
        let reply = self
            .dispatch(ActionContext {
                unique_id,
                action,
                identity: session.identity().to_string(),
                payload,
            })
            .await;
        if !session.send_frame(&reply) {
            debug!(identity = %session.identity(), unique_id = %reply.unique_id(), "session closed before reply was sent");
        }
        reply
    }

    // ── Station actions ──────────────────────────────────────────────────

    fn register_station_actions(&mut self, heartbeat_interval_secs: u32) {
        // BootNotification
        self.register(
            actions::BOOT_NOTIFICATION,
            Box::new(move |ctx| {
                Box::pin(async move {
                    let req: BootNotificationRequest = serde_json::from_value(ctx.payload)
                        .context("invalid BootNotification payload")?;
                    info!(
                        identity = %ctx.identity,
                        station = %req.station_label(),
                        reason = ?req.reason,
                        "BootNotification received"
                    );
                    let resp = BootNotificationResponse {
                        current_time: now_iso8601(),
                        interval: heartbeat_interval_secs,
                        status: RegistrationStatus::Accepted,
                    };
                    Ok(serde_json::to_value(resp)?)
                })
            }),
        );

        // Heartbeat
        self.register(
            actions::HEARTBEAT,
            Box::new(|ctx| {
                Box::pin(async move {
                    debug!(identity = %ctx.identity, "heartbeat");
                    Ok(serde_json::to_value(HeartbeatResponse {
                        current_time: now_iso8601(),
                    })?)
                })
            }),
        );
    }
}
