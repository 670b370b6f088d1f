use std::{net::SocketAddr, sync::Arc};

use {
    axum::extract::ws::{CloseFrame, Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use chargegate_protocol::{Frame, decode};

use crate::{
    auth::AdmissionRequest,
    session::{CLOSE_NORMAL, Outbound, Session, SessionError},
    state::GatewayState,
};

/// Handle one WebSocket connection from upgrade to teardown.
///
/// A writer task owns the sink and drains the session's outbound channel,
/// one message per write. The read loop below handles inbound frames in
/// arrival order until the peer leaves or the session is closed.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    request: AdmissionRequest,
    remote_addr: SocketAddr,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let write_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let (msg, last) = match outbound {
                Outbound::Text(text) => (Message::Text(text.into()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if ws_tx.send(msg).await.is_err() || last {
                break;
            }
        }
    });

    let session = match state.admit(&request, tx, Some(remote_addr)).await {
        Ok(session) => session,
        Err(rejection) => {
            warn!(
                path = %request.path,
                remote_ip = %remote_addr.ip(),
                reason = rejection.reason(),
                "connection rejected"
            );
            let _ = write_task.await;
            return;
        },
    };

    info!(
        identity = %session.identity(),
        conn_id = %session.conn_id(),
        remote_ip = %remote_addr.ip(),
        "station connected"
    );

    loop {
        let msg = tokio::select! {
            biased;
            () = session.closed() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                process_text(&state, &session, text.as_str()).await;
            },
            Some(Ok(Message::Binary(data))) => {
                warn!(identity = %session.identity(), len = data.len(), "binary frame dropped");
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                debug!(identity = %session.identity(), error = %e, "ws read error");
                break;
            },
        }
    }

    session.close(CLOSE_NORMAL, "connection closed");
    state.remove_session(&session).await;
    let _ = write_task.await;
    info!(
        identity = %session.identity(),
        conn_id = %session.conn_id(),
        duration_secs = session.connected_at().elapsed().as_secs(),
        "station disconnected"
    );
}

/// Handle one inbound text message on an authenticated session.
///
/// Calls are dispatched and answered; responses are routed to the waiting
/// server-initiated call. Anything that does not decode is logged and
/// dropped without affecting the session.
pub async fn process_text(state: &GatewayState, session: &Session, text: &str) {
    let frame = match decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(identity = %session.identity(), error = %e, "malformed frame dropped");
            return;
        },
    };

    match frame {
        Frame::Call {
            unique_id,
            action,
            payload,
        } => {
            state
                .actions
                .handle(session, unique_id, action, payload)
                .await;
        },
        response => match session.deliver_response(response) {
            Ok(()) => {},
            Err(SessionError::UnmatchedId(unique_id)) => {
                warn!(identity = %session.identity(), unique_id = %unique_id, "response with no matching call discarded");
            },
            Err(e) => {
                debug!(identity = %session.identity(), error = %e, "response not delivered");
            },
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{actions::ActionRegistry, auth::StaticCredentialStore, session::CallOutcome},
        chargegate_protocol::{ErrorCode, WELCOME_MESSAGE},
        serde_json::json,
    };

    async fn admitted() -> (
        Arc<GatewayState>,
        Arc<Session>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let state = GatewayState::new(
            Arc::new(StaticCredentialStore::new(["TOKEN123"])),
            ActionRegistry::with_defaults(10),
            None,
            "ocpp2.0.1",
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = state
            .admit(
                &AdmissionRequest::parse("/station-7?token=TOKEN123"),
                tx,
                None,
            )
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(Outbound::Text(t)) if t == WELCOME_MESSAGE));
        (state, session, rx)
    }

    fn reply(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Frame {
        match rx.try_recv() {
            Ok(Outbound::Text(text)) => decode(&text).unwrap(),
            other => panic!("expected a reply frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn boot_notification_round_trip() {
        let (state, session, mut rx) = admitted().await;
        process_text(
            &state,
            &session,
            r#"[2,"19223201","BootNotification",{"chargingStation":"X","reason":"PowerUp"}]"#,
        )
        .await;

        let Frame::CallResult { unique_id, payload } = reply(&mut rx) else {
            panic!("expected call result");
        };
        assert_eq!(unique_id, "19223201");
        assert_eq!(payload["status"], "Accepted");
        assert_eq!(payload["interval"], 10);
    }

    #[tokio::test]
    async fn malformed_input_is_dropped() {
        let (state, session, mut rx) = admitted().await;
        for bad in ["not json", "[9,\"1\"]", "[2,\"1\"]", "{}"] {
            process_text(&state, &session, bad).await;
        }
        assert!(rx.try_recv().is_err());
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn unmatched_response_is_discarded() {
        let (state, session, mut rx) = admitted().await;
        process_text(&state, &session, r#"[3,"nobody-asked",{}]"#).await;
        assert!(rx.try_recv().is_err());
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn replies_follow_call_order() {
        let (state, session, mut rx) = admitted().await;
        for i in 0..20 {
            let action = if i % 2 == 0 {
                "Heartbeat"
            } else {
                "Unknown"
            };
            process_text(&state, &session, &format!(r#"[2,"id-{i}","{action}",{{}}]"#)).await;
        }
        for i in 0..20 {
            let frame = reply(&mut rx);
            assert_eq!(frame.unique_id(), format!("id-{i}"));
            if i % 2 == 1 {
                assert!(matches!(
                    frame,
                    Frame::CallError {
                        code: ErrorCode::NotImplemented,
                        ..
                    }
                ));
            }
        }
    }

    #[tokio::test]
    async fn call_error_reaches_waiting_caller() {
        let (state, session, mut rx) = admitted().await;
        let caller = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.call("Reset", json!({})).await })
        };
        let Some(Outbound::Text(text)) = rx.recv().await else {
            panic!("expected outbound call");
        };
        let unique_id = decode(&text).unwrap().unique_id().to_string();

        process_text(
            &state,
            &session,
            &format!(r#"[4,"{unique_id}","NotSupported","nope",{{}}]"#),
        )
        .await;
        let outcome = caller.await.unwrap().unwrap();
        assert!(matches!(
            outcome,
            CallOutcome::Error {
                code: ErrorCode::NotSupported,
                ..
            }
        ));
        assert_eq!(session.outstanding_count(), 0);
    }
}
