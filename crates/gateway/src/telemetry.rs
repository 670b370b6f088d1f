//! Periodic telemetry pushed to every authenticated station.
//!
//! Each session gets its own push task. Samples are emitted in order on a
//! fixed cadence, cycling, with the first one sent a full interval after the
//! session is admitted. The task ends as soon as the session closes.

use std::{sync::Arc, time::Duration};

use {
    tokio::{task::JoinHandle, time},
    tracing::debug,
};

use chargegate_config::TelemetryConfig;

use crate::session::Session;

/// Resolved telemetry settings shared by every push task.
#[derive(Debug, Clone)]
pub struct TelemetryPlan {
    pub interval: Duration,
    pub samples: Arc<[String]>,
}

impl TelemetryPlan {
    pub fn new<I, S>(interval: Duration, samples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interval,
            samples: samples.into_iter().map(Into::into).collect(),
        }
    }

    /// `None` when telemetry is disabled or has nothing to send.
    pub fn from_config(config: &TelemetryConfig) -> Option<Self> {
        if !config.enabled || config.samples.is_empty() || config.interval_ms == 0 {
            return None;
        }
        Some(Self::new(
            Duration::from_millis(config.interval_ms),
            config.samples.iter().cloned(),
        ))
    }
}

/// Start the push task for `session`.
pub fn spawn(session: Arc<Session>, plan: TelemetryPlan) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(&session, &plan).await;
    })
}

async fn run(session: &Session, plan: &TelemetryPlan) {
    let mut ticker = time::interval_at(time::Instant::now() + plan.interval, plan.interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut sent: u64 = 0;
    for sample in plan.samples.iter().cycle() {
        tokio::select! {
            biased;
            () = session.closed() => break,
            _ = ticker.tick() => {},
        }
        if !session.send_text(sample.as_str()) {
            break;
        }
        sent += 1;
    }
    debug!(identity = %session.identity(), conn_id = %session.conn_id(), sent, "telemetry stopped");
}
