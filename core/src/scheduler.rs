//! Per-session summary loop.
//!
//! One task per session, started when the first teacher joins and stopped
//! when the last teacher leaves or the session ends. Each tick snapshots the
//! room's students and pushes fresh summaries to the teachers.

use std::sync::Arc;
use std::time::Duration;

use classdeck_protocol::SessionCode;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::engine::SessionEngine;

/// Evaluator calls per burst inside one sweep.
pub(crate) const BATCH_SIZE: usize = 5;

/// Pause between bursts so a big room does not trip upstream throttling.
pub(crate) const BATCH_PAUSE: Duration = Duration::from_secs(5);

pub(crate) async fn run(engine: Arc<SessionEngine>, code: SessionCode) {
    let mut interval = tokio::time::interval(engine.config().summary_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately; swallow that so the first sweep happens
    // one full period after the teacher joined.
    interval.tick().await;

    debug!("summary scheduler for {code} started");
    loop {
        interval.tick().await;
        if !engine.sweep_session(&code).await {
            break;
        }
    }
    debug!("summary scheduler for {code} stopped");
}
