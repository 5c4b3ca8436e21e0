//! Periodic seat reveal.
//!
//! Finds active events whose reveal time has passed and makes their hidden
//! seat blocks visible, notifying ticket holders.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::{Event, EventStatus};
use crate::services::reveal::reveal_event_blocks;
use crate::state::AppState;
use crate::store::Filter;
use crate::utils::error::AppError;

pub async fn run(state: AppState, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Seat reveal job started");
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Seat reveal job stopping");
                break;
            }
            _ = interval.tick() => {
                match tick(&state).await {
                    Ok(0) => tracing::debug!("Seat reveal: nothing due"),
                    Ok(revealed) => tracing::info!(revealed, "Seat reveal: blocks revealed"),
                    Err(e) => tracing::error!(error = %e, "Seat reveal: pass failed"),
                }
            }
        }
    }
}

/// One pass; returns how many blocks were revealed.
pub async fn tick(state: &AppState) -> Result<usize, AppError> {
    let now = state.clock.now();
    let active = Filter::new().eq("status", "active");
    let due: Vec<Event> = state
        .store
        .query::<Event>(&active)
        .await?
        .into_iter()
        .filter(|e| e.status == EventStatus::Active && e.reveal_at.is_some_and(|at| at <= now))
        .collect();

    let mut revealed = 0;
    for event in &due {
        match reveal_event_blocks(state, event).await {
            Ok(outcome) => revealed += outcome.revealed_blocks,
            Err(e) => tracing::error!(error = %e, event_id = %event.id, "Seat reveal failed for event"),
        }
    }
    Ok(revealed)
}
