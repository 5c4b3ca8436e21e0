//! "Starting soon" and "please review" pushes.
//!
//! Each milestone has a flag on the event. The flag is claimed in a store
//! transaction before anything is sent, so a push goes out at most once per
//! event and milestone even with several job instances running.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::Event;
use crate::services::notifications::PushMessage;
use crate::state::AppState;
use crate::store::{Filter, StoreError, Transaction, TxOperation};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    StartingSoon,
    Review,
}

impl Milestone {
    /// Window of start times, relative to now, that triggers the push.
    fn window(self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            Milestone::StartingSoon => (
                now + chrono::Duration::hours(3),
                now + chrono::Duration::minutes(210),
            ),
            Milestone::Review => (
                now - chrono::Duration::minutes(150),
                now - chrono::Duration::hours(2),
            ),
        }
    }

    fn already_sent(self, event: &Event) -> bool {
        match self {
            Milestone::StartingSoon => event.reminder_sent,
            Milestone::Review => event.review_reminder_sent,
        }
    }

    fn mark_sent(self, event: &mut Event) {
        match self {
            Milestone::StartingSoon => event.reminder_sent = true,
            Milestone::Review => event.review_reminder_sent = true,
        }
    }

    fn message(self, event: &Event) -> PushMessage {
        let (title, body, kind) = match self {
            Milestone::StartingSoon => (
                "Starting soon",
                format!("{} starts in about 3 hours. Have your QR code ready.", event.display_title()),
                "eventReminder",
            ),
            Milestone::Review => (
                "How was the show?",
                format!("Leave a review for {} and earn mileage.", event.display_title()),
                "reviewRequest",
            ),
        };
        PushMessage::new(title, body)
            .with("type", kind)
            .with("eventId", event.id)
    }
}

struct ClaimMilestone {
    event_id: Uuid,
    milestone: Milestone,
}

#[async_trait]
impl TxOperation for ClaimMilestone {
    type Output = Option<Event>;
    type Error = StoreError;

    async fn run(&self, tx: &mut Transaction) -> Result<Option<Event>, StoreError> {
        let Some(mut event) = tx.get::<Event>(&self.event_id.to_string()).await? else {
            return Ok(None);
        };
        if self.milestone.already_sent(&event) {
            return Ok(None);
        }
        self.milestone.mark_sent(&mut event);
        tx.put(&event)?;
        Ok(Some(event))
    }
}

pub async fn run(state: AppState, every: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = every.as_secs(), "Event reminder job started");
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Event reminder job stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = tick(&state).await {
                    tracing::error!(error = %e, "Event reminders: pass failed");
                }
            }
        }
    }
}

/// One pass; returns the milestones claimed, in the order they were sent.
pub async fn tick(state: &AppState) -> Result<Vec<(Uuid, Milestone)>, AppError> {
    let now = state.clock.now();
    let events: Vec<Event> = state
        .store
        .query(&Filter::new().eq("status", "active"))
        .await?;

    let mut claimed = Vec::new();
    for event in &events {
        for milestone in [Milestone::StartingSoon, Milestone::Review] {
            let (from, to) = milestone.window(now);
            if milestone.already_sent(event) || event.start_at < from || event.start_at > to {
                continue;
            }

            let op = ClaimMilestone {
                event_id: event.id,
                milestone,
            };
            let Some(fresh) = state.store.run(&op).await? else {
                continue;
            };
            let sent = state
                .notifier
                .notify_event_holders(fresh.id, &milestone.message(&fresh))
                .await;
            tracing::info!(event_id = %fresh.id, ?milestone, sent, "Event reminder sent");
            claimed.push((fresh.id, milestone));
        }
    }
    Ok(claimed)
}
