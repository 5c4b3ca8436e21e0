use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Event, SeatBlock};
use crate::services::access::{require_admin, Caller};
use crate::services::notifications::PushMessage;
use crate::state::AppState;
use crate::store::{Filter, StoreError, Transaction, TxOperation};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RevealOutcome {
    pub revealed_blocks: usize,
    pub notifications_sent: usize,
}

/// Flips the event's hidden blocks inside one transaction, so a block
/// rewritten concurrently (an upgrade repointing its seats) forces a rerun
/// instead of being overwritten.
struct RevealBlocks {
    event_id: Uuid,
}

#[async_trait]
impl TxOperation for RevealBlocks {
    type Output = usize;
    type Error = StoreError;

    async fn run(&self, tx: &mut Transaction) -> Result<usize, StoreError> {
        let filter = Filter::new()
            .eq("eventId", self.event_id.to_string())
            .eq("hidden", true);
        let blocks: Vec<SeatBlock> = tx.query(&filter).await?;
        for mut block in blocks.iter().cloned() {
            block.hidden = false;
            tx.put(&block)?;
        }
        Ok(blocks.len())
    }
}

/// Makes every hidden block of the event visible to its buyer.
pub async fn reveal_event_blocks(state: &AppState, event: &Event) -> Result<RevealOutcome, AppError> {
    let revealed_blocks = state.store.run(&RevealBlocks { event_id: event.id }).await?;
    if revealed_blocks == 0 {
        return Ok(RevealOutcome::default());
    }

    let message = PushMessage::new(
        "Your seats are ready",
        format!("Seats for {} have been revealed. Check your tickets.", event.display_title()),
    )
    .with("type", "seatReveal")
    .with("eventId", event.id);
    let notifications_sent = state.notifier.notify_event_holders(event.id, &message).await;

    tracing::info!(
        event_id = %event.id,
        revealed = revealed_blocks,
        notifications_sent,
        "Seat blocks revealed"
    );
    Ok(RevealOutcome {
        revealed_blocks,
        notifications_sent,
    })
}

pub async fn reveal_seats_for_event(
    state: &AppState,
    caller: &Caller,
    event_id: Uuid,
) -> Result<RevealOutcome, AppError> {
    require_admin(state.identity.as_ref(), caller).await?;
    let event: Event = state
        .store
        .get(&event_id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    reveal_event_blocks(state, &event).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::services::booking::confirm_payment;
    use crate::store::Document;
    use crate::testing::{RacingBackend, TestEnv};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_admin_reveal_flips_blocks_once() {
        let env = TestEnv::new().await;
        env.seed_user("admin", Role::Admin).await;
        env.seed_user("buyer", Role::User).await;
        let event = env.seed_event(false, 4).await;
        env.seed_row(&event, "A", "1", 1..=4).await;
        let order = env.seed_order(&event, "buyer", 2).await;
        confirm_payment(&env.state, &Caller::user("buyer"), order.id)
            .await
            .unwrap();

        assert_matches!(
            reveal_seats_for_event(&env.state, &Caller::user("buyer"), event.id).await,
            Err(AppError::PermissionDenied(_))
        );

        let outcome = reveal_seats_for_event(&env.state, &Caller::user("admin"), event.id)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RevealOutcome {
                revealed_blocks: 1,
                notifications_sent: 1
            }
        );

        let again = reveal_seats_for_event(&env.state, &Caller::user("admin"), event.id)
            .await
            .unwrap();
        assert_eq!(again, RevealOutcome::default());
    }

    #[tokio::test]
    async fn test_reveal_keeps_seats_repointed_mid_flight() {
        let replacement = Uuid::new_v4();
        let backend = Arc::new(RacingBackend::new(SeatBlock::COLLECTION, move |body| {
            body["seatIds"] = serde_json::json!([replacement]);
        }));
        let env = TestEnv::with_backend(backend.clone()).await;
        env.seed_user("admin", Role::Admin).await;
        env.seed_user("buyer", Role::User).await;
        let event = env.seed_event(false, 1).await;
        env.seed_row(&event, "A", "1", 1..=1).await;
        let order = env.seed_order(&event, "buyer", 1).await;
        confirm_payment(&env.state, &Caller::user("buyer"), order.id)
            .await
            .unwrap();

        // An upgrade repoints the block right after the reveal reads it.
        backend.arm();
        let outcome = reveal_seats_for_event(&env.state, &Caller::user("admin"), event.id)
            .await
            .unwrap();
        assert_eq!(outcome.revealed_blocks, 1);

        let blocks: Vec<SeatBlock> = env
            .state
            .store
            .query(&Filter::new().eq("eventId", event.id.to_string()))
            .await
            .unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].hidden);
        assert_eq!(blocks[0].seat_ids, vec![replacement]);
    }
}
