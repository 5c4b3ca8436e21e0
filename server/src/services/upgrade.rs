use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{MileageKind, Seat, SeatBlock, SeatGrade, Ticket, TicketState, User};
use crate::services::access::Caller;
use crate::services::mileage::{blank_user, ledger_entry, MileageGrant};
use crate::state::AppState;
use crate::store::{Filter, Transaction, TxOperation};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOutcome {
    pub ticket_id: Uuid,
    pub previous_seat_id: Uuid,
    pub new_seat_id: Uuid,
    pub new_grade: SeatGrade,
    pub seat_info: String,
    pub mileage_spent: i64,
    pub remaining_balance: i64,
}

struct UpgradeSeat<'a> {
    ticket_id: Uuid,
    uid: &'a str,
    now: DateTime<Utc>,
}

#[async_trait]
impl TxOperation for UpgradeSeat<'_> {
    type Output = UpgradeOutcome;
    type Error = AppError;

    async fn run(&self, tx: &mut Transaction) -> Result<UpgradeOutcome, AppError> {
        let mut ticket: Ticket = tx
            .get(&self.ticket_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
        if ticket.user_id != self.uid {
            return Err(AppError::PermissionDenied(
                "Only the ticket holder can upgrade it".to_string(),
            ));
        }
        if ticket.state != TicketState::Issued {
            return Err(AppError::FailedPrecondition(format!(
                "Ticket is {} and cannot be upgraded",
                ticket.state.name()
            )));
        }
        let seat_id = ticket.seat_id.ok_or_else(|| {
            AppError::FailedPrecondition("Standing tickets have no seat to upgrade".to_string())
        })?;

        let mut current: Seat = tx
            .get(&seat_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Seat not found".to_string()))?;
        let (next_grade, cost) = current.grade.upgrade().ok_or_else(|| {
            AppError::FailedPrecondition("VIP seats cannot be upgraded further".to_string())
        })?;

        let mut user = tx
            .get::<User>(self.uid)
            .await?
            .unwrap_or_else(|| blank_user(self.uid));
        if !user.mileage.apply(-cost) {
            return Err(AppError::FailedPrecondition(format!(
                "Upgrading to {next_grade} needs {cost} mileage"
            )));
        }

        let filter = Filter::new()
            .eq("eventId", ticket.event_id.to_string())
            .eq("status", "available")
            .eq("grade", next_grade.as_str());
        let mut candidates: Vec<Seat> = tx.query(&filter).await?;
        candidates.sort_by(|a, b| a.canonical_cmp(b));
        let mut target = candidates.into_iter().next().ok_or_else(|| {
            AppError::FailedPrecondition(format!("No {next_grade} seats are left"))
        })?;

        current.release();
        target.reserve(ticket.order_id, self.now);
        tx.put(&current)?;
        tx.put(&target)?;

        if let Some(block_id) = ticket.seat_block_id {
            if let Some(mut block) = tx.get::<SeatBlock>(&block_id.to_string()).await? {
                for id in block.seat_ids.iter_mut().filter(|id| **id == seat_id) {
                    *id = target.id;
                }
                tx.put(&block)?;
            }
        }

        ticket.previous_seat_id = Some(seat_id);
        ticket.seat_id = Some(target.id);
        ticket.upgraded_at = Some(self.now);
        tx.put(&ticket)?;

        let grant = MileageGrant {
            uid: self.uid.to_string(),
            amount: -cost,
            kind: MileageKind::Upgrade,
            reason: format!("Seat upgrade {} -> {}", current.grade, next_grade),
            event_id: Some(ticket.event_id),
        };
        tx.put(&user)?;
        tx.put(&ledger_entry(&grant, self.now))?;

        Ok(UpgradeOutcome {
            ticket_id: ticket.id,
            previous_seat_id: seat_id,
            new_seat_id: target.id,
            new_grade: next_grade,
            seat_info: target.describe(),
            mileage_spent: cost,
            remaining_balance: user.mileage.balance,
        })
    }
}

/// Moves a ticket to the first free seat one grade up, paid for in mileage.
pub async fn upgrade_ticket_seat(
    state: &AppState,
    caller: &Caller,
    ticket_id: Uuid,
) -> Result<UpgradeOutcome, AppError> {
    let uid = caller.require_uid()?;
    let outcome = state
        .store
        .run(&UpgradeSeat {
            ticket_id,
            uid,
            now: state.clock.now(),
        })
        .await?;
    tracing::info!(
        %ticket_id,
        grade = %outcome.new_grade,
        spent = outcome.mileage_spent,
        "Seat upgraded"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mileage, MileageEntry, Role, SeatStatus};
    use crate::testing::TestEnv;
    use assert_matches::assert_matches;

    async fn funded(env: &TestEnv, balance: i64) {
        let mut user = env.seed_user("buyer", Role::User).await;
        user.mileage = Mileage {
            balance,
            ..Mileage::default()
        };
        env.state.store.put(&user).await.unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_swaps_seat_and_debits_mileage() {
        let env = TestEnv::new().await;
        funded(&env, 2_500).await;
        let event = env.seed_event(false, 4).await;
        let seats = env.seed_row(&event, "A", "1", 1..=2).await;
        let mut better = env.seed_row(&event, "B", "1", 1..=2).await;
        for seat in &mut better {
            seat.grade = SeatGrade::S;
        }
        env.state.store.put_all(&better).await.unwrap();
        let ticket = env.seed_seated_ticket(&event, "buyer", &seats[0]).await;

        let outcome = upgrade_ticket_seat(&env.state, &Caller::user("buyer"), ticket.id)
            .await
            .unwrap();
        assert_eq!(outcome.new_grade, SeatGrade::S);
        assert_eq!(outcome.new_seat_id, better[0].id);
        assert_eq!(outcome.remaining_balance, 500);

        let old: Seat = env.state.store.get(&seats[0].id.to_string()).await.unwrap().unwrap();
        assert_eq!(old.status, SeatStatus::Available);
        let new: Seat = env.state.store.get(&better[0].id.to_string()).await.unwrap().unwrap();
        assert_matches!(new.status, SeatStatus::Reserved { order_id, .. } if order_id == ticket.order_id);

        let stored: Ticket = env.state.store.get(&ticket.id.to_string()).await.unwrap().unwrap();
        assert_eq!(stored.previous_seat_id, Some(seats[0].id));
        assert_eq!(stored.seat_id, Some(better[0].id));

        let history: Vec<MileageEntry> = env
            .state
            .store
            .query(&Filter::new().eq("kind", "upgrade"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, -2_000);
    }

    #[tokio::test]
    async fn test_upgrade_needs_balance_and_stock() {
        let env = TestEnv::new().await;
        funded(&env, 1_000).await;
        let event = env.seed_event(false, 2).await;
        let seats = env.seed_row(&event, "A", "1", 1..=2).await;
        let ticket = env.seed_seated_ticket(&event, "buyer", &seats[0]).await;

        assert_matches!(
            upgrade_ticket_seat(&env.state, &Caller::user("buyer"), ticket.id).await,
            Err(AppError::FailedPrecondition(_))
        );

        funded(&env, 10_000).await;
        // Enough mileage, but no S-grade seat exists.
        assert_matches!(
            upgrade_ticket_seat(&env.state, &Caller::user("buyer"), ticket.id).await,
            Err(AppError::FailedPrecondition(_))
        );
        let user: User = env.state.store.get("buyer").await.unwrap().unwrap();
        assert_eq!(user.mileage.balance, 10_000);
    }
}
