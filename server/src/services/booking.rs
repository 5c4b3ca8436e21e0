//! Payment confirmation and seat assignment.
//!
//! The whole decision runs in one store transaction: order, event and seat
//! inventory are read through the same handle, so a concurrent booking that
//! touches any of them forces a full rerun. Push and mileage side effects run
//! only after the commit and can never undo it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Event, Order, Seat, SeatBlock, Ticket};
use crate::services::access::Caller;
use crate::services::allocator::find_contiguous_block;
use crate::services::mileage::accrue_after_booking;
use crate::services::notifications::PushMessage;
use crate::state::AppState;
use crate::store::{Filter, Transaction, TxOperation};
use crate::utils::error::AppError;

pub const INSUFFICIENT_QUANTITY: &str = "insufficient quantity";
pub const NO_CONTIGUOUS_BLOCK: &str = "no contiguous block";

/// Result of a confirmation. Allocation failures are reported here with
/// `success: false`; only precondition violations are errors.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingOutcome {
    pub success: bool,
    pub order_id: Uuid,
    pub seat_block_id: Option<Uuid>,
    pub ticket_ids: Vec<Uuid>,
    pub ticket_count: usize,
    pub error: Option<String>,
}

impl BookingOutcome {
    fn failed(order_id: Uuid, reason: &str) -> Self {
        Self {
            success: false,
            order_id,
            seat_block_id: None,
            ticket_ids: Vec::new(),
            ticket_count: 0,
            error: Some(reason.to_string()),
        }
    }
}

struct Confirmation {
    outcome: BookingOutcome,
    order: Order,
    event_title: String,
}

struct ConfirmPayment<'a> {
    order_id: Uuid,
    user_id: &'a str,
    now: DateTime<Utc>,
}

#[async_trait]
impl TxOperation for ConfirmPayment<'_> {
    type Output = Confirmation;
    type Error = AppError;

    async fn run(&self, tx: &mut Transaction) -> Result<Confirmation, AppError> {
        let mut order: Order = tx
            .get(&self.order_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
        if order.user_id != self.user_id {
            return Err(AppError::PermissionDenied(
                "Only the buyer can pay for this order".to_string(),
            ));
        }
        if !order.is_pending() {
            return Err(AppError::FailedPrecondition(
                "Order has already been processed".to_string(),
            ));
        }

        let mut event: Event = tx
            .get(&order.event_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
        let event_title = event.display_title().to_string();

        let outcome = if event.is_standing {
            self.book_standing(tx, &mut order, &mut event)?
        } else {
            self.book_seats(tx, &mut order, &mut event).await?
        };

        if outcome.success {
            order.mark_paid(self.now);
            if !event.take_seats(order.quantity) {
                return Err(AppError::Internal(format!(
                    "event {} has fewer available seats than were just assigned",
                    event.id
                )));
            }
            tx.put(&event)?;
        }
        tx.put(&order)?;

        Ok(Confirmation {
            outcome,
            order,
            event_title,
        })
    }
}

impl ConfirmPayment<'_> {
    fn book_standing(
        &self,
        tx: &mut Transaction,
        order: &mut Order,
        event: &mut Event,
    ) -> Result<BookingOutcome, AppError> {
        if event.available_seats < order.quantity {
            order.mark_failed(INSUFFICIENT_QUANTITY);
            return Ok(BookingOutcome::failed(order.id, INSUFFICIENT_QUANTITY));
        }

        let first = event.next_entry_number();
        let mut ticket_ids = Vec::with_capacity(order.quantity as usize);
        for offset in 0..order.quantity {
            let mut ticket = Ticket::issue(event.id, order.id, &order.user_id, self.now);
            ticket.entry_number = Some(first + offset);
            tx.put(&ticket)?;
            ticket_ids.push(ticket.id);
        }

        Ok(BookingOutcome {
            success: true,
            order_id: order.id,
            seat_block_id: None,
            ticket_count: ticket_ids.len(),
            ticket_ids,
            error: None,
        })
    }

    async fn book_seats(
        &self,
        tx: &mut Transaction,
        order: &mut Order,
        event: &mut Event,
    ) -> Result<BookingOutcome, AppError> {
        let filter = Filter::new()
            .eq("eventId", event.id.to_string())
            .eq("status", "available");
        let mut available: Vec<Seat> = tx.query(&filter).await?;
        available.sort_by(|a, b| a.canonical_cmp(b));

        let Some(chosen) = find_contiguous_block(
            &available,
            order.quantity as usize,
            &order.preferred_seat_ids,
        ) else {
            order.mark_failed(NO_CONTIGUOUS_BLOCK);
            return Ok(BookingOutcome::failed(order.id, NO_CONTIGUOUS_BLOCK));
        };

        let block = SeatBlock {
            id: Uuid::new_v4(),
            event_id: event.id,
            order_id: order.id,
            user_id: order.user_id.clone(),
            quantity: order.quantity,
            seat_ids: chosen.iter().map(|s| s.id).collect(),
            hidden: true,
            assigned_at: self.now,
        };
        tx.put(&block)?;

        let mut ticket_ids = Vec::with_capacity(chosen.len());
        for mut seat in chosen {
            seat.reserve(order.id, self.now);
            tx.put(&seat)?;

            let mut ticket = Ticket::issue(event.id, order.id, &order.user_id, self.now);
            ticket.seat_id = Some(seat.id);
            ticket.seat_block_id = Some(block.id);
            tx.put(&ticket)?;
            ticket_ids.push(ticket.id);
        }

        Ok(BookingOutcome {
            success: true,
            order_id: order.id,
            seat_block_id: Some(block.id),
            ticket_count: ticket_ids.len(),
            ticket_ids,
            error: None,
        })
    }
}

/// Confirms payment for a pending order and assigns its tickets.
pub async fn confirm_payment(
    state: &AppState,
    caller: &Caller,
    order_id: Uuid,
) -> Result<BookingOutcome, AppError> {
    let uid = caller.require_uid()?;
    let op = ConfirmPayment {
        order_id,
        user_id: uid,
        now: state.clock.now(),
    };
    let confirmation = state.store.run(&op).await?;

    let outcome = confirmation.outcome;
    if !outcome.success {
        tracing::info!(
            %order_id,
            reason = outcome.error.as_deref().unwrap_or_default(),
            "Order allocation failed"
        );
        return Ok(outcome);
    }

    tracing::info!(
        %order_id,
        tickets = outcome.ticket_count,
        seat_block_id = ?outcome.seat_block_id,
        "Order confirmed"
    );
    after_booking(state, &confirmation.order, &confirmation.event_title).await;
    Ok(outcome)
}

async fn after_booking(state: &AppState, order: &Order, event_title: &str) {
    let message = PushMessage::new(
        "Booking confirmed",
        format!("{} x{} is booked.", event_title, order.quantity),
    )
    .with("type", "booking")
    .with("orderId", order.id)
    .with("eventId", order.event_id);
    state.notifier.notify_user(&order.user_id, &message).await;

    if let Err(e) = accrue_after_booking(state.ledger.as_ref(), &state.store, order).await {
        tracing::error!(error = %e, order_id = %order.id, "Mileage accrual failed");
    }
}
