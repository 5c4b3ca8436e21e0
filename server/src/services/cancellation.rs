use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Event, Order, Seat, Ticket, TicketState, TicketStatus};
use crate::services::access::Caller;
use crate::services::refund::calculate_refund;
use crate::state::AppState;
use crate::store::{Filter, Transaction, TxOperation};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationOutcome {
    pub ticket_id: Uuid,
    pub refund_rate: Decimal,
    pub refund_amount: Decimal,
    pub cancel_fee: Decimal,
    pub policy: &'static str,
    /// True when this was the order's last live ticket.
    pub order_settled: bool,
}

struct CancelTicket<'a> {
    ticket_id: Uuid,
    uid: &'a str,
    now: DateTime<Utc>,
}

#[async_trait]
impl TxOperation for CancelTicket<'_> {
    type Output = CancellationOutcome;
    type Error = AppError;

    async fn run(&self, tx: &mut Transaction) -> Result<CancellationOutcome, AppError> {
        let mut ticket: Ticket = tx
            .get(&self.ticket_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
        if ticket.user_id != self.uid {
            return Err(AppError::PermissionDenied(
                "Only the ticket holder can cancel it".to_string(),
            ));
        }
        if ticket.state != TicketState::Issued {
            return Err(AppError::FailedPrecondition(format!(
                "Ticket is {} and cannot be canceled",
                ticket.state.name()
            )));
        }

        let mut order: Order = tx
            .get(&ticket.order_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
        let mut event: Event = tx
            .get(&ticket.event_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;

        let quote = calculate_refund(
            order.unit_price,
            order.created_at,
            event.start_at,
            event.category.as_deref(),
            self.now,
        );
        if quote.is_blocked() {
            return Err(AppError::FailedPrecondition(quote.policy.label().to_string()));
        }
        let refund_amount = quote.refund_amount(order.unit_price);

        let siblings: Vec<Ticket> = tx
            .query(&Filter::new().eq("orderId", order.id.to_string()))
            .await?;
        let others_live = siblings
            .iter()
            .any(|t| t.id != ticket.id && t.state.status() == TicketStatus::Issued);

        if let Some(seat_id) = ticket.seat_id {
            if let Some(mut seat) = tx.get::<Seat>(&seat_id.to_string()).await? {
                seat.release();
                tx.put(&seat)?;
            }
        }

        ticket.state = TicketState::Canceled {
            canceled_at: self.now,
        };
        tx.put(&ticket)?;

        event.release_seats(1);
        tx.put(&event)?;

        order.record_cancellation(refund_amount);
        if !others_live {
            order.settle(self.now);
        }
        tx.put(&order)?;

        Ok(CancellationOutcome {
            ticket_id: ticket.id,
            refund_rate: quote.refund_rate,
            refund_amount,
            cancel_fee: quote.fee,
            policy: quote.policy.label(),
            order_settled: !others_live,
        })
    }
}

/// Cancels an unused ticket and refunds it according to the fee schedule.
pub async fn cancel_ticket(
    state: &AppState,
    caller: &Caller,
    ticket_id: Uuid,
) -> Result<CancellationOutcome, AppError> {
    let uid = caller.require_uid()?;
    let outcome = state
        .store
        .run(&CancelTicket {
            ticket_id,
            uid,
            now: state.clock.now(),
        })
        .await?;

    tracing::info!(
        %ticket_id,
        refund_amount = %outcome.refund_amount,
        fee = %outcome.cancel_fee,
        order_settled = outcome.order_settled,
        "Ticket canceled"
    );
    Ok(outcome)
}
