use axum::extract::State;
use axum::response::Response;

use crate::handlers::auth::Payload;
use crate::handlers::OrderRef;
use crate::services::access::Caller;
use crate::services::booking;
use crate::services::orders::{self, CreateOrderRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{outcome, success};

pub async fn create_order(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<CreateOrderRequest>,
) -> Result<Response, AppError> {
    let created = orders::create_order(&state, &caller, req).await?;
    Ok(success(created, "Order created"))
}

/// Allocation failures are a 200 with `success: false`.
pub async fn confirm_payment_and_assign_seats(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<OrderRef>,
) -> Result<Response, AppError> {
    let result = booking::confirm_payment(&state, &caller, req.order_id).await?;
    Ok(outcome(result))
}
