use axum::extract::State;
use axum::response::Response;

use crate::handlers::auth::Payload;
use crate::handlers::{OrderRef, TicketRef};
use crate::services::access::Caller;
use crate::services::{cancellation, qr, upgrade};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn issue_qr_token(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<TicketRef>,
) -> Result<Response, AppError> {
    let token = qr::issue_qr_token(&state, &caller, req.ticket_id).await?;
    Ok(success(token, "QR token issued"))
}

pub async fn reissue_qr_token(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<TicketRef>,
) -> Result<Response, AppError> {
    let token = qr::reissue_qr_token(&state, &caller, req.ticket_id).await?;
    Ok(success(token, "QR token reissued"))
}

pub async fn issue_group_qr_token(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<OrderRef>,
) -> Result<Response, AppError> {
    let token = qr::issue_group_qr_token(&state, &caller, req.order_id).await?;
    Ok(success(token, "Group QR token issued"))
}

pub async fn request_ticket_cancellation(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<TicketRef>,
) -> Result<Response, AppError> {
    let result = cancellation::cancel_ticket(&state, &caller, req.ticket_id).await?;
    Ok(success(result, "Ticket canceled"))
}

pub async fn upgrade_ticket_seat(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<TicketRef>,
) -> Result<Response, AppError> {
    let result = upgrade::upgrade_ticket_seat(&state, &caller, req.ticket_id).await?;
    Ok(success(result, "Seat upgraded"))
}
