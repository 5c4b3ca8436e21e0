use axum::extract::State;
use axum::response::Response;

use crate::handlers::auth::Payload;
use crate::services::access::Caller;
use crate::services::checkin::{self, CheckinRequest, GroupCheckinRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::outcome;

pub async fn verify_and_check_in(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<CheckinRequest>,
) -> Result<Response, AppError> {
    let result = checkin::verify_and_check_in(&state, &caller, req).await?;
    Ok(outcome(result))
}

pub async fn verify_and_check_in_group(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<GroupCheckinRequest>,
) -> Result<Response, AppError> {
    let result = checkin::verify_and_check_in_group(&state, &caller, req).await?;
    Ok(outcome(result))
}
