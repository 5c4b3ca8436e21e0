use axum::extract::State;
use axum::response::Response;

use crate::handlers::auth::Payload;
use crate::handlers::EventRef;
use crate::services::access::Caller;
use crate::services::reveal;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn reveal_seats_for_event(
    State(state): State<AppState>,
    caller: Caller,
    Payload(req): Payload<EventRef>,
) -> Result<Response, AppError> {
    let result = reveal::reveal_seats_for_event(&state, &caller, req.event_id).await?;
    Ok(success(result, "Seats revealed"))
}
