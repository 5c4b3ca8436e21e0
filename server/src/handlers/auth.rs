use std::convert::Infallible;

use axum::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::services::access::Caller;
use crate::state::AppState;
use crate::utils::error::AppError;

/// Never rejects: an unverifiable token yields an anonymous caller and each
/// operation decides whether that is acceptable.
#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        Ok(state.auth.caller_from_header(header))
    }
}

/// JSON body whose parse failures come back as `INVALID_ARGUMENT` in the
/// usual error envelope instead of axum's plain-text rejection.
pub struct Payload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| AppError::InvalidArgument(rejection.body_text()))?;
        Ok(Payload(value))
    }
}
