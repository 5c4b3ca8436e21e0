//! Short-lived signed QR credentials.
//!
//! A ticket code travels as `<ticketId>:<jwt>` and a group code as
//! `group:<orderId>:<jwt>`. Both are HS256 tokens whose expiry is checked
//! against the injected clock rather than the library's system time.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Order, Ticket};
use crate::services::access::Caller;
use crate::state::AppState;
use crate::store::{Filter, Transaction, TxOperation};
use crate::utils::error::AppError;

pub const GROUP_TOKEN_TYPE: &str = "group";
const GROUP_PREFIX: &str = "group:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketClaims {
    pub ticket_id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub qr_version: u32,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupClaims {
    pub order_id: Uuid,
    pub ticket_ids: Vec<Uuid>,
    /// Parallel to `ticket_ids`.
    pub qr_versions: Vec<u32>,
    pub event_id: Uuid,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    InvalidSignature,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrTokenPayload {
    pub token: String,
    pub exp: i64,
}

pub struct QrTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl QrTokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against the injected clock in `check_expiry`.
        validation.validate_exp = false;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn sign_ticket(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<QrTokenPayload, AppError> {
        let iat = now.timestamp();
        let claims = TicketClaims {
            ticket_id: ticket.id,
            event_id: ticket.event_id,
            user_id: ticket.user_id.clone(),
            qr_version: ticket.qr_version,
            iat,
            exp: iat + self.ttl.num_seconds(),
        };
        let jwt = self.sign(&claims)?;
        Ok(QrTokenPayload {
            token: format!("{}:{jwt}", ticket.id),
            exp: claims.exp,
        })
    }

    pub fn sign_group(
        &self,
        order: &Order,
        tickets: &[Ticket],
        now: DateTime<Utc>,
    ) -> Result<QrTokenPayload, AppError> {
        let iat = now.timestamp();
        let claims = GroupClaims {
            order_id: order.id,
            ticket_ids: tickets.iter().map(|t| t.id).collect(),
            qr_versions: tickets.iter().map(|t| t.qr_version).collect(),
            event_id: order.event_id,
            user_id: order.user_id.clone(),
            kind: GROUP_TOKEN_TYPE.to_string(),
            iat,
            exp: iat + self.ttl.num_seconds(),
        };
        let jwt = self.sign(&claims)?;
        Ok(QrTokenPayload {
            token: format!("{GROUP_PREFIX}{}:{jwt}", order.id),
            exp: claims.exp,
        })
    }

    pub fn verify_ticket(&self, wire: &str, now: DateTime<Utc>) -> Result<TicketClaims, TokenRejection> {
        let claims: TicketClaims = self.verify(split_ticket_wire(wire))?;
        check_expiry(claims.exp, now)?;
        Ok(claims)
    }

    /// Returns the order id written in the wire prefix alongside the claims.
    pub fn verify_group(
        &self,
        wire: &str,
        now: DateTime<Utc>,
    ) -> Result<(Option<Uuid>, GroupClaims), TokenRejection> {
        let (prefix_order, jwt) = split_group_wire(wire);
        let claims: GroupClaims = self.verify(jwt)?;
        if claims.kind != GROUP_TOKEN_TYPE {
            return Err(TokenRejection::InvalidSignature);
        }
        check_expiry(claims.exp, now)?;
        Ok((prefix_order, claims))
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String, AppError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("failed to sign QR token: {e}")))
    }

    fn verify<C: serde::de::DeserializeOwned>(&self, jwt: &str) -> Result<C, TokenRejection> {
        decode::<C>(jwt, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "QR token failed verification");
                TokenRejection::InvalidSignature
            })
    }
}

fn check_expiry(exp: i64, now: DateTime<Utc>) -> Result<(), TokenRejection> {
    if now.timestamp() >= exp {
        Err(TokenRejection::Expired)
    } else {
        Ok(())
    }
}

/// Splits on the first `:`; a string without one is taken as the bare token.
pub fn split_ticket_wire(wire: &str) -> &str {
    wire.split_once(':').map_or(wire, |(_, jwt)| jwt)
}

pub fn split_group_wire(wire: &str) -> (Option<Uuid>, &str) {
    let rest = wire.strip_prefix(GROUP_PREFIX).unwrap_or(wire);
    match rest.split_once(':') {
        Some((order_id, jwt)) => (order_id.parse().ok(), jwt),
        None => (None, rest),
    }
}

async fn owned_ticket(state: &AppState, uid: &str, ticket_id: Uuid) -> Result<Ticket, AppError> {
    let ticket: Ticket = state
        .store
        .get(&ticket_id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
    if ticket.user_id != uid {
        return Err(AppError::PermissionDenied(
            "Only the ticket holder can request its QR code".to_string(),
        ));
    }
    if !ticket.state.accepts_checkin() {
        return Err(AppError::FailedPrecondition(format!(
            "Ticket is {} and can no longer be scanned",
            ticket.state.name()
        )));
    }
    Ok(ticket)
}

pub async fn issue_qr_token(
    state: &AppState,
    caller: &Caller,
    ticket_id: Uuid,
) -> Result<QrTokenPayload, AppError> {
    let uid = caller.require_uid()?;
    let ticket = owned_ticket(state, uid, ticket_id).await?;
    state.qr.sign_ticket(&ticket, state.clock.now())
}

struct BumpQrVersion<'a> {
    ticket_id: Uuid,
    uid: &'a str,
}

#[async_trait::async_trait]
impl TxOperation for BumpQrVersion<'_> {
    type Output = Ticket;
    type Error = AppError;

    async fn run(&self, tx: &mut Transaction) -> Result<Ticket, AppError> {
        let mut ticket: Ticket = tx
            .get(&self.ticket_id.to_string())
            .await?
            .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
        if ticket.user_id != self.uid {
            return Err(AppError::PermissionDenied(
                "Only the ticket holder can request its QR code".to_string(),
            ));
        }
        if !ticket.state.accepts_checkin() {
            return Err(AppError::FailedPrecondition(format!(
                "Ticket is {} and can no longer be scanned",
                ticket.state.name()
            )));
        }
        ticket.qr_version += 1;
        tx.put(&ticket)?;
        Ok(ticket)
    }
}

/// Bumps the ticket's version before signing, so every earlier code for it
/// stops verifying.
pub async fn reissue_qr_token(
    state: &AppState,
    caller: &Caller,
    ticket_id: Uuid,
) -> Result<QrTokenPayload, AppError> {
    let uid = caller.require_uid()?;
    let ticket = state.store.run(&BumpQrVersion { ticket_id, uid }).await?;
    tracing::info!(%ticket_id, qr_version = ticket.qr_version, "QR code reissued");
    state.qr.sign_ticket(&ticket, state.clock.now())
}

pub async fn issue_group_qr_token(
    state: &AppState,
    caller: &Caller,
    order_id: Uuid,
) -> Result<QrTokenPayload, AppError> {
    let uid = caller.require_uid()?;
    let order: Order = state
        .store
        .get(&order_id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
    if order.user_id != uid {
        return Err(AppError::PermissionDenied(
            "Only the buyer can request a group QR code".to_string(),
        ));
    }

    let filter = Filter::new().eq("orderId", order_id.to_string());
    let tickets: Vec<Ticket> = state
        .store
        .query::<Ticket>(&filter)
        .await?
        .into_iter()
        .filter(|t| t.user_id == uid && t.state.accepts_checkin())
        .collect();
    if tickets.is_empty() {
        return Err(AppError::NotFound(
            "No tickets on this order can be checked in".to_string(),
        ));
    }

    state.qr.sign_group(&order, &tickets, state.clock.now())
}
