//! Best-effort push delivery. Nothing in here ever fails the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Ticket, TicketStatus, User};
use crate::store::{Filter, InventoryStore, StoreError, Transaction, TxOperation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The device token is no longer registered with the push provider.
    #[error("push token is not registered")]
    Unregistered,

    #[error("push transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError>;
}

/// Logs pushes instead of delivering them; used when no provider is wired.
pub struct TracingPushSender;

#[async_trait]
impl PushSender for TracingPushSender {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        tracing::info!(
            token_suffix = %token.chars().rev().take(6).collect::<String>(),
            title = %message.title,
            "Push dispatched"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    store: InventoryStore,
    sender: Arc<dyn PushSender>,
}

impl Notifier {
    pub fn new(store: InventoryStore, sender: Arc<dyn PushSender>) -> Self {
        Self { store, sender }
    }

    /// Sends to one user. Returns whether a push went out.
    pub async fn notify_user(&self, uid: &str, message: &PushMessage) -> bool {
        let user = match self.store.get::<User>(uid).await {
            Ok(Some(user)) => user,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, uid, "Failed to load push recipient");
                return false;
            }
        };
        let Some(token) = user.push_token.clone().filter(|t| !t.is_empty()) else {
            return false;
        };

        match self.sender.send(&token, message).await {
            Ok(()) => true,
            Err(PushError::Unregistered) => {
                tracing::info!(uid, "Clearing stale push token");
                self.clear_token(uid, &token).await;
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, uid, "Push delivery failed");
                false
            }
        }
    }

    /// Sends once to every distinct holder of an issued ticket for the event.
    pub async fn notify_event_holders(&self, event_id: Uuid, message: &PushMessage) -> usize {
        let filter = Filter::new().eq("eventId", event_id.to_string());
        let tickets: Vec<Ticket> = match self.store.query(&filter).await {
            Ok(tickets) => tickets,
            Err(e) => {
                tracing::warn!(error = %e, %event_id, "Failed to load event ticket holders");
                return 0;
            }
        };

        let holders: BTreeSet<String> = tickets
            .into_iter()
            .filter(|t| t.state.status() == TicketStatus::Issued)
            .map(|t| t.user_id)
            .collect();

        let mut sent = 0;
        for uid in &holders {
            if self.notify_user(uid, message).await {
                sent += 1;
            }
        }
        tracing::info!(%event_id, holders = holders.len(), sent, "Event push finished");
        sent
    }

    async fn clear_token(&self, uid: &str, token: &str) {
        if let Err(e) = self.store.run(&ClearPushToken { uid, token }).await {
            tracing::warn!(error = %e, uid, "Failed to clear push token");
        }
    }
}

/// Drops the token only if it is still the one that bounced; the rest of the
/// user document is whatever is current at commit.
struct ClearPushToken<'a> {
    uid: &'a str,
    token: &'a str,
}

#[async_trait]
impl TxOperation for ClearPushToken<'_> {
    type Output = ();
    type Error = StoreError;

    async fn run(&self, tx: &mut Transaction) -> Result<(), StoreError> {
        let Some(mut user) = tx.get::<User>(self.uid).await? else {
            return Ok(());
        };
        if user.push_token.as_deref() == Some(self.token) {
            user.push_token = None;
            tx.put(&user)?;
        }
        Ok(())
    }
}
