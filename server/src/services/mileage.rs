use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use uuid::Uuid;

use crate::clock::Clock;
use crate::models::{Mileage, MileageEntry, MileageKind, Order, User};
use crate::store::{Filter, InventoryStore, StoreError, Transaction, TxOperation};

pub const REFERRAL_BONUS: i64 = 500;

#[derive(Debug, Clone)]
pub struct MileageGrant {
    pub uid: String,
    pub amount: i64,
    pub kind: MileageKind,
    pub reason: String,
    pub event_id: Option<Uuid>,
}

/// Append-only loyalty point ledger.
#[async_trait]
pub trait MileageLedger: Send + Sync {
    async fn balance(&self, uid: &str) -> Result<Mileage, StoreError>;

    async fn credit(&self, grant: MileageGrant) -> Result<Mileage, StoreError>;
}

pub fn ledger_entry(grant: &MileageGrant, at: DateTime<Utc>) -> MileageEntry {
    MileageEntry {
        id: Uuid::new_v4(),
        user_id: grant.uid.clone(),
        amount: grant.amount,
        kind: grant.kind,
        reason: grant.reason.clone(),
        event_id: grant.event_id,
        created_at: at,
    }
}

pub fn blank_user(uid: &str) -> User {
    User {
        uid: uid.to_string(),
        role: Default::default(),
        push_token: None,
        referral_code: None,
        is_demo: false,
        mileage: Mileage::default(),
    }
}

pub struct StoreMileageLedger {
    store: InventoryStore,
    clock: Arc<dyn Clock>,
}

impl StoreMileageLedger {
    pub fn new(store: InventoryStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

struct Credit<'a> {
    grant: &'a MileageGrant,
    at: DateTime<Utc>,
}

#[async_trait]
impl TxOperation for Credit<'_> {
    type Output = Mileage;
    type Error = StoreError;

    async fn run(&self, tx: &mut Transaction) -> Result<Mileage, StoreError> {
        let mut user = tx
            .get::<User>(&self.grant.uid)
            .await?
            .unwrap_or_else(|| blank_user(&self.grant.uid));
        user.mileage.apply(self.grant.amount);
        tx.put(&user)?;
        tx.put(&ledger_entry(self.grant, self.at))?;
        Ok(user.mileage)
    }
}

#[async_trait]
impl MileageLedger for StoreMileageLedger {
    async fn balance(&self, uid: &str) -> Result<Mileage, StoreError> {
        Ok(self
            .store
            .get::<User>(uid)
            .await?
            .map(|u| u.mileage)
            .unwrap_or_default())
    }

    async fn credit(&self, grant: MileageGrant) -> Result<Mileage, StoreError> {
        let mileage = self
            .store
            .run(&Credit {
                grant: &grant,
                at: self.clock.now(),
            })
            .await?;
        tracing::info!(
            uid = %grant.uid,
            amount = grant.amount,
            kind = ?grant.kind,
            balance = mileage.balance,
            "Mileage credited"
        );
        Ok(mileage)
    }
}

/// Purchase points for the buyer at their current tier rate, plus the
/// referral bonus for whoever owns the order's referral code.
pub async fn accrue_after_booking(
    ledger: &dyn MileageLedger,
    store: &InventoryStore,
    order: &Order,
) -> Result<(), StoreError> {
    let current = ledger.balance(&order.user_id).await?;
    let earned = (order.total_amount * current.tier.earn_rate())
        .floor()
        .to_i64()
        .unwrap_or(0);
    if earned > 0 {
        ledger
            .credit(MileageGrant {
                uid: order.user_id.clone(),
                amount: earned,
                kind: MileageKind::Purchase,
                reason: format!("Ticket purchase ({} tickets)", order.quantity),
                event_id: Some(order.event_id),
            })
            .await?;
    }

    let Some(code) = order.referral_code.as_deref().filter(|c| !c.is_empty()) else {
        return Ok(());
    };
    let referrers: Vec<User> = store
        .query(&Filter::new().eq("referralCode", code))
        .await?;
    match referrers.into_iter().next() {
        Some(referrer) if referrer.uid != order.user_id => {
            ledger
                .credit(MileageGrant {
                    uid: referrer.uid,
                    amount: REFERRAL_BONUS,
                    kind: MileageKind::Referral,
                    reason: "Referral purchase bonus".to_string(),
                    event_id: Some(order.event_id),
                })
                .await?;
        }
        Some(_) => tracing::debug!(order_id = %order.id, "Self-referral ignored"),
        None => tracing::debug!(order_id = %order.id, code, "Unknown referral code"),
    }
    Ok(())
}
