use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    #[default]
    User,
    Staff,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MileageTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl MileageTier {
    pub fn for_total_earned(total_earned: i64) -> Self {
        match total_earned {
            t if t >= 30_000 => MileageTier::Platinum,
            t if t >= 15_000 => MileageTier::Gold,
            t if t >= 5_000 => MileageTier::Silver,
            _ => MileageTier::Bronze,
        }
    }

    /// Share of a purchase credited back as mileage.
    pub fn earn_rate(self) -> Decimal {
        match self {
            MileageTier::Bronze => Decimal::new(3, 2),
            MileageTier::Silver => Decimal::new(5, 2),
            MileageTier::Gold => Decimal::new(7, 2),
            MileageTier::Platinum => Decimal::new(10, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Mileage {
    pub balance: i64,
    pub tier: MileageTier,
    pub total_earned: i64,
}

impl Mileage {
    /// Applies a credit (positive) or debit (negative). Returns `false` and
    /// changes nothing if a debit would overdraw the balance.
    pub fn apply(&mut self, amount: i64) -> bool {
        if amount < 0 && self.balance + amount < 0 {
            return false;
        }
        self.balance += amount;
        if amount > 0 {
            self.total_earned += amount;
        }
        self.tier = MileageTier::for_total_earned(self.total_earned);
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub role: Role,
    pub push_token: Option<String>,
    pub referral_code: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
    #[serde(default)]
    pub mileage: Mileage,
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn key(&self) -> String {
        self.uid.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MileageKind {
    Purchase,
    Referral,
    Upgrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MileageEntry {
    pub id: Uuid,
    pub user_id: String,
    pub amount: i64,
    pub kind: MileageKind,
    pub reason: String,
    pub event_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Document for MileageEntry {
    const COLLECTION: &'static str = "mileageHistory";

    fn key(&self) -> String {
        self.id.to_string()
    }
}
