use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OrderStatus {
    Pending,
    Paid {
        paid_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
    /// Every ticket canceled and at least one refund was paid out.
    Refunded {
        paid_at: DateTime<Utc>,
        refunded_at: DateTime<Utc>,
    },
    /// Every ticket canceled without any refund.
    Canceled {
        paid_at: DateTime<Utc>,
        canceled_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    #[serde(default)]
    pub preferred_seat_ids: Vec<Uuid>,
    pub applied_discount: Option<String>,
    pub referral_code: Option<String>,
    #[serde(default)]
    pub is_demo: bool,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: OrderStatus,
    #[serde(default)]
    pub canceled_count: u32,
    #[serde(default)]
    pub refunded_amount: Decimal,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
    }

    pub fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.status = OrderStatus::Paid { paid_at: at };
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = OrderStatus::Failed {
            reason: reason.into(),
        };
    }

    pub fn record_cancellation(&mut self, refund: Decimal) {
        self.canceled_count += 1;
        self.refunded_amount += refund;
    }

    /// Closes a paid order once none of its tickets remain issued.
    pub fn settle(&mut self, at: DateTime<Utc>) {
        if let OrderStatus::Paid { paid_at } = self.status {
            self.status = if self.refunded_amount > Decimal::ZERO {
                OrderStatus::Refunded {
                    paid_at,
                    refunded_at: at,
                }
            } else {
                OrderStatus::Canceled {
                    paid_at,
                    canceled_at: at,
                }
            };
        }
    }
}

impl Document for Order {
    const COLLECTION: &'static str = "orders";

    fn key(&self) -> String {
        self.id.to_string()
    }
}
