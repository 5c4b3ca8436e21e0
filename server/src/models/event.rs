use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventStatus {
    Draft,
    Active,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DiscountKind {
    /// Only applies when the order has at least `min_quantity` tickets.
    Bulk { min_quantity: u32 },
    Standard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountPolicy {
    pub name: String,
    pub kind: DiscountKind,
    /// Fraction of the list price taken off, e.g. `0.1`.
    pub discount_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub total_seats: u32,
    /// Only ever changed inside booking and cancellation transactions.
    pub available_seats: u32,
    /// `0` means no per-order limit.
    pub max_tickets_per_order: u32,
    pub start_at: DateTime<Utc>,
    pub reveal_at: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub is_standing: bool,
    #[serde(default)]
    pub has_intermission: bool,
    pub status: EventStatus,
    #[serde(default)]
    pub discount_policies: Vec<DiscountPolicy>,
    #[serde(default)]
    pub reminder_sent: bool,
    #[serde(default)]
    pub review_reminder_sent: bool,
}

impl Event {
    /// Entry number handed to the next standing ticket.
    pub fn next_entry_number(&self) -> u32 {
        self.total_seats.saturating_sub(self.available_seats) + 1
    }

    /// Takes `quantity` out of the sellable pool. Returns `false`, leaving the
    /// counter untouched, when fewer remain.
    pub fn take_seats(&mut self, quantity: u32) -> bool {
        match self.available_seats.checked_sub(quantity) {
            Some(left) => {
                self.available_seats = left;
                true
            }
            None => false,
        }
    }

    pub fn release_seats(&mut self, quantity: u32) {
        self.available_seats = self
            .available_seats
            .saturating_add(quantity)
            .min(self.total_seats);
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "Event"
        } else {
            &self.title
        }
    }
}

impl Document for Event {
    const COLLECTION: &'static str = "events";

    fn key(&self) -> String {
        self.id.to_string()
    }
}
