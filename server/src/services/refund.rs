//! Cancellation fee schedule.
//!
//! Rules are checked top to bottom and the first match wins:
//!
//! | condition                                   | fee                          |
//! |---------------------------------------------|------------------------------|
//! | event started or < 1 day away               | cancellation blocked         |
//! | ordered ≤ 7 days ago                        | none                         |
//! | event in [1, 3) days                        | 30%                          |
//! | event in [3, 7) days                        | 20%                          |
//! | event in [7, 10) days                       | 10%                          |
//! | otherwise                                   | flat fee, capped at 10%      |

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Categories charged the higher flat fee.
pub const PERFORMANCE_CATEGORIES: [&str; 5] = ["콘서트", "뮤지컬", "클래식", "오페라", "발레"];

const PERFORMANCE_FLAT_FEE: i64 = 4000;
const ADMISSION_FLAT_FEE: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeeBucket {
    Performance,
    Admission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RefundPolicy {
    EventStarted,
    EventDay,
    WithinSevenDaysOfOrder,
    OneToTwoDaysBefore,
    ThreeToSixDaysBefore,
    SevenToNineDaysBefore,
    FlatFee(FeeBucket),
}

impl RefundPolicy {
    pub fn label(self) -> &'static str {
        match self {
            RefundPolicy::EventStarted => "Cancellation is not possible after the event has started",
            RefundPolicy::EventDay => "Cancellation is not possible on the day of the event",
            RefundPolicy::WithinSevenDaysOfOrder => "Free cancellation within 7 days of booking",
            RefundPolicy::OneToTwoDaysBefore => "2 to 1 days before the event (30% fee)",
            RefundPolicy::ThreeToSixDaysBefore => "6 to 3 days before the event (20% fee)",
            RefundPolicy::SevenToNineDaysBefore => "9 to 7 days before the event (10% fee)",
            RefundPolicy::FlatFee(FeeBucket::Performance) => {
                "8+ days after booking (performance ticket flat fee 4,000)"
            }
            RefundPolicy::FlatFee(FeeBucket::Admission) => {
                "8+ days after booking (admission ticket flat fee 2,000)"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundQuote {
    /// Share of the unit price returned, `0` when cancellation is blocked.
    pub refund_rate: Decimal,
    pub fee: Decimal,
    pub policy: RefundPolicy,
}

impl RefundQuote {
    pub fn is_blocked(&self) -> bool {
        self.refund_rate.is_zero()
    }

    pub fn refund_amount(&self, unit_price: Decimal) -> Decimal {
        if self.is_blocked() {
            Decimal::ZERO
        } else {
            unit_price - self.fee
        }
    }
}

pub fn fee_bucket(category: Option<&str>) -> FeeBucket {
    match category {
        Some(c) if PERFORMANCE_CATEGORIES.contains(&c) => FeeBucket::Performance,
        _ => FeeBucket::Admission,
    }
}

pub fn calculate_refund(
    unit_price: Decimal,
    order_created_at: DateTime<Utc>,
    event_start_at: DateTime<Utc>,
    category: Option<&str>,
    now: DateTime<Utc>,
) -> RefundQuote {
    let until_start = event_start_at - now;
    let since_order = now - order_created_at;

    if until_start <= Duration::zero() {
        return blocked(unit_price, RefundPolicy::EventStarted);
    }
    if until_start < Duration::days(1) {
        return blocked(unit_price, RefundPolicy::EventDay);
    }
    if since_order <= Duration::days(7) {
        return RefundQuote {
            refund_rate: Decimal::ONE,
            fee: Decimal::ZERO,
            policy: RefundPolicy::WithinSevenDaysOfOrder,
        };
    }
    if until_start < Duration::days(3) {
        return percentage(unit_price, 30, RefundPolicy::OneToTwoDaysBefore);
    }
    if until_start < Duration::days(7) {
        return percentage(unit_price, 20, RefundPolicy::ThreeToSixDaysBefore);
    }
    if until_start < Duration::days(10) {
        return percentage(unit_price, 10, RefundPolicy::SevenToNineDaysBefore);
    }

    let bucket = fee_bucket(category);
    let flat = Decimal::from(match bucket {
        FeeBucket::Performance => PERFORMANCE_FLAT_FEE,
        FeeBucket::Admission => ADMISSION_FLAT_FEE,
    });
    let cap = round_currency(unit_price * Decimal::new(10, 2));
    let fee = flat.min(cap);
    let refund_rate = if unit_price.is_zero() {
        Decimal::ONE
    } else {
        (unit_price - fee) / unit_price
    };

    RefundQuote {
        refund_rate,
        fee,
        policy: RefundPolicy::FlatFee(bucket),
    }
}

fn blocked(unit_price: Decimal, policy: RefundPolicy) -> RefundQuote {
    RefundQuote {
        refund_rate: Decimal::ZERO,
        fee: unit_price,
        policy,
    }
}

fn percentage(unit_price: Decimal, percent: i64, policy: RefundPolicy) -> RefundQuote {
    RefundQuote {
        refund_rate: Decimal::ONE - Decimal::new(percent, 2),
        fee: round_currency(unit_price * Decimal::new(percent, 2)),
        policy,
    }
}

/// Whole currency units, halves rounded away from zero.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}
