use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum SeatGrade {
    #[default]
    A,
    S,
    R,
    #[serde(rename = "VIP")]
    Vip,
}

impl SeatGrade {
    /// The next grade up and the mileage it costs to get there.
    pub fn upgrade(self) -> Option<(SeatGrade, i64)> {
        match self {
            SeatGrade::A => Some((SeatGrade::S, 2000)),
            SeatGrade::S => Some((SeatGrade::R, 3000)),
            SeatGrade::R => Some((SeatGrade::Vip, 5000)),
            SeatGrade::Vip => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeatGrade::A => "A",
            SeatGrade::S => "S",
            SeatGrade::R => "R",
            SeatGrade::Vip => "VIP",
        }
    }
}

impl fmt::Display for SeatGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seat is owned by at most one order, and only while reserved or used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SeatStatus {
    Available,
    Reserved {
        order_id: Uuid,
        reserved_at: DateTime<Utc>,
    },
    Used {
        order_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub block: String,
    pub floor: String,
    pub row: Option<String>,
    pub number: u32,
    #[serde(default)]
    pub grade: SeatGrade,
    #[serde(flatten)]
    pub status: SeatStatus,
}

impl Seat {
    pub fn is_available(&self) -> bool {
        matches!(self.status, SeatStatus::Available)
    }

    pub fn reserve(&mut self, order_id: Uuid, at: DateTime<Utc>) {
        self.status = SeatStatus::Reserved {
            order_id,
            reserved_at: at,
        };
    }

    pub fn release(&mut self) {
        self.status = SeatStatus::Available;
    }

    /// No-op unless the seat is currently held by an order.
    pub fn mark_used(&mut self) {
        if let SeatStatus::Reserved { order_id, .. } = self.status {
            self.status = SeatStatus::Used { order_id };
        }
    }

    /// Ordering by (block, floor, row, number), the order seat inventory is
    /// read in.
    pub fn canonical_cmp(&self, other: &Seat) -> Ordering {
        (&self.block, &self.floor, &self.row, self.number).cmp(&(
            &other.block,
            &other.floor,
            &other.row,
            other.number,
        ))
    }

    /// Human readable location shown to scanner staff.
    pub fn describe(&self) -> String {
        match &self.row {
            Some(row) if !row.is_empty() => format!(
                "{} Block {} {} Row {} Seat {}",
                self.grade, self.block, self.floor, row, self.number
            ),
            _ => format!(
                "{} Block {} {} Seat {}",
                self.grade, self.block, self.floor, self.number
            ),
        }
    }
}

impl Document for Seat {
    const COLLECTION: &'static str = "seats";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// The seats assigned to one order. Blocks start hidden and are only ever
/// flipped to visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatBlock {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    pub quantity: u32,
    pub seat_ids: Vec<Uuid>,
    pub hidden: bool,
    pub assigned_at: DateTime<Utc>,
}

impl Document for SeatBlock {
    const COLLECTION: &'static str = "seatBlocks";

    fn key(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(row: Option<&str>) -> Seat {
        Seat {
            id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            block: "A".to_string(),
            floor: "1F".to_string(),
            row: row.map(str::to_string),
            number: 12,
            grade: SeatGrade::S,
            status: SeatStatus::Available,
        }
    }

    #[test]
    fn test_status_is_flattened_into_document() {
        let mut s = seat(Some("3"));
        let order_id = Uuid::new_v4();
        s.reserve(order_id, Utc::now());

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "reserved");
        assert_eq!(json["orderId"], order_id.to_string());
        assert_eq!(json["grade"], "S");

        let back: Seat = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_mark_used_keeps_owner() {
        let mut s = seat(None);
        s.mark_used();
        assert_eq!(s.status, SeatStatus::Available);

        let order_id = Uuid::new_v4();
        s.reserve(order_id, Utc::now());
        s.mark_used();
        assert_eq!(s.status, SeatStatus::Used { order_id });
    }

    #[test]
    fn test_describe_with_and_without_row() {
        assert_eq!(seat(Some("3")).describe(), "S Block A 1F Row 3 Seat 12");
        assert_eq!(seat(None).describe(), "S Block A 1F Seat 12");
    }

    #[test]
    fn test_grade_ladder_ends_at_vip() {
        assert_eq!(SeatGrade::A.upgrade(), Some((SeatGrade::S, 2000)));
        assert_eq!(SeatGrade::R.upgrade(), Some((SeatGrade::Vip, 5000)));
        assert_eq!(SeatGrade::Vip.upgrade(), None);
    }
}
