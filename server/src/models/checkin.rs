use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckinStage {
    /// First pass through the gate.
    Entry,
    /// Re-entry after the break.
    Intermission,
}

/// Outcome of one verification attempt. Everything but `Success` is a soft
/// rejection the scanner UI branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckinResult {
    Success,
    Expired,
    InvalidSignature,
    InvalidTicket,
    AlreadyUsed,
    Canceled,
    MissingEntryCheckin,
    NotAllowedDevice,
}

impl CheckinResult {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckinResult::Success => "success",
            CheckinResult::Expired => "expired",
            CheckinResult::InvalidSignature => "invalidSignature",
            CheckinResult::InvalidTicket => "invalidTicket",
            CheckinResult::AlreadyUsed => "alreadyUsed",
            CheckinResult::Canceled => "canceled",
            CheckinResult::MissingEntryCheckin => "missingEntryCheckin",
            CheckinResult::NotAllowedDevice => "notAllowedDevice",
        }
    }
}

/// Append-only audit entry; written once per attempt and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRecord {
    pub id: Uuid,
    pub event_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub staff_id: String,
    pub scanner_device_id: Option<String>,
    pub stage: CheckinStage,
    pub result: CheckinResult,
    pub seat_info: Option<String>,
    pub error_message: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

impl Document for CheckinRecord {
    const COLLECTION: &'static str = "checkins";

    fn key(&self) -> String {
        self.id.to_string()
    }
}
