use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkin::{CheckinResult, CheckinStage};
use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinStamp {
    pub at: DateTime<Utc>,
    pub staff_id: String,
}

/// Lifecycle of a ticket:
///
/// ```text
/// issued ──entry──▶ entryCheckedIn ──intermission──▶ used
///   │
///   └──cancel──▶ canceled
/// ```
///
/// Stamps live inside the variants, so a canceled ticket can never carry a
/// check-in stamp and a used ticket always carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TicketState {
    Issued,
    EntryCheckedIn {
        entry: CheckinStamp,
    },
    Used {
        entry: CheckinStamp,
        intermission: CheckinStamp,
    },
    Canceled {
        canceled_at: DateTime<Utc>,
    },
}

/// Coarse status as buyers see it; an entry-checked-in ticket is still issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    Issued,
    Canceled,
    Used,
}

impl TicketState {
    pub fn status(&self) -> TicketStatus {
        match self {
            TicketState::Issued | TicketState::EntryCheckedIn { .. } => TicketStatus::Issued,
            TicketState::Used { .. } => TicketStatus::Used,
            TicketState::Canceled { .. } => TicketStatus::Canceled,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TicketState::Issued => "issued",
            TicketState::EntryCheckedIn { .. } => "entryCheckedIn",
            TicketState::Used { .. } => "used",
            TicketState::Canceled { .. } => "canceled",
        }
    }

    /// Whether a QR code may still be presented for this ticket.
    pub fn accepts_checkin(&self) -> bool {
        matches!(
            self,
            TicketState::Issued | TicketState::EntryCheckedIn { .. }
        )
    }

    /// Advances the ticket through `stage`, or reports why it cannot.
    pub fn check_in(
        &self,
        stage: CheckinStage,
        stamp: CheckinStamp,
    ) -> Result<TicketState, CheckinResult> {
        match (self, stage) {
            (TicketState::Canceled { .. }, _) => Err(CheckinResult::Canceled),
            (TicketState::Issued, CheckinStage::Entry) => {
                Ok(TicketState::EntryCheckedIn { entry: stamp })
            }
            (TicketState::Issued, CheckinStage::Intermission) => {
                Err(CheckinResult::MissingEntryCheckin)
            }
            (TicketState::EntryCheckedIn { entry }, CheckinStage::Intermission) => {
                Ok(TicketState::Used {
                    entry: entry.clone(),
                    intermission: stamp,
                })
            }
            (TicketState::EntryCheckedIn { .. }, CheckinStage::Entry)
            | (TicketState::Used { .. }, _) => Err(CheckinResult::AlreadyUsed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub user_id: String,
    /// `None` for standing tickets.
    pub seat_id: Option<Uuid>,
    pub seat_block_id: Option<Uuid>,
    /// Admission order for standing tickets.
    pub entry_number: Option<u32>,
    /// Bumped on every reissue; older QR codes stop verifying.
    pub qr_version: u32,
    pub issued_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: TicketState,
    #[serde(default)]
    pub previous_seat_id: Option<Uuid>,
    #[serde(default)]
    pub upgraded_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn issue(
        event_id: Uuid,
        order_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            order_id,
            user_id: user_id.to_string(),
            seat_id: None,
            seat_block_id: None,
            entry_number: None,
            qr_version: 1,
            issued_at: at,
            state: TicketState::Issued,
            previous_seat_id: None,
            upgraded_at: None,
        }
    }

    pub fn standing_label(&self) -> Option<String> {
        self.entry_number.map(|n| format!("Standing #{n}"))
    }
}

impl Document for Ticket {
    const COLLECTION: &'static str = "tickets";

    fn key(&self) -> String {
        self.id.to_string()
    }
}
