use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{CheckinRecord, CheckinResult, CheckinStage};
use crate::store::{InventoryStore, StoreError, Transaction};

/// Fields shared by every audit entry of one scan.
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub staff_id: String,
    pub scanner_device_id: Option<String>,
    pub stage: CheckinStage,
    pub scanned_at: DateTime<Utc>,
}

impl ScanContext {
    pub fn record(
        &self,
        ticket_id: Option<Uuid>,
        result: CheckinResult,
        message: Option<&str>,
    ) -> CheckinRecord {
        CheckinRecord {
            id: Uuid::new_v4(),
            event_id: None,
            ticket_id,
            order_id: None,
            staff_id: self.staff_id.clone(),
            scanner_device_id: self.scanner_device_id.clone(),
            stage: self.stage,
            result,
            seat_info: None,
            error_message: message.map(str::to_string),
            scanned_at: self.scanned_at,
        }
    }
}

/// Appends a record outside any transaction. Audit failures are logged,
/// never surfaced.
pub async fn record_checkin(store: &InventoryStore, record: CheckinRecord) {
    if let Err(e) = store.put(&record).await {
        tracing::error!(
            error = %e,
            result = record.result.as_str(),
            ticket_id = ?record.ticket_id,
            "Failed to write check-in audit record"
        );
    }
}

/// Stages a record in the transaction that decided it.
pub fn stage_checkin(tx: &mut Transaction, record: &CheckinRecord) -> Result<(), StoreError> {
    tx.put(record)
}
