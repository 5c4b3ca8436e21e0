use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

/// A registered scanning device. Registration and approval happen elsewhere;
/// check-in only reads these records and refreshes `last_seen_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerDevice {
    pub id: String,
    pub owner_uid: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub blocked: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Document for ScannerDevice {
    const COLLECTION: &'static str = "scannerDevices";

    fn key(&self) -> String {
        self.id.clone()
    }
}
