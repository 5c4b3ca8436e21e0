use std::sync::Arc;

use crate::clock::Clock;
use crate::config::Config;
use crate::services::access::{DeviceGate, IdentityResolver, IdentityVerifier, StoreIdentityResolver};
use crate::services::mileage::{MileageLedger, StoreMileageLedger};
use crate::services::notifications::{Notifier, PushSender};
use crate::services::qr::QrTokenService;
use crate::store::InventoryStore;

/// Shared handles passed to every operation.
#[derive(Clone)]
pub struct AppState {
    pub store: InventoryStore,
    pub clock: Arc<dyn Clock>,
    pub qr: Arc<QrTokenService>,
    pub auth: Arc<IdentityVerifier>,
    pub identity: Arc<dyn IdentityResolver>,
    pub devices: DeviceGate,
    pub notifier: Notifier,
    pub ledger: Arc<dyn MileageLedger>,
}

impl AppState {
    pub fn new(
        store: InventoryStore,
        clock: Arc<dyn Clock>,
        push: Arc<dyn PushSender>,
        config: &Config,
    ) -> Self {
        Self {
            qr: Arc::new(QrTokenService::new(
                config.qr_token_secret.as_bytes(),
                config.qr_token_ttl,
            )),
            auth: Arc::new(IdentityVerifier::new(config.auth_token_secret.as_bytes())),
            identity: Arc::new(StoreIdentityResolver::new(store.clone())),
            devices: DeviceGate::new(config.scanner_bypass_device_ids.iter().cloned()),
            notifier: Notifier::new(store.clone(), push),
            ledger: Arc::new(StoreMileageLedger::new(store.clone(), Arc::clone(&clock))),
            store,
            clock,
        }
    }
}
