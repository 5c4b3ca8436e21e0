//! Who is calling, what role they hold, and which scanner they hold it on.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{Role, ScannerDevice, User};
use crate::store::{InventoryStore, StoreError, Transaction, TxOperation};
use crate::utils::error::AppError;

/// Authenticated identity attached to a call; `uid` is `None` for anonymous
/// callers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub uid: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
        }
    }

    pub fn require_uid(&self) -> Result<&str, AppError> {
        self.uid
            .as_deref()
            .ok_or_else(|| AppError::Unauthenticated("Sign-in is required".to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    exp: i64,
}

/// Verifies bearer tokens minted by the identity provider.
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Resolves an `Authorization` header value to a caller. Anything that
    /// does not verify is treated as anonymous.
    pub fn caller_from_header(&self, header: Option<&str>) -> Caller {
        let Some(token) = header.and_then(|h| h.strip_prefix("Bearer ")) else {
            return Caller::anonymous();
        };
        match decode::<IdentityClaims>(token.trim(), &self.key, &self.validation) {
            Ok(data) => Caller::user(data.claims.sub),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected identity token");
                Caller::anonymous()
            }
        }
    }
}

/// Maps a uid to its role.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn role_of(&self, uid: &str) -> Result<Role, AppError>;
}

/// Reads roles from the `users` collection; unknown users are plain users.
pub struct StoreIdentityResolver {
    store: InventoryStore,
}

impl StoreIdentityResolver {
    pub fn new(store: InventoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl IdentityResolver for StoreIdentityResolver {
    async fn role_of(&self, uid: &str) -> Result<Role, AppError> {
        let user: Option<User> = self.store.get(uid).await?;
        Ok(user.map(|u| u.role).unwrap_or_default())
    }
}

pub async fn require_staff_or_admin(
    identity: &dyn IdentityResolver,
    caller: &Caller,
) -> Result<String, AppError> {
    let uid = caller.require_uid()?;
    match identity.role_of(uid).await? {
        Role::Staff | Role::Admin => Ok(uid.to_string()),
        Role::User => Err(AppError::PermissionDenied(
            "Staff permission is required".to_string(),
        )),
    }
}

pub async fn require_admin(
    identity: &dyn IdentityResolver,
    caller: &Caller,
) -> Result<String, AppError> {
    let uid = caller.require_uid()?;
    match identity.role_of(uid).await? {
        Role::Admin => Ok(uid.to_string()),
        _ => Err(AppError::PermissionDenied(
            "Admin permission is required".to_string(),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDecision {
    Allowed,
    /// Listed in the configured bypass allowlist; no record consulted.
    Bypassed,
    Rejected(&'static str),
}

/// Decides whether a scanner may be used for check-in.
#[derive(Debug, Clone, Default)]
pub struct DeviceGate {
    bypass: Arc<HashSet<String>>,
}

impl DeviceGate {
    pub fn new(bypass: impl IntoIterator<Item = String>) -> Self {
        Self {
            bypass: Arc::new(bypass.into_iter().collect()),
        }
    }

    pub async fn check(
        &self,
        store: &InventoryStore,
        device_id: Option<&str>,
        scanner_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceDecision, StoreError> {
        let Some(device_id) = device_id.map(str::trim).filter(|id| !id.is_empty()) else {
            return Ok(DeviceDecision::Rejected("Scanner device id is missing"));
        };
        if self.bypass.contains(device_id) {
            tracing::info!(device_id, scanner_uid, "Scanner device check bypassed by allowlist");
            return Ok(DeviceDecision::Bypassed);
        }

        store
            .run(&TouchDevice {
                device_id,
                scanner_uid,
                now,
            })
            .await
    }
}

/// Re-reads the device record and stamps `last_seen_at` only while the
/// device is still usable. A concurrent block or revocation forces a rerun.
struct TouchDevice<'a> {
    device_id: &'a str,
    scanner_uid: &'a str,
    now: DateTime<Utc>,
}

#[async_trait]
impl TxOperation for TouchDevice<'_> {
    type Output = DeviceDecision;
    type Error = StoreError;

    async fn run(&self, tx: &mut Transaction) -> Result<DeviceDecision, StoreError> {
        let Some(mut device) = tx.get::<ScannerDevice>(self.device_id).await? else {
            return Ok(DeviceDecision::Rejected(
                "Scanner device is not registered; ask an admin to approve it",
            ));
        };
        if device.owner_uid != self.scanner_uid {
            return Ok(DeviceDecision::Rejected(
                "Scanner device is not approved for this account",
            ));
        }
        if device.blocked {
            return Ok(DeviceDecision::Rejected("Scanner device is blocked"));
        }
        if !device.approved {
            return Ok(DeviceDecision::Rejected("Scanner device is awaiting approval"));
        }

        device.last_seen_at = Some(self.now);
        tx.put(&device)?;
        Ok(DeviceDecision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Document;
    use crate::testing::{RacingBackend, TestEnv};
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[tokio::test]
    async fn test_roles_gate_staff_and_admin_operations() {
        let env = TestEnv::new().await;
        env.seed_user("staff-1", Role::Staff).await;
        env.seed_user("buyer", Role::User).await;
        let identity = env.state.identity.as_ref();

        assert_eq!(
            require_staff_or_admin(identity, &Caller::user("staff-1")).await.unwrap(),
            "staff-1"
        );
        assert!(matches!(
            require_staff_or_admin(identity, &Caller::user("buyer")).await,
            Err(AppError::PermissionDenied(_))
        ));
        assert!(matches!(
            require_admin(identity, &Caller::user("staff-1")).await,
            Err(AppError::PermissionDenied(_))
        ));
        assert!(matches!(
            require_staff_or_admin(identity, &Caller::anonymous()).await,
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn test_device_gate_decisions() {
        let env = TestEnv::new().await;
        let gate = DeviceGate::new(vec!["demo-scanner".to_string()]);
        let store = &env.state.store;
        let now = env.clock.now();

        env.seed_device("dev-approved", "staff-1", true, false).await;
        env.seed_device("dev-pending", "staff-1", false, false).await;
        env.seed_device("dev-blocked", "staff-1", true, true).await;

        let check = |id: Option<&'static str>, uid: &'static str| gate.check(store, id, uid, now);

        assert_eq!(check(Some("dev-approved"), "staff-1").await.unwrap(), DeviceDecision::Allowed);
        assert_eq!(check(Some("demo-scanner"), "staff-1").await.unwrap(), DeviceDecision::Bypassed);
        assert!(matches!(check(None, "staff-1").await.unwrap(), DeviceDecision::Rejected(_)));
        assert!(matches!(check(Some("  "), "staff-1").await.unwrap(), DeviceDecision::Rejected(_)));
        assert!(matches!(check(Some("dev-unknown"), "staff-1").await.unwrap(), DeviceDecision::Rejected(_)));
        assert!(matches!(check(Some("dev-approved"), "staff-2").await.unwrap(), DeviceDecision::Rejected(_)));
        assert!(matches!(check(Some("dev-pending"), "staff-1").await.unwrap(), DeviceDecision::Rejected(_)));
        assert!(matches!(check(Some("dev-blocked"), "staff-1").await.unwrap(), DeviceDecision::Rejected(_)));

        let refreshed: ScannerDevice = store.get("dev-approved").await.unwrap().unwrap();
        assert_eq!(refreshed.last_seen_at, Some(now));
    }

    #[tokio::test]
    async fn test_device_blocked_mid_scan_stays_blocked() {
        let backend = Arc::new(RacingBackend::new(ScannerDevice::COLLECTION, |body| {
            body["blocked"] = serde_json::json!(true);
        }));
        let env = TestEnv::with_backend(backend.clone()).await;
        env.seed_device("dev-1", "staff-1", true, false).await;
        // An admin blocks the device right after the gate reads it.
        backend.arm();

        let gate = DeviceGate::default();
        let decision = gate
            .check(&env.state.store, Some("dev-1"), "staff-1", env.clock.now())
            .await
            .unwrap();
        assert_eq!(decision, DeviceDecision::Rejected("Scanner device is blocked"));

        let stored: ScannerDevice = env.state.store.get("dev-1").await.unwrap().unwrap();
        assert!(stored.blocked);
        assert_eq!(stored.last_seen_at, None);
    }

    #[test]
    fn test_identity_header_parsing() {
        let verifier = IdentityVerifier::new(b"identity-secret");
        let claims = IdentityClaims {
            sub: "user-7".to_string(),
            exp: Utc::now().timestamp() + 600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"identity-secret"),
        )
        .unwrap();

        let caller = verifier.caller_from_header(Some(&format!("Bearer {token}")));
        assert_eq!(caller, Caller::user("user-7"));
        assert_eq!(verifier.caller_from_header(None), Caller::anonymous());
        assert_eq!(
            verifier.caller_from_header(Some("Bearer not-a-token")),
            Caller::anonymous()
        );
    }
}
