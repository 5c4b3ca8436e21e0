//! Fixtures shared by the unit tests.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::models::{
    Event, EventStatus, Order, OrderStatus, Role, ScannerDevice, Seat, SeatGrade, SeatStatus,
    Ticket, User,
};
use crate::services::mileage::blank_user;
use crate::services::notifications::{PushError, PushMessage, PushSender};
use crate::state::AppState;
use crate::store::{
    DocumentBackend, Filter, InventoryStore, MemoryBackend, PendingWrite, ReadStamp, RetryPolicy,
    StoreError, StoredDocument,
};

pub const BYPASS_DEVICE: &str = "demo-scanner";
pub const TEST_AUTH_SECRET: &str = "test-auth-secret";
const TEST_QR_SECRET: &str = "test-qr-secret";
pub const TICKET_PRICE: i64 = 50_000;

pub struct ManualClock {
    instant: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(start),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }

    pub fn advance(&self, by: Duration) {
        *self.instant.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.lock()
    }
}

#[derive(Default)]
pub struct RecordingPushSender {
    sent: Mutex<Vec<(String, PushMessage)>>,
    unregistered: Mutex<HashSet<String>>,
}

impl RecordingPushSender {
    pub fn reject_token(&self, token: &str) {
        self.unregistered.lock().insert(token.to_string());
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(token, _)| token.clone()).collect()
    }

    pub fn messages(&self) -> Vec<PushMessage> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(&self, token: &str, message: &PushMessage) -> Result<(), PushError> {
        if self.unregistered.lock().contains(token) {
            return Err(PushError::Unregistered);
        }
        self.sent.lock().push((token.to_string(), message.clone()));
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        database_url: None,
        qr_token_secret: TEST_QR_SECRET.to_string(),
        qr_token_ttl: Duration::seconds(120),
        auth_token_secret: TEST_AUTH_SECRET.to_string(),
        scanner_bypass_device_ids: vec![BYPASS_DEVICE.to_string()],
        cors_allowed_origins: vec!["http://localhost:3000".to_string()],
        production: false,
        store_max_attempts: 5,
        reveal_job_interval: std::time::Duration::from_secs(600),
        reminder_job_interval: std::time::Duration::from_secs(1800),
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub push: Arc<RecordingPushSender>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::default())).await
    }

    pub async fn with_backend(backend: Arc<dyn DocumentBackend>) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
        ));
        let push = Arc::new(RecordingPushSender::default());
        let state = AppState::new(
            InventoryStore::new(backend, RetryPolicy::default()),
            clock.clone(),
            push.clone(),
            &test_config(),
        );
        Self { state, clock, push }
    }

    /// Signed identity header value for `uid`.
    pub fn bearer(&self, uid: &str) -> String {
        let claims = serde_json::json!({
            "sub": uid,
            "exp": Utc::now().timestamp() + 3600,
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_AUTH_SECRET.as_bytes()),
        )
        .unwrap();
        format!("Bearer {token}")
    }

    pub async fn seed_user(&self, uid: &str, role: Role) -> User {
        let user = User {
            role,
            push_token: Some(format!("token-{uid}")),
            ..blank_user(uid)
        };
        self.state.store.put(&user).await.unwrap();
        user
    }

    /// An on-sale event a month out with `seats` sellable places.
    pub async fn seed_event(&self, is_standing: bool, seats: u32) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            title: "Spring Concert".to_string(),
            price: Decimal::from(TICKET_PRICE),
            total_seats: seats,
            available_seats: seats,
            max_tickets_per_order: 0,
            start_at: self.clock.now() + Duration::days(30),
            reveal_at: None,
            category: None,
            is_standing,
            has_intermission: false,
            status: EventStatus::Active,
            discount_policies: Vec::new(),
            reminder_sent: false,
            review_reminder_sent: false,
        };
        self.state.store.put(&event).await.unwrap();
        event
    }

    pub async fn seed_row(
        &self,
        event: &Event,
        block: &str,
        row: &str,
        numbers: impl IntoIterator<Item = u32>,
    ) -> Vec<Seat> {
        let seats: Vec<Seat> = numbers
            .into_iter()
            .map(|number| Seat {
                id: Uuid::new_v4(),
                event_id: event.id,
                block: block.to_string(),
                floor: "1F".to_string(),
                row: Some(row.to_string()),
                number,
                grade: SeatGrade::A,
                status: SeatStatus::Available,
            })
            .collect();
        self.state.store.put_all(&seats).await.unwrap();
        seats
    }

    /// A pending order at list price.
    pub async fn seed_order(&self, event: &Event, uid: &str, quantity: u32) -> Order {
        let order = Order {
            id: Uuid::new_v4(),
            event_id: event.id,
            user_id: uid.to_string(),
            quantity,
            unit_price: event.price,
            total_amount: event.price * Decimal::from(quantity),
            preferred_seat_ids: Vec::new(),
            applied_discount: None,
            referral_code: None,
            is_demo: false,
            created_at: self.clock.now(),
            status: OrderStatus::Pending,
            canceled_count: 0,
            refunded_amount: Decimal::ZERO,
        };
        self.state.store.put(&order).await.unwrap();
        order
    }

    async fn seed_paid_order(&self, event: &Event, uid: &str) -> Order {
        let mut order = self.seed_order(event, uid, 1).await;
        order.mark_paid(self.clock.now());
        self.state.store.put(&order).await.unwrap();
        order
    }

    async fn take_one_seat(&self, event_id: Uuid) {
        let mut event: Event = self
            .state
            .store
            .get(&event_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(event.take_seats(1), "fixture event is sold out");
        self.state.store.put(&event).await.unwrap();
    }

    /// A standing ticket on its own paid order.
    pub async fn seed_ticket(&self, event: &Event, uid: &str) -> Ticket {
        let order = self.seed_paid_order(event, uid).await;
        self.seed_ticket_for_order(event, &order).await
    }

    pub async fn seed_ticket_for_order(&self, event: &Event, order: &Order) -> Ticket {
        let ticket = Ticket::issue(event.id, order.id, &order.user_id, self.clock.now());
        self.state.store.put(&ticket).await.unwrap();
        self.take_one_seat(event.id).await;
        ticket
    }

    /// A seated ticket on its own paid order, holding `seat`.
    pub async fn seed_seated_ticket(&self, event: &Event, uid: &str, seat: &Seat) -> Ticket {
        let order = self.seed_paid_order(event, uid).await;
        self.attach_seat(&order, event.id, seat).await
    }

    /// A second seated ticket on the same order as `first`.
    pub async fn seed_sibling_ticket(&self, first: &Ticket, seat: &Seat) -> Ticket {
        let order: Order = self
            .state
            .store
            .get(&first.order_id.to_string())
            .await
            .unwrap()
            .unwrap();
        self.attach_seat(&order, first.event_id, seat).await
    }

    async fn attach_seat(&self, order: &Order, event_id: Uuid, seat: &Seat) -> Ticket {
        let mut seat = seat.clone();
        seat.reserve(order.id, self.clock.now());
        self.state.store.put(&seat).await.unwrap();

        let mut ticket = Ticket::issue(event_id, order.id, &order.user_id, self.clock.now());
        ticket.seat_id = Some(seat.id);
        self.state.store.put(&ticket).await.unwrap();
        self.take_one_seat(event_id).await;
        ticket
    }

    pub async fn seed_device(&self, id: &str, owner: &str, approved: bool, blocked: bool) {
        let device = ScannerDevice {
            id: id.to_string(),
            owner_uid: owner.to_string(),
            label: None,
            approved,
            blocked,
            last_seen_at: None,
        };
        self.state.store.put(&device).await.unwrap();
    }
}

type Edit = Box<dyn FnOnce(&mut serde_json::Value) + Send>;

/// In-memory backend that, once armed, commits a competing edit to the first
/// document of `collection` it hands out. The reader still gets the body as
/// it was before the edit, as if another writer landed right after the read.
pub struct RacingBackend {
    inner: MemoryBackend,
    collection: &'static str,
    armed: AtomicBool,
    edit: Mutex<Option<Edit>>,
}

impl RacingBackend {
    pub fn new(
        collection: &'static str,
        edit: impl FnOnce(&mut serde_json::Value) + Send + 'static,
    ) -> Self {
        Self {
            inner: MemoryBackend::default(),
            collection,
            armed: AtomicBool::new(false),
            edit: Mutex::new(Some(Box::new(edit))),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn race(&self, collection: &str, docs: &[StoredDocument]) -> Result<(), StoreError> {
        if collection != self.collection || !self.armed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(doc) = docs.first() else {
            return Ok(());
        };
        let Some(edit) = self.edit.lock().take() else {
            return Ok(());
        };
        let mut body = doc.body.clone();
        edit(&mut body);
        let write = PendingWrite {
            collection: self.collection,
            key: doc.key.clone(),
            body,
        };
        self.inner.commit(&[], &[write]).await
    }
}

#[async_trait]
impl DocumentBackend for RacingBackend {
    async fn fetch(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let doc = self.inner.fetch(collection, key).await?;
        self.race(collection, doc.as_slice()).await?;
        Ok(doc)
    }

    async fn query(&self, collection: &str, filter: &Filter) -> Result<Vec<StoredDocument>, StoreError> {
        let docs = self.inner.query(collection, filter).await?;
        self.race(collection, &docs).await?;
        Ok(docs)
    }

    async fn commit(&self, reads: &[ReadStamp], writes: &[PendingWrite]) -> Result<(), StoreError> {
        self.inner.commit(reads, writes).await
    }
}
