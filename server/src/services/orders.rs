use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DiscountKind, DiscountPolicy, Event, EventStatus, Order, OrderStatus, User};
use crate::services::access::Caller;
use crate::services::refund::round_currency;
use crate::state::AppState;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub preferred_seat_ids: Vec<Uuid>,
    pub discount_policy_name: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub applied_discount: Option<String>,
}

/// The requested policy, or else the richest bulk policy the quantity
/// qualifies for.
fn select_discount<'a>(
    event: &'a Event,
    quantity: u32,
    requested: Option<&str>,
) -> Result<Option<&'a DiscountPolicy>, AppError> {
    let qualifies = |policy: &DiscountPolicy| match policy.kind {
        DiscountKind::Bulk { min_quantity } => quantity >= min_quantity,
        DiscountKind::Standard => true,
    };

    match requested.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => {
            let policy = event
                .discount_policies
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| {
                    AppError::InvalidArgument(format!("Unknown discount policy '{name}'"))
                })?;
            if !qualifies(policy) {
                return Err(AppError::InvalidArgument(format!(
                    "Discount '{name}' needs a larger order"
                )));
            }
            Ok(Some(policy))
        }
        None => Ok(event
            .discount_policies
            .iter()
            .filter(|p| matches!(p.kind, DiscountKind::Bulk { .. }) && qualifies(p))
            .max_by(|a, b| a.discount_rate.cmp(&b.discount_rate))),
    }
}

fn dedupe_preferred(ids: &[Uuid], quantity: u32) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen.truncate(quantity as usize);
    seen
}

pub async fn create_order(
    state: &AppState,
    caller: &Caller,
    req: CreateOrderRequest,
) -> Result<CreatedOrder, AppError> {
    let uid = caller.require_uid()?;

    let event_id = req.event_id.trim();
    if event_id.is_empty() {
        return Err(AppError::InvalidArgument("eventId is required".to_string()));
    }
    let event_id: Uuid = event_id
        .parse()
        .map_err(|_| AppError::InvalidArgument("eventId is malformed".to_string()))?;
    if req.quantity == 0 {
        return Err(AppError::InvalidArgument(
            "quantity must be at least 1".to_string(),
        ));
    }

    let event: Event = state
        .store
        .get(&event_id.to_string())
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    if event.status != EventStatus::Active {
        return Err(AppError::FailedPrecondition(
            "Event is not on sale".to_string(),
        ));
    }
    if event.max_tickets_per_order > 0 && req.quantity > event.max_tickets_per_order {
        return Err(AppError::InvalidArgument(format!(
            "At most {} tickets per order",
            event.max_tickets_per_order
        )));
    }
    if req.quantity > event.available_seats {
        return Err(AppError::ResourceExhausted(
            "Not enough seats left".to_string(),
        ));
    }

    let discount = select_discount(&event, req.quantity, req.discount_policy_name.as_deref())?;
    let unit_price = match discount {
        Some(policy) => round_currency(event.price * (Decimal::ONE - policy.discount_rate)),
        None => event.price,
    };
    let total_amount = unit_price * Decimal::from(req.quantity);

    let is_demo = state
        .store
        .get::<User>(uid)
        .await?
        .is_some_and(|u| u.is_demo);

    let order = Order {
        id: Uuid::new_v4(),
        event_id,
        user_id: uid.to_string(),
        quantity: req.quantity,
        unit_price,
        total_amount,
        preferred_seat_ids: dedupe_preferred(&req.preferred_seat_ids, req.quantity),
        applied_discount: discount.map(|p| p.name.clone()),
        referral_code: req.referral_code.filter(|c| !c.trim().is_empty()),
        is_demo,
        created_at: state.clock.now(),
        status: OrderStatus::Pending,
        canceled_count: 0,
        refunded_amount: Decimal::ZERO,
    };
    state.store.put(&order).await?;

    tracing::info!(
        order_id = %order.id,
        %event_id,
        quantity = order.quantity,
        total = %order.total_amount,
        discount = ?order.applied_discount,
        "Order created"
    );
    Ok(CreatedOrder {
        order_id: order.id,
        unit_price,
        total_amount,
        applied_discount: order.applied_discount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use assert_matches::assert_matches;

    fn request(event: &Event, quantity: u32) -> CreateOrderRequest {
        CreateOrderRequest {
            event_id: event.id.to_string(),
            quantity,
            ..Default::default()
        }
    }

    fn bulk(name: &str, min_quantity: u32, rate: i64) -> DiscountPolicy {
        DiscountPolicy {
            name: name.to_string(),
            kind: DiscountKind::Bulk { min_quantity },
            discount_rate: Decimal::new(rate, 2),
        }
    }

    #[tokio::test]
    async fn test_input_validation() {
        let env = TestEnv::new().await;
        let mut event = env.seed_event(true, 10).await;
        event.max_tickets_per_order = 4;
        event.available_seats = 3;
        env.state.store.put(&event).await.unwrap();
        let buyer = Caller::user("buyer");

        let blank = CreateOrderRequest {
            quantity: 1,
            ..Default::default()
        };
        assert_matches!(create_order(&env.state, &buyer, blank).await, Err(AppError::InvalidArgument(_)));
        assert_matches!(
            create_order(&env.state, &buyer, request(&event, 0)).await,
            Err(AppError::InvalidArgument(_))
        );
        assert_matches!(
            create_order(&env.state, &buyer, request(&event, 5)).await,
            Err(AppError::InvalidArgument(_))
        );
        assert_matches!(
            create_order(&env.state, &buyer, request(&event, 4)).await,
            Err(AppError::ResourceExhausted(_))
        );
        assert_matches!(
            create_order(&env.state, &Caller::anonymous(), request(&event, 1)).await,
            Err(AppError::Unauthenticated(_))
        );
        let missing = CreateOrderRequest {
            event_id: Uuid::new_v4().to_string(),
            quantity: 1,
            ..Default::default()
        };
        assert_matches!(create_order(&env.state, &buyer, missing).await, Err(AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_limit_means_unlimited() {
        let env = TestEnv::new().await;
        let event = env.seed_event(true, 50).await;
        let created = create_order(&env.state, &Caller::user("buyer"), request(&event, 30))
            .await
            .unwrap();
        assert_eq!(created.total_amount, Decimal::from(1_500_000));
    }

    #[tokio::test]
    async fn test_best_bulk_discount_applies_automatically() {
        let env = TestEnv::new().await;
        let mut event = env.seed_event(true, 50).await;
        event.price = Decimal::from(33_333);
        event.discount_policies = vec![bulk("pair", 2, 5), bulk("group4", 4, 15), bulk("group10", 10, 30)];
        env.state.store.put(&event).await.unwrap();

        let created = create_order(&env.state, &Caller::user("buyer"), request(&event, 4))
            .await
            .unwrap();
        assert_eq!(created.applied_discount.as_deref(), Some("group4"));
        // 33,333 x 0.85 = 28,333.05
        assert_eq!(created.unit_price, Decimal::from(28_333));
        assert_eq!(created.total_amount, Decimal::from(113_332));

        let named = CreateOrderRequest {
            discount_policy_name: Some("group10".to_string()),
            ..request(&event, 4)
        };
        assert_matches!(
            create_order(&env.state, &Caller::user("buyer"), named).await,
            Err(AppError::InvalidArgument(_))
        );
    }

    #[tokio::test]
    async fn test_preferred_seats_are_deduplicated_and_truncated() {
        let env = TestEnv::new().await;
        let event = env.seed_event(false, 10).await;
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let req = CreateOrderRequest {
            preferred_seat_ids: vec![a, a, b, c],
            referral_code: Some("FRIEND".to_string()),
            ..request(&event, 2)
        };
        let created = create_order(&env.state, &Caller::user("buyer"), req).await.unwrap();

        let order: Order = env
            .state
            .store
            .get(&created.order_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.preferred_seat_ids, vec![a, b]);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.referral_code.as_deref(), Some("FRIEND"));
    }
}
