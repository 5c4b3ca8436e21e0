use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, with_security_headers, Config};
use crate::handlers::{checkins, events, health_check, orders, tickets};
use crate::state::AppState;

pub fn create_routes(state: AppState, config: &Config) -> Router {
    let api = Router::new()
        .route("/health", get(health_check))
        .route("/createOrder", post(orders::create_order))
        .route(
            "/confirmPaymentAndAssignSeats",
            post(orders::confirm_payment_and_assign_seats),
        )
        .route("/issueQrToken", post(tickets::issue_qr_token))
        .route("/reissueQrToken", post(tickets::reissue_qr_token))
        .route("/issueGroupQrToken", post(tickets::issue_group_qr_token))
        .route(
            "/requestTicketCancellation",
            post(tickets::request_ticket_cancellation),
        )
        .route("/upgradeTicketSeat", post(tickets::upgrade_ticket_seat))
        .route("/verifyAndCheckIn", post(checkins::verify_and_check_in))
        .route(
            "/verifyAndCheckInGroup",
            post(checkins::verify_and_check_in_group),
        )
        .route("/revealSeatsForEvent", post(events::reveal_seats_for_event))
        .with_state(state);

    with_security_headers(api, config.production)
        .layer(create_cors_layer(&config.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::testing::{test_config, TestEnv};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, uri: &str, bearer: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(bearer) = bearer {
            request = request.header(header::AUTHORIZATION, bearer);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_carries_security_headers() {
        let env = TestEnv::new().await;
        let app = create_routes(env.state.clone(), &test_config());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert!(!response.headers().contains_key("strict-transport-security"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["service"], "boxoffice-api");
    }

    #[tokio::test]
    async fn test_hard_errors_use_error_envelope() {
        let env = TestEnv::new().await;
        let app = create_routes(env.state.clone(), &test_config());
        let event = env.seed_event(true, 10).await;
        let body = json!({ "eventId": event.id, "quantity": 1 }).to_string();

        let (status, value) = call(&app, "/createOrder", None, &body).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "UNAUTHENTICATED");

        let bearer = env.bearer("buyer");
        let (status, value) = call(&app, "/issueQrToken", Some(bearer.as_str()), r#"{"ticketId":"nope"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_order_then_booking_over_http() {
        let env = TestEnv::new().await;
        env.seed_user("buyer", Role::User).await;
        let app = create_routes(env.state.clone(), &test_config());
        let event = env.seed_event(true, 10).await;
        let bearer = env.bearer("buyer");

        let body = json!({ "eventId": event.id, "quantity": 2 }).to_string();
        let (status, value) = call(&app, "/createOrder", Some(bearer.as_str()), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], true);
        let order_id = value["data"]["orderId"].as_str().unwrap().to_string();

        let body = json!({ "orderId": order_id }).to_string();
        let (status, value) = call(&app, "/confirmPaymentAndAssignSeats", Some(bearer.as_str()), &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["success"], true);
        assert_eq!(value["ticketCount"], 2);

        let (status, value) = call(&app, "/confirmPaymentAndAssignSeats", Some(bearer.as_str()), &body).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(value["error"]["code"], "FAILED_PRECONDITION");
    }

    #[tokio::test]
    async fn test_scanning_requires_staff() {
        let env = TestEnv::new().await;
        env.seed_user("buyer", Role::User).await;
        let app = create_routes(env.state.clone(), &test_config());
        let event = env.seed_event(true, 10).await;
        let ticket = env.seed_ticket(&event, "buyer").await;

        let body = json!({ "ticketId": ticket.id, "qrToken": "x", "scannerDeviceId": null }).to_string();
        let (status, value) = call(&app, "/verifyAndCheckIn", Some(env.bearer("buyer").as_str()), &body).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(value["error"]["code"], "PERMISSION_DENIED");
    }
}
