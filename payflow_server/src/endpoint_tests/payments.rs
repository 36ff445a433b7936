use actix_web::{
    http::{header, StatusCode},
    test::TestRequest,
};
use payflow_engine::{db_types::TransactionStatus, LedgerQueries};

use super::helpers::{as_customer, create_payment_request, TestServer, ALIPAY_GATEWAY};

#[actix_web::test]
async fn health_check() {
    let server = TestServer::new().await;
    let res = server.send(TestRequest::get().uri("/health")).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[actix_web::test]
async fn create_payment_and_check_status() {
    let server = TestServer::new().await;
    server.seed_order("order-100", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let res = server.send(create_payment_request("alice", "order-100", "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    let body = res.json();
    assert_eq!(body["status"], "PROCESSING");
    assert!(body["paymentUrl"].as_str().unwrap().starts_with(ALIPAY_GATEWAY));
    assert!(body["expiresAt"].is_string());
    let id = body["paymentId"].as_str().unwrap().to_string();

    // Alipay cannot be reached, so the stored state comes back
    let req = as_customer(TestRequest::get().uri(&format!("/payments/{id}/status")), "alice");
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let body = res.json();
    assert_eq!(body["transaction"]["id"], id.as_str());
    assert_eq!(body["transaction"]["status"], "PROCESSING");
    assert_eq!(body["transaction"]["amount"], "100.00");
    assert_eq!(body["order"]["status"], "PENDING");
}

#[actix_web::test]
async fn create_payment_without_identity() {
    let server = TestServer::new().await;
    server.seed_order("order-101", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let req = TestRequest::post().uri("/payments").set_json(serde_json::json!({
        "orderId": "order-101",
        "solutionId": "sol-1",
        "amount": "100.00",
        "paymentMethod": "alipay_page",
    }));
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert!(res.json()["error"].as_str().unwrap().contains("X-User-Id"));
}

#[actix_web::test]
async fn create_payment_for_someone_elses_order() {
    let server = TestServer::new().await;
    server.seed_order("order-102", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let res = server.send(create_payment_request("mallory", "order-102", "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    let res = server.send(create_payment_request("alice", "order-999", "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn amount_must_match_the_price() {
    let server = TestServer::new().await;
    server.seed_order("order-103", "alice", &[("sol-1", "creator-1", 9_900)]).await;
    let res = server.send(create_payment_request("alice", "order-103", "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let res = server.send(create_payment_request("alice", "order-103", "sol-1", "-1", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    // One cent either way is tolerated
    let res = server.send(create_payment_request("alice", "order-103", "sol-1", "99.01", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
}

#[actix_web::test]
async fn malformed_body() {
    let server = TestServer::new().await;
    let req = as_customer(TestRequest::post().uri("/payments"), "alice")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{\"orderId\": ");
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.json()["error"].is_string());
}

#[actix_web::test]
async fn cross_origin_requests_are_rejected() {
    let server = TestServer::new().await;
    server.seed_order("order-104", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let req = create_payment_request("alice", "order-104", "sol-1", "100.00", "alipay_page")
        .insert_header(("Origin", "https://evil.example.net"));
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn sixth_payment_in_a_minute_is_rate_limited() {
    let server = TestServer::new().await;
    for i in 0..6 {
        server.seed_order(&format!("order-105-{i}"), "alice", &[("sol-1", "creator-1", 10_000)]).await;
    }
    for i in 0..5 {
        let order_id = format!("order-105-{i}");
        let res = server.send(create_payment_request("alice", &order_id, "sol-1", "100.00", "alipay_page")).await;
        assert_eq!(res.status, StatusCode::CREATED, "request {i}: {}", res.body);
    }
    let res = server.send(create_payment_request("alice", "order-105-5", "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers.get(header::RETRY_AFTER).unwrap(), "60");
    assert_eq!(res.json()["retryAfter"], 60);
}

#[actix_web::test]
async fn provider_outage_cancels_the_attempt() {
    let server = TestServer::new().await;
    server.seed_order("order-106", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let res = server.send(create_payment_request("alice", "order-106", "sol-1", "100.00", "wechat_native")).await;
    assert_eq!(res.status, StatusCode::BAD_GATEWAY, "{}", res.body);
    let txs = server.db.fetch_transactions_for_order(&"order-106".into()).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].status, TransactionStatus::Cancelled);
}

#[actix_web::test]
async fn status_of_unknown_payment() {
    let server = TestServer::new().await;
    let req = as_customer(TestRequest::get().uri("/payments/txn_doesnotexist/status"), "alice");
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}
