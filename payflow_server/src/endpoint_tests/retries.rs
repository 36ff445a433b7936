use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::helpers::{as_customer, create_payment_request, signed_push, TestServer};

async fn failed_payment(server: &TestServer, order_id: &str) -> String {
    let res = server.send(create_payment_request("alice", order_id, "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    let id = res.json()["paymentId"].as_str().unwrap().to_string();
    let push = json!({ "externalStatus": "PAYERROR", "reason": "Card declined" });
    let res = server.send(signed_push(&id, push)).await;
    assert_eq!(res.json()["message"], format!("Payment {id} is now FAILED"));
    id
}

fn retry_uri(id: &str) -> String {
    format!("/payments/{id}/retry")
}

#[actix_web::test]
async fn only_failed_payments_can_be_retried() {
    let server = TestServer::new().await;
    server.seed_order("order-400", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let res = server.send(create_payment_request("alice", "order-400", "sol-1", "100.00", "alipay_page")).await;
    let id = res.json()["paymentId"].as_str().unwrap().to_string();
    let res = server.send(as_customer(TestRequest::get().uri(&retry_uri(&id)), "alice")).await;
    assert_eq!(res.status, StatusCode::OK);
    let body = res.json();
    assert_eq!(body["canRetry"], false);
    assert_eq!(body["reason"], "Only failed payments can be retried. This payment is PROCESSING");

    let res = server.send(as_customer(TestRequest::post().uri(&retry_uri(&id)), "alice")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn retry_a_failed_payment() {
    let server = TestServer::new().await;
    server.seed_order("order-401", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let id = failed_payment(&server, "order-401").await;

    let res = server.send(as_customer(TestRequest::get().uri(&retry_uri(&id)), "alice")).await;
    let body = res.json();
    assert_eq!(body["canRetry"], true);
    assert_eq!(body["failedCount"], 1);
    assert_eq!(body["remainingAttempts"], 2);

    let res = server.send(as_customer(TestRequest::post().uri(&retry_uri(&id)), "alice")).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    let new_id = res.json()["paymentId"].as_str().unwrap().to_string();
    assert_ne!(new_id, id);

    let res = server.send(as_customer(TestRequest::get().uri(&format!("/payments/{new_id}/status")), "alice")).await;
    let lineage = &res.json()["transaction"]["retry_lineage"];
    assert_eq!(lineage["retry_of_id"], id.as_str());
    assert_eq!(lineage["attempt_number"], 2);
}

#[actix_web::test]
async fn retries_run_out() {
    let server = TestServer::new().await;
    server.seed_order("order-402", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let mut last = String::new();
    for _ in 0..3 {
        last = failed_payment(&server, "order-402").await;
    }
    let res = server.send(as_customer(TestRequest::get().uri(&retry_uri(&last)), "alice")).await;
    let body = res.json();
    assert_eq!(body["canRetry"], false);
    assert_eq!(body["remainingAttempts"], 0);
    assert_eq!(body["reason"], "Maximum retry attempts exceeded");

    let res = server.send(as_customer(TestRequest::post().uri(&retry_uri(&last)), "alice")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.json()["error"].as_str().unwrap().contains("Maximum retry attempts exceeded"));
}

#[actix_web::test]
async fn cannot_retry_someone_elses_payment() {
    let server = TestServer::new().await;
    server.seed_order("order-403", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let id = failed_payment(&server, "order-403").await;
    let res = server.send(as_customer(TestRequest::post().uri(&retry_uri(&id)), "mallory")).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}
