use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::json;

use super::helpers::{create_payment_request, signed_push, TestServer};
use crate::middleware::STATUS_PUSH_HMAC_HEADER;

async fn processing_payment(server: &TestServer, order_id: &str) -> String {
    server.seed_order(order_id, "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let res = server.send(create_payment_request("alice", order_id, "sol-1", "100.00", "alipay_page")).await;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.body);
    res.json()["paymentId"].as_str().unwrap().to_string()
}

#[actix_web::test]
async fn unsigned_push_is_refused() {
    let server = TestServer::new().await;
    let id = processing_payment(&server, "order-300").await;
    let req = TestRequest::post()
        .uri(&format!("/payments/{id}/status"))
        .set_json(json!({ "externalStatus": "TRADE_SUCCESS", "paidAmount": "100.00" }));
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert!(res.json()["error"].as_str().unwrap().contains("No HMAC signature"));
}

#[actix_web::test]
async fn badly_signed_push_is_refused() {
    let server = TestServer::new().await;
    let id = processing_payment(&server, "order-301").await;
    let req = TestRequest::post()
        .uri(&format!("/payments/{id}/status"))
        .insert_header((STATUS_PUSH_HMAC_HEADER, "bm90IGEgcmVhbCBzaWduYXR1cmU="))
        .set_json(json!({ "externalStatus": "TRADE_SUCCESS", "paidAmount": "100.00" }));
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn signed_push_completes_the_payment_once() {
    let server = TestServer::new().await;
    let id = processing_payment(&server, "order-302").await;
    let push = json!({ "externalStatus": "TRADE_SUCCESS", "paidAmount": "100.00" });
    let res = server.send(signed_push(&id, push.clone())).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let body = res.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], format!("Payment {id} is now COMPLETED"));

    let res = server.send(signed_push(&id, push)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], format!("Payment {id} was already COMPLETED"));
}

#[actix_web::test]
async fn pending_push_changes_nothing() {
    let server = TestServer::new().await;
    let id = processing_payment(&server, "order-303").await;
    let res = server.send(signed_push(&id, json!({ "externalStatus": "WAIT_BUYER_PAY" }))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["message"], format!("Payment {id} is still awaiting payment"));
}

#[actix_web::test]
async fn push_with_the_wrong_amount_is_rejected() {
    let server = TestServer::new().await;
    let id = processing_payment(&server, "order-304").await;
    let res = server.send(signed_push(&id, json!({ "externalStatus": "TRADE_SUCCESS", "paidAmount": "1.00" }))).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn push_for_unknown_payment() {
    let server = TestServer::new().await;
    let res = server.send(signed_push("txn_nope", json!({ "externalStatus": "TRADE_SUCCESS" }))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}
