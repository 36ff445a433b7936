use actix_web::{http::StatusCode, test::TestRequest};
use payflow_engine::{
    db_types::{OrderStatusType, TransactionStatus},
    providers::ProviderRegistry,
    LedgerQueries,
};

use super::helpers::{as_customer, TestServer};

fn wechat_webhook(body: String) -> TestRequest {
    TestRequest::post()
        .uri("/payments/webhook/wechat")
        .insert_header(("Content-Type", "text/xml"))
        .peer_addr("203.0.113.50:443".parse().unwrap())
        .set_payload(body)
}

#[actix_web::test]
async fn wechat_success_completes_the_payment() {
    let server = TestServer::new().await;
    server.seed_order("order-200", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    let id = server.processing_wechat_payment("order-200", "sol-1", 10_000, "WX200").await;
    let res = server.send(wechat_webhook(server.wechat_notification("WX200", "SUCCESS", 10_000))).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert!(res.headers.get("content-type").unwrap().to_str().unwrap().starts_with("text/xml"));
    assert_eq!(
        res.body,
        "<xml><return_code><![CDATA[SUCCESS]]></return_code><return_msg><![CDATA[OK]]></return_msg></xml>"
    );

    let res = server.send(as_customer(TestRequest::get().uri(&format!("/payments/{id}/status")), "alice")).await;
    assert_eq!(res.status, StatusCode::OK);
    let body = res.json();
    assert_eq!(body["transaction"]["status"], "COMPLETED");
    assert_eq!(body["order"]["status"], "CONFIRMED");
}

#[actix_web::test]
async fn duplicate_delivery_settles_once() {
    let server = TestServer::new().await;
    server.seed_order("order-201", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    server.processing_wechat_payment("order-201", "sol-1", 10_000, "WX201").await;
    let notification = server.wechat_notification("WX201", "SUCCESS", 10_000);
    for _ in 0..2 {
        let res = server.send(wechat_webhook(notification.clone())).await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        assert!(res.body.contains("<![CDATA[SUCCESS]]>"));
    }
    let order_id = "order-201".into();
    let shares = server.db.fetch_revenue_shares(&order_id).await.unwrap();
    assert_eq!(shares.len(), 1);
    let order = server.db.fetch_order(&order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatusType::Confirmed);
}

#[actix_web::test]
async fn failed_trade_fails_the_payment() {
    let server = TestServer::new().await;
    server.seed_order("order-202", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    server.processing_wechat_payment("order-202", "sol-1", 10_000, "WX202").await;
    let res = server.send(wechat_webhook(server.wechat_notification("WX202", "FAIL", 10_000))).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let txs = server.db.fetch_transactions_for_order(&"order-202".into()).await.unwrap();
    assert_eq!(txs[0].status, TransactionStatus::Failed);
    assert!(server.db.fetch_revenue_shares(&"order-202".into()).await.unwrap().is_empty());
}

#[actix_web::test]
async fn tampered_notification_is_rejected() {
    let server = TestServer::new().await;
    server.seed_order("order-203", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    server.processing_wechat_payment("order-203", "sol-1", 10_000, "WX203").await;
    let res = server.send(wechat_webhook(server.tampered_wechat_notification("WX203", 10_000, 1))).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert!(res.body.contains("<![CDATA[FAIL]]>"));
    let txs = server.db.fetch_transactions_for_order(&"order-203".into()).await.unwrap();
    assert_eq!(txs[0].status, TransactionStatus::Processing);
}

#[actix_web::test]
async fn wrong_amount_is_rejected() {
    let server = TestServer::new().await;
    server.seed_order("order-204", "alice", &[("sol-1", "creator-1", 10_000)]).await;
    server.processing_wechat_payment("order-204", "sol-1", 10_000, "WX204").await;
    // Properly signed, but for one fen
    let res = server.send(wechat_webhook(server.wechat_notification("WX204", "SUCCESS", 1))).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let txs = server.db.fetch_transactions_for_order(&"order-204".into()).await.unwrap();
    assert_eq!(txs[0].status, TransactionStatus::Processing);
}

#[actix_web::test]
async fn unknown_trade() {
    let server = TestServer::new().await;
    let res = server.send(wechat_webhook(server.wechat_notification("WX-NOBODY", "SUCCESS", 10_000))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert!(res.body.contains("ORDER_NOT_FOUND"));
}

#[actix_web::test]
async fn unknown_provider() {
    let server = TestServer::new().await;
    let res = server.send(TestRequest::post().uri("/payments/webhook/paypal").set_payload("{}")).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert!(res.headers.get("content-type").unwrap().to_str().unwrap().starts_with("text/plain"));
    assert!(serde_json::from_str::<serde_json::Value>(&res.body).is_err());
    assert!(res.body.contains("paypal"));
}

#[actix_web::test]
async fn unconfigured_provider() {
    let mut server = TestServer::new().await;
    server.providers = ProviderRegistry::new().with_adapter(server.wechat.clone());
    let req = TestRequest::post()
        .uri("/payments/webhook/alipay")
        .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
        .set_payload("trade_status=TRADE_SUCCESS");
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert!(res.headers.get("content-type").unwrap().to_str().unwrap().starts_with("text/plain"));
    assert!(!res.body.starts_with('{'));
}

#[actix_web::test]
async fn unreadable_alipay_notification() {
    let server = TestServer::new().await;
    let req = TestRequest::post()
        .uri("/payments/webhook/alipay")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json");
    let res = server.send(req).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body, "failure");
}
