use std::{sync::Arc, time::Duration};

use actix_web::{
    body::to_bytes,
    http::{header::HeaderMap, StatusCode},
    test,
    test::TestRequest,
    App,
};
use log::debug;
use payflow_common::{Cents, Secret};
use payflow_engine::{
    db_types::{NewOrder, NewPaymentTransaction, Order, OrderId, PaymentMethod, RequestContext, Solution},
    events::EventProducers,
    providers::{
        alipay::{AlipayAdapter, AlipayConfig},
        wechat::{WechatConfig, WechatPayAdapter, WechatSignType},
        xml::to_cdata_xml,
        ProviderAdapter,
        ProviderRegistry,
        SignedParams,
    },
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    PaymentLedger,
    SqliteDatabase,
};

use crate::{
    config::{ServerConfig, StatusPushConfig},
    helpers::calculate_hmac,
    middleware::STATUS_PUSH_HMAC_HEADER,
    server::configure_app,
};

pub const SHOP_HOST: &str = "shop.example.com";
pub const PUSH_SECRET: &str = "a-shared-secret-for-status-pushes";
pub const ALIPAY_GATEWAY: &str = "http://127.0.0.1:9/gateway.do";
// Nothing listens on the discard port, so every outbound call fails fast
const DEAD_GATEWAY: &str = "http://127.0.0.1:9";
const WECHAT_API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";
// Test keys only. DO NOT re-use these anywhere.
const ALIPAY_PRIVATE_KEY: &str = include_str!("../../../payflow_engine/tests/data/alipay_test_private.pem");
const ALIPAY_PUBLIC_KEY: &str = include_str!("../../../payflow_engine/tests/data/alipay_test_public.pem");

pub struct TestServer {
    pub db: SqliteDatabase,
    pub config: ServerConfig,
    pub providers: ProviderRegistry,
    pub wechat: Arc<WechatPayAdapter>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {}", self.body))
    }
}

impl TestServer {
    pub async fn new() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error connecting to test database");
        let config = ServerConfig {
            database_url: url,
            status_push: StatusPushConfig { secret: Secret::new(PUSH_SECRET.to_string()), hmac_checks: true },
            ..Default::default()
        };
        let alipay = AlipayAdapter::new(AlipayConfig {
            app_id: "2021000000000000".to_string(),
            gateway_url: ALIPAY_GATEWAY.to_string(),
            private_key: Secret::new(ALIPAY_PRIVATE_KEY.to_string()),
            alipay_public_key: ALIPAY_PUBLIC_KEY.to_string(),
            notify_url: format!("https://{SHOP_HOST}/payments/webhook/alipay"),
            return_url: None,
            timeout: Duration::from_secs(1),
        })
        .expect("Error configuring Alipay");
        let wechat = Arc::new(
            WechatPayAdapter::new(WechatConfig {
                app_id: "wxd930ea5d5a258f4f".to_string(),
                mch_id: "10000100".to_string(),
                api_key: Secret::new(WECHAT_API_KEY.to_string()),
                sign_type: WechatSignType::Md5,
                gateway_url: DEAD_GATEWAY.to_string(),
                notify_url: format!("https://{SHOP_HOST}/payments/webhook/wechat"),
                timeout: Duration::from_secs(1),
            })
            .expect("Error configuring WeChat Pay"),
        );
        let providers = ProviderRegistry::new().with_adapter(Arc::new(alipay)).with_adapter(wechat.clone());
        Self { db, config, providers, wechat }
    }

    pub async fn send(&self, req: TestRequest) -> TestResponse {
        let configure = configure_app(&self.config, self.db.clone(), self.providers.clone(), EventProducers::default());
        let app = test::init_service(App::new().configure(configure)).await;
        // Middleware rejections come back as errors rather than responses
        match test::try_call_service(&app, req.to_request()).await {
            Ok(res) => {
                let status = res.status();
                let headers = res.headers().clone();
                let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
                debug!("Response: {status} {body}");
                TestResponse { status, headers, body }
            },
            Err(e) => {
                let res = e.error_response();
                let status = res.status();
                let headers = res.headers().clone();
                let body = to_bytes(res.into_body()).await.expect("Error reading error body");
                let body = String::from_utf8_lossy(&body).into_owned();
                debug!("Error response: {status} {body}");
                TestResponse { status, headers, body }
            },
        }
    }

    /// Stores the solutions and an order for them. Items are `(solution_id, creator_id, price_in_cents)`.
    pub async fn seed_order(&self, order_id: &str, user_id: &str, items: &[(&str, &str, i64)]) -> Order {
        let mut order = NewOrder::new(OrderId::from(order_id), user_id);
        for (solution_id, creator_id, price) in items {
            let solution = Solution {
                id: solution_id.to_string(),
                creator_id: creator_id.to_string(),
                title: format!("Solution {solution_id}"),
                price: Cents::from(*price),
            };
            self.db.upsert_solution(&solution).await.expect("Error storing solution");
            order = order.with_item(*solution_id, Cents::from(*price));
        }
        self.db.insert_order(order).await.expect("Error storing order")
    }

    /// A WeChat Pay transaction that is waiting on the provider, with the given trade number.
    pub async fn processing_wechat_payment(
        &self,
        order_id: &str,
        solution_id: &str,
        amount: i64,
        external_id: &str,
    ) -> String {
        let new_tx = NewPaymentTransaction::new(
            OrderId::from(order_id),
            solution_id.to_string(),
            Cents::from(amount),
            PaymentMethod::WechatNative,
            RequestContext::new("10.0.0.1"),
        );
        let tx = self.db.create_transaction(new_tx).await.expect("Error creating transaction");
        let tx = self.db.mark_processing(&tx.id, external_id).await.expect("Error marking transaction as processing");
        tx.id.to_string()
    }

    /// A signed WeChat Pay callback body. `total_fee` is in fen.
    pub fn wechat_notification(&self, external_id: &str, result_code: &str, total_fee: i64) -> String {
        let mut fields = wechat_fields(external_id, result_code, total_fee);
        let sign = self.wechat.sign(&fields).expect("Error signing notification");
        fields.insert("sign".into(), sign);
        to_cdata_xml(&fields).expect("Error rendering notification")
    }

    /// As [`Self::wechat_notification`], but the amount is changed after signing.
    pub fn tampered_wechat_notification(&self, external_id: &str, signed_fee: i64, sent_fee: i64) -> String {
        let mut fields = wechat_fields(external_id, "SUCCESS", signed_fee);
        let sign = self.wechat.sign(&fields).expect("Error signing notification");
        fields.insert("sign".into(), sign);
        fields.insert("total_fee".into(), sent_fee.to_string());
        to_cdata_xml(&fields).expect("Error rendering notification")
    }
}

fn wechat_fields(external_id: &str, result_code: &str, total_fee: i64) -> SignedParams {
    let mut fields = SignedParams::new();
    fields.insert("return_code".into(), "SUCCESS".into());
    fields.insert("result_code".into(), result_code.into());
    fields.insert("appid".into(), "wxd930ea5d5a258f4f".into());
    fields.insert("mch_id".into(), "10000100".into());
    fields.insert("nonce_str".into(), "5K8264ILTKCH16CQ2502SI8ZNMTM67VS".into());
    fields.insert("out_trade_no".into(), external_id.into());
    fields.insert("transaction_id".into(), "4200000001202405011234567890".into());
    fields.insert("total_fee".into(), total_fee.to_string());
    fields.insert("time_end".into(), "20240501203000".into());
    fields
}

/// A same-origin request from `user_id`.
pub fn as_customer(req: TestRequest, user_id: &str) -> TestRequest {
    req.insert_header(("X-User-Id", user_id))
        .insert_header(("Origin", format!("https://{SHOP_HOST}")))
        .insert_header(("Host", SHOP_HOST))
        .insert_header(("User-Agent", "endpoint-test"))
        .peer_addr("192.0.2.10:40000".parse().expect("Invalid peer address"))
}

pub fn create_payment_request(
    user_id: &str,
    order_id: &str,
    solution_id: &str,
    amount: &str,
    method: &str,
) -> TestRequest {
    let body = serde_json::json!({
        "orderId": order_id,
        "solutionId": solution_id,
        "amount": amount,
        "paymentMethod": method,
    });
    as_customer(TestRequest::post().uri("/payments"), user_id).set_json(body)
}

/// A status push signed with the test secret.
pub fn signed_push(payment_id: &str, body: serde_json::Value) -> TestRequest {
    let body = body.to_string();
    let signature = calculate_hmac(PUSH_SECRET, body.as_bytes());
    TestRequest::post()
        .uri(&format!("/payments/{payment_id}/status"))
        .insert_header(("Content-Type", "application/json"))
        .insert_header((STATUS_PUSH_HMAC_HEADER, signature))
        .set_payload(body)
}
