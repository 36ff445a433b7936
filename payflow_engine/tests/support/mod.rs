#![allow(dead_code)]
//! Shared set-up for the engine integration tests: a throwaway database, seed data, and provider adapters whose
//! answers are scripted by the test.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::*;
use mockall::automock;
use payflow_common::{Cents, Secret};
use payflow_engine::{
    db_types::{
        NewOrder,
        NewPaymentTransaction,
        Order,
        OrderId,
        PaymentMethod,
        PaymentProvider,
        PaymentTransaction,
        RequestContext,
        Solution,
    },
    events::{EventProducer, EventProducers, PaymentCancelledEvent, PaymentCompletedEvent, PaymentFailedEvent},
    payment_objects::{ClientRequest, CsrfHeaders},
    providers::{
        canonical_string,
        wechat::{WechatConfig, WechatPayAdapter, WechatSignType},
        AckKind,
        ProviderAck,
        ProviderAdapter,
        ProviderError,
        ProviderNotification,
        ProviderRegistry,
        QueryOutcome,
        RedirectRequest,
        SignedParams,
    },
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    PaymentLedger,
    SqliteDatabase,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::sync::mpsc;

pub const SHOP_HOST: &str = "shop.example.com";
pub const WECHAT_API_KEY: &str = "192006250b4c09247ec02edce69f6a2d";

//--------------------------------------     Database     ---------------------------------------------------------
pub async fn setup() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 25).await.expect("Error connecting to database");
    debug!("🚀️ Test database ready at {url}");
    db
}

pub async fn tear_down(db: SqliteDatabase) {
    db.pool().close().await;
    if let Err(e) = Sqlite::drop_database(db.url()).await {
        warn!("🚀️ Could not drop test database {}: {e}", db.url());
    }
}

//--------------------------------------     Seed data     ---------------------------------------------------------
/// Stores the solutions and an order for them. Items are `(solution_id, creator_id, price_in_cents)`.
pub async fn seed_order(db: &SqliteDatabase, order_id: &str, user_id: &str, items: &[(&str, &str, i64)]) -> Order {
    let mut order = NewOrder::new(OrderId::from(order_id), user_id);
    for (solution_id, creator_id, price) in items {
        let solution = Solution {
            id: solution_id.to_string(),
            creator_id: creator_id.to_string(),
            title: format!("Solution {solution_id}"),
            price: Cents::from(*price),
        };
        db.upsert_solution(&solution).await.expect("Error storing solution");
        order = order.with_item(*solution_id, Cents::from(*price));
    }
    db.insert_order(order).await.expect("Error storing order")
}

/// A transaction that has been handed to the provider and is waiting for the result.
pub async fn processing_transaction(
    db: &SqliteDatabase,
    order_id: &str,
    solution_id: &str,
    amount: i64,
    method: PaymentMethod,
    external_id: &str,
) -> PaymentTransaction {
    let new_tx = NewPaymentTransaction::new(
        OrderId::from(order_id),
        solution_id.to_string(),
        Cents::from(amount),
        method,
        RequestContext::new("10.0.0.1").with_user_agent("integration-test"),
    );
    let tx = db.create_transaction(new_tx).await.expect("Error creating transaction");
    db.mark_processing(&tx.id, external_id).await.expect("Error marking transaction as processing")
}

/// A same-origin request from `user_id`.
pub fn client(user_id: &str, ip: &str) -> ClientRequest {
    let csrf = CsrfHeaders {
        origin: Some(format!("https://{SHOP_HOST}")),
        referer: None,
        host: Some(SHOP_HOST.to_string()),
    };
    ClientRequest::new(user_id, RequestContext::new(ip)).with_csrf_headers(csrf)
}

//--------------------------------------      Events       ---------------------------------------------------------
/// Event producers that feed plain channels, so tests can count what was published.
pub struct EventSink {
    pub completed: mpsc::Receiver<PaymentCompletedEvent>,
    pub failed: mpsc::Receiver<PaymentFailedEvent>,
    pub cancelled: mpsc::Receiver<PaymentCancelledEvent>,
}

impl EventSink {
    pub fn new() -> (EventProducers, Self) {
        let (completed_tx, completed) = mpsc::channel(64);
        let (failed_tx, failed) = mpsc::channel(64);
        let (cancelled_tx, cancelled) = mpsc::channel(64);
        let producers = EventProducers {
            payment_completed_producer: vec![EventProducer::new(completed_tx)],
            payment_failed_producer: vec![EventProducer::new(failed_tx)],
            payment_cancelled_producer: vec![EventProducer::new(cancelled_tx)],
        };
        (producers, Self { completed, failed, cancelled })
    }

    pub fn completed_count(&mut self) -> usize {
        std::iter::from_fn(|| self.completed.try_recv().ok()).count()
    }

    pub fn failed_events(&mut self) -> Vec<PaymentFailedEvent> {
        std::iter::from_fn(|| self.failed.try_recv().ok()).collect()
    }

    pub fn cancelled_count(&mut self) -> usize {
        std::iter::from_fn(|| self.cancelled.try_recv().ok()).count()
    }
}

//--------------------------------------     Providers     ---------------------------------------------------------
/// The provider status lookup, mocked per test.
#[automock]
pub trait StatusQuery: Send + Sync {
    fn query_status(&self, external_id: &str) -> QueryOutcome;
}

/// A provider adapter whose status answers come from a [`MockStatusQuery`]. Signatures are the canonical string
/// itself, which is enough to tell signed and tampered payloads apart.
pub struct ScriptedAdapter {
    provider: PaymentProvider,
    status: MockStatusQuery,
    redirect_ok: bool,
}

impl ScriptedAdapter {
    pub fn new(provider: PaymentProvider, status: MockStatusQuery) -> Self {
        Self { provider, status, redirect_ok: true }
    }

    /// No status queries are expected.
    pub fn silent(provider: PaymentProvider) -> Self {
        let mut status = MockStatusQuery::new();
        status.expect_query_status().never();
        Self::new(provider, status)
    }

    pub fn failing_redirects(mut self) -> Self {
        self.redirect_ok = false;
        self
    }

    pub fn into_registry(self) -> ProviderRegistry {
        ProviderRegistry::new().with_adapter(Arc::new(self))
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    fn sign(&self, params: &SignedParams) -> Result<String, ProviderError> {
        Ok(canonical_string(params, &["sign"]))
    }

    fn verify(&self, params: &SignedParams, signature: &str) -> bool {
        canonical_string(params, &["sign"]) == signature
    }

    fn parse_notification(
        &self,
        _body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<ProviderNotification, ProviderError> {
        Err(ProviderError::ParseError("Scripted adapters do not receive notifications".to_string()))
    }

    fn ack(&self, kind: AckKind) -> ProviderAck {
        let body = if kind == AckKind::Success { "success" } else { "failure" };
        ProviderAck { status: kind.http_status(), content_type: "text/plain", body: body.to_string() }
    }

    async fn create_redirect(&self, request: RedirectRequest<'_>) -> Result<String, ProviderError> {
        if self.redirect_ok {
            Ok(format!("https://pay.example.com/cashier/{}", request.external_id))
        } else {
            Err(ProviderError::TransportError("connection refused".to_string()))
        }
    }

    async fn query_status(&self, external_id: &str) -> QueryOutcome {
        self.status.query_status(external_id)
    }
}

pub fn wechat_adapter() -> WechatPayAdapter {
    let config = WechatConfig {
        app_id: "wxd930ea5d5a258f4f".to_string(),
        mch_id: "10000100".to_string(),
        api_key: Secret::new(WECHAT_API_KEY.to_string()),
        sign_type: WechatSignType::Md5,
        gateway_url: "http://127.0.0.1:9".to_string(),
        notify_url: format!("https://{SHOP_HOST}/payments/webhook/wechat"),
        timeout: Duration::from_secs(1),
    };
    WechatPayAdapter::new(config).expect("Error configuring WeChat Pay adapter")
}

/// A signed WeChat Pay callback body. `total_fee` is in fen.
pub fn wechat_notification(adapter: &WechatPayAdapter, external_id: &str, result_code: &str, total_fee: i64) -> String {
    let mut fields = SignedParams::new();
    fields.insert("return_code".into(), "SUCCESS".into());
    fields.insert("result_code".into(), result_code.into());
    fields.insert("appid".into(), "wxd930ea5d5a258f4f".into());
    fields.insert("mch_id".into(), "10000100".into());
    fields.insert("nonce_str".into(), format!("n{}", rand::random::<u32>()));
    fields.insert("out_trade_no".into(), external_id.into());
    fields.insert("transaction_id".into(), format!("42000{}", rand::random::<u32>()));
    fields.insert("total_fee".into(), total_fee.to_string());
    fields.insert("time_end".into(), "20240501203000".into());
    let sign = adapter.sign(&fields).expect("Error signing notification");
    fields.insert("sign".into(), sign);
    payflow_engine::providers::xml::to_cdata_xml(&fields).expect("Error rendering notification")
}
