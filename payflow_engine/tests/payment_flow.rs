use payflow_common::Cents;
use payflow_engine::{
    db_types::{OrderId, OrderStatusType, PaymentMethod, PaymentProvider, TransactionStatus},
    payment_api::payment_flow_api::{PaymentFlowApi, PaymentFlowConfig},
    payment_objects::{CreatePaymentRequest, StatusPush, TransitionOutcome},
    providers::{ProviderStatusReport, QueryOutcome},
    LedgerQueries,
    PaymentApiError,
    SqliteDatabase,
};

mod support;
use support::{client, seed_order, setup, tear_down, EventSink, MockStatusQuery, ScriptedAdapter};

fn flow_api(db: &SqliteDatabase, adapter: ScriptedAdapter) -> (PaymentFlowApi<SqliteDatabase>, EventSink) {
    let (producers, sink) = EventSink::new();
    (PaymentFlowApi::new(db.clone(), adapter.into_registry(), producers, PaymentFlowConfig::default()), sink)
}

fn request(order_id: &str) -> CreatePaymentRequest {
    CreatePaymentRequest {
        order_id: OrderId::from(order_id),
        solution_id: "sol-a".to_string(),
        amount: Cents::from(4_200),
        payment_method: PaymentMethod::WechatNative,
    }
}

#[tokio::test]
async fn status_checks_sync_processing_payments() {
    let db = setup().await;
    seed_order(&db, "ord-700", "alice", &[("sol-a", "creator-1", 4_200)]).await;
    let mut status = MockStatusQuery::new();
    let mut answers = vec!["SUCCESS", "NOTPAY"];
    status.expect_query_status().times(2).returning(move |_| {
        let external_status = answers.pop().unwrap_or("NOTPAY").to_string();
        QueryOutcome::Found(ProviderStatusReport {
            external_status,
            paid_amount: Some(Cents::from(4_200)),
            paid_at: None,
            failure_detail: None,
        })
    });
    let (api, mut events) = flow_api(&db, ScriptedAdapter::new(PaymentProvider::Wechat, status));
    let alice = client("alice", "10.3.0.1");
    let created = api.create_payment(&alice, request("ord-700")).await.unwrap();
    assert!(created.expires_at > chrono::Utc::now() + chrono::Duration::minutes(29));

    // First check: the customer has not paid yet
    let snapshot = api.payment_status(&alice, &created.payment_id).await.unwrap();
    assert_eq!(snapshot.transaction.status, TransactionStatus::Processing);
    assert_eq!(snapshot.order.status, OrderStatusType::Pending);
    // Second check: paid
    let snapshot = api.payment_status(&alice, &created.payment_id).await.unwrap();
    assert_eq!(snapshot.transaction.status, TransactionStatus::Completed);
    assert_eq!(snapshot.order.status, OrderStatusType::Confirmed);
    // Third check: resolved, so the provider is left alone
    let snapshot = api.payment_status(&alice, &created.payment_id).await.unwrap();
    assert_eq!(snapshot.transaction.status, TransactionStatus::Completed);
    assert_eq!(events.completed_count(), 1);

    let err = api.payment_status(&client("mallory", "10.3.0.9"), &created.payment_id).await.unwrap_err();
    assert!(matches!(err, PaymentApiError::Forbidden(_)));
    tear_down(db).await;
}

#[tokio::test]
async fn status_checks_survive_provider_outages() {
    let db = setup().await;
    seed_order(&db, "ord-701", "alice", &[("sol-a", "creator-1", 4_200)]).await;
    let mut status = MockStatusQuery::new();
    status.expect_query_status().returning(|_| QueryOutcome::Unknown("timed out".to_string()));
    let (api, _events) = flow_api(&db, ScriptedAdapter::new(PaymentProvider::Wechat, status));
    let alice = client("alice", "10.3.0.2");
    let created = api.create_payment(&alice, request("ord-701")).await.unwrap();
    let snapshot = api.payment_status(&alice, &created.payment_id).await.unwrap();
    assert_eq!(snapshot.transaction.status, TransactionStatus::Processing);
    tear_down(db).await;
}

#[tokio::test]
async fn pushed_statuses_follow_the_same_rules() {
    let db = setup().await;
    seed_order(&db, "ord-702", "alice", &[("sol-a", "creator-1", 4_200)]).await;
    let (api, mut events) = flow_api(&db, ScriptedAdapter::silent(PaymentProvider::Wechat));
    let created = api.create_payment(&client("alice", "10.3.0.3"), request("ord-702")).await.unwrap();

    let wrong_amount = StatusPush {
        external_status: "SUCCESS".to_string(),
        paid_amount: Some(Cents::from(1)),
        paid_at: None,
        reason: None,
    };
    let err = api.push_status(&created.payment_id, wrong_amount).await.unwrap_err();
    assert!(matches!(err, PaymentApiError::SecurityRejection(_)));
    let no_amount = StatusPush { external_status: "SUCCESS".to_string(), paid_amount: None, paid_at: None, reason: None };
    let err = api.push_status(&created.payment_id, no_amount).await.unwrap_err();
    assert!(matches!(err, PaymentApiError::SecurityRejection(_)));

    let push = StatusPush {
        external_status: "CLOSED".to_string(),
        paid_amount: None,
        paid_at: None,
        reason: Some("Customer closed the QR code".to_string()),
    };
    let outcome = api.push_status(&created.payment_id, push.clone()).await.unwrap();
    assert!(matches!(outcome, TransitionOutcome::Applied(ref t) if t.status == TransactionStatus::Cancelled));
    let again = api.push_status(&created.payment_id, push).await.unwrap();
    assert!(matches!(again, TransitionOutcome::AlreadyResolved(_)));
    assert_eq!(events.cancelled_count(), 1);
    let stored = db.fetch_transaction(&created.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.failure_reason.as_deref(), Some("Customer closed the QR code"));

    let err = api.push_status(&"txn_missing".into(), StatusPush {
        external_status: "SUCCESS".to_string(),
        paid_amount: None,
        paid_at: None,
        reason: None,
    })
    .await
    .unwrap_err();
    assert!(matches!(err, PaymentApiError::NotFound(_)));
    tear_down(db).await;
}
