use std::time::Duration;

use actix_web::{
    dev::Server,
    http::KeepAlive,
    middleware::Logger,
    web,
    web::ServiceConfig,
    App,
    HttpServer,
};
use log::*;
use payflow_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    providers::ProviderRegistry,
    PaymentFlowApi,
    RetryApi,
    SqliteDatabase,
    TransitionApi,
    WebhookApi,
};

use crate::{
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    middleware::{HmacMiddlewareFactory, STATUS_PUSH_HMAC_HEADER},
    reconciliation_worker::start_reconciliation_worker,
    routes::{
        health,
        CreatePaymentRoute,
        PaymentStatusRoute,
        PaymentWebhookRoute,
        PushStatusRoute,
        RetryEligibilityRoute,
        RetryPaymentRoute,
    },
};

const EVENT_BUFFER_SIZE: usize = 64;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let providers = config.provider_registry()?;
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, notification_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;
    // Runs for the life of the process
    let _worker = start_reconciliation_worker(
        db.clone(),
        providers.clone(),
        producers.clone(),
        config.reconciliation,
        config.reconcile_interval,
    );
    let srv = create_server_instance(config, db, providers, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    providers: ProviderRegistry,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("payflow::access_log"))
            .configure(configure_app(&config, db.clone(), providers.clone(), producers.clone()))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Registers the engine APIs and every route. Shared by the server and the endpoint tests.
pub fn configure_app(
    config: &ServerConfig,
    db: SqliteDatabase,
    providers: ProviderRegistry,
    producers: EventProducers,
) -> impl FnOnce(&mut ServiceConfig) {
    let flow_api = PaymentFlowApi::new(db.clone(), providers.clone(), producers.clone(), config.payment_flow_config());
    let retry_api = RetryApi::new(flow_api.clone());
    let transitions = TransitionApi::new(db.clone(), producers);
    let webhook_api = WebhookApi::new(db, transitions, providers);
    let options = ServerOptions::from_config(config);
    let hmac = HmacMiddlewareFactory::new(
        STATUS_PUSH_HMAC_HEADER,
        config.status_push.secret.clone(),
        config.status_push.hmac_checks,
    );
    move |cfg: &mut ServiceConfig| {
        cfg.app_data(json_config())
            .app_data(web::Data::new(flow_api))
            .app_data(web::Data::new(retry_api))
            .app_data(web::Data::new(webhook_api))
            .app_data(web::Data::new(options))
            .service(health)
            // Registered ahead of the `/payments/{id}/...` routes
            .service(PaymentWebhookRoute::<SqliteDatabase>::new())
            .service(CreatePaymentRoute::<SqliteDatabase>::new())
            .service(PaymentStatusRoute::<SqliteDatabase>::new())
            .service(PushStatusRoute::<SqliteDatabase>::new(hmac))
            .service(RetryEligibilityRoute::<SqliteDatabase>::new())
            .service(RetryPaymentRoute::<SqliteDatabase>::new());
    }
}

/// Malformed JSON bodies get the same `{"error": ...}` treatment as every other error.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into())
}

/// The customer notification hooks. Payment failures are where customers hear that their payment did not go through;
/// duplicate payments additionally need a refund.
pub fn notification_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_payment_completed(|ev| {
            Box::pin(async move {
                info!(
                    "📬️ Payment {} completed. Order {} is confirmed with {} revenue share(s).",
                    ev.transaction.id,
                    ev.order.id,
                    ev.revenue_shares.len()
                );
            })
        })
        .on_payment_failed(|ev| {
            Box::pin(async move {
                info!(
                    "📬️ Notifying {} that payment {} for order {} failed. {}",
                    ev.order.user_id, ev.transaction.id, ev.order.id, ev.reason
                );
                if ev.refund_required {
                    warn!(
                        "📬️ Payment {} of {} for order {} must be refunded",
                        ev.transaction.id, ev.transaction.amount, ev.order.id
                    );
                }
            })
        })
        .on_payment_cancelled(|ev| {
            Box::pin(async move {
                debug!("📬️ Payment {} was cancelled. {:?}", ev.transaction.id, ev.transaction.failure_reason);
            })
        });
    hooks
}
