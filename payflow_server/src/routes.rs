//! Request handler definitions
//!
//! Define each route and it handler here. The handlers only translate between HTTP and the payment engine APIs; every
//! decision is made in the engine.
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every handler here awaits the database or a provider, so none of
//! them block; keep it that way.
use std::str::FromStr;

use actix_web::{
    get,
    http::{header::CONTENT_TYPE, StatusCode},
    web,
    HttpRequest,
    HttpResponse,
    Responder,
};
use log::*;
use payflow_engine::{
    db_types::{PaymentProvider, TransactionId},
    payment_objects::{CreatePaymentRequest, StatusPush, TransitionOutcome, WebhookOutcome},
    PaymentApiError,
    PaymentFlowApi,
    PaymentLedger,
    RetryApi,
    WebhookApi,
};

use crate::{
    config::ServerOptions,
    data_objects::JsonResponse,
    errors::ServerError,
    helpers::{client_request, get_remote_ip, UNKNOWN_IP},
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+ where hmac)  => {
        paste::paste! { pub struct [<$name:camel Route>]<A>($crate::middleware::HmacMiddlewareFactory, core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            pub fn new(hmac: $crate::middleware::HmacMiddlewareFactory) -> Self {
                Self(hmac, core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            A: $($bounds)++ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>)
                    .wrap(self.0);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(create_payment => Post "/payments" impl PaymentLedger);
/// Route handler for creating a payment attempt.
///
/// The caller must own the order, the amount must match the solution price and the caller must not have exceeded
/// the payment rate limits. On success the response carries the URL the customer pays at:
/// ```json
/// { "paymentId": "txn_...", "paymentUrl": "https://...", "expiresAt": "2024-05-01T12:30:00Z", "status": "PROCESSING" }
/// ```
pub async fn create_payment<B: PaymentLedger>(
    req: HttpRequest,
    body: web::Json<CreatePaymentRequest>,
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let client = client_request(&req, &options)?;
    let request = body.into_inner();
    debug!("💻️ POST payment for order {} by {}", request.order_id, client.user_id);
    let created = api.create_payment(&client, request).await.map_err(|e| {
        debug!("💻️ Payment request from {} was refused. {e}", client.user_id);
        ServerError::from(e)
    })?;
    Ok(HttpResponse::Created().json(created))
}

route!(payment_status => Get "/payments/{id}/status" impl PaymentLedger);
/// The payment and its order. A payment still awaiting the provider is synced with the provider first.
pub async fn payment_status<B: PaymentLedger>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<PaymentFlowApi<B>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let client = client_request(&req, &options)?;
    let id = TransactionId::from(path.into_inner());
    debug!("💻️ GET status of payment {id} for {}", client.user_id);
    let snapshot = api.payment_status(&client, &id).await?;
    Ok(HttpResponse::Ok().json(snapshot))
}

route!(push_status => Post "/payments/{id}/status" impl PaymentLedger where hmac);
/// Route handler for status pushes from trusted internal services.
///
/// The request is authenticated by the HMAC middleware before it gets here. The pushed status goes through exactly
/// the same transition rules as a provider callback, so pushing a result for a payment that is already resolved is a
/// harmless no-op.
pub async fn push_status<B: PaymentLedger>(
    path: web::Path<String>,
    body: web::Json<StatusPush>,
    api: web::Data<PaymentFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = TransactionId::from(path.into_inner());
    let push = body.into_inner();
    info!("💻️ Status push for payment {id}: {}", push.external_status);
    let outcome = api.push_status(&id, push).await?;
    let response = match outcome {
        TransitionOutcome::Applied(tx) => JsonResponse::success(format!("Payment {} is now {}", tx.id, tx.status)),
        TransitionOutcome::AlreadyResolved(tx) => {
            JsonResponse::success(format!("Payment {} was already {}", tx.id, tx.status))
        },
        TransitionOutcome::StillPending(tx) => {
            JsonResponse::success(format!("Payment {} is still awaiting payment", tx.id))
        },
        TransitionOutcome::DuplicatePayment(tx) => JsonResponse::failure(format!(
            "Order {} had already been paid. Payment {} has been failed and must be refunded",
            tx.order_id, tx.id
        )),
    };
    Ok(HttpResponse::Ok().json(response))
}

//----------------------------------------------   Retries  ----------------------------------------------------
route!(retry_eligibility => Get "/payments/{id}/retry" impl PaymentLedger);
pub async fn retry_eligibility<B: PaymentLedger>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<RetryApi<B>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let client = client_request(&req, &options)?;
    let id = TransactionId::from(path.into_inner());
    debug!("💻️ GET retry eligibility of payment {id} for {}", client.user_id);
    let eligibility = api.retry_eligibility(&client, &id).await?;
    Ok(HttpResponse::Ok().json(eligibility))
}

route!(retry_payment => Post "/payments/{id}/retry" impl PaymentLedger);
/// Starts a new attempt for a failed payment. The response is the same as for a new payment.
pub async fn retry_payment<B: PaymentLedger>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<RetryApi<B>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let client = client_request(&req, &options)?;
    let id = TransactionId::from(path.into_inner());
    debug!("💻️ POST retry of payment {id} by {}", client.user_id);
    let created = api.retry_payment(&client, &id).await?;
    Ok(HttpResponse::Created().json(created))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(payment_webhook => Post "/payments/webhook/{provider}" impl PaymentLedger);
/// Route handler for provider callbacks.
///
/// The body is handed to the engine untouched, since the signature covers it exactly as sent. The reply is always in
/// the provider's own format: `success`/`failure` for Alipay, an XML `return_code` for WeChat Pay. A non-2xx reply
/// makes the provider deliver the callback again later.
pub async fn payment_webhook<B: PaymentLedger>(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
    api: web::Data<WebhookApi<B>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let provider = match PaymentProvider::from_str(&path.into_inner()) {
        Ok(p) => p,
        Err(e) => {
            debug!("💻️ Webhook for an unknown provider. {e}");
            return Ok(unknown_webhook(e.to_string()));
        },
    };
    let remote_ip = get_remote_ip(&req, options.use_x_forwarded_for, options.use_forwarded)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string());
    trace!("💻️ Received {provider} webhook from {remote_ip}");
    let content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let response = match api.handle_notification(provider, body.as_ref(), content_type, &remote_ip).await {
        Ok(r) => r,
        Err(PaymentApiError::ProviderUnavailable(msg)) => {
            debug!("💻️ Webhook for {provider}, which is not configured. {msg}");
            return Ok(unknown_webhook(msg));
        },
        Err(e) => return Err(e.into()),
    };
    match &response.outcome {
        WebhookOutcome::Processed(outcome) => debug!("💻️ {provider} webhook processed: {outcome:?}"),
        other => info!("💻️ {provider} webhook from {remote_ip} not applied: {other:?}"),
    }
    let ack = response.ack;
    let status = StatusCode::from_u16(ack.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    Ok(HttpResponse::build(status).content_type(ack.content_type).body(ack.body))
}

/// Providers are not API clients, so a callback addressed to no configured provider gets a bare text reply.
fn unknown_webhook(reason: String) -> HttpResponse {
    HttpResponse::NotFound().content_type("text/plain; charset=utf-8").body(reason)
}
