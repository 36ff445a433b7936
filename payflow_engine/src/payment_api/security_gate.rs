//! The checks a payment request has to pass before a transaction is created.
//!
//! The checks run in a fixed order and the first failure wins:
//! 1. CSRF: the `Origin` (or `Referer`) host must match the `Host` header.
//! 2. Amount: within one cent of the solution price, and never more than ten times the price.
//! 3. Duplicate: the order must not have a completed payment.
//! 4. Order status: the order must be awaiting payment.
//! 5. Rate limit: per minute, hour and day, keyed on the (user, IP address) pair.
//! 6. Attempt bound: failed attempts plus attempts still in flight stay below [`MAX_RETRIES`], so an order can never
//!    collect more than [`MAX_RETRIES`] failures.
//!
//! Every decision, pass or fail, goes to the audit log.
use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;
use payflow_common::Cents;
use url::Url;

use crate::{
    db_types::{AuditEventType, NewAuditEntry, Order, OrderStatusType},
    payment_api::{
        errors::PaymentApiError,
        payment_objects::{ClientRequest, CsrfHeaders},
    },
    traits::{AuditLog, LedgerQueries},
};

/// The most failed attempts an order may accumulate.
pub const MAX_RETRIES: i64 = 3;
pub const MAX_RETRIES_EXCEEDED: &str = "Maximum retry attempts exceeded";
/// Requested amounts may differ from the list price by at most this much.
pub const AMOUNT_TOLERANCE: Cents = Cents::from_minor(1);
/// Requested amounts may never exceed this multiple of the list price.
pub const MAX_PRICE_MULTIPLE: i64 = 10;

const DEV_ORIGINS: [&str; 2] = ["localhost", "127.0.0.1"];

/// A sliding rate-limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub seconds: i64,
    pub max_requests: i64,
}

pub const DEFAULT_RATE_WINDOWS: [RateWindow; 3] = [
    RateWindow { seconds: 60, max_requests: 5 },
    RateWindow { seconds: 3_600, max_requests: 20 },
    RateWindow { seconds: 86_400, max_requests: 50 },
];

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Accepts `localhost` origins and requests without `Origin`/`Referer` headers
    pub dev_mode: bool,
    /// Checked shortest first
    pub rate_windows: Vec<RateWindow>,
    pub max_retries: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { dev_mode: false, rate_windows: DEFAULT_RATE_WINDOWS.to_vec(), max_retries: MAX_RETRIES }
    }
}

impl GateConfig {
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }
}

/// Everything the gate looks at for one payment request.
#[derive(Debug, Clone)]
pub struct GateRequest<'a> {
    pub client: &'a ClientRequest,
    pub order: &'a Order,
    pub solution_price: Cents,
    pub amount: Cents,
}

#[derive(Clone)]
pub struct SecurityGate<B> {
    db: B,
    config: GateConfig,
}

impl<B> Debug for SecurityGate<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecurityGate(dev_mode: {})", self.config.dev_mode)
    }
}

impl<B> SecurityGate<B> {
    pub fn new(db: B, config: GateConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}

impl<B> SecurityGate<B>
where B: LedgerQueries + AuditLog
{
    /// Runs all the checks. On success a `GATE_PASSED` record is written; on failure the reason is written and the
    /// error returned.
    pub async fn check(&self, request: &GateRequest<'_>) -> Result<(), PaymentApiError> {
        let verdict = self.evaluate(request).await;
        let client = request.client;
        let (event_type, reason) = match &verdict {
            Ok(()) => (AuditEventType::GatePassed, format!("Payment of {} allowed", request.amount)),
            Err(PaymentApiError::DatabaseError(e)) => {
                error!("🛡️ Could not complete security checks for order {}. {e}", request.order.id);
                return verdict;
            },
            Err(e) => (AuditEventType::GateRejected, e.to_string()),
        };
        match &verdict {
            Ok(()) => debug!("🛡️ Payment request for order {} from {} passed", request.order.id, client.user_id),
            Err(e) => info!("🛡️ Payment request for order {} from {} rejected. {e}", request.order.id, client.user_id),
        }
        let entry = NewAuditEntry::new(event_type, reason)
            .with_user(client.user_id.clone())
            .with_ip(client.context.ip.clone())
            .with_order(&request.order.id);
        self.db.record_audit(entry).await?;
        verdict
    }

    async fn evaluate(&self, request: &GateRequest<'_>) -> Result<(), PaymentApiError> {
        check_csrf(&request.client.csrf, self.config.dev_mode).map_err(PaymentApiError::SecurityRejection)?;
        check_amount(request.amount, request.solution_price)?;
        let order = request.order;
        if self.db.completed_transaction_exists(&order.id).await? {
            return Err(PaymentApiError::SecurityRejection(format!("Order {} has already been paid", order.id)));
        }
        if order.status != OrderStatusType::Pending {
            return Err(PaymentApiError::SecurityRejection(format!(
                "Order {} is {} and is not awaiting payment",
                order.id, order.status
            )));
        }
        self.check_rate_limits(&request.client.user_id, &request.client.context.ip).await?;
        let failed = self.db.count_failed_transactions(&order.id).await?;
        if failed >= self.config.max_retries {
            return Err(PaymentApiError::SecurityRejection(MAX_RETRIES_EXCEEDED.to_string()));
        }
        let in_flight = self.db.count_in_flight_transactions(&order.id).await?;
        if failed + in_flight >= self.config.max_retries {
            return Err(PaymentApiError::SecurityRejection(format!(
                "Order {} has {in_flight} payment(s) in progress. Wait for them to finish",
                order.id
            )));
        }
        Ok(())
    }

    /// Returns the `retry_after` of the shortest window that is full.
    async fn check_rate_limits(&self, user_id: &str, ip: &str) -> Result<(), PaymentApiError> {
        let now = Utc::now();
        for window in &self.config.rate_windows {
            let since = now - Duration::seconds(window.seconds);
            let count = self.db.count_active_transactions_since(user_id, ip, since).await?;
            trace!("🛡️ {count} active payments for {user_id}/{ip} in the last {}s", window.seconds);
            if count >= window.max_requests {
                #[allow(clippy::cast_sign_loss)]
                return Err(PaymentApiError::RateLimited { retry_after: window.seconds as u64 });
            }
        }
        Ok(())
    }
}

/// The amount must be positive, within [`AMOUNT_TOLERANCE`] of the price, and at most [`MAX_PRICE_MULTIPLE`] times
/// the price.
pub fn check_amount(requested: Cents, price: Cents) -> Result<(), PaymentApiError> {
    if !requested.is_positive() {
        return Err(PaymentApiError::ValidationError(format!("Payment amount must be positive, not {requested}")));
    }
    if requested.abs_diff(price) > AMOUNT_TOLERANCE {
        return Err(PaymentApiError::SecurityRejection(format!(
            "Payment amount {requested} does not match the price {price}"
        )));
    }
    if requested > price * MAX_PRICE_MULTIPLE {
        return Err(PaymentApiError::SecurityRejection(format!(
            "Payment amount {requested} exceeds {MAX_PRICE_MULTIPLE} times the price {price}"
        )));
    }
    Ok(())
}

/// The request must come from a page served by this host. `Origin` is preferred; `Referer` is the fallback.
pub fn check_csrf(headers: &CsrfHeaders, dev_mode: bool) -> Result<(), String> {
    let source = match headers.origin.as_deref().or(headers.referer.as_deref()) {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ if dev_mode => return Ok(()),
        _ => return Err("Missing Origin and Referer headers".to_string()),
    };
    let source_host = Url::parse(source)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .ok_or_else(|| format!("Invalid request origin: {source}"))?;
    if dev_mode && DEV_ORIGINS.contains(&source_host.as_str()) {
        return Ok(());
    }
    let host = headers.host.as_deref().map(str::trim).filter(|h| !h.is_empty()).ok_or("Missing Host header")?;
    let request_host = Url::parse(&format!("http://{host}"))
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .ok_or_else(|| format!("Invalid Host header: {host}"))?;
    if source_host == request_host {
        Ok(())
    } else {
        Err(format!("Cross-site request from {source_host} to {request_host}"))
    }
}
