use chrono::{DateTime, Utc};
use payflow_common::Cents;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, OrderId, PaymentMethod, PaymentTransaction, RequestContext, TransactionId, TransactionStatus},
    providers::ProviderAck,
};

/// The request headers the CSRF check looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsrfHeaders {
    pub origin: Option<String>,
    pub referer: Option<String>,
    pub host: Option<String>,
}

/// Who is asking, and from where.
#[derive(Debug, Clone, Default)]
pub struct ClientRequest {
    pub user_id: String,
    pub context: RequestContext,
    pub csrf: CsrfHeaders,
}

impl ClientRequest {
    pub fn new<S: Into<String>>(user_id: S, context: RequestContext) -> Self {
        Self { user_id: user_id.into(), context, csrf: CsrfHeaders::default() }
    }

    pub fn with_csrf_headers(mut self, csrf: CsrfHeaders) -> Self {
        self.csrf = csrf;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: OrderId,
    pub solution_id: String,
    pub amount: Cents,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCreated {
    pub payment_id: TransactionId,
    pub payment_url: String,
    pub expires_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusSnapshot {
    pub transaction: PaymentTransaction,
    pub order: Order,
}

/// A status report relayed by a trusted internal service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPush {
    /// The provider trade status, e.g. `TRADE_SUCCESS` or `CLOSED`
    pub external_status: String,
    #[serde(default)]
    pub paid_amount: Option<Cents>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What happened when a provider result was applied to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "transaction", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// This call resolved the transaction.
    Applied(PaymentTransaction),
    /// Someone else resolved the transaction first. Nothing changed.
    AlreadyResolved(PaymentTransaction),
    /// The order had already been paid. The transaction was failed and flagged for refund.
    DuplicatePayment(PaymentTransaction),
    /// The customer has not paid yet. Nothing changed.
    StillPending(PaymentTransaction),
}

impl TransitionOutcome {
    pub fn transaction(&self) -> &PaymentTransaction {
        match self {
            Self::Applied(t) | Self::AlreadyResolved(t) | Self::DuplicatePayment(t) | Self::StillPending(t) => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEligibility {
    pub transaction_id: TransactionId,
    pub can_retry: bool,
    pub failed_count: i64,
    pub max_retries: i64,
    pub remaining_attempts: i64,
    pub reason: Option<String>,
}

/// The result of syncing a single transaction with its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The transaction was not `PROCESSING`, so the provider was not asked.
    NotProcessing(PaymentTransaction),
    Synced(TransitionOutcome),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub total: usize,
    pub synced: usize,
    pub failed: usize,
}

/// How a provider callback was dealt with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed(TransitionOutcome),
    /// The provider flagged the callback itself as a failure.
    SystemFailure(String),
    /// The callback failed validation and was not trusted.
    Rejected(String),
    /// No transaction matches the callback.
    UnknownTransaction(String),
    /// Something went wrong on our side. The provider will redeliver.
    InternalError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub outcome: WebhookOutcome,
    pub ack: ProviderAck,
}
