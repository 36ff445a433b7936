use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use payflow_common::Cents;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(String);

//--------------------------------------    TransactionId     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    /// Generates a new, random transaction id of the form `txn_<24 alphanumerics>`.
    pub fn random() -> Self {
        let suffix: String = rand::thread_rng().sample_iter(&Alphanumeric).take(24).map(char::from).collect();
        Self(format!("txn_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the merchant trade number sent to the provider. Both providers accept at most 32 alphanumeric characters.
pub fn new_external_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .filter(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
        .take(16)
        .map(char::from)
        .collect();
    format!("PF{}{suffix}", now.format("%Y%m%d%H%M%S"))
}

//--------------------------------------        OrderId        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------   TransactionStatus   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    /// Created and gated, but the customer has not been sent to the provider yet.
    Pending,
    /// The customer has been redirected to the provider. Only transactions in this state can be resolved.
    Processing,
    /// The provider confirmed payment.
    Completed,
    /// The provider reported a failure.
    Failed,
    /// The trade was closed at the provider, or abandoned before the redirect.
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid transaction status: {s}"))),
        }
    }
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatusType {
    /// The order is awaiting payment.
    Pending,
    /// A payment for the order completed.
    Confirmed,
    /// The order was withdrawn by the customer or the order service.
    Cancelled,
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl From<String> for OrderStatusType {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "CONFIRMED" => Self::Confirmed,
            "CANCELLED" => Self::Cancelled,
            _ => {
                error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to PENDING");
                Self::Pending
            },
        }
    }
}

//--------------------------------------   PaymentProvider     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Alipay,
    Wechat,
}

impl Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alipay => write!(f, "alipay"),
            Self::Wechat => write!(f, "wechat"),
        }
    }
}

impl FromStr for PaymentProvider {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alipay" => Ok(Self::Alipay),
            "wechat" | "wechatpay" | "weixin" => Ok(Self::Wechat),
            s => Err(ConversionError(format!("Unknown payment provider: {s}"))),
        }
    }
}

//--------------------------------------    PaymentMethod      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Desktop cashier page
    #[serde(alias = "alipay")]
    AlipayPage,
    /// Mobile browser cashier page
    AlipayWap,
    /// QR code scanned from the WeChat app
    #[serde(alias = "wechat")]
    WechatNative,
}

impl PaymentMethod {
    pub fn provider(&self) -> PaymentProvider {
        match self {
            Self::AlipayPage | Self::AlipayWap => PaymentProvider::Alipay,
            Self::WechatNative => PaymentProvider::Wechat,
        }
    }
}

impl Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlipayPage => write!(f, "alipay_page"),
            Self::AlipayWap => write!(f, "alipay_wap"),
            Self::WechatNative => write!(f, "wechat_native"),
        }
    }
}

//--------------------------------------   RequestContext      ---------------------------------------------------------
/// Where a payment request came from. Used for rate limiting and the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new<S: Into<String>>(ip: S) -> Self {
        Self { ip: ip.into(), user_agent: None }
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

//--------------------------------------    RetryLineage       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryLineage {
    pub transaction_id: TransactionId,
    pub retry_of_id: TransactionId,
    /// 1-based count of the attempt this transaction represents, i.e. the number of failures that preceded it.
    pub attempt_number: i64,
}

//--------------------------------------  PaymentTransaction   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: TransactionId,
    pub order_id: OrderId,
    pub solution_id: String,
    pub amount: Cents,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub payment_provider: PaymentProvider,
    pub status: TransactionStatus,
    pub external_id: Option<String>,
    pub external_status: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_lineage: Option<RetryLineage>,
    pub request_context: RequestContext,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for PaymentTransaction {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let id: TransactionId = row.try_get("id")?;
        let retry_of_id: Option<TransactionId> = row.try_get("retry_of_id")?;
        let attempt_number: Option<i64> = row.try_get("attempt_number")?;
        let retry_lineage = match (retry_of_id, attempt_number) {
            (Some(retry_of_id), Some(attempt_number)) => {
                Some(RetryLineage { transaction_id: id.clone(), retry_of_id, attempt_number })
            },
            _ => None,
        };
        let request_context = RequestContext { ip: row.try_get("client_ip")?, user_agent: row.try_get("user_agent")? };
        Ok(Self {
            id,
            order_id: row.try_get("order_id")?,
            solution_id: row.try_get("solution_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            payment_method: row.try_get("payment_method")?,
            payment_provider: row.try_get("payment_provider")?,
            status: row.try_get("status")?,
            external_id: row.try_get("external_id")?,
            external_status: row.try_get("external_status")?,
            failure_reason: row.try_get("failure_reason")?,
            retry_lineage,
            request_context,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

//-------------------------------------- NewPaymentTransaction ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub order_id: OrderId,
    pub solution_id: String,
    pub amount: Cents,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub request_context: RequestContext,
    /// Set when this attempt retries a failed transaction: `(retry_of_id, attempt_number)`.
    pub retry_of: Option<(TransactionId, i64)>,
}

impl NewPaymentTransaction {
    pub fn new(
        order_id: OrderId,
        solution_id: String,
        amount: Cents,
        payment_method: PaymentMethod,
        request_context: RequestContext,
    ) -> Self {
        Self {
            order_id,
            solution_id,
            amount,
            currency: payflow_common::DEFAULT_CURRENCY_CODE.to_string(),
            payment_method,
            request_context,
            retry_of: None,
        }
    }

    pub fn as_retry_of(mut self, original: &TransactionId, attempt_number: i64) -> Self {
        self.retry_of = Some((original.clone(), attempt_number));
        self
    }
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: String,
    pub status: OrderStatusType,
    pub total: Cents,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An order as handed over by the order service. Payflow never creates orders on its own; this type exists so that
/// the order service (and tests) can populate the shared tables.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: String,
    pub currency: String,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub solution_id: String,
    pub price: Cents,
}

impl NewOrder {
    pub fn new<S: Into<String>>(id: OrderId, user_id: S) -> Self {
        Self { id, user_id: user_id.into(), currency: payflow_common::DEFAULT_CURRENCY_CODE.to_string(), items: vec![] }
    }

    pub fn with_item<S: Into<String>>(mut self, solution_id: S, price: Cents) -> Self {
        self.items.push(NewOrderItem { solution_id: solution_id.into(), price });
        self
    }

    pub fn total(&self) -> Cents {
        self.items.iter().map(|i| i.price).sum()
    }
}

//--------------------------------------       Solution        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Solution {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub price: Cents,
}

/// One solution purchased in an order, with the creator who earns from it.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderLineItem {
    pub order_id: OrderId,
    pub solution_id: String,
    pub creator_id: String,
    pub price: Cents,
}

//--------------------------------------     RevenueShare      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RevenueShareStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct RevenueShare {
    pub id: i64,
    pub order_id: OrderId,
    pub solution_id: String,
    pub creator_id: String,
    pub total_amount: Cents,
    pub platform_fee: Cents,
    pub creator_revenue: Cents,
    pub status: RevenueShareStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRevenueShare {
    pub order_id: OrderId,
    pub solution_id: String,
    pub creator_id: String,
    pub total_amount: Cents,
    pub platform_fee: Cents,
    pub creator_revenue: Cents,
}

//--------------------------------------      Audit log        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    GatePassed,
    GateRejected,
    TransitionApplied,
    DuplicatePayment,
    WebhookRejected,
    RetryRejected,
}

impl Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::GatePassed => "GATE_PASSED",
            Self::GateRejected => "GATE_REJECTED",
            Self::TransitionApplied => "TRANSITION_APPLIED",
            Self::DuplicatePayment => "DUPLICATE_PAYMENT",
            Self::WebhookRejected => "WEBHOOK_REJECTED",
            Self::RetryRejected => "RETRY_REJECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub order_id: Option<OrderId>,
    pub transaction_id: Option<TransactionId>,
    pub reason: String,
}

impl NewAuditEntry {
    pub fn new<S: Into<String>>(event_type: AuditEventType, reason: S) -> Self {
        Self { event_type, user_id: None, ip_address: None, order_id: None, transaction_id: None, reason: reason.into() }
    }

    pub fn with_user<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip<S: Into<String>>(mut self, ip: S) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_order(mut self, order_id: &OrderId) -> Self {
        self.order_id = Some(order_id.clone());
        self
    }

    pub fn with_transaction(mut self, transaction_id: &TransactionId) -> Self {
        self.transaction_id = Some(transaction_id.clone());
        self
    }
}

impl Display for NewAuditEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] user={} ip={} order={} txn={}: {}",
            self.event_type,
            self.user_id.as_deref().unwrap_or("-"),
            self.ip_address.as_deref().unwrap_or("-"),
            self.order_id.as_ref().map(|o| o.as_str()).unwrap_or("-"),
            self.transaction_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
            self.reason
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub order_id: Option<OrderId>,
    pub transaction_id: Option<TransactionId>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    ProviderResult     ---------------------------------------------------------
/// Which path delivered a provider result. Recorded in the audit trail; it has no effect on the transition itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Webhook,
    Reconciliation,
    StatusPush,
}

impl Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::Reconciliation => write!(f, "reconciliation"),
            Self::StatusPush => write!(f, "status push"),
        }
    }
}

/// The provider-side facts that accompany a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResult {
    /// The raw trade status reported by the provider, e.g. `TRADE_SUCCESS`
    pub external_status: String,
    pub failure_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub source: ResultSource,
}

impl ProviderResult {
    pub fn new<S: Into<String>>(external_status: S, source: ResultSource) -> Self {
        Self { external_status: external_status.into(), failure_reason: None, paid_at: None, source }
    }

    pub fn with_failure_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_paid_at(mut self, paid_at: DateTime<Utc>) -> Self {
        self.paid_at = Some(paid_at);
        self
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn external_ids_fit_provider_limits() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let id = new_external_id(now);
        assert_eq!(id.len(), 32);
        assert!(id.starts_with("PF20240501123000"));
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn status_round_trip() {
        for s in ["PENDING", "processing", "Completed", "FAILED", "CANCELLED"] {
            let status = s.parse::<TransactionStatus>().unwrap();
            assert_eq!(status.to_string(), s.to_ascii_uppercase());
        }
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(!TransactionStatus::Processing.is_terminal());
    }

    #[test]
    fn payment_method_aliases() {
        let m: PaymentMethod = serde_json::from_str("\"alipay\"").unwrap();
        assert_eq!(m, PaymentMethod::AlipayPage);
        let m: PaymentMethod = serde_json::from_str("\"wechat_native\"").unwrap();
        assert_eq!(m.provider(), PaymentProvider::Wechat);
    }
}
