//! Payment provider adapters.
//!
//! Each provider speaks its own dialect: Alipay signs JSON with RSA2, WeChat Pay signs XML with MD5 or HMAC-SHA256.
//! [`ProviderAdapter`] hides those differences behind one object-safe interface, and [`ProviderRegistry`] hands out
//! the right adapter for a transaction.
use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use payflow_common::Cents;
use thiserror::Error;

use crate::db_types::{PaymentProvider, PaymentTransaction};

pub mod alipay;
pub mod canonical;
pub mod status_map;
pub mod wechat;
pub mod xml;

pub use canonical::{canonical_string, params_from, SignedParams};
pub use status_map::{map_status, MappedStatus};

/// Both providers quote times in China Standard Time, without an offset.
const CHINA_UTC_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Provider {0} is not configured")]
    NotConfigured(PaymentProvider),
    #[error("Invalid provider configuration: {0}")]
    ConfigurationError(String),
    #[error("Could not sign the request: {0}")]
    SigningError(String),
    #[error("Could not parse the provider payload: {0}")]
    ParseError(String),
    #[error("Provider request failed: {0}")]
    TransportError(String),
    #[error("Provider rejected the request: {0}")]
    Rejected(String),
    #[error("The provider response signature is missing or invalid")]
    InvalidSignature,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::TransportError(e.to_string())
    }
}

/// A provider callback, parsed but not yet trusted.
#[derive(Debug, Clone, Default)]
pub struct ProviderNotification {
    /// Every top-level field in the payload. Signatures are computed over these.
    pub fields: SignedParams,
    /// False if the provider flagged the callback itself as a system-level failure
    pub system_ok: bool,
    pub system_message: Option<String>,
    pub signature: Option<String>,
    /// The merchant trade number, i.e. our `external_id`
    pub external_id: Option<String>,
    /// The raw provider trade status
    pub external_status: Option<String>,
    pub paid_amount: Option<Cents>,
    /// The provider's own id for the trade
    pub provider_trade_no: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Provider-supplied detail on why a trade failed
    pub failure_detail: Option<String>,
}

/// The kinds of acknowledgement we send back to a provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckKind {
    /// Processed (or already processed). The provider stops redelivering.
    Success,
    /// The callback was rejected and must not be trusted.
    Rejected(String),
    /// No transaction matches the callback.
    NotFound,
    /// We could not process the callback. The provider should redeliver it later.
    Retry,
}

impl AckKind {
    pub fn http_status(&self) -> u16 {
        match self {
            AckKind::Success => 200,
            AckKind::Rejected(_) => 400,
            AckKind::NotFound => 404,
            AckKind::Retry => 500,
        }
    }
}

/// A provider-formatted reply to a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAck {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

/// What a provider reported when asked about a trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatusReport {
    pub external_status: String,
    pub paid_amount: Option<Cents>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A signed, definitive answer from the provider.
    Found(ProviderStatusReport),
    /// No trustworthy answer: timeout, network failure, an unsigned response or a trade the provider does not know
    /// about (yet). This is not the same as a failed payment.
    Unknown(String),
}

/// What the provider needs to know to open a cashier session.
#[derive(Debug, Clone)]
pub struct RedirectRequest<'a> {
    pub transaction: &'a PaymentTransaction,
    pub external_id: &'a str,
    /// The product name shown to the customer
    pub subject: &'a str,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Signs the parameters in the provider's scheme and returns the encoded signature.
    fn sign(&self, params: &SignedParams) -> Result<String, ProviderError>;

    /// Checks `signature` over `params`. Never panics; any decoding problem is simply an invalid signature.
    fn verify(&self, params: &SignedParams, signature: &str) -> bool;

    /// Parses a callback body. `content_type` is the request's `Content-Type` header, if any.
    fn parse_notification(&self, body: &[u8], content_type: Option<&str>)
        -> Result<ProviderNotification, ProviderError>;

    /// A notification is authentic if it carries a signature and that signature checks out.
    fn verify_notification(&self, notification: &ProviderNotification) -> bool {
        match &notification.signature {
            Some(sig) if !sig.is_empty() => self.verify(&notification.fields, sig),
            _ => false,
        }
    }

    /// Renders the reply the provider expects to its callback.
    fn ack(&self, kind: AckKind) -> ProviderAck;

    /// Builds the URL the customer pays at.
    async fn create_redirect(&self, request: RedirectRequest<'_>) -> Result<String, ProviderError>;

    /// Asks the provider for the current state of the trade.
    async fn query_status(&self, external_id: &str) -> QueryOutcome;
}

/// Resolves the adapter for a provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PaymentProvider, Arc<dyn ProviderAdapter>>,
}

impl Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers = self.adapters.keys().map(|p| p.to_string()).collect::<Vec<_>>();
        write!(f, "ProviderRegistry({})", providers.join(", "))
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.adapters.get(&provider).cloned().ok_or(ProviderError::NotConfigured(provider))
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

pub(crate) fn china_offset() -> FixedOffset {
    FixedOffset::east_opt(CHINA_UTC_OFFSET_SECS).unwrap_or(Utc.fix())
}

/// Parses a provider timestamp given in China Standard Time.
pub(crate) fn parse_china_time(s: &str, format: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, format).ok()?;
    china_offset().from_local_datetime(&naive).single().map(|t| t.with_timezone(&Utc))
}

pub(crate) fn format_china_time(t: DateTime<Utc>, format: &str) -> String {
    t.with_timezone(&china_offset()).format(format).to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn china_time_round_trip() {
        let t = parse_china_time("2024-05-01 20:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap());
        assert_eq!(format_china_time(t, "%Y%m%d%H%M%S"), "20240501203000");
        assert!(parse_china_time("not a time", "%Y-%m-%d %H:%M:%S").is_none());
    }

    #[test]
    fn ack_statuses() {
        assert_eq!(AckKind::Success.http_status(), 200);
        assert_eq!(AckKind::NotFound.http_status(), 404);
        assert_eq!(AckKind::Retry.http_status(), 500);
    }
}
