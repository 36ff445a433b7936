//! Payflow Payment Engine
//!
//! The payment engine owns the lifecycle of a payment attempt against the two supported providers (Alipay and WeChat
//! Pay): it gates and records the attempt, consumes asynchronous provider notifications, reconciles divergent state by
//! polling the providers, bounds retries and settles creator revenue exactly once per order.
//!
//! The library is divided into the following sections:
//! 1. Database management and control ([`traits`] and the SQLite backend). You should never need to access the
//!    database directly; the data types used in the database are defined in [`db_types`] and are public.
//! 2. Provider adapters ([`providers`]). Signing, verification, payload parsing and status queries for each provider
//!    live behind the object-safe [`providers::ProviderAdapter`] trait.
//! 3. The payment engine public API ([`payment_api`]). Every status change reported by a provider, whichever path it
//!    arrives on, flows through [`TransitionApi`].
//!
//! The engine also emits events when a payment completes, fails or is cancelled. See [`events`].
pub mod db_types;
pub mod events;
pub mod payment_api;
pub mod providers;
pub mod settlement;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use payment_api::{
    errors::PaymentApiError,
    payment_flow_api::PaymentFlowApi,
    payment_objects,
    reconciliation_api::ReconciliationApi,
    retry_api::RetryApi,
    security_gate::SecurityGate,
    transition_api::TransitionApi,
    webhook_api::WebhookApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{AuditLog, LedgerError, LedgerQueries, PaymentLedger};
