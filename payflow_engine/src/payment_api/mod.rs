//! # Payflow payment engine public API
//!
//! The APIs in this module are what the HTTP server (or any other front end) drives.
//!
//! * [`security_gate`] decides whether a payment attempt may be created at all.
//! * [`payment_flow_api`] creates attempts, hands out payment URLs and reports status.
//! * [`transition_api`] applies provider results to transactions. It is the only caller of
//!   [`crate::traits::PaymentLedger::apply_result`].
//! * [`webhook_api`] ingests provider callbacks.
//! * [`reconciliation_api`] polls providers for transactions whose callback never arrived.
//! * [`retry_api`] reports retry eligibility and issues bounded retries.
//!
//! # API usage
//!
//! Every API is created from a database backend that implements the ledger traits:
//!
//! ```rust,ignore
//! let db = SqliteDatabase::new_with_url(url, 25).await?;
//! let transitions = TransitionApi::new(db.clone(), producers);
//! let reconciler = ReconciliationApi::new(db, transitions, providers, ReconciliationConfig::default());
//! let summary = reconciler.sync_batch().await?;
//! ```
pub mod errors;
pub mod payment_flow_api;
pub mod payment_objects;
pub mod reconciliation_api;
pub mod retry_api;
pub mod security_gate;
pub mod transition_api;
pub mod webhook_api;
