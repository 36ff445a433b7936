//! #  Database management and control.
//!
//! This module defines the interface contracts of the payment engine database *backends*.
//!
//! ## Traits
//! * [`PaymentLedger`] owns the payment transaction state machine. It is the only way a transaction row changes
//!   status, and every change it makes is conditional on the status the caller expects the row to be in.
//! * [`LedgerQueries`] provides read-only access to transactions, orders, solutions and revenue shares.
//! * [`AuditLog`] is the sink for security and settlement audit records.
mod audit_log;
mod data_objects;
mod ledger_queries;
mod payment_ledger;

pub use audit_log::AuditLog;
pub use data_objects::TransitionResult;
pub use ledger_queries::LedgerQueries;
pub use payment_ledger::{LedgerError, PaymentLedger};
