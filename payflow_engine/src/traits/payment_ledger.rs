use thiserror::Error;

use crate::{
    db_types::{NewPaymentTransaction, PaymentTransaction, ProviderResult, TransactionId, TransactionStatus},
    traits::{AuditLog, LedgerQueries, TransitionResult},
};

/// The payment transaction state machine.
///
/// ```text
///   PENDING ──redirect──▶ PROCESSING ──apply_result──▶ COMPLETED | FAILED | CANCELLED
///      │
///      └──abandon──▶ CANCELLED
/// ```
///
/// Every method here is a *conditional* update. A caller that finds the row in an unexpected state does not get an
/// error for having lost a race; it gets told what the row looks like now.
#[allow(async_fn_in_trait)]
pub trait PaymentLedger: Clone + LedgerQueries + AuditLog {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new transaction in `PENDING` status. If the transaction is a retry, the retry lineage is stored in the
    /// same database transaction.
    async fn create_transaction(&self, tx: NewPaymentTransaction) -> Result<PaymentTransaction, LedgerError>;

    /// Records the provider-facing trade number and moves the transaction from `PENDING` to `PROCESSING`. This happens
    /// once the customer has been handed a payment URL.
    ///
    /// Fails with [`LedgerError::InvalidTransition`] if the transaction is not `PENDING`.
    async fn mark_processing(&self, id: &TransactionId, external_id: &str) -> Result<PaymentTransaction, LedgerError>;

    /// Moves a `PENDING` transaction to `CANCELLED`. Used when no payment URL could be obtained from the provider.
    ///
    /// Returns `None` if the transaction was no longer `PENDING`.
    async fn abandon_transaction(
        &self,
        id: &TransactionId,
        reason: &str,
    ) -> Result<Option<PaymentTransaction>, LedgerError>;

    /// Resolves a `PROCESSING` transaction into the terminal status `target`.
    ///
    /// In a single database transaction:
    /// * The status, provider status, failure reason and payment time are updated, `WHERE status = 'PROCESSING'`. This
    ///   is the first statement, so the write lock is held before anything is read.
    /// * If no row was updated, somebody else already resolved the transaction and
    ///   [`TransitionResult::AlreadyResolved`] is returned. Nothing else happens.
    /// * If the transaction completed, the order is confirmed and the revenue shares for the order are created (unless
    ///   they already exist).
    /// * If the transaction would complete but another transaction for the same order has already completed, it is
    ///   resolved `FAILED` instead, flagged for refund, and [`TransitionResult::DuplicatePayment`] is returned.
    /// * An audit record is written.
    ///
    /// `target` must be terminal, otherwise [`LedgerError::InvalidTransition`] is returned.
    async fn apply_result(
        &self,
        id: &TransactionId,
        target: TransactionStatus,
        result: &ProviderResult,
    ) -> Result<TransitionResult, LedgerError>;
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("The requested transaction {0} does not exist")]
    TransactionNotFound(TransactionId),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(String),
    #[error("Illegal transaction status change. {0}")]
    InvalidTransition(String),
    #[error("External id {0} is already assigned to another transaction")]
    DuplicateExternalId(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}
