use crate::db_types::{Order, PaymentTransaction, RevenueShare};

/// The outcome of [`crate::traits::PaymentLedger::apply_result`].
#[derive(Debug, Clone)]
pub enum TransitionResult {
    /// This caller moved the transaction out of `PROCESSING`. `revenue_shares` is only populated for completed
    /// transactions.
    Applied { transaction: PaymentTransaction, order: Order, revenue_shares: Vec<RevenueShare> },
    /// The transaction had already left `PROCESSING`. Nothing was written.
    AlreadyResolved { current: PaymentTransaction },
    /// The provider reported a payment for an order that was already paid by another transaction. The transaction
    /// was resolved `FAILED` and needs a refund.
    DuplicatePayment { transaction: PaymentTransaction },
}

impl TransitionResult {
    /// The state of the transaction after the call.
    pub fn transaction(&self) -> &PaymentTransaction {
        match self {
            Self::Applied { transaction, .. } => transaction,
            Self::AlreadyResolved { current } => current,
            Self::DuplicatePayment { transaction } => transaction,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}
