use chrono::{DateTime, Utc};

use crate::{
    db_types::{Order, OrderId, OrderLineItem, PaymentTransaction, RevenueShare, Solution, TransactionId},
    traits::LedgerError,
};

/// Read-only queries over the ledger.
#[allow(async_fn_in_trait)]
pub trait LedgerQueries {
    async fn fetch_transaction(&self, id: &TransactionId) -> Result<Option<PaymentTransaction>, LedgerError>;

    /// Looks a transaction up by the trade number the provider knows it by.
    async fn fetch_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, LedgerError>;

    /// All transactions for the order, oldest first.
    async fn fetch_transactions_for_order(&self, order_id: &OrderId) -> Result<Vec<PaymentTransaction>, LedgerError>;

    /// Fetches up to `limit` transactions that are waiting on the provider: status `PROCESSING` with an external id.
    /// The oldest transactions are returned first.
    async fn fetch_reconcilable(&self, limit: i64) -> Result<Vec<PaymentTransaction>, LedgerError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError>;

    async fn fetch_solution(&self, solution_id: &str) -> Result<Option<Solution>, LedgerError>;

    /// The solutions purchased in the order, with the creator of each.
    async fn fetch_order_line_items(&self, order_id: &OrderId) -> Result<Vec<OrderLineItem>, LedgerError>;

    async fn completed_transaction_exists(&self, order_id: &OrderId) -> Result<bool, LedgerError>;

    async fn count_failed_transactions(&self, order_id: &OrderId) -> Result<i64, LedgerError>;

    /// `PENDING` and `PROCESSING` transactions of the order. Each of them may still fail, so they count against the
    /// attempt bound.
    async fn count_in_flight_transactions(&self, order_id: &OrderId) -> Result<i64, LedgerError>;

    /// Counts `PENDING` and `PROCESSING` transactions created at or after `since` that belong to `user_id` and were
    /// requested from `ip_address`.
    async fn count_active_transactions_since(
        &self,
        user_id: &str,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, LedgerError>;

    async fn fetch_revenue_shares(&self, order_id: &OrderId) -> Result<Vec<RevenueShare>, LedgerError>;
}
