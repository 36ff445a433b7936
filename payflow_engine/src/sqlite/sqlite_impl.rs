//! `SqliteDatabase` is a concrete implementation of a Payflow payment engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{audit, db_url, new_pool, orders, revenue, transactions};
use crate::{
    db_types::{
        AuditEntry,
        AuditEventType,
        NewAuditEntry,
        NewOrder,
        NewPaymentTransaction,
        Order,
        OrderId,
        OrderLineItem,
        OrderStatusType,
        PaymentTransaction,
        ProviderResult,
        RevenueShare,
        Solution,
        TransactionId,
        TransactionStatus,
    },
    settlement::split_revenue,
    traits::{AuditLog, LedgerError, LedgerQueries, PaymentLedger, TransitionResult},
};

pub const DUPLICATE_PAYMENT_REASON: &str = "Duplicate payment, refund required";

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl PaymentLedger for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_transaction(&self, tx: NewPaymentTransaction) -> Result<PaymentTransaction, LedgerError> {
        let mut db_tx = self.pool.begin().await?;
        let id = transactions::insert_transaction(tx, Utc::now(), &mut db_tx).await?;
        let transaction = transactions::fetch_transaction(&id, &mut db_tx)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.clone()))?;
        db_tx.commit().await?;
        debug!("🗃️ Transaction {id} created for order {} ({})", transaction.order_id, transaction.amount);
        Ok(transaction)
    }

    async fn mark_processing(&self, id: &TransactionId, external_id: &str) -> Result<PaymentTransaction, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let updated = match transactions::set_processing(id, external_id, Utc::now(), &mut conn).await {
            Ok(n) => n,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(LedgerError::DuplicateExternalId(external_id.to_string()));
            },
            Err(e) => return Err(e.into()),
        };
        let transaction = transactions::fetch_transaction(id, &mut conn)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.clone()))?;
        if updated == 0 {
            return Err(LedgerError::InvalidTransition(format!(
                "Transaction {id} is {} and cannot move to PROCESSING",
                transaction.status
            )));
        }
        debug!("🗃️ Transaction {id} is now PROCESSING with external id {external_id}");
        Ok(transaction)
    }

    async fn abandon_transaction(
        &self,
        id: &TransactionId,
        reason: &str,
    ) -> Result<Option<PaymentTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let updated = transactions::abandon(id, reason, Utc::now(), &mut conn).await?;
        if updated == 0 {
            debug!("🗃️ Transaction {id} was not PENDING, so it was not abandoned");
            return Ok(None);
        }
        let transaction = transactions::fetch_transaction(id, &mut conn).await?;
        info!("🗃️ Transaction {id} abandoned. {reason}");
        Ok(transaction)
    }

    async fn apply_result(
        &self,
        id: &TransactionId,
        target: TransactionStatus,
        result: &ProviderResult,
    ) -> Result<TransitionResult, LedgerError> {
        if !target.is_terminal() {
            return Err(LedgerError::InvalidTransition(format!(
                "{target} is not a terminal status. Only terminal results can be applied to transaction {id}"
            )));
        }
        let now = Utc::now();
        let paid_at = match target {
            TransactionStatus::Completed => Some(result.paid_at.unwrap_or(now)),
            _ => None,
        };
        let mut tx = self.pool.begin().await?;
        let resolved = transactions::resolve(
            id,
            target,
            &result.external_status,
            result.failure_reason.as_deref(),
            paid_at,
            now,
            &mut tx,
        )
        .await;
        let updated = match resolved {
            Ok(n) => n,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                warn!("🗃️ Transaction {id} was paid, but its order has already been paid by another transaction");
                let result = self.resolve_duplicate_payment(id, result, now, &mut tx).await?;
                tx.commit().await?;
                return Ok(result);
            },
            Err(e) => return Err(e.into()),
        };
        let transaction = transactions::fetch_transaction(id, &mut tx)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.clone()))?;
        if updated == 0 {
            debug!(
                "🗃️ Transaction {id} is already {}. {target} from {} is a no-op.",
                transaction.status, result.source
            );
            tx.rollback().await?;
            return Ok(TransitionResult::AlreadyResolved { current: transaction });
        }
        let order_id = transaction.order_id.clone();
        let (order, revenue_shares) = if target == TransactionStatus::Completed {
            let order = orders::update_status(&order_id, OrderStatusType::Confirmed, now, &mut tx)
                .await?
                .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;
            if revenue::shares_exist(&order_id, &mut tx).await? {
                warn!("💸 Revenue shares for order {order_id} already exist. They will not be created again.");
            } else {
                let items = orders::fetch_line_items(&order_id, &mut tx).await?;
                let shares = split_revenue(&items);
                revenue::insert_shares(&shares, now, &mut tx).await?;
                info!("💸 {} revenue shares settled for order {order_id}", shares.len());
            }
            let shares = revenue::fetch_shares(&order_id, &mut tx).await?;
            (order, shares)
        } else {
            let order = orders::fetch_order(&order_id, &mut tx)
                .await?
                .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;
            (order, vec![])
        };
        let reason = format!(
            "PROCESSING -> {target} via {} (provider status {})",
            result.source, result.external_status
        );
        let entry = NewAuditEntry::new(AuditEventType::TransitionApplied, reason)
            .with_user(order.user_id.clone())
            .with_order(&order_id)
            .with_transaction(id);
        audit::insert_entry(entry, now, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Transaction {id} for order {order_id} is now {target}");
        Ok(TransitionResult::Applied { transaction, order, revenue_shares })
    }
}

impl SqliteDatabase {
    async fn resolve_duplicate_payment(
        &self,
        id: &TransactionId,
        result: &ProviderResult,
        now: DateTime<Utc>,
        tx: &mut sqlx::SqliteConnection,
    ) -> Result<TransitionResult, LedgerError> {
        let reason = match &result.failure_reason {
            Some(r) => format!("{DUPLICATE_PAYMENT_REASON}. {r}"),
            None => DUPLICATE_PAYMENT_REASON.to_string(),
        };
        let updated = transactions::resolve(
            id,
            TransactionStatus::Failed,
            &result.external_status,
            Some(&reason),
            result.paid_at,
            now,
            &mut *tx,
        )
        .await?;
        let transaction = transactions::fetch_transaction(id, &mut *tx)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.clone()))?;
        if updated == 0 {
            return Ok(TransitionResult::AlreadyResolved { current: transaction });
        }
        let entry = NewAuditEntry::new(
            AuditEventType::DuplicatePayment,
            format!("{reason}. Provider status {} via {}", result.external_status, result.source),
        )
        .with_order(&transaction.order_id)
        .with_transaction(id);
        audit::insert_entry(entry, now, &mut *tx).await?;
        Ok(TransitionResult::DuplicatePayment { transaction })
    }
}

impl LedgerQueries for SqliteDatabase {
    async fn fetch_transaction(&self, id: &TransactionId) -> Result<Option<PaymentTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let tx = transactions::fetch_transaction(id, &mut conn).await?;
        Ok(tx)
    }

    async fn fetch_transaction_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let tx = transactions::fetch_by_external_id(external_id, &mut conn).await?;
        Ok(tx)
    }

    async fn fetch_transactions_for_order(&self, order_id: &OrderId) -> Result<Vec<PaymentTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let txs = transactions::fetch_for_order(order_id, &mut conn).await?;
        Ok(txs)
    }

    async fn fetch_reconcilable(&self, limit: i64) -> Result<Vec<PaymentTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let txs = transactions::fetch_reconcilable(limit, &mut conn).await?;
        Ok(txs)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_solution(&self, solution_id: &str) -> Result<Option<Solution>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let solution = orders::fetch_solution(solution_id, &mut conn).await?;
        Ok(solution)
    }

    async fn fetch_order_line_items(&self, order_id: &OrderId) -> Result<Vec<OrderLineItem>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let items = orders::fetch_line_items(order_id, &mut conn).await?;
        Ok(items)
    }

    async fn completed_transaction_exists(&self, order_id: &OrderId) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let exists = transactions::completed_exists(order_id, &mut conn).await?;
        Ok(exists)
    }

    async fn count_failed_transactions(&self, order_id: &OrderId) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let count = transactions::count_failed(order_id, &mut conn).await?;
        Ok(count)
    }

    async fn count_in_flight_transactions(&self, order_id: &OrderId) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let count = transactions::count_in_flight(order_id, &mut conn).await?;
        Ok(count)
    }

    async fn count_active_transactions_since(
        &self,
        user_id: &str,
        ip_address: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let count = transactions::count_active_since(user_id, ip_address, since, &mut conn).await?;
        Ok(count)
    }

    async fn fetch_revenue_shares(&self, order_id: &OrderId) -> Result<Vec<RevenueShare>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let shares = revenue::fetch_shares(order_id, &mut conn).await?;
        Ok(shares)
    }
}

impl AuditLog for SqliteDatabase {
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        audit::insert_entry(entry, Utc::now(), &mut conn).await?;
        Ok(())
    }

    async fn fetch_audit_log_for_order(&self, order_id: &OrderId) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entries = audit::fetch_for_order(order_id, &mut conn).await?;
        Ok(entries)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies any outstanding schema migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Adds a solution to the catalogue. Catalogue management belongs to the order service; this is the hook it (and
    /// test set-ups) use to populate the shared table.
    pub async fn upsert_solution(&self, solution: &Solution) -> Result<(), LedgerError> {
        let mut conn = self.pool.acquire().await?;
        orders::upsert_solution(solution, &mut conn).await?;
        Ok(())
    }

    /// Stores an order handed over by the order service, along with its line items, in `PENDING` status.
    pub async fn insert_order(&self, order: NewOrder) -> Result<Order, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Cancels an order on behalf of the order service.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::update_status(order_id, OrderStatusType::Cancelled, Utc::now(), &mut conn)
            .await?
            .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;
        info!("🗃️ Order {order_id} cancelled");
        Ok(order)
    }
}
