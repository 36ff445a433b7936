use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::db_types::{NewPaymentTransaction, OrderId, PaymentTransaction, TransactionId, TransactionStatus};

const SELECT_TRANSACTIONS: &str = r#"
    SELECT payment_transactions.*, retry_lineage.retry_of_id, retry_lineage.attempt_number
    FROM payment_transactions
    LEFT JOIN retry_lineage ON retry_lineage.transaction_id = payment_transactions.id
"#;

/// Inserts a new `PENDING` transaction, along with its retry lineage if it has one. This is not atomic. Embed the
/// call inside a transaction and pass `&mut *tx` as the connection argument.
pub async fn insert_transaction(
    tx: NewPaymentTransaction,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TransactionId, sqlx::Error> {
    let id = TransactionId::random();
    let provider = tx.payment_method.provider();
    sqlx::query(
        r#"
            INSERT INTO payment_transactions (
                id,
                order_id,
                solution_id,
                amount,
                currency,
                payment_method,
                payment_provider,
                status,
                client_ip,
                user_agent,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'PENDING', $8, $9, $10, $10);
        "#,
    )
    .bind(&id)
    .bind(&tx.order_id)
    .bind(&tx.solution_id)
    .bind(tx.amount)
    .bind(&tx.currency)
    .bind(tx.payment_method)
    .bind(provider)
    .bind(&tx.request_context.ip)
    .bind(&tx.request_context.user_agent)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    trace!("🗃️ Transaction {id} inserted for order {}", tx.order_id);
    if let Some((retry_of_id, attempt_number)) = tx.retry_of {
        sqlx::query("INSERT INTO retry_lineage (transaction_id, retry_of_id, attempt_number) VALUES ($1, $2, $3)")
            .bind(&id)
            .bind(&retry_of_id)
            .bind(attempt_number)
            .execute(&mut *conn)
            .await?;
        debug!("🗃️ Transaction {id} is attempt #{attempt_number}, retrying {retry_of_id}");
    }
    Ok(id)
}

pub async fn fetch_transaction(
    id: &TransactionId,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    let q = format!("{SELECT_TRANSACTIONS} WHERE payment_transactions.id = $1");
    let tx = sqlx::query_as(&q).bind(id).fetch_optional(conn).await?;
    Ok(tx)
}

pub async fn fetch_by_external_id(
    external_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentTransaction>, sqlx::Error> {
    let q = format!("{SELECT_TRANSACTIONS} WHERE payment_transactions.external_id = $1");
    let tx = sqlx::query_as(&q).bind(external_id).fetch_optional(conn).await?;
    Ok(tx)
}

pub async fn fetch_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentTransaction>, sqlx::Error> {
    let q = format!(
        "{SELECT_TRANSACTIONS} WHERE payment_transactions.order_id = $1 ORDER BY payment_transactions.created_at, \
         payment_transactions.rowid"
    );
    let txs = sqlx::query_as(&q).bind(order_id).fetch_all(conn).await?;
    Ok(txs)
}

/// `PROCESSING` transactions with an external id, oldest first.
pub async fn fetch_reconcilable(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<PaymentTransaction>, sqlx::Error> {
    let q = format!(
        "{SELECT_TRANSACTIONS} WHERE payment_transactions.status = 'PROCESSING' AND payment_transactions.external_id \
         IS NOT NULL ORDER BY payment_transactions.created_at, payment_transactions.rowid LIMIT $1"
    );
    let txs = sqlx::query_as(&q).bind(limit).fetch_all(conn).await?;
    Ok(txs)
}

/// `PENDING` → `PROCESSING`. Returns the number of rows changed (0 or 1).
pub async fn set_processing(
    id: &TransactionId,
    external_id: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE payment_transactions SET status = 'PROCESSING', external_id = $1, updated_at = $2
        WHERE id = $3 AND status = 'PENDING'
        "#,
    )
    .bind(external_id)
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// `PENDING` → `CANCELLED`. Returns the number of rows changed (0 or 1).
pub async fn abandon(
    id: &TransactionId,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE payment_transactions SET status = 'CANCELLED', failure_reason = $1, updated_at = $2
        WHERE id = $3 AND status = 'PENDING'
        "#,
    )
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// The conditional `PROCESSING` → terminal update. Returns the number of rows changed (0 or 1).
///
/// Moving a transaction to `COMPLETED` while another transaction of the same order is already `COMPLETED` violates
/// a unique index and returns a database error.
#[allow(clippy::too_many_arguments)]
pub async fn resolve(
    id: &TransactionId,
    target: TransactionStatus,
    external_status: &str,
    failure_reason: Option<&str>,
    paid_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE payment_transactions SET
            status = $1,
            paid_at = $2,
            external_status = $3,
            failure_reason = $4,
            updated_at = $5
        WHERE id = $6 AND status = 'PROCESSING'
        "#,
    )
    .bind(target)
    .bind(paid_at)
    .bind(external_status)
    .bind(failure_reason)
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn completed_exists(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payment_transactions WHERE order_id = $1 AND status = 'COMPLETED'")
            .bind(order_id)
            .fetch_one(conn)
            .await?;
    Ok(count > 0)
}

pub async fn count_failed(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count =
        sqlx::query_scalar("SELECT COUNT(*) FROM payment_transactions WHERE order_id = $1 AND status = 'FAILED'")
            .bind(order_id)
            .fetch_one(conn)
            .await?;
    Ok(count)
}

pub async fn count_in_flight(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payment_transactions WHERE order_id = $1 AND status IN ('PENDING', 'PROCESSING')",
    )
    .bind(order_id)
    .fetch_one(conn)
    .await?;
    Ok(count)
}

pub async fn count_active_since(
    user_id: &str,
    ip_address: &str,
    since: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, sqlx::Error> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM payment_transactions
        JOIN orders ON orders.id = payment_transactions.order_id
        WHERE payment_transactions.status IN ('PENDING', 'PROCESSING')
          AND payment_transactions.created_at >= $1
          AND orders.user_id = $2
          AND payment_transactions.client_ip = $3
        "#,
    )
    .bind(since)
    .bind(user_id)
    .bind(ip_address)
    .fetch_one(conn)
    .await?;
    Ok(count)
}
