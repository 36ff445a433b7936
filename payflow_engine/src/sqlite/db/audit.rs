use chrono::{DateTime, Utc};
use log::info;
use sqlx::SqliteConnection;

use crate::db_types::{AuditEntry, NewAuditEntry, OrderId};

pub async fn insert_entry(
    entry: NewAuditEntry,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    info!(target: "payflow::audit", "{entry}");
    sqlx::query(
        r#"
        INSERT INTO audit_log (event_type, user_id, ip_address, order_id, transaction_id, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(entry.event_type)
    .bind(entry.user_id)
    .bind(entry.ip_address)
    .bind(entry.order_id)
    .bind(entry.transaction_id)
    .bind(entry.reason)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_for_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM audit_log WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}
