use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::db_types::{NewRevenueShare, OrderId, RevenueShare};

pub async fn shares_exist(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revenue_shares WHERE order_id = $1")
        .bind(order_id)
        .fetch_one(conn)
        .await?;
    Ok(count > 0)
}

/// Inserts the revenue shares. A second share for the same order and solution violates the `(order_id, solution_id)`
/// unique index and fails the whole call.
pub async fn insert_shares(
    shares: &[NewRevenueShare],
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    for share in shares {
        sqlx::query(
            r#"
            INSERT INTO revenue_shares (
                order_id,
                solution_id,
                creator_id,
                total_amount,
                platform_fee,
                creator_revenue,
                status,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7)
            "#,
        )
        .bind(&share.order_id)
        .bind(&share.solution_id)
        .bind(&share.creator_id)
        .bind(share.total_amount)
        .bind(share.platform_fee)
        .bind(share.creator_revenue)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        debug!(
            "💸 Revenue share for {} on order {}: {} to creator {}, {} platform fee",
            share.solution_id, share.order_id, share.creator_revenue, share.creator_id, share.platform_fee
        );
    }
    Ok(())
}

pub async fn fetch_shares(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<RevenueShare>, sqlx::Error> {
    let shares = sqlx::query_as("SELECT * FROM revenue_shares WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(shares)
}
