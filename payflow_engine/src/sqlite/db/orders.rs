use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqliteConnection;

use crate::db_types::{NewOrder, Order, OrderId, OrderLineItem, OrderStatusType, Solution};

/// Inserts a solution into the catalogue table, replacing an existing entry with the same id.
pub async fn upsert_solution(solution: &Solution, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO solutions (id, creator_id, title, price) VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO UPDATE SET creator_id = excluded.creator_id, title = excluded.title, price = excluded.price
        "#,
    )
    .bind(&solution.id)
    .bind(&solution.creator_id)
    .bind(&solution.title)
    .bind(solution.price)
    .execute(conn)
    .await?;
    Ok(())
}

/// Inserts a new order and its line items. This is not atomic. You can embed this call inside a transaction if you
/// need to ensure atomicity, and pass `&mut *tx` as the connection argument.
pub async fn insert_order(
    order: NewOrder,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, sqlx::Error> {
    let total = order.total();
    let inserted: Order = sqlx::query_as(
        r#"
        INSERT INTO orders (id, user_id, status, total, currency, created_at, updated_at)
        VALUES ($1, $2, 'PENDING', $3, $4, $5, $5)
        RETURNING *;
        "#,
    )
    .bind(&order.id)
    .bind(&order.user_id)
    .bind(total)
    .bind(&order.currency)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    for item in order.items {
        sqlx::query("INSERT INTO order_solutions (order_id, solution_id, price) VALUES ($1, $2, $3)")
            .bind(&inserted.id)
            .bind(&item.solution_id)
            .bind(item.price)
            .execute(&mut *conn)
            .await?;
    }
    debug!("🗃️ Order {} inserted for user {} with total {total}", inserted.id, inserted.user_id);
    Ok(inserted)
}

pub async fn fetch_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_solution(solution_id: &str, conn: &mut SqliteConnection) -> Result<Option<Solution>, sqlx::Error> {
    let solution = sqlx::query_as("SELECT id, creator_id, title, price FROM solutions WHERE id = $1")
        .bind(solution_id)
        .fetch_optional(conn)
        .await?;
    Ok(solution)
}

pub async fn fetch_line_items(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderLineItem>, sqlx::Error> {
    let items = sqlx::query_as(
        r#"
        SELECT order_solutions.order_id, order_solutions.solution_id, solutions.creator_id, order_solutions.price
        FROM order_solutions
        JOIN solutions ON solutions.id = order_solutions.solution_id
        WHERE order_solutions.order_id = $1
        ORDER BY order_solutions.id
        "#,
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    Ok(items)
}

pub async fn update_status(
    order_id: &OrderId,
    status: OrderStatusType,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *")
        .bind(status)
        .bind(now)
        .bind(order_id)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}
