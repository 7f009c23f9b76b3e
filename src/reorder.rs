//! Reconciles a client-submitted habit ordering with the server's canonical one.

use crate::db::{StoreError, now_timestamp};
use crate::habits;
use rusqlite::{Connection, ToSql, TransactionBehavior};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderOutcome {
    /// Canonical order as stored after the call.
    pub order: Vec<i64>,
    pub changed: bool,
}

/// Integer value of a JSON order element, if it has one.
pub fn coerce_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Positive, de-duplicated ids in first-seen order.
pub fn sanitize(values: &[Value]) -> Vec<i64> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter_map(coerce_id)
        .filter(|id| *id > 0)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Requested ids the user owns, followed by the owned ids the request left out.
pub fn merge(requested: &[i64], canonical: &[i64]) -> Vec<i64> {
    let owned: HashSet<i64> = canonical.iter().copied().collect();
    let mut placed = HashSet::with_capacity(canonical.len());
    let mut order = Vec::with_capacity(canonical.len());

    for &id in requested {
        if owned.contains(&id) && placed.insert(id) {
            order.push(id);
        }
    }
    for &id in canonical {
        if placed.insert(id) {
            order.push(id);
        }
    }
    order
}

pub fn reorder(
    conn: &mut Connection,
    user_id: i64,
    requested: &[Value],
) -> Result<ReorderOutcome, StoreError> {
    let requested = sanitize(requested);

    // Write lock before the read, so concurrent reorders queue on the busy timeout.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let canonical = habits::owned_ids(&tx, user_id)?;
    let order = merge(&requested, &canonical);

    if order == canonical {
        debug!(user_id, "reorder unchanged");
        return Ok(ReorderOutcome {
            order: canonical,
            changed: false,
        });
    }

    write_positions(&tx, user_id, &order)?;
    tx.commit()?;
    info!(user_id, habits = order.len(), "habits reordered");

    Ok(ReorderOutcome {
        order: habits::owned_ids(conn, user_id)?,
        changed: true,
    })
}

/// Sets `sort_order` to 1..=N following `order`, in a single statement.
fn write_positions(conn: &Connection, user_id: i64, order: &[i64]) -> Result<(), StoreError> {
    if order.is_empty() {
        return Ok(());
    }

    let cases = "WHEN ? THEN ? ".repeat(order.len());
    let placeholders = vec!["?"; order.len()].join(", ");
    let sql = format!(
        "UPDATE habits SET sort_order = CASE id {cases}END, updated_at = ?
         WHERE user_id = ? AND id IN ({placeholders})"
    );

    let positions: Vec<i64> = (1..=order.len() as i64).collect();
    let now = now_timestamp();
    let mut values: Vec<&dyn ToSql> = Vec::with_capacity(order.len() * 3 + 2);
    for (id, position) in order.iter().zip(&positions) {
        values.push(id);
        values.push(position);
    }
    values.push(&now);
    values.push(&user_id);
    for id in order {
        values.push(id);
    }

    let updated = conn.execute(&sql, values.as_slice())?;
    if updated != order.len() {
        return Err(StoreError::Database(rusqlite::Error::StatementChangedRows(
            updated,
        )));
    }
    Ok(())
}
