//! Habit store: CRUD over the `habits` table, always scoped to the owning user.

use crate::db::{StoreError, now_timestamp};
use crate::models::{Frequency, Habit, HabitChanges, NewHabit};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

const MAX_TITLE_CHARS: usize = 255;
const MAX_DESCRIPTION_CHARS: usize = 2000;

/// Canonical order: positioned habits first by position, unpositioned last, ties by id.
const CANONICAL_ORDER: &str = "sort_order IS NULL, sort_order ASC, id ASC";

const HABIT_COLUMNS: &str =
    "id, user_id, title, description, frequency, sort_order, created_at, updated_at";

fn habit_from_row(row: &Row<'_>) -> rusqlite::Result<Habit> {
    let frequency: String = row.get(4)?;
    Ok(Habit {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        frequency: Frequency::parse(&frequency).unwrap_or_default(),
        sort_order: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub fn list(conn: &Connection, user_id: i64) -> Result<Vec<Habit>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HABIT_COLUMNS} FROM habits WHERE user_id = ?1 ORDER BY {CANONICAL_ORDER}"
    ))?;
    let habits = stmt
        .query_map([user_id], habit_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(habits)
}

/// Owned habit ids in canonical order.
pub fn owned_ids(conn: &Connection, user_id: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM habits WHERE user_id = ?1 ORDER BY {CANONICAL_ORDER}"
    ))?;
    let ids = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Fetches a habit only if `user_id` owns it. Foreign and missing habits look the same.
pub fn find(conn: &Connection, user_id: i64, habit_id: i64) -> Result<Habit, StoreError> {
    conn.query_row(
        &format!("SELECT {HABIT_COLUMNS} FROM habits WHERE id = ?1 AND user_id = ?2"),
        params![habit_id, user_id],
        habit_from_row,
    )
    .optional()?
    .ok_or(StoreError::NotFound { entity: "habit" })
}

pub fn ensure_owned(conn: &Connection, user_id: i64, habit_id: i64) -> Result<(), StoreError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM habits WHERE id = ?1 AND user_id = ?2",
            params![habit_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    exists.ok_or(StoreError::NotFound { entity: "habit" })
}

pub fn create(conn: &Connection, user_id: i64, input: &NewHabit) -> Result<Habit, StoreError> {
    let title = validate_title(&input.title)?;
    let description = validate_description(input.description.as_deref())?;
    let now = now_timestamp();

    conn.execute(
        "INSERT INTO habits (user_id, title, description, frequency, sort_order, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4,
                 (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM habits WHERE user_id = ?1),
                 ?5, ?5)",
        params![user_id, title, description, input.frequency.as_str(), now],
    )?;

    find(conn, user_id, conn.last_insert_rowid())
}

pub fn update(
    conn: &Connection,
    user_id: i64,
    habit_id: i64,
    changes: &HabitChanges,
) -> Result<Habit, StoreError> {
    let current = find(conn, user_id, habit_id)?;

    let title = match &changes.title {
        Some(title) => validate_title(title)?,
        None => current.title,
    };
    let description = match &changes.description {
        Some(description) => validate_description(Some(description.as_str()))?,
        None => current.description,
    };
    let frequency = changes.frequency.unwrap_or(current.frequency);

    conn.execute(
        "UPDATE habits SET title = ?1, description = ?2, frequency = ?3, updated_at = ?4
         WHERE id = ?5 AND user_id = ?6",
        params![
            title,
            description,
            frequency.as_str(),
            now_timestamp(),
            habit_id,
            user_id
        ],
    )?;

    find(conn, user_id, habit_id)
}

/// Deletes the habit and its tracking history together.
pub fn delete(conn: &mut Connection, user_id: i64, habit_id: i64) -> Result<(), StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    ensure_owned(&tx, user_id, habit_id)?;
    tx.execute(
        "DELETE FROM habit_tracking WHERE habit_id = ?1",
        [habit_id],
    )?;
    tx.execute(
        "DELETE FROM habits WHERE id = ?1 AND user_id = ?2",
        params![habit_id, user_id],
    )?;
    tx.commit()?;
    Ok(())
}

fn validate_title(title: &str) -> Result<String, StoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::invalid("title", "must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(StoreError::invalid(
            "title",
            format!("cannot exceed {MAX_TITLE_CHARS} characters"),
        ));
    }
    Ok(title.to_string())
}

fn validate_description(description: Option<&str>) -> Result<Option<String>, StoreError> {
    let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(StoreError::invalid(
            "description",
            format!("cannot exceed {MAX_DESCRIPTION_CHARS} characters"),
        ));
    }
    Ok(Some(description.to_string()))
}
