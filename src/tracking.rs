//! Tracking ledger: one row per (habit, date) in `habit_tracking`.

use crate::db::{StoreError, now_timestamp};
use crate::habits;
use crate::models::{HistoryPage, TrackingEntry};
use chrono::NaiveDate;
use rusqlite::{Connection, Row, ToSql, params};
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

pub const CSV_HEADER: &str = "id,track_date,completed,created_at,updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Inserted,
    Updated,
    Unchanged,
}

impl Recorded {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Marks the habit done on `date`. Re-marking a completed day is a no-op.
pub fn mark_complete(
    conn: &Connection,
    user_id: i64,
    habit_id: i64,
    date: NaiveDate,
) -> Result<Recorded, StoreError> {
    habits::ensure_owned(conn, user_id, habit_id)?;

    let existing = completion_flag(conn, habit_id, date)?;
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO habit_tracking (habit_id, track_date, completed, created_at, updated_at)
         VALUES (?1, ?2, 1, ?3, ?3)
         ON CONFLICT(habit_id, track_date) DO UPDATE
            SET completed = 1, updated_at = excluded.updated_at
            WHERE completed = 0",
        params![habit_id, date, now],
    )?;

    Ok(match existing {
        None => Recorded::Inserted,
        Some(false) => Recorded::Updated,
        Some(true) => Recorded::Unchanged,
    })
}

/// Flips a completed day back to not completed. Days never tracked stay untracked.
pub fn mark_incomplete(
    conn: &Connection,
    user_id: i64,
    habit_id: i64,
    date: NaiveDate,
) -> Result<Recorded, StoreError> {
    habits::ensure_owned(conn, user_id, habit_id)?;

    let changed = conn.execute(
        "UPDATE habit_tracking SET completed = 0, updated_at = ?1
         WHERE habit_id = ?2 AND track_date = ?3 AND completed = 1",
        params![now_timestamp(), habit_id, date],
    )?;

    Ok(if changed > 0 {
        Recorded::Updated
    } else {
        Recorded::Unchanged
    })
}

pub fn delete_entry(conn: &Connection, user_id: i64, entry_id: i64) -> Result<(), StoreError> {
    let deleted = conn.execute(
        "DELETE FROM habit_tracking
         WHERE id = ?1
           AND habit_id IN (SELECT id FROM habits WHERE user_id = ?2)",
        params![entry_id, user_id],
    )?;
    if deleted == 0 {
        return Err(StoreError::NotFound {
            entity: "tracking entry",
        });
    }
    Ok(())
}

fn completion_flag(
    conn: &Connection,
    habit_id: i64,
    date: NaiveDate,
) -> Result<Option<bool>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT completed FROM habit_tracking WHERE habit_id = ?1 AND track_date = ?2",
    )?;
    let mut rows = stmt.query(params![habit_id, date])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get::<_, i64>(0)? != 0)),
        None => Ok(None),
    }
}

/// Inclusive date window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Self, StoreError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(StoreError::invalid("from", "must not be after 'to'"));
            }
        }
        Ok(Self { from, to })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub per_page: u32,
}

impl Paging {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::new(None, None)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<TrackingEntry> {
    Ok(TrackingEntry {
        id: row.get(0)?,
        habit_id: row.get(1)?,
        track_date: row.get(2)?,
        completed: row.get::<_, i64>(3)? != 0,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn range_filter(habit_id: i64, range: &DateRange) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clause = String::from("habit_id = ?");
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(habit_id)];
    if let Some(from) = range.from {
        clause.push_str(" AND track_date >= ?");
        values.push(Box::new(from));
    }
    if let Some(to) = range.to {
        clause.push_str(" AND track_date <= ?");
        values.push(Box::new(to));
    }
    (clause, values)
}

/// One page of a habit's history, newest first, plus the total match count.
pub fn history(
    conn: &Connection,
    user_id: i64,
    habit_id: i64,
    range: &DateRange,
    paging: Paging,
) -> Result<HistoryPage, StoreError> {
    habits::ensure_owned(conn, user_id, habit_id)?;

    let (clause, mut values) = range_filter(habit_id, range);

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM habit_tracking WHERE {clause}"),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    values.push(Box::new(i64::from(paging.per_page)));
    values.push(Box::new(paging.offset() as i64));
    let mut stmt = conn.prepare(&format!(
        "SELECT id, habit_id, track_date, completed, created_at, updated_at
         FROM habit_tracking WHERE {clause}
         ORDER BY track_date DESC LIMIT ? OFFSET ?"
    ))?;
    let entries = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(HistoryPage {
        habit_id,
        entries,
        total: total.max(0) as u64,
        page: paging.page,
        per_page: paging.per_page,
    })
}

/// Full history as CSV, newest first, with a header row.
pub fn export_csv(
    conn: &Connection,
    user_id: i64,
    habit_id: i64,
    range: &DateRange,
) -> Result<String, StoreError> {
    habits::ensure_owned(conn, user_id, habit_id)?;

    let (clause, values) = range_filter(habit_id, range);
    let mut stmt = conn.prepare(&format!(
        "SELECT id, habit_id, track_date, completed, created_at, updated_at
         FROM habit_tracking WHERE {clause}
         ORDER BY track_date DESC"
    ))?;
    let mut rows = stmt.query(rusqlite::params_from_iter(values.iter()))?;

    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    while let Some(row) = rows.next()? {
        let entry = entry_from_row(row)?;
        let fields = [
            entry.id.to_string(),
            entry.track_date.to_string(),
            if entry.completed { "1" } else { "0" }.to_string(),
            entry.created_at,
            entry.updated_at,
        ];
        let line = fields
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Quotes a field when it holds a delimiter, quote, or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Completed dates per habit for every habit the user owns, ascending.
pub fn completed_dates(
    conn: &Connection,
    user_id: i64,
) -> Result<HashMap<i64, Vec<NaiveDate>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.habit_id, t.track_date
         FROM habit_tracking t
         JOIN habits h ON h.id = t.habit_id
         WHERE h.user_id = ?1 AND t.completed = 1
         ORDER BY t.habit_id, t.track_date ASC",
    )?;
    let mut dates: HashMap<i64, Vec<NaiveDate>> = HashMap::new();
    let rows = stmt.query_map([user_id], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, NaiveDate>(1)?))
    })?;
    for row in rows {
        let (habit_id, date) = row?;
        dates.entry(habit_id).or_default().push(date);
    }
    Ok(dates)
}

/// Number of habits completed on each day in `[start, end]`; days with none are absent.
pub fn completions_per_day(
    conn: &Connection,
    user_id: i64,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<HashMap<NaiveDate, u32>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.track_date, COUNT(*)
         FROM habit_tracking t
         JOIN habits h ON h.id = t.habit_id
         WHERE h.user_id = ?1 AND t.completed = 1
           AND t.track_date >= ?2 AND t.track_date <= ?3
         GROUP BY t.track_date",
    )?;
    let counts = stmt
        .query_map(params![user_id, start, end], |row| {
            Ok((row.get::<_, NaiveDate>(0)?, row.get::<_, u32>(1)?))
        })?
        .collect::<rusqlite::Result<HashMap<_, _>>>()?;
    Ok(counts)
}
