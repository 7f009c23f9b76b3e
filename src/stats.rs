use crate::db::StoreError;
use crate::habits;
use crate::models::{ChartPoint, Dashboard, Frequency, HabitSummary};
use crate::tracking;
use chrono::{Duration, Months, NaiveDate};
use rusqlite::Connection;
use std::collections::HashSet;
use tracing::error;

const CHART_DAYS: i64 = 7;

/// Dashboard for `today`. A failing query yields the empty dashboard rather
/// than a mix of fresh and missing counters.
pub fn build_dashboard(conn: &Connection, user_id: i64, today: NaiveDate) -> Dashboard {
    match build_dashboard_at(conn, user_id, today) {
        Ok(dashboard) => dashboard,
        Err(err) => {
            error!(user_id, "failed to aggregate dashboard: {err}");
            Dashboard::default()
        }
    }
}

pub fn build_dashboard_at(
    conn: &Connection,
    user_id: i64,
    today: NaiveDate,
) -> Result<Dashboard, StoreError> {
    // One read transaction so every counter comes from the same snapshot.
    let tx = conn.unchecked_transaction()?;
    let habits = habits::list(&tx, user_id)?;
    let mut completed_dates = tracking::completed_dates(&tx, user_id)?;
    let window_start = today - Duration::days(CHART_DAYS - 1);
    let per_day = tracking::completions_per_day(&tx, user_id, window_start, today)?;
    tx.commit()?;

    let total = habits.len() as u32;
    let mut summaries = Vec::with_capacity(habits.len());
    for habit in habits {
        let dates: Vec<NaiveDate> = completed_dates
            .remove(&habit.id)
            .unwrap_or_default()
            .into_iter()
            .filter(|date| *date <= today)
            .collect();
        let last = dates.last().copied();

        summaries.push(HabitSummary {
            done_today: last == Some(today),
            next_available: next_available(habit.frequency, last, today),
            current_streak: current_streak(&dates, today),
            longest_streak: longest_streak(&dates),
            id: habit.id,
            title: habit.title,
            description: habit.description,
            frequency: habit.frequency,
        });
    }

    let completed = summaries.iter().filter(|h| h.done_today).count() as u32;

    let chart = if total == 0 {
        Vec::new()
    } else {
        (0..CHART_DAYS)
            .rev()
            .map(|offset| {
                let date = today - Duration::days(offset);
                let done = per_day.get(&date).copied().unwrap_or(0);
                ChartPoint {
                    date,
                    label: date.format("%m-%d").to_string(),
                    value: efficiency(done, total),
                }
            })
            .collect()
    };
    let values: Vec<u8> = chart.iter().map(|point| point.value).collect();

    Ok(Dashboard {
        date: Some(today),
        total,
        completed,
        missed: total.saturating_sub(completed),
        efficiency: efficiency(completed, total),
        habits: summaries,
        forecast: forecast(&values),
        chart,
    })
}

/// Whole-number percentage of habits done, in `[0, 100]`.
pub fn efficiency(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (f64::from(completed) / f64::from(total) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Consecutive completed days ending today, or ending yesterday while today is still open.
/// `dates` must be ascending.
pub fn current_streak(dates: &[NaiveDate], today: NaiveDate) -> u32 {
    let done: HashSet<NaiveDate> = dates.iter().copied().collect();
    let mut cursor = if done.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while done.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

/// Longest run of consecutive completed days. `dates` must be ascending.
pub fn longest_streak(dates: &[NaiveDate]) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;
    for &date in dates {
        run = match previous {
            Some(prev) if date == prev => run,
            Some(prev) if date - prev == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(date);
    }
    longest
}

/// Earliest date the habit is due again.
pub fn next_available(
    frequency: Frequency,
    last_completed: Option<NaiveDate>,
    today: NaiveDate,
) -> NaiveDate {
    let Some(last) = last_completed else {
        return today;
    };
    let next = match frequency {
        Frequency::Daily => return today,
        Frequency::Weekly => last.checked_add_signed(Duration::days(7)),
        Frequency::Monthly => last.checked_add_months(Months::new(1)),
    };
    match next {
        Some(next) if next > today => next,
        _ => today,
    }
}

/// Next-day estimate: the series mean nudged by the mean day-over-day change.
pub fn forecast(values: &[u8]) -> Option<u8> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / values.len() as f64;
    let trend = if values.len() > 1 {
        let first = f64::from(values[0]);
        let last = f64::from(values[values.len() - 1]);
        (last - first) / (values.len() - 1) as f64
    } else {
        0.0
    };
    Some((mean + trend).round().clamp(0.0, 100.0) as u8)
}
