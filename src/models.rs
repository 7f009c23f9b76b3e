use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Habit {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    /// `None` sorts after every positioned habit.
    pub sort_order: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHabit {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub frequency: Frequency,
}

/// Partial update; `None` leaves the column untouched. An empty description clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HabitChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub frequency: Option<Frequency>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrackingEntry {
    pub id: i64,
    pub habit_id: i64,
    pub track_date: NaiveDate,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub habit_id: i64,
    pub entries: Vec<TrackingEntry>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HabitSummary {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub frequency: Frequency,
    pub done_today: bool,
    pub next_available: NaiveDate,
    pub current_streak: u32,
    pub longest_streak: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChartPoint {
    pub date: NaiveDate,
    pub label: String,
    pub value: u8,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Dashboard {
    pub date: Option<NaiveDate>,
    pub total: u32,
    pub completed: u32,
    pub missed: u32,
    pub efficiency: u8,
    pub habits: Vec<HabitSummary>,
    pub chart: Vec<ChartPoint>,
    pub forecast: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub user_id: i64,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct ReorderResponse {
    pub ok: bool,
    pub order: Vec<i64>,
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateHabitRequest {
    #[serde(flatten)]
    pub habit: NewHabit,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateHabitRequest {
    #[serde(flatten)]
    pub changes: HabitChanges,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    pub date: Option<NaiveDate>,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub ok: bool,
    pub habit_id: i64,
    pub date: NaiveDate,
    pub changed: bool,
}

/// Dashboard form post. Every field is optional on the wire; each action
/// checks for the fields it needs.
#[derive(Debug, Default, Deserialize)]
pub struct DashboardForm {
    #[serde(default)]
    pub action: String,
    pub habit_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub frequency: Option<String>,
    pub csrf_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub export: Option<String>,
}
