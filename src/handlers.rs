use crate::db::StoreError;
use crate::errors::AppError;
use crate::models::{
    CompleteRequest, CompleteResponse, CreateHabitRequest, Dashboard, DashboardForm, Frequency,
    Habit, HistoryQuery, NewHabit, ReorderResponse, SessionRequest, SessionResponse,
    UpdateHabitRequest,
};
use crate::session::{self, FlashKind, RequestContext};
use crate::state::AppState;
use crate::tracking::{self, DateRange, Paging};
use crate::ui::{render_index, render_sign_in};
use crate::{habits, reorder, stats};
use axum::{
    Form, Json,
    extract::{
        Path, Query, State,
        rejection::{FormRejection, JsonRejection},
    },
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{Value, json};
use tracing::warn;

pub async fn index(
    State(state): State<AppState>,
    ctx: Option<RequestContext>,
) -> Result<Html<String>, AppError> {
    let Some(ctx) = ctx else {
        return Ok(Html(render_sign_in()));
    };
    let today = state.today();
    let session_id = ctx.session_id.clone();
    let (flash, dashboard) = state
        .with_db(move |conn| {
            let flash = session::take_flash(conn, &session_id)?;
            Ok((flash, stats::build_dashboard(conn, ctx.user_id, today)))
        })
        .await?;
    Ok(Html(render_index(&dashboard, flash.as_ref(), &ctx.csrf_token)))
}

pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Form<SessionRequest>, FormRejection>,
) -> Result<Response, AppError> {
    let Form(request) = payload.map_err(|err| malformed("sign-in form", err))?;
    let (session_id, _, _) = open_session(&state, request.username).await?;
    Ok((
        [(header::SET_COOKIE, session::session_set_cookie(&session_id))],
        Redirect::to("/"),
    )
        .into_response())
}

pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|err| malformed("session payload", err))?;
    let (session_id, csrf_token, user_id) = open_session(&state, request.username).await?;
    Ok((
        [(header::SET_COOKIE, session::session_set_cookie(&session_id))],
        Json(SessionResponse {
            ok: true,
            user_id,
            csrf_token,
        }),
    )
        .into_response())
}

pub async fn get_session(ctx: RequestContext) -> Json<SessionResponse> {
    Json(SessionResponse {
        ok: true,
        user_id: ctx.user_id,
        csrf_token: ctx.csrf_token,
    })
}

/// Returns `(session_id, csrf_token, user_id)`.
async fn open_session(
    state: &AppState,
    username: String,
) -> Result<(String, String, i64), AppError> {
    state
        .with_db(move |conn| {
            let user_id = session::find_or_create_user(conn, &username)?;
            let (session_id, csrf_token) = session::create(conn, user_id)?;
            Ok((session_id, csrf_token, user_id))
        })
        .await
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Dashboard>, AppError> {
    let today = state.today();
    let dashboard = state
        .with_db(move |conn| Ok(stats::build_dashboard(conn, ctx.user_id, today)))
        .await?;
    Ok(Json(dashboard))
}

/// Form posts from the dashboard page. The outcome travels back as a flash message.
pub async fn dashboard_action(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Form<DashboardForm>, FormRejection>,
) -> Result<Redirect, AppError> {
    let Form(form) = payload.map_err(|err| malformed("dashboard form", err))?;
    ctx.verify_csrf(form.csrf_token.as_deref())?;

    let today = state.today();
    state
        .with_db(move |conn| {
            let (kind, message) = match apply_action(conn, &ctx, today, &form) {
                Ok(message) => (FlashKind::Ok, message),
                Err(err) => (FlashKind::Error, AppError::from(err).message),
            };
            session::set_flash(conn, &ctx.session_id, kind, &message)?;
            Ok(())
        })
        .await?;
    Ok(Redirect::to("/"))
}

fn apply_action(
    conn: &mut Connection,
    ctx: &RequestContext,
    today: NaiveDate,
    form: &DashboardForm,
) -> Result<String, StoreError> {
    match form.action.trim() {
        "complete" => {
            let habit_id = parse_id("habit_id", form.habit_id.as_deref())?;
            let recorded = tracking::mark_complete(conn, ctx.user_id, habit_id, today)?;
            Ok(if recorded.changed() {
                "Habit marked as done".to_string()
            } else {
                "Habit was already done today".to_string()
            })
        }
        "undo" => {
            let habit_id = parse_id("habit_id", form.habit_id.as_deref())?;
            tracking::mark_incomplete(conn, ctx.user_id, habit_id, today)?;
            Ok("Habit marked as not done".to_string())
        }
        "create" => {
            let frequency = match form.frequency.as_deref().map(str::trim) {
                None | Some("") => Frequency::default(),
                Some(raw) => Frequency::parse(raw)
                    .ok_or_else(|| StoreError::invalid("frequency", format!("unknown value '{raw}'")))?,
            };
            let habit = habits::create(
                conn,
                ctx.user_id,
                &NewHabit {
                    title: form.title.clone().unwrap_or_default(),
                    description: form.description.clone(),
                    frequency,
                },
            )?;
            Ok(format!("Habit '{}' created", habit.title))
        }
        "delete" => {
            let habit_id = parse_id("habit_id", form.habit_id.as_deref())?;
            habits::delete(conn, ctx.user_id, habit_id)?;
            Ok("Habit deleted".to_string())
        }
        other => Err(StoreError::invalid("action", format!("unknown action '{other}'"))),
    }
}

pub async fn list_habits(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<Habit>>, AppError> {
    let habits = state
        .with_db(move |conn| Ok(habits::list(conn, ctx.user_id)?))
        .await?;
    Ok(Json(habits))
}

pub async fn create_habit(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreateHabitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Habit>), AppError> {
    let Json(request) = payload.map_err(|err| malformed("habit payload", err))?;
    ctx.verify_csrf(request.csrf_token.as_deref())?;

    let user_id = ctx.user_id;
    let habit = state
        .with_db(move |conn| Ok(habits::create(conn, user_id, &request.habit)?))
        .await?;
    Ok((StatusCode::CREATED, Json(habit)))
}

pub async fn update_habit(
    State(state): State<AppState>,
    Path(habit_id): Path<i64>,
    ctx: RequestContext,
    payload: Result<Json<UpdateHabitRequest>, JsonRejection>,
) -> Result<Json<Habit>, AppError> {
    let Json(request) = payload.map_err(|err| malformed("habit payload", err))?;
    ctx.verify_csrf(request.csrf_token.as_deref())?;

    let user_id = ctx.user_id;
    let habit = state
        .with_db(move |conn| {
            Ok(habits::update(conn, user_id, habit_id, &request.changes)?)
        })
        .await?;
    Ok(Json(habit))
}

pub async fn delete_habit(
    State(state): State<AppState>,
    Path(habit_id): Path<i64>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.verify_csrf(None)?;

    state
        .with_db(move |conn| Ok(habits::delete(conn, ctx.user_id, habit_id)?))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn reorder_habits(
    State(state): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ReorderResponse>, AppError> {
    let Json(payload) = payload.map_err(|err| malformed("reorder payload", err))?;
    ctx.verify_csrf(payload.get("csrf_token").and_then(Value::as_str))?;

    let Some(Value::Array(order)) = payload.get("order").cloned() else {
        warn!(user_id = ctx.user_id, "reorder payload without order array");
        return Err(AppError::bad_request("order must be an array"));
    };

    let user_id = ctx.user_id;
    let outcome = state
        .with_db(move |conn| Ok(reorder::reorder(conn, user_id, &order)?))
        .await?;
    Ok(Json(ReorderResponse {
        ok: true,
        order: outcome.order,
        changed: outcome.changed,
    }))
}

pub async fn complete_habit(
    State(state): State<AppState>,
    Path(habit_id): Path<i64>,
    ctx: RequestContext,
    payload: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<CompleteResponse>, AppError> {
    let Json(request) = payload.map_err(|err| malformed("completion payload", err))?;
    ctx.verify_csrf(request.csrf_token.as_deref())?;

    let date = request.date.unwrap_or_else(|| state.today());
    let user_id = ctx.user_id;
    let recorded = state
        .with_db(move |conn| Ok(tracking::mark_complete(conn, user_id, habit_id, date)?))
        .await?;
    Ok(Json(CompleteResponse {
        ok: true,
        habit_id,
        date,
        changed: recorded.changed(),
    }))
}

pub async fn delete_tracking(
    State(state): State<AppState>,
    Path(entry_id): Path<i64>,
    ctx: RequestContext,
) -> Result<Json<Value>, AppError> {
    ctx.verify_csrf(None)?;

    state
        .with_db(move |conn| Ok(tracking::delete_entry(conn, ctx.user_id, entry_id)?))
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// JSON page of a habit's history, or the whole filtered history as CSV with `export=csv`.
pub async fn history(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, AppError> {
    let habit_id = parse_id("id", query.id.as_deref())?;
    let range = DateRange::new(
        parse_date("from", query.from.as_deref())?,
        parse_date("to", query.to.as_deref())?,
    )?;

    let user_id = ctx.user_id;
    if query.export.as_deref().map(str::trim) == Some("csv") {
        let body = state
            .with_db(move |conn| Ok(tracking::export_csv(conn, user_id, habit_id, &range)?))
            .await?;
        let disposition = format!("attachment; filename=\"habit-{habit_id}-history.csv\"");
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        )
            .into_response());
    }

    let paging = Paging::new(
        parse_count("page", query.page.as_deref())?,
        parse_count("per_page", query.per_page.as_deref())?,
    );
    let page = state
        .with_db(move |conn| Ok(tracking::history(conn, user_id, habit_id, &range, paging)?))
        .await?;
    Ok(Json(page).into_response())
}

fn malformed(what: &str, err: impl std::fmt::Display) -> AppError {
    warn!("rejected malformed {what}: {err}");
    AppError::bad_request(format!("malformed {what}"))
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_id(field: &'static str, raw: Option<&str>) -> Result<i64, StoreError> {
    let raw = non_empty(raw).ok_or_else(|| StoreError::invalid(field, "is required"))?;
    match raw.parse::<i64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(StoreError::invalid(field, "must be a positive integer")),
    }
}

fn parse_date(field: &'static str, raw: Option<&str>) -> Result<Option<NaiveDate>, StoreError> {
    non_empty(raw)
        .map(|value| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| StoreError::invalid(field, "expected YYYY-MM-DD"))
        })
        .transpose()
}

fn parse_count(field: &'static str, raw: Option<&str>) -> Result<Option<u32>, StoreError> {
    non_empty(raw)
        .map(|value| {
            value
                .parse::<u32>()
                .map_err(|_| StoreError::invalid(field, "must be a non-negative integer"))
        })
        .transpose()
}
