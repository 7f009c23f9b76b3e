use crate::errors;
use crate::handlers;
use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index).post(handlers::dashboard_action))
        .route("/session", post(handlers::sign_in))
        .route(
            "/api/session",
            get(handlers::get_session).post(handlers::create_session),
        )
        .route("/api/dashboard", get(handlers::get_dashboard))
        .route(
            "/api/habits",
            get(handlers::list_habits).post(handlers::create_habit),
        )
        .route("/api/habits/reorder", post(handlers::reorder_habits))
        .route(
            "/api/habits/:id",
            put(handlers::update_habit).delete(handlers::delete_habit),
        )
        .route("/api/habits/:id/complete", post(handlers::complete_habit))
        .route("/api/tracking/:id", delete(handlers::delete_tracking))
        .route("/api/history", get(handlers::history))
        .layer(middleware::map_response_with_state(
            state.clone(),
            errors::reveal_internal_detail,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
