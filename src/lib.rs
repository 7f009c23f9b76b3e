pub mod app;
pub mod config;
pub mod db;
pub mod errors;
pub mod habits;
pub mod handlers;
pub mod models;
pub mod reorder;
pub mod session;
pub mod state;
pub mod stats;
pub mod tracking;
pub mod ui;

pub use app::router;
pub use config::Config;
pub use state::AppState;
