use chrono::NaiveDate;
use std::{env, path::PathBuf};
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "data/habits.db";

/// Process-wide settings, resolved once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    /// Append storage error detail to 500 responses.
    pub debug: bool,
    /// Pins "today" so runs are deterministic.
    pub fixed_today: Option<NaiveDate>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = match lookup("PORT") {
            Some(value) => value.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!("ignoring invalid PORT {value:?}");
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let db_path = lookup("APP_DB_PATH")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let debug = lookup("APP_DEBUG")
            .map(|value| parse_flag(&value))
            .unwrap_or(false);

        let fixed_today = lookup("APP_TODAY").and_then(|value| {
            match NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(err) => {
                    warn!("ignoring invalid APP_TODAY {value:?}: {err}");
                    None
                }
            }
        });

        Self {
            port,
            db_path,
            debug,
            fixed_today,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, PathBuf::from("data/habits.db"));
        assert!(!config.debug);
        assert!(config.fixed_today.is_none());
    }

    #[test]
    fn reads_every_variable() {
        let config = config_from(&[
            ("PORT", "9001"),
            ("APP_DB_PATH", "/tmp/x.db"),
            ("APP_DEBUG", "TRUE"),
            ("APP_TODAY", "2026-03-04"),
        ]);
        assert_eq!(config.port, 9001);
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert!(config.debug);
        assert_eq!(config.fixed_today, NaiveDate::from_ymd_opt(2026, 3, 4));
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = config_from(&[("PORT", "eighty"), ("APP_TODAY", "tomorrow")]);
        assert_eq!(config.port, 8080);
        assert!(config.fixed_today.is_none());
    }
}
