use crate::db::{StoreError, now_timestamp};
use crate::errors::AppError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::warn;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "sid";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Who is asking, resolved from the session cookie. Handlers take this
/// instead of reading session state on their own.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: String,
    pub user_id: i64,
    pub csrf_token: String,
    header_token: Option<String>,
}

impl RequestContext {
    /// Checks the submitted token (body field first, then the header) against the session secret.
    pub fn verify_csrf(&self, submitted: Option<&str>) -> Result<(), AppError> {
        let candidate = submitted
            .filter(|token| !token.is_empty())
            .or(self.header_token.as_deref());
        match candidate {
            Some(token) if tokens_match(token, &self.csrf_token) => Ok(()),
            _ => {
                warn!(user_id = self.user_id, "csrf token mismatch");
                Err(AppError::forbidden("invalid csrf token"))
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session_id = session_cookie(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("no session"))?;

        let lookup = session_id.clone();
        let (user_id, csrf_token) = state
            .with_db(move |conn| Ok(load(conn, &lookup)?))
            .await?
            .ok_or_else(|| AppError::unauthorized("session expired"))?;

        let header_token = parts
            .headers
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            session_id,
            user_id,
            csrf_token,
            header_token,
        })
    }
}

fn tokens_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn session_set_cookie(session_id: &str) -> String {
    format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax")
}

pub fn find_or_create_user(conn: &Connection, username: &str) -> Result<i64, StoreError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(StoreError::invalid("username", "must not be empty"));
    }
    if username.chars().count() > 64 {
        return Err(StoreError::invalid("username", "cannot exceed 64 characters"));
    }

    conn.execute(
        "INSERT INTO users (username, created_at) VALUES (?1, ?2)
         ON CONFLICT(username) DO NOTHING",
        params![username, now_timestamp()],
    )?;
    let id = conn.query_row(
        "SELECT id FROM users WHERE username = ?1",
        [username],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Opens a session for the user. Returns `(session_id, csrf_token)`.
pub fn create(conn: &Connection, user_id: i64) -> Result<(String, String), StoreError> {
    let session_id = Uuid::new_v4().simple().to_string();
    let csrf_token = Uuid::new_v4().simple().to_string();
    conn.execute(
        "INSERT INTO sessions (id, user_id, csrf_token, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![session_id, user_id, csrf_token, now_timestamp()],
    )?;
    Ok((session_id, csrf_token))
}

pub fn load(conn: &Connection, session_id: &str) -> Result<Option<(i64, String)>, StoreError> {
    let row = conn
        .query_row(
            "SELECT user_id, csrf_token FROM sessions WHERE id = ?1",
            [session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Ok,
    Error,
}

impl FlashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

pub fn set_flash(
    conn: &Connection,
    session_id: &str,
    kind: FlashKind,
    message: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE sessions SET flash_kind = ?1, flash_message = ?2 WHERE id = ?3",
        params![kind.as_str(), message, session_id],
    )?;
    Ok(())
}

/// Reads and clears the pending flash message, if any.
pub fn take_flash(conn: &Connection, session_id: &str) -> Result<Option<Flash>, StoreError> {
    let row: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT flash_kind, flash_message FROM sessions WHERE id = ?1",
            [session_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((Some(kind), Some(message))) = row else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE sessions SET flash_kind = NULL, flash_message = NULL WHERE id = ?1",
        [session_id],
    )?;

    let kind = if kind == "ok" { FlashKind::Ok } else { FlashKind::Error };
    Ok(Some(Flash { kind, message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use axum::http::HeaderValue;

    fn context(token: &str, header_token: Option<&str>) -> RequestContext {
        RequestContext {
            session_id: "s".into(),
            user_id: 1,
            csrf_token: token.into(),
            header_token: header_token.map(str::to_string),
        }
    }

    #[test]
    fn users_are_created_once() {
        let conn = open_in_memory().unwrap();
        let first = find_or_create_user(&conn, "ada").unwrap();
        let again = find_or_create_user(&conn, " ada ").unwrap();
        let other = find_or_create_user(&conn, "grace").unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(find_or_create_user(&conn, "  ").is_err());
    }

    #[test]
    fn sessions_round_trip() {
        let conn = open_in_memory().unwrap();
        let user = find_or_create_user(&conn, "ada").unwrap();
        let (sid, csrf) = create(&conn, user).unwrap();

        assert_eq!(load(&conn, &sid).unwrap(), Some((user, csrf)));
        assert_eq!(load(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn flash_is_consumed_once() {
        let conn = open_in_memory().unwrap();
        let user = find_or_create_user(&conn, "ada").unwrap();
        let (sid, _) = create(&conn, user).unwrap();

        set_flash(&conn, &sid, FlashKind::Ok, "Saved").unwrap();
        let flash = take_flash(&conn, &sid).unwrap().unwrap();
        assert_eq!(flash.kind, FlashKind::Ok);
        assert_eq!(flash.message, "Saved");
        assert_eq!(take_flash(&conn, &sid).unwrap(), None);
    }

    #[test]
    fn csrf_accepts_body_or_header_token() {
        assert!(context("abc", None).verify_csrf(Some("abc")).is_ok());
        assert!(context("abc", Some("abc")).verify_csrf(None).is_ok());
        assert!(context("abc", Some("abc")).verify_csrf(Some("")).is_ok());
        assert!(context("abc", None).verify_csrf(Some("abd")).is_err());
        assert!(context("abc", None).verify_csrf(Some("ab")).is_err());
        assert!(context("abc", None).verify_csrf(None).is_err());
    }

    #[test]
    fn reads_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; sid=abc123; lang=en"),
        );
        assert_eq!(session_cookie(&headers).as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sidx=1"));
        assert_eq!(session_cookie(&headers), None);
    }
}
