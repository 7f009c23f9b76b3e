use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode, header, redirect};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

const TODAY: &str = "2026-01-07";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    ok: bool,
    csrf_token: String,
}

#[derive(Debug, Deserialize)]
struct Habit {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ReorderResponse {
    ok: bool,
    order: Vec<i64>,
    changed: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct Dashboard {
    total: u32,
    completed: u32,
    missed: u32,
    efficiency: u8,
    chart: Vec<Value>,
}

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Signed-in user: cookie header value plus the session's CSRF token.
struct User {
    cookie: String,
    csrf: String,
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));
static USER_SEQ: AtomicU32 = AtomicU32::new(0);

#[cfg(unix)]
mod cleanup {
    use std::sync::Once;
    use std::sync::atomic::{AtomicI32, Ordering};

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn unique_db_path() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("habit_tracker_http_{}_{}.db", std::process::id(), nanos));
    path.to_string_lossy().to_string()
}

fn client() -> Client {
    Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

async fn wait_until_ready(base_url: &str) {
    let client = client();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server() -> TestServer {
    let port = pick_free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_habit_tracker"))
        .env("PORT", port.to_string())
        .env("APP_DB_PATH", unique_db_path())
        .env("APP_TODAY", TODAY)
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server().await);
    *guard = Some(Arc::clone(&server));
    server
}

async fn sign_in(server: &TestServer) -> User {
    let name = format!("user{}", USER_SEQ.fetch_add(1, Ordering::SeqCst));
    let response = client()
        .post(format!("{}/api/session", server.base_url))
        .json(&json!({ "username": name }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .expect("session cookie")
        .to_string();
    let body: SessionResponse = response.json().await.unwrap();
    assert!(body.ok);

    User {
        cookie,
        csrf: body.csrf_token,
    }
}

async fn create_habit(server: &TestServer, user: &User, title: &str) -> i64 {
    let response = client()
        .post(format!("{}/api/habits", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .json(&json!({ "title": title, "frequency": "daily", "csrf_token": user.csrf }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let habit: Habit = response.json().await.unwrap();
    habit.id
}

async fn complete(server: &TestServer, user: &User, habit_id: i64, date: &str) -> StatusCode {
    client()
        .post(format!("{}/api/habits/{habit_id}/complete", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .json(&json!({ "date": date, "csrf_token": user.csrf }))
        .send()
        .await
        .unwrap()
        .status()
}

async fn history_total(server: &TestServer, user: &User, habit_id: i64) -> u64 {
    let page: HistoryPage = client()
        .get(format!("{}/api/history?id={habit_id}", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    page.total
}

async fn post_reorder(server: &TestServer, user: &User, body: Value) -> reqwest::Response {
    client()
        .post(format!("{}/api/habits/reorder", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .json(&body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn http_requires_a_session() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;

    let response = client()
        .get(format!("{}/api/dashboard", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ok"], json!(false));
}

#[tokio::test]
async fn http_reorder_sanitizes_and_short_circuits() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let user = sign_in(&server).await;
    let other = sign_in(&server).await;

    let a = create_habit(&server, &user, "Read").await;
    let b = create_habit(&server, &user, "Run").await;
    let c = create_habit(&server, &user, "Write").await;
    let foreign = create_habit(&server, &other, "Swim").await;

    let body = json!({ "order": [c, a, a, 0, "x", foreign], "csrf_token": user.csrf });
    let first: ReorderResponse = post_reorder(&server, &user, body.clone())
        .await
        .json()
        .await
        .unwrap();
    assert!(first.ok);
    assert!(first.changed);
    assert_eq!(first.order, vec![c, a, b]);

    let second: ReorderResponse = post_reorder(&server, &user, body).await.json().await.unwrap();
    assert!(second.ok);
    assert!(!second.changed);
    assert_eq!(second.order, vec![c, a, b]);
}

#[tokio::test]
async fn http_reorder_rejects_bad_requests_without_writing() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let user = sign_in(&server).await;
    let a = create_habit(&server, &user, "Read").await;
    let b = create_habit(&server, &user, "Run").await;

    let forged = post_reorder(&server, &user, json!({ "order": [b, a], "csrf_token": "nope" })).await;
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);

    let missing = post_reorder(&server, &user, json!({ "csrf_token": user.csrf })).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["ok"], json!(false));

    let not_array = post_reorder(&server, &user, json!({ "order": "1,2", "csrf_token": user.csrf })).await;
    assert_eq!(not_array.status(), StatusCode::BAD_REQUEST);

    let habits: Vec<Habit> = client()
        .get(format!("{}/api/habits", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<i64> = habits.iter().map(|habit| habit.id).collect();
    assert_eq!(ids, vec![a, b]);
}

#[tokio::test]
async fn http_completion_form_checks_csrf_and_is_idempotent() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let user = sign_in(&server).await;
    let habit = create_habit(&server, &user, "Read").await;
    let habit_id = habit.to_string();

    let forged = client()
        .post(format!("{}/", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .form(&[
            ("action", "complete"),
            ("habit_id", habit_id.as_str()),
            ("csrf_token", "forged"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);
    assert_eq!(history_total(&server, &user, habit).await, 0);

    for _ in 0..2 {
        let response = client()
            .post(format!("{}/", server.base_url))
            .header(header::COOKIE, &user.cookie)
            .form(&[
                ("action", "complete"),
                ("habit_id", habit_id.as_str()),
                ("csrf_token", user.csrf.as_str()),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
    }
    assert_eq!(history_total(&server, &user, habit).await, 1);

    let page = client()
        .get(format!("{}/", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("Habit was already done today"));
}

#[tokio::test]
async fn http_dashboard_reports_efficiency() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let user = sign_in(&server).await;
    let a = create_habit(&server, &user, "Read").await;
    let b = create_habit(&server, &user, "Run").await;
    create_habit(&server, &user, "Write").await;

    assert_eq!(complete(&server, &user, a, TODAY).await, StatusCode::OK);
    assert_eq!(complete(&server, &user, b, TODAY).await, StatusCode::OK);

    let dashboard: Dashboard = client()
        .get(format!("{}/api/dashboard", server.base_url))
        .header(header::COOKIE, &user.cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dashboard.total, 3);
    assert_eq!(dashboard.completed, 2);
    assert_eq!(dashboard.missed, 1);
    assert_eq!(dashboard.efficiency, 67);
    assert_eq!(dashboard.chart.len(), 7);
}

#[tokio::test]
async fn http_foreign_habit_cannot_be_completed() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let owner = sign_in(&server).await;
    let intruder = sign_in(&server).await;
    let habit = create_habit(&server, &owner, "Read").await;

    assert_eq!(complete(&server, &intruder, habit, TODAY).await, StatusCode::NOT_FOUND);
    assert_eq!(history_total(&server, &owner, habit).await, 0);
}

#[tokio::test]
async fn http_history_exports_csv() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let user = sign_in(&server).await;
    let habit = create_habit(&server, &user, "Read").await;

    for date in ["2026-01-03", "2026-01-05", "2026-01-06"] {
        assert_eq!(complete(&server, &user, habit, date).await, StatusCode::OK);
    }

    let response = client()
        .get(format!(
            "{}/api/history?id={habit}&from=2026-01-04&to=2026-01-07&export=csv",
            server.base_url
        ))
        .header(header::COOKIE, &user.cookie)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/csv"));
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment"));

    let body = response.text().await.unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines[0], "id,track_date,completed,created_at,updated_at");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains(",2026-01-06,1,"));
    assert!(lines[2].contains(",2026-01-05,1,"));
}
