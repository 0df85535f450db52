//! End-to-end tests that run the real HTTP server.
//!
//! `test_storage_unreachable` always runs.  `test_counter_lifecycle` needs a
//! PostgreSQL instance, so it is `#[ignore]`d by default.  Run it with
//!
//! ```text
//! cargo test --test counter_integration -- --ignored
//! ```
//!
//! It connects using `TEST_DATABASE_HOST`, `TEST_DATABASE_PORT`,
//! `TEST_DATABASE_NAME`, `TEST_DATABASE_USER` and `TEST_DATABASE_PASSWORD`,
//! each falling back to a local development database, and fails if that
//! database cannot be reached.  It owns the counter table in that database
//! for its duration.

use async_bb8_diesel::AsyncRunQueryDsl;
use async_bb8_diesel::AsyncSimpleConnection;
use counter_service::config::Config;
use counter_service::config::DatabaseConfig;
use counter_service::http::create_dropshot_server;
use counter_service::http::CounterContext;
use counter_service::model::ServerVersion;
use counter_service::pool::create_pool;
use counter_service::pool::DbPool;
use counter_service::schema;
use counter_service::store;
use diesel::prelude::*;
use dropshot::ConfigDropshot;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingLevel;
use dropshot::HttpServer;
use reqwest::StatusCode;
use serde_json::json;
use serde_json::Value;
use std::time::Duration;

fn test_logger() -> slog::Logger {
    ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Critical }
        .to_logger("counter-test")
        .unwrap()
}

async fn start_server(
    log: &slog::Logger,
    pool: DbPool,
    required_version: u32,
) -> (HttpServer<CounterContext>, String) {
    let config_dropshot = ConfigDropshot {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        ..Default::default()
    };
    let server = create_dropshot_server(
        config_dropshot,
        log.clone(),
        CounterContext::new(pool, required_version),
    )
    .await
    .unwrap();
    let url = format!("http://{}/api/counter", server.local_addr());
    (server, url)
}

async fn get_count(client: &reqwest::Client, url: &str) -> i64 {
    let response = client.get(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["count"].as_i64().unwrap()
}

async fn put_count(client: &reqwest::Client, url: &str) -> i64 {
    let response = client.put(url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["count"].as_i64().unwrap()
}

#[tokio::test]
async fn test_storage_unreachable() {
    let log = test_logger();
    // Nothing listens on port 1, so every checkout times out.
    let database = DatabaseConfig {
        host: String::from("127.0.0.1"),
        port: 1,
        name: String::from("counter"),
        user: String::from("nobody"),
        password: String::from("nothing"),
        pool_size: 1,
        connect_timeout: Duration::from_millis(500),
        required_version: 14,
    };
    let pool = create_pool(log.clone(), &database);
    let (server, url) = start_server(&log, pool, 14).await;
    let client = reqwest::Client::new();

    // The gate runs ahead of routing, so unknown paths and methods fail the
    // same way as the counter endpoints.
    let other_url = url.replace("/api/counter", "/other");
    for request in [
        client.get(&url),
        client.put(&url),
        client.get(&other_url),
        client.post(&url),
        client.delete(&other_url),
    ] {
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        let body = response.text().await.unwrap();
        assert!(
            body.starts_with("Database error: "),
            "unexpected body: {:?}",
            body
        );
    }

    // Preflight never touches the database.
    let response = client
        .request(reqwest::Method::OPTIONS, &url)
        .header("origin", "http://localhost:8080")
        .header("access-control-request-method", "PUT")
        .header("access-control-request-headers", "content-type")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(
        response.headers()["access-control-allow-headers"],
        "content-type"
    );

    server.close().await.unwrap();
}

/// Connection settings for the live test database: `TEST_<VAR>` when set,
/// else a local development database.
fn live_database() -> DatabaseConfig {
    let config = Config::from_lookup(|var| {
        std::env::var(format!("TEST_{}", var)).ok().or_else(|| {
            let default = match var {
                "DATABASE_HOST" => "localhost",
                "DATABASE_PORT" => "5432",
                "DATABASE_NAME" => "counter_test",
                "DATABASE_USER" => "postgres",
                "DATABASE_PASSWORD" => "postgres",
                "DATABASE_CONNECT_TIMEOUT_SECS" => "5",
                _ => return None,
            };
            Some(default.to_string())
        })
    })
    .expect("invalid TEST_DATABASE_* configuration");
    config.database
}

async fn server_major_version(pool: &DbPool) -> u32 {
    let row = diesel::sql_query("SHOW server_version")
        .get_result_async::<ServerVersion>(pool)
        .await
        .unwrap();
    row.server_version.split('.').next().unwrap().parse().unwrap()
}

async fn row_count(pool: &DbPool) -> i64 {
    schema::counter::table.count().get_result_async::<i64>(pool).await.unwrap()
}

/// Runs every scenario against the live database in sequence, since they all
/// share the one counter row.
#[tokio::test]
#[ignore = "needs a PostgreSQL instance"]
async fn test_counter_lifecycle() {
    let mut database = live_database();
    database.pool_size = 5;

    let log = test_logger();
    let pool = create_pool(log.clone(), &database);
    let major = server_major_version(&pool).await;
    let (server, url) = start_server(&log, pool.clone(), major).await;
    let client = reqwest::Client::new();
    let other_url = url.replace("/api/counter", "/other");

    // Fresh store: the row is created with 0 and counts up by one.
    store::ensure_initialized(&log, &pool).await.unwrap();
    pool.batch_execute_async("DELETE FROM counter;").await.unwrap();
    store::ensure_initialized(&log, &pool).await.unwrap();
    assert_eq!(get_count(&client, &url).await, 0);
    assert_eq!(put_count(&client, &url).await, 1);
    assert_eq!(put_count(&client, &url).await, 2);

    // With the gate passing, other paths and methods are plain 404s that
    // leave the counter alone.
    for request in [client.get(&other_url), client.post(&url)] {
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
    assert_eq!(get_count(&client, &url).await, 2);

    // Initialization is idempotent.
    store::ensure_initialized(&log, &pool).await.unwrap();
    store::ensure_initialized(&log, &pool).await.unwrap();
    assert_eq!(row_count(&pool).await, 1);
    assert_eq!(get_count(&client, &url).await, 2);

    // No lost updates under concurrent callers.
    let start = get_count(&client, &url).await;
    let n = 20;
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let client = client.clone();
            let url = url.clone();
            tokio::spawn(async move { put_count(&client, &url).await })
        })
        .collect();
    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.await.unwrap());
    }
    values.sort_unstable();
    let expected: Vec<i64> = (start + 1..=start + n).collect();
    assert_eq!(values, expected);
    assert_eq!(get_count(&client, &url).await, start + n);

    // A read never goes backwards past a completed increment.
    for _ in 0..5 {
        let bumped = put_count(&client, &url).await;
        assert!(get_count(&client, &url).await >= bumped);
    }

    // A server that demands another major version rejects everything and
    // leaves the row alone.
    let before = get_count(&client, &url).await;
    let (strict_server, strict_url) =
        start_server(&log, pool.clone(), major + 1).await;
    for request in [client.get(&strict_url), client.put(&strict_url)] {
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.text().await.unwrap();
        assert_eq!(
            body,
            format!(
                "Database error: PostgreSQL version {} required, found: {}",
                major + 1,
                diesel::sql_query("SHOW server_version")
                    .get_result_async::<ServerVersion>(&pool)
                    .await
                    .unwrap()
                    .server_version
            )
        );
    }
    assert_eq!(get_count(&client, &url).await, before);

    let response = client.get(&url).send().await.unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "count": before }));

    strict_server.close().await.unwrap();
    server.close().await.unwrap();
}
