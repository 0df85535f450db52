//! Operations on the counter row, plus the readiness gate that guards them.

use crate::error::CounterError;
use crate::model::ServerVersion;
use crate::model::COUNTER_ID;
use crate::pool::DbPool;
use crate::schema;
use anyhow::Context;
use async_bb8_diesel::AsyncRunQueryDsl;
use async_bb8_diesel::AsyncSimpleConnection;
use diesel::prelude::*;
use slog::info;

/// Creates the counter table and row if they do not exist yet.  Running this
/// against an already-initialized database changes nothing.
pub async fn ensure_initialized(
    log: &slog::Logger,
    pool: &DbPool,
) -> Result<(), CounterError> {
    use schema::counter::dsl;

    pool.batch_execute_async(
        r#"
        CREATE TABLE IF NOT EXISTS counter (
            id INT4 PRIMARY KEY,
            count INT4 NOT NULL
        );
        "#,
    )
    .await
    .context("creating counter table")
    .map_err(CounterError::InitializationFailure)?;

    // A single insert rather than check-then-insert, so that two processes
    // starting at once cannot both create the row.
    let nrows = diesel::insert_into(dsl::counter)
        .values((dsl::id.eq(COUNTER_ID), dsl::count.eq(0)))
        .on_conflict(dsl::id)
        .do_nothing()
        .execute_async(pool)
        .await
        .context("inserting counter row")
        .map_err(CounterError::InitializationFailure)?;

    if nrows > 0 {
        info!(log, "created counter row"; "id" => COUNTER_ID);
    } else {
        info!(log, "counter row already present"; "id" => COUNTER_ID);
    }
    Ok(())
}

/// Fetch the current value of the counter.
pub async fn get_counter(pool: &DbPool) -> Result<i32, CounterError> {
    use schema::counter::dsl;

    dsl::counter
        .filter(dsl::id.eq(COUNTER_ID))
        .select(dsl::count)
        .first_async::<i32>(pool)
        .await
        .context("loading counter")
        .map_err(CounterError::StorageUnavailable)
}

/// Bump the counter and return the new value.  This is one
/// `UPDATE ... RETURNING` statement, so concurrent callers never lose an
/// update and each sees a distinct value.
pub async fn increment_counter(pool: &DbPool) -> Result<i32, CounterError> {
    use schema::counter::dsl;

    diesel::update(dsl::counter.filter(dsl::id.eq(COUNTER_ID)))
        .set(dsl::count.eq(dsl::count + 1))
        .returning(dsl::count)
        .get_result_async::<i32>(pool)
        .await
        .context("incrementing counter")
        .map_err(CounterError::StorageUnavailable)
}

/// Verifies that PostgreSQL reports the major version we require.
///
/// This is called at the top of every request and always goes to the
/// database: nothing is cached, so a backend swapped out underneath us is
/// noticed on the very next request.  It costs one extra round trip per
/// request.
pub async fn check_readiness(
    pool: &DbPool,
    required_version: u32,
) -> Result<(), CounterError> {
    let row = diesel::sql_query("SHOW server_version")
        .get_result_async::<ServerVersion>(pool)
        .await
        .context("checking server version")
        .map_err(CounterError::StorageUnavailable)?;
    check_server_version(&row.server_version, required_version)
}

/// Accepts `found` (as reported by `SHOW server_version`, e.g. "14.9" or
/// "14.9 (Debian 14.9-1.pgdg120+1)") only if its major version is `required`.
pub fn check_server_version(
    found: &str,
    required: u32,
) -> Result<(), CounterError> {
    let prefix = format!("{}.", required);
    if found.starts_with(&prefix) {
        Ok(())
    } else {
        Err(CounterError::VersionMismatch {
            required,
            found: found.to_string(),
        })
    }
}
