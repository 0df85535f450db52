use diesel::prelude::*;
use diesel::sql_types::Text;
use serde::Serialize;

/// Primary key of the one row that holds "the" counter.
pub const COUNTER_ID: i32 = 1;

/// Body of every successful counter response: `{"count": <n>}`
#[derive(Debug, Serialize)]
pub struct CounterView {
    pub count: i32,
}

/// Row returned by `SHOW server_version`
#[derive(QueryableByName)]
pub struct ServerVersion {
    #[diesel(sql_type = Text)]
    pub server_version: String,
}
