//! A single durable counter, served over HTTP.
//!
//! The counter lives in one PostgreSQL row.  `GET /api/counter` reads it and
//! `PUT /api/counter` bumps it; both are refused with a 500 unless the
//! database reports the expected major version.

pub mod config;
pub mod error;
pub mod http;
pub mod model;
pub mod pool;
pub mod schema;
pub mod store;

pub type DbConnection = diesel::PgConnection;
