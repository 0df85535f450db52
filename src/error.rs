use thiserror::Error;

/// Problems with the process configuration.  All of these are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {var}")]
    Missing { var: &'static str },

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },

    #[error("reading .env: {0}")]
    DotEnv(#[source] dotenvy::Error),
}

/// Failures of the counter operations and the readiness gate.
#[derive(Debug, Error)]
pub enum CounterError {
    /// A connection could not be acquired or a query failed.
    #[error("{0:#}")]
    StorageUnavailable(anyhow::Error),

    /// PostgreSQL does not report the major version we were built against.
    #[error("PostgreSQL version {required} required, found: {found}")]
    VersionMismatch { required: u32, found: String },

    /// The counter row could not be created at startup.
    #[error("failed to initialize database: {0:#}")]
    InitializationFailure(anyhow::Error),
}
