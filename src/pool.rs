use crate::config::DatabaseConfig;
use crate::DbConnection;
use slog::error;
use slog::o;

pub type DbPool = bb8::Pool<async_bb8_diesel::ConnectionManager<DbConnection>>;

/// Builds the connection pool without connecting.  The first query made
/// through the pool (counter initialization, at startup) is the first real
/// connection attempt, and it waits up to `connect_timeout` for PostgreSQL.
pub fn create_pool(log: slog::Logger, config: &DatabaseConfig) -> DbPool {
    let error_sink = ConnectionErrorSink::new(&log, config);
    let manager =
        async_bb8_diesel::ConnectionManager::new(config.connection_string());
    bb8::Builder::new()
        .error_sink(Box::new(error_sink))
        .max_size(config.pool_size)
        .connection_timeout(config.connect_timeout)
        .build_unchecked(manager)
}

/// Logs connection failures the pool would otherwise swallow, tagged with
/// the database they were aimed at.
#[derive(Clone, Debug)]
struct ConnectionErrorSink {
    log: slog::Logger,
}

impl ConnectionErrorSink {
    fn new(log: &slog::Logger, config: &DatabaseConfig) -> ConnectionErrorSink {
        let log = log.new(o!(
            "component" => "pool",
            "database_host" => config.host.clone(),
            "database_port" => config.port,
            "database_name" => config.name.clone(),
        ));
        ConnectionErrorSink { log }
    }
}

impl bb8::ErrorSink<async_bb8_diesel::ConnectionError> for ConnectionErrorSink {
    fn sink(&self, error: async_bb8_diesel::ConnectionError) {
        error!(&self.log, "failed to connect to database";
            "error_message" => #%error);
    }

    fn boxed_clone(
        &self,
    ) -> Box<dyn bb8::ErrorSink<async_bb8_diesel::ConnectionError>> {
        Box::new(self.clone())
    }
}
