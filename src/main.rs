use anyhow::anyhow;
use anyhow::Context;
use counter_service::config;
use counter_service::config::Config;
use counter_service::http::create_dropshot_server;
use counter_service::http::CounterContext;
use counter_service::pool;
use counter_service::store;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingIfExists;
use slog::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_dotenv().context("loading .env")?;
    let config = Config::from_env().context("loading configuration")?;

    let config_logging = ConfigLogging::File {
        level: config.log_level,
        path: "/dev/stdout".into(),
        if_exists: ConfigLoggingIfExists::Append,
    };
    let config_dropshot = dropshot::ConfigDropshot {
        bind_address: config.bind_address,
        ..Default::default()
    };
    let log = config_logging
        .to_logger("counter-service")
        .context("creating logger")?;
    info!(&log, "loaded configuration";
        "bind_address" => %config.bind_address,
        "database" => ?config.database);

    let pool = pool::create_pool(log.clone(), &config.database);
    store::ensure_initialized(&log, &pool)
        .await
        .context("setting up database")?;

    info!(&log, "setting up dropshot server");
    let api_context =
        CounterContext::new(pool, config.database.required_version);
    let server =
        create_dropshot_server(config_dropshot, log.clone(), api_context)
            .await?;
    info!(&log, "set up dropshot server";
        "local_address" => ?server.local_addr());
    server.await.map_err(|error| anyhow!("waiting for server: {:#}", error))
}
