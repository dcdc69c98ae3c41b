//! parleyd — the Parley chat server daemon.
//!
//! Single binary assembling the subsystems in dependency order:
//! configuration, the MySQL connection pool, the query gateway and
//! stores, the domain services, and the realtime runtime. Exits with
//! code 1 on any startup failure (configuration, pool init, bind).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use parley_core::env::load_env_file;
use parley_core::{DbConfig, ServerConfig};
use parley_db::pool::run_health_checks;
use parley_db::store::mysql::{MysqlMessageStore, MysqlRoomStore, MysqlUserStore};
use parley_db::{ConnectionPool, MysqlFactory, PoolOptions, QueryGateway};
use parley_server::{ChatServer, ServerState};
use parley_service::Services;

/// Cadence of idle-connection pings and stale eviction.
const POOL_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "parleyd", about = "Parley multi-room chat server")]
struct Cli {
    /// Environment file loaded before reading configuration.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Override SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    load_env_file(&cli.env_file)?;

    let mut server_config = ServerConfig::from_env()?;
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    let db_config = DbConfig::from_env()?;

    let factory = Arc::new(MysqlFactory::new(&db_config));
    let pool = Arc::new(
        ConnectionPool::connect(
            factory,
            PoolOptions {
                min: db_config.pool_min,
                max: db_config.pool_max,
                acquire_timeout: db_config.acquire_timeout,
                idle_timeout: db_config.idle_timeout,
            },
        )
        .await?,
    );
    info!(
        host = %db_config.host,
        database = %db_config.database,
        min = db_config.pool_min,
        max = db_config.pool_max,
        "database pool ready"
    );

    let gateway = Arc::new(QueryGateway::new(Arc::clone(&pool)));
    let services = Services::new(
        Arc::new(MysqlUserStore::new(Arc::clone(&gateway))),
        Arc::new(MysqlRoomStore::new(Arc::clone(&gateway))),
        Arc::new(MysqlMessageStore::new(Arc::clone(&gateway))),
    );

    let server = Arc::new(ChatServer::new(ServerState::new(server_config, services)));
    server.preload_rooms().await?;

    tokio::spawn(run_health_checks(
        pool,
        POOL_HEALTH_INTERVAL,
        server.shutdown_signal(),
    ));

    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                server.shutdown();
            }
        });
    }

    server.run().await
}
