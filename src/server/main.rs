use std::sync::Arc;

use ciarla::server::{config::ServerConfig, connection::Server, service::ChatService};
use ciarla::storage::memory::MemoryTableStore;
use ciarla::storage::sqlite::SqliteTableStore;
use ciarla::storage::store::TableStore;
use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "ciarla-server", about = "Group chat server")]
struct Args {
    /// Address to bind, overriding SERVER_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let args = Args::parse();
    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);

    let store: Arc<dyn TableStore> = if config.database_url == "memory" {
        info!("Using the in-memory store; nothing will survive a restart");
        Arc::new(MemoryTableStore::with_page_size(config.page_size))
    } else {
        if let Some(path) = config
            .database_url
            .strip_prefix("sqlite:")
            .filter(|p| !p.contains(":memory:"))
        {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening database at {}", config.database_url);
        let sqlite = SqliteTableStore::connect(&config.database_url)
            .await?
            .with_page_size(config.page_size);
        sqlite.migrate().await?;
        Arc::new(sqlite)
    };

    let service = Arc::new(ChatService::new(store));
    let server = Arc::new(Server::new(service));
    server.run(&format!("{host}:{port}")).await
}
