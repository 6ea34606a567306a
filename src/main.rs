use anyhow::Context;
use class_scheduler::config::ServerConfig;
use class_scheduler::server;
use class_scheduler::store::{MemoryStore, StudioData};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;

    let store = match &config.seed_path {
        Some(path) => MemoryStore::from_seed_file(path, config.studio)
            .with_context(|| format!("failed to load seed data from {}", path.display()))?,
        None => {
            let store = MemoryStore::new();
            store.insert_studio(config.studio, StudioData::default());
            store
        }
    };

    server::run_server(config, Arc::new(store)).await
}
