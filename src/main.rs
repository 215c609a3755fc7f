mod config;
mod db;
mod error;
mod handlers;
mod models;
mod services;
mod store;
mod voting;

use config::Config;
use db::Database;
use handlers::AppContext;
use log::{error, info, warn};
use std::sync::Arc;
use store::memory::MemoryStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;

async fn build_context(config: Config) -> error::Result<AppContext> {
    if config.uses_memory_store() {
        warn!("Using the in-memory store; nothing will survive a restart");
        let store = Arc::new(MemoryStore::new());
        return Ok(AppContext {
            reports: store.clone(),
            votes: store,
            config,
        });
    }

    let database = Arc::new(Database::new(&config).await?);
    info!("Connected to {}", config.database_url);
    Ok(AppContext {
        reports: database.clone(),
        votes: database,
        config,
    })
}

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if config.admin_password.is_none() {
        warn!("ADMIN_PASSWORD is not set; delete and moderation requests will be refused");
    }

    let ctx = match build_context(config).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("Failed to initialize store: {}", e);
            std::process::exit(1);
        }
    };

    info!("Ready; reading requests from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = JoinSet::new();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // Each request runs on its own task
                let ctx = Arc::clone(&ctx);
                in_flight.spawn(async move {
                    let response = handlers::handle_line(&ctx, &line).await;
                    match serde_json::to_string(&response) {
                        Ok(json) => println!("{}", json),
                        Err(e) => error!("Failed to encode response: {}", e),
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read from stdin: {}", e);
                break;
            }
        }

        // Reap finished tasks so the set doesn't grow without bound
        while let Some(done) = in_flight.try_join_next() {
            if let Err(e) = done {
                error!("Request task panicked: {}", e);
            }
        }
    }

    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            error!("Request task panicked: {}", e);
        }
    }
    info!("Input closed, shutting down");
}
