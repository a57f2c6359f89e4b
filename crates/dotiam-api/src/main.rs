// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use dotiam_api::{ApiServer, Config, HttpMasterClient};
use dotiam_core::{IamService, InMemoryPubSub, MasterClient};
use dotiam_store::MemoryStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    info!("Starting DotIAM API");

    // Load configuration
    let config = Config::from_env();
    info!(bind_address = %config.bind_address, write_api = ?config.iam.write_api, "Loaded configuration");

    let master: Option<Arc<dyn MasterClient>> = match &config.iam.write_api {
        Some(write_api) => Some(Arc::new(HttpMasterClient::new(write_api)?)),
        None => None,
    };
    let service = Arc::new(IamService::new(config.iam.clone(), Arc::new(MemoryStore::new()), Arc::new(InMemoryPubSub::new()), master, None)?);

    let shutdown = CancellationToken::new();
    let workers = service.start(shutdown.clone());

    let server = ApiServer::bind(config, service).await?;
    info!("DotIAM API started on http://{}", server.local_addr());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    server.run(shutdown).await?;
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Background task failed: {}", e);
        }
    }

    Ok(())
}
