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

//! HTTP server implementation using Hyper

use crate::config::Config;
use crate::error::{ApiError, ApiResult, problem_response};
use crate::router::Router;
use dotiam_core::IamService;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{error, info};

/// API server using Hyper
pub struct ApiServer {
    config: Config,
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<IamService>,
}

impl ApiServer {
    /// Bind the listener for `config.bind_address`
    pub async fn bind(config: Config, service: Arc<IamService>) -> ApiResult<Self> {
        let bind_address: SocketAddr = config.bind_address.parse().map_err(|e| ApiError::BadRequest {
            message: format!("Invalid bind address: {}", e),
        })?;

        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            config,
            listener,
            local_addr,
            service,
        })
    }

    /// Address actually bound, useful with port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve connections until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> ApiResult<()> {
        let router = Arc::new(Router::new(self.service.clone(), self.config.max_body_size, shutdown.clone())?);
        let role = if self.service.is_master() { "master" } else { "replica" };
        info!(role, "DotIAM API listening on http://{}", self.local_addr);

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let io = TokioIo::new(stream);
            let router = router.clone();
            let shutdown = shutdown.clone();

            tokio::task::spawn(async move {
                let service = ServiceBuilder::new().service(service_fn(move |req: Request<Incoming>| {
                    let router = router.clone();
                    async move {
                        let path = req.uri().path().to_string();
                        match router.route(req).await {
                            Ok(response) => Ok::<_, Infallible>(response),
                            Err(e) => Ok(problem_response(e, &path)),
                        }
                    }
                }));

                let connection = http1::Builder::new().serve_connection(io, service);
                tokio::pin!(connection);
                tokio::select! {
                    result = connection.as_mut() => {
                        if let Err(err) = result {
                            error!("Error serving connection from {}: {}", remote_addr, err);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        connection.as_mut().graceful_shutdown();
                        if let Err(err) = connection.await {
                            error!("Error closing connection from {}: {}", remote_addr, err);
                        }
                    }
                }
            });
        }

        info!("DotIAM API stopped accepting connections");
        Ok(())
    }
}
