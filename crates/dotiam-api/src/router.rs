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

//! HTTP routing for the IAM API

use crate::error::{ApiError, ApiResult};
use crate::handlers::entities::{self, Kind};
use crate::handlers::{RequestContext, check, health, replication};
use crate::http::path_segment;
use crate::redirect::{Redirect, is_forwarded};
use dotiam_core::IamService;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response};
use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// HTTP router for the IAM API
#[derive(Debug)]
pub struct Router {
    service: Arc<IamService>,
    redirect: Option<Redirect>,
    max_body_size: usize,
    shutdown: CancellationToken,
}

impl Router {
    /// Create a router; replicas forward writes to `write_api`
    pub fn new(service: Arc<IamService>, max_body_size: usize, shutdown: CancellationToken) -> ApiResult<Self> {
        let redirect = match &service.config().write_api {
            Some(write_api) => Some(Redirect::new(write_api, max_body_size)?),
            None => None,
        };

        Ok(Self {
            service,
            redirect,
            max_body_size,
            shutdown,
        })
    }

    fn context(&self) -> RequestContext {
        RequestContext {
            service: self.service.clone(),
            max_body_size: self.max_body_size,
            cancel: self.shutdown.child_token(),
        }
    }

    /// Route a request to the appropriate handler
    pub async fn route(&self, req: Request<Incoming>) -> ApiResult<Response<Full<Bytes>>> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();
        debug!("Routing request: {} {}", method, path);
        counter!("dotiam_api_requests_total", 1);

        let ctx = self.context();

        if let Some(redirect) = &self.redirect {
            if is_forwarded(&method, &path) {
                return redirect.forward(req, &self.service, &ctx.cancel).await;
            }
        }

        let segments: Vec<&str> = path.split('/').collect();

        match (&method, segments.as_slice()) {
            (&Method::GET, ["", "health"]) => health::health_check(&ctx).await,

            (&Method::GET, ["", "v1", "version"]) => replication::version(&ctx).await,
            (&Method::GET, ["", "v1", "backup"]) => replication::backup(req, &ctx).await,
            (&Method::POST, ["", "v1", "sync"]) => replication::sync(req, &ctx).await,
            (&Method::POST, ["", "v1", "restore"]) => replication::restore(req, &ctx).await,

            (&Method::POST, ["", "v1", "check"]) => check::check(req, &ctx).await,

            (&Method::POST, ["", "v1", "alias", "rebuild"]) => entities::rebuild_alias(req, &ctx).await,
            (&Method::POST, ["", "v1", "directory", "sync"]) => entities::sync_directory(None, req, &ctx).await,
            (&Method::POST, ["", "v1", "directory", "sync", alias]) => {
                let alias = path_segment(alias)?;
                entities::sync_directory(Some(&alias), req, &ctx).await
            }

            (&Method::GET, ["", "v1", "users", id, "roles"]) => entities::user_roles(&path_segment(id)?, &ctx).await,
            (&Method::GET, ["", "v1", "users", id, "permissions"]) => entities::user_permissions(&path_segment(id)?, &ctx).await,

            (_, ["", "v1", collection]) => match Kind::from_segment(collection) {
                Some(kind) => entities::collection(kind, req, &ctx).await,
                None => Err(not_found(&method, &path)),
            },
            (_, ["", "v1", collection, id]) if !id.is_empty() => match Kind::from_segment(collection) {
                Some(kind) => {
                    let id = path_segment(id)?;
                    entities::item(kind, &id, req, &ctx).await
                }
                None => Err(not_found(&method, &path)),
            },

            _ => Err(not_found(&method, &path)),
        }
    }
}

fn not_found(method: &Method, path: &str) -> ApiError {
    ApiError::NotFound {
        message: format!("Route not found: {} {}", method, path),
    }
}
