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

//! Health check handler

use super::RequestContext;
use crate::error::ApiResult;
use crate::http::json;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::{Response, StatusCode, body::Bytes};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// `master` or `replica`
    pub role: String,
    pub instance: String,
    pub version: u64,
    pub healthy: bool,
    /// Live replicas known to the master
    pub replicas: usize,
    pub timestamp: DateTime<Utc>,
}

/// GET /health
pub async fn health_check(ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    debug!("Processing health check request");

    let service = &ctx.service;
    let healthy = service.is_healthy();
    let response = HealthResponse {
        status: if healthy { "healthy".to_string() } else { "unhealthy".to_string() },
        role: if service.is_master() { "master".to_string() } else { "replica".to_string() },
        instance: service.coordinator().instance_id().to_string(),
        version: service.version(),
        healthy,
        replicas: service.coordinator().shared().peers().len(),
        timestamp: Utc::now(),
    };

    let status_code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    json(status_code, &response)
}
