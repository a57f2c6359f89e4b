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

//! Authorization check handler

use super::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::http::{json, read_json};
use dotiam_core::CheckRequest;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use tracing::debug;

/// POST /v1/check
pub async fn check(req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let request: CheckRequest = read_json(req.into_body(), ctx.max_body_size).await?;
    if request.path.is_empty() {
        return Err(ApiError::bad_request("path must not be empty"));
    }

    let response = ctx.service.check(&request)?;
    debug!(alias = ?request.alias, id = ?request.id, method = %request.method, path = %request.path, allowed = response.allowed, "Check answered");
    json(StatusCode::OK, &response)
}
