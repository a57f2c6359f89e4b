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

//! Version, backup, sync and restore handlers

use super::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::http::{QueryParams, X_BACKUP_VERSION, X_SYNC_VERSION, json, read_body, written};
use dotiam_core::Written;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::info;

/// Multipart field carrying the export stream
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: u64,
}

/// GET /v1/version
pub async fn version(ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    json(StatusCode::OK, &VersionResponse { version: ctx.service.version() })
}

/// GET /v1/backup?since=N
pub async fn backup(req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let since = QueryParams::parse(req.uri().query()).parsed::<u64>("since")?.unwrap_or(0);
    let service = ctx.service.clone();
    let (version, bytes) = tokio::task::spawn_blocking(move || service.export(since)).await.map_err(|e| ApiError::InternalServerError {
        message: format!("Backup task failed: {}", e),
    })??;
    info!(since, version, bytes = bytes.len(), "Serving backup");

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_DISPOSITION, format!("attachment; filename=\"dotiam-{}.bak\"", version))
        .header(X_BACKUP_VERSION, version)
        .body(Full::new(Bytes::from(bytes)))?)
}

/// POST /v1/sync with `X-Sync-Version` (0 or absent = master's latest)
pub async fn sync(req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let target = match req.headers().get(X_SYNC_VERSION) {
        None => 0,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| ApiError::bad_request("X-Sync-Version must be an unsigned integer"))?,
    };

    let version = ctx.service.sync(target, &ctx.cancel).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(X_SYNC_VERSION, version)
        .body(Full::new(Bytes::from(serde_json::to_string(&VersionResponse { version })?)))?)
}

/// Extract the export stream from a multipart upload
async fn upload(content_type: &str, body: Bytes) -> ApiResult<Bytes> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = futures::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            return Ok(field.bytes().await?);
        }
    }
    Err(ApiError::bad_request(format!("multipart body has no '{}' field", UPLOAD_FIELD)))
}

/// POST /v1/restore, multipart `file` field or raw octet-stream
pub async fn restore(req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
    let body = read_body(req.into_body(), ctx.max_body_size).await?;

    let bytes = match content_type.as_deref().filter(|ct| ct.starts_with("multipart/form-data")) {
        Some(content_type) => upload(content_type, body).await?,
        None => body,
    };
    if bytes.is_empty() {
        return Err(ApiError::bad_request("restore body is empty"));
    }

    let restored = ctx.service.restore(bytes.to_vec(), &ctx.cancel).await?;
    info!(version = restored.value, replication = restored.replication.as_str(), "Restore served");
    written(
        StatusCode::OK,
        &Written {
            value: VersionResponse { version: restored.value },
            version: restored.version,
            replication: restored.replication,
        },
    )
}
