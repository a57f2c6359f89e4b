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

//! Forwarding of replica writes to the write master

use crate::client::{HttpClient, http_client, master_base};
use crate::error::{ApiError, ApiResult};
use crate::http::{X_SYNC_VERSION, read_body};
use dotiam_core::IamService;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_LENGTH, HOST, HeaderMap, HeaderName};
use hyper::{Method, Request, Response, Uri};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Paths whose mutations only the write master accepts
const FORWARDED_PREFIXES: [&str; 6] = ["/v1/users", "/v1/roles", "/v1/permissions", "/v1/lmaps", "/v1/alias", "/v1/directory"];

const HOP_BY_HOP: [&str; 8] = ["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailer", "transfer-encoding", "upgrade"];

/// Whether a replica must forward this request
pub fn is_forwarded(method: &Method, path: &str) -> bool {
    if *method == Method::GET || *method == Method::HEAD {
        return false;
    }
    FORWARDED_PREFIXES.iter().any(|prefix| path.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with('/')))
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap, skip: &[HeaderName]) {
    for (name, value) in from {
        if skip.contains(name) || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Reverse proxy from a replica to the write master
#[derive(Debug, Clone)]
pub struct Redirect {
    base: String,
    client: HttpClient,
    max_body_size: usize,
}

impl Redirect {
    pub fn new(write_api: &str, max_body_size: usize) -> ApiResult<Self> {
        Ok(Self {
            base: master_base(write_api)?,
            client: http_client(),
            max_body_size,
        })
    }

    /// Forward `req`, then sync this replica to the version the master reports
    pub async fn forward(&self, req: Request<Incoming>, service: &IamService, cancel: &CancellationToken) -> ApiResult<Response<Full<Bytes>>> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let uri: Uri = format!("{}{}", self.base, path_and_query).parse().map_err(|e| ApiError::InternalServerError {
            message: format!("Invalid forward URI: {}", e),
        })?;
        debug!(method = %parts.method, %uri, "Forwarding write to master");

        let body = read_body(body, self.max_body_size).await?;
        let mut request = Request::builder().method(parts.method.clone()).uri(uri).body(Full::new(body))?;
        copy_headers(&parts.headers, request.headers_mut(), &[HOST, CONTENT_LENGTH]);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::ServiceUnavailable { message: "request cancelled".to_string() }),
            response = self.client.request(request) => response.map_err(|e| ApiError::BadGateway { message: format!("Write master unreachable: {}", e) })?,
        };
        let (head, body) = response.into_parts();
        let body = body.collect().await.map_err(|e| ApiError::BadGateway {
            message: format!("Failed to read master response: {}", e),
        })?;
        counter!("dotiam_api_forwarded_total", 1);

        if head.status.is_success() {
            let version = head.headers.get(X_SYNC_VERSION).and_then(|v| v.to_str().ok()).and_then(|v| v.parse::<u64>().ok());
            if let Some(version) = version {
                if let Err(e) = service.sync(version, cancel).await {
                    warn!(version, error = %e, "Replica could not catch up after forwarded write");
                }
            }
        }

        let mut response = Response::builder().status(head.status).body(Full::new(body.to_bytes()))?;
        copy_headers(&head.headers, response.headers_mut(), &[CONTENT_LENGTH]);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_requests() {
        assert!(is_forwarded(&Method::POST, "/v1/users"));
        assert!(is_forwarded(&Method::DELETE, "/v1/roles/r1"));
        assert!(is_forwarded(&Method::POST, "/v1/alias/rebuild"));
        assert!(!is_forwarded(&Method::GET, "/v1/users"));
        assert!(!is_forwarded(&Method::POST, "/v1/check"));
        assert!(!is_forwarded(&Method::POST, "/v1/restore"));
        assert!(!is_forwarded(&Method::POST, "/v1/usersx"));
    }
}
