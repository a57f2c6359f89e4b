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

//! HTTP client for the write master

use crate::error::{ApiError, ApiResult};
use crate::handlers::replication::VersionResponse;
use async_trait::async_trait;
use dotiam_core::{IamError, IamResult, MasterClient};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

/// Pooled HTTP/1 client
pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

pub fn http_client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Validate a write master base URL and strip its trailing slash
pub fn master_base(write_api: &str) -> ApiResult<String> {
    let url = url::Url::parse(write_api).map_err(|e| ApiError::bad_request(format!("Invalid write API '{}': {}", write_api, e)))?;
    if url.scheme() != "http" {
        return Err(ApiError::bad_request(format!("Unsupported write API scheme '{}'", url.scheme())));
    }
    Ok(write_api.trim_end_matches('/').to_string())
}

/// Fetches backups and versions from the write master's API
#[derive(Debug, Clone)]
pub struct HttpMasterClient {
    base: String,
    client: HttpClient,
}

impl HttpMasterClient {
    pub fn new(write_api: &str) -> ApiResult<Self> {
        Ok(Self {
            base: master_base(write_api)?,
            client: http_client(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn get(&self, operation: &str, path: &str) -> IamResult<Bytes> {
        let uri: Uri = format!("{}{}", self.base, path).parse().map_err(|e| IamError::transport(operation, e))?;
        debug!(%uri, operation, "Calling write master");

        let request = Request::get(uri).body(Full::new(Bytes::new())).map_err(|e| IamError::transport(operation, e))?;
        let response = self.client.request(request).await.map_err(|e| IamError::transport(operation, e))?;
        let status = response.status();
        let body = response.into_body().collect().await.map_err(|e| IamError::transport(operation, e))?.to_bytes();

        if !status.is_success() {
            return Err(IamError::transport(operation, format!("master answered {}: {}", status, String::from_utf8_lossy(&body))));
        }
        Ok(body)
    }
}

#[async_trait]
impl MasterClient for HttpMasterClient {
    async fn fetch_backup(&self, since: u64) -> IamResult<Vec<u8>> {
        Ok(self.get("fetch backup", &format!("/v1/backup?since={}", since)).await?.to_vec())
    }

    async fn fetch_version(&self) -> IamResult<u64> {
        let body = self.get("fetch version", "/v1/version").await?;
        let version: VersionResponse = serde_json::from_slice(&body)?;
        Ok(version.version)
    }
}
