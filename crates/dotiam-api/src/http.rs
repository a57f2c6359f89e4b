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

//! Request and response helpers shared by the handlers

use crate::error::{ApiError, ApiResult};
use dotiam_core::{SYSTEM_ACTOR, Written};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, HeaderMap};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Version the response reflects, on writes and syncs
pub const X_SYNC_VERSION: &str = "x-sync-version";
/// How far a write replicated before the response
pub const X_SYNC_REPLICATION: &str = "x-sync-replication";
/// Version an export was taken at
pub const X_BACKUP_VERSION: &str = "x-backup-version";
/// Acting user
pub const X_USER: &str = "x-user";

/// Acting user of a request, `system` when absent
pub fn actor(headers: &HeaderMap) -> String {
    headers
        .get(X_USER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(SYSTEM_ACTOR)
        .to_string()
}

/// Collect a body, refusing anything larger than `limit`
pub async fn read_body<B>(body: B, limit: usize) -> ApiResult<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(ApiError::PayloadTooLarge {
            message: format!("request body exceeds {} bytes", limit),
        }),
        Err(e) => Err(ApiError::bad_request(format!("Failed to read request body: {}", e))),
    }
}

/// Collect and decode a JSON body
pub async fn read_json<T: DeserializeOwned, B>(body: B, limit: usize) -> ApiResult<T>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = read_body(body, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn json<T: Serialize>(status: StatusCode, body: &T) -> ApiResult<Response<Full<Bytes>>> {
    let json = serde_json::to_string(body)?;
    Ok(Response::builder().status(status).header(CONTENT_TYPE, "application/json").body(Full::new(Bytes::from(json)))?)
}

/// JSON response for a write, carrying the sync headers
pub fn written<T: Serialize>(status: StatusCode, written: &Written<T>) -> ApiResult<Response<Full<Bytes>>> {
    let json = serde_json::to_string(&written.value)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(X_SYNC_VERSION, written.version)
        .header(X_SYNC_REPLICATION, written.replication.as_str())
        .body(Full::new(Bytes::from(json)))?)
}

/// Decoded query string
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        Self {
            pairs: query.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect()).unwrap_or_default(),
        }
    }

    /// First non-empty value of `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.pairs.iter().find(|(k, v)| k == key && !v.is_empty()).map(|(_, v)| v.clone())
    }

    /// Every value of `key`, comma-separated values split
    pub fn all(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .flat_map(|(_, v)| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn parsed<T: std::str::FromStr>(&self, key: &str) -> ApiResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| ApiError::bad_request(format!("Invalid value for '{}': {}", key, value))),
        }
    }
}

/// Decode one percent-encoded path segment
pub fn path_segment(segment: &str) -> ApiResult<String> {
    urlencoding::decode(segment).map(|s| s.into_owned()).map_err(|_| ApiError::bad_request("Invalid path encoding"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_defaults_to_system() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor(&headers), "system");
        headers.insert(X_USER, "  ada ".parse().unwrap());
        assert_eq!(actor(&headers), "ada");
    }

    #[test]
    fn test_query_params() {
        let params = QueryParams::parse(Some("search=a%20b&role_id=r1,r2&role_id=r3&limit=5&disabled=maybe&offset="));
        assert_eq!(params.get("search").as_deref(), Some("a b"));
        assert_eq!(params.all("role_id"), vec!["r1", "r2", "r3"]);
        assert_eq!(params.parsed::<usize>("limit").unwrap(), Some(5));
        assert_eq!(params.parsed::<usize>("offset").unwrap(), None);
        assert!(params.parsed::<bool>("disabled").is_err());
    }

    #[tokio::test]
    async fn test_body_limit() {
        let body = Full::new(Bytes::from_static(b"0123456789"));
        let err = read_body(body, 4).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge { .. }));

        let body = Full::new(Bytes::from_static(b"0123"));
        assert_eq!(read_body(body, 4).await.unwrap(), Bytes::from_static(b"0123"));
    }

    #[test]
    fn test_path_segment_decoding() {
        assert_eq!(path_segment("ops%20team").unwrap(), "ops team");
    }
}
