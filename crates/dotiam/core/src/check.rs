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

//! Authorization checks

use crate::error::IamResult;
use crate::models::{Permission, User};
use crate::repository::{Repository, load, tables};
use dotiam_store::ReadTxn;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Authorization question
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub path: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl CheckRequest {
    pub fn for_alias(alias: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn for_id(id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Authorization answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

impl CheckResponse {
    const DENY: Self = Self { allowed: false };
    const ALLOW: Self = Self { allowed: true };
}

/// Answers authorization checks against the local store
#[derive(Debug, Clone)]
pub struct CheckService {
    repository: Arc<Repository>,
}

impl CheckService {
    pub fn new(repository: Arc<Repository>) -> Self {
        Self { repository }
    }

    /// Decide a request in a single read-only pass
    ///
    /// Unknown, disabled or unnamed subjects are denied rather than reported.
    /// Errors only surface for storage failures.
    pub fn check(&self, request: &CheckRequest) -> IamResult<CheckResponse> {
        let response = self.repository.read(|txn| self.decide(txn, request))?;
        let outcome = if response.allowed { "allow" } else { "deny" };
        counter!("dotiam_checks_total", 1, "outcome" => outcome);
        Ok(response)
    }

    fn subject<R: ReadTxn + ?Sized>(&self, txn: &R, request: &CheckRequest) -> IamResult<Option<User>> {
        if let Some(id) = request.id.as_deref().filter(|id| !id.is_empty()) {
            return load(txn, tables::USERS, id);
        }
        match request.alias.as_deref().filter(|alias| !alias.is_empty()) {
            Some(alias) => self.repository.lookup_alias(txn, alias),
            None => Ok(None),
        }
    }

    fn decide<R: ReadTxn + ?Sized>(&self, txn: &R, request: &CheckRequest) -> IamResult<CheckResponse> {
        let user = match self.subject(txn, request)? {
            Some(user) if !user.disabled => user,
            Some(user) => {
                debug!(id = %user.id, "Check denied: subject disabled");
                return Ok(CheckResponse::DENY);
            }
            None => {
                debug!(id = ?request.id, alias = ?request.alias, "Check denied: unknown subject");
                return Ok(CheckResponse::DENY);
            }
        };

        let (permission_ids, resolution) = self.repository.permission_ids_for(txn, &user)?;
        if resolution.truncated {
            warn!(id = %user.id, roles = resolution.roles.len(), "Check denied: role resolution truncated");
            return Ok(CheckResponse::DENY);
        }

        let matcher = self.repository.matcher();
        for permission_id in &permission_ids {
            let Some(permission) = load::<Permission, R>(txn, tables::PERMISSIONS, permission_id)? else {
                continue;
            };
            if matcher.matches(&permission.resources, &request.path, &request.method, request.host.as_deref()) {
                debug!(id = %user.id, permission = %permission.name, path = %request.path, method = %request.method, "Check allowed");
                return Ok(CheckResponse::ALLOW);
            }
        }

        Ok(CheckResponse::DENY)
    }
}

/// Map a check failure for callers that must fail closed
pub fn deny_on_error(result: IamResult<CheckResponse>) -> CheckResponse {
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Check failed, denying");
            CheckResponse::DENY
        }
    }
}

impl From<CheckResponse> for bool {
    fn from(response: CheckResponse) -> Self {
        response.allowed
    }
}
