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

//! IAM error types

use dotiam_store::StoreError;
use thiserror::Error;

/// IAM engine errors
#[derive(Error, Debug)]
pub enum IamError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Read-only replica: {message}")]
    ReadOnly { message: String },

    #[error("Storage error during {operation}: {source}")]
    Storage {
        operation: String,
        #[source]
        source: StoreError,
    },

    #[error("Transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Backup error during {operation}: {message}")]
    Backup { operation: String, message: String },

    #[error("Unavailable: {message}")]
    Unavailable { message: String },

    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IamError {
    pub fn not_found(kind: &str, key: &str) -> Self {
        IamError::NotFound {
            message: format!("{} '{}' does not exist", kind, key),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        IamError::Conflict { message: message.into() }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        IamError::InvalidRequest { message: message.into() }
    }

    pub fn storage(operation: &str, source: StoreError) -> Self {
        IamError::Storage {
            operation: operation.to_string(),
            source,
        }
    }

    pub fn transport(operation: &str, message: impl ToString) -> Self {
        IamError::Transport {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether the engine cannot answer right now
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IamError::Storage { .. } | IamError::Backup { .. } | IamError::Unavailable { .. })
    }
}

/// Errors surfacing from the store without a named operation
impl From<StoreError> for IamError {
    fn from(err: StoreError) -> Self {
        IamError::storage("store", err)
    }
}

/// Result type for IAM operations
pub type IamResult<T> = Result<T, IamError>;

/// Attach an operation name to store errors
pub(crate) trait StoreContext<T> {
    fn op(self, operation: &str) -> IamResult<T>;
}

impl<T> StoreContext<T> for Result<T, StoreError> {
    fn op(self, operation: &str) -> IamResult<T> {
        self.map_err(|e| IamError::storage(operation, e))
    }
}
