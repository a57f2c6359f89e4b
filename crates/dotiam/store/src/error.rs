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

//! Store error types

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Corrupt export stream: {message}")]
    Corrupt { message: String },

    #[error("Invalid key: {message}")]
    InvalidKey { message: String },
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        StoreError::Serialization { message: err.to_string() }
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        StoreError::Corrupt { message: err.to_string() }
    }
}

/// Type alias for store operation results
pub type StoreResult<T> = Result<T, StoreError>;
