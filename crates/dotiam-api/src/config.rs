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

//! Configuration management for the IAM API

use dotiam_core::IamConfig;
use std::env;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Configuration for the IAM API
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to
    pub bind_address: String,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Engine configuration
    pub iam: IamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            iam: IamConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("DOTIAM_BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),

            max_body_size: env::var("DOTIAM_MAX_BODY_SIZE").map(|v| v.parse().unwrap_or(DEFAULT_MAX_BODY_SIZE)).unwrap_or(DEFAULT_MAX_BODY_SIZE),

            iam: IamConfig::from_env(),
        }
    }
}
