//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Client configuration

use std::time::Duration;
use switchyard_transport::{AcmConfig, Overrides, Result};

/// Outgoing connection factory configuration
///
/// # Example
///
/// ```
/// use switchyard_client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_timeout_override(Duration::from_secs(5))
///     .with_compress_override(false);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Overrides applied to every endpoint passed to the factory
    pub overrides: Overrides,

    /// Monitoring of pooled connections
    pub acm: AcmConfig,
}

impl ClientConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the endpoint overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Override the timeout of every endpoint
    pub fn with_timeout_override(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    /// Override the compression flag of every endpoint
    pub fn with_compress_override(mut self, compress: bool) -> Self {
        self.overrides.compress = Some(compress);
        self
    }

    /// Set the connection monitoring configuration
    pub fn with_acm(mut self, acm: AcmConfig) -> Self {
        self.acm = acm;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.overrides.timeout == Some(Duration::ZERO) {
            return Err(switchyard_transport::Error::Config(
                "timeout override must be greater than 0".to_string(),
            ));
        }
        self.acm.validate()
    }
}
