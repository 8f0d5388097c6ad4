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

//! Server configuration

use std::time::Duration;
use switchyard_transport::{AcmConfig, Endpoint, Error, Overrides, Result};

/// Incoming connection factory configuration
///
/// Use the builder methods to customize the configuration.
///
/// # Example
///
/// ```
/// use switchyard_server::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::new("hello")
///     .with_warn_connections(true)
///     .with_acceptor_retry_delay(Duration::from_millis(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the adapter the factory accepts connections for
    pub adapter_name: String,

    /// Overrides applied to the listening endpoint
    pub overrides: Overrides,

    /// Monitoring of accepted connections
    pub acm: AcmConfig,

    /// Log unexpected accept failures as warnings
    pub warn_connections: bool,

    /// Delay before a failed acceptor is recreated
    pub acceptor_retry_delay: Duration,

    /// Endpoint advertised to peers instead of the bound one
    pub published_endpoint: Option<Endpoint>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            adapter_name: "adapter".to_string(),
            overrides: Overrides::default(),
            acm: AcmConfig::default(),
            warn_connections: false,
            acceptor_retry_delay: Duration::from_secs(1),
            published_endpoint: None,
        }
    }
}

impl ServerConfig {
    /// Create a configuration for the named adapter
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            ..Default::default()
        }
    }

    /// Set the endpoint overrides
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Set the connection monitoring configuration
    pub fn with_acm(mut self, acm: AcmConfig) -> Self {
        self.acm = acm;
        self
    }

    /// Enable or disable warnings for accept failures
    pub fn with_warn_connections(mut self, warn: bool) -> Self {
        self.warn_connections = warn;
        self
    }

    /// Set the acceptor retry delay
    pub fn with_acceptor_retry_delay(mut self, delay: Duration) -> Self {
        self.acceptor_retry_delay = delay;
        self
    }

    /// Set the published endpoint
    pub fn with_published_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.published_endpoint = Some(endpoint);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.adapter_name.is_empty() {
            return Err(Error::Config("adapter_name must not be empty".to_string()));
        }

        if self.acceptor_retry_delay.is_zero() {
            return Err(Error::Config(
                "acceptor_retry_delay must be greater than 0".to_string(),
            ));
        }

        if self.overrides.timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "timeout override must be greater than 0".to_string(),
            ));
        }

        self.acm.validate()
    }
}
