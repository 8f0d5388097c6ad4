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

//! Configuration shared by outgoing and incoming connection factories

use crate::{Endpoint, Error, Result};
use std::time::Duration;

/// Process-wide overrides applied to every endpoint a factory handles
///
/// # Example
///
/// ```
/// use switchyard_transport::Overrides;
/// use std::time::Duration;
///
/// let overrides = Overrides::default()
///     .with_timeout(Duration::from_secs(5))
///     .with_compress(false);
/// assert_eq!(overrides.timeout, Some(Duration::from_secs(5)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Replaces the timeout of every endpoint
    pub timeout: Option<Duration>,
    /// Replaces the per-endpoint compression flag
    pub compress: Option<bool>,
}

impl Overrides {
    /// Override endpoint timeouts
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override endpoint compression
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = Some(compress);
        self
    }

    /// Apply the timeout override to an endpoint
    pub fn apply_timeout(&self, endpoint: Endpoint) -> Endpoint {
        match self.timeout {
            Some(timeout) => endpoint.with_timeout(Some(timeout)),
            None => endpoint,
        }
    }

    /// Resolve the compression policy for a connection reached through `endpoint`
    pub fn compress_for(&self, endpoint: &Endpoint) -> bool {
        self.compress.unwrap_or_else(|| endpoint.compress())
    }
}

/// When the active connection monitor closes connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcmClose {
    /// Never close connections
    Off,
    /// Close connections that have been idle for the ACM timeout
    #[default]
    OnIdle,
    /// Close idle connections without waiting for pending writes
    OnIdleForceful,
}

/// Active connection monitoring configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmConfig {
    /// Idle time after which a connection is considered for closing
    pub timeout: Duration,
    /// Close policy
    pub close: AcmClose,
}

impl Default for AcmConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            close: AcmClose::OnIdle,
        }
    }
}

impl AcmConfig {
    /// Create a disabled configuration
    pub fn disabled() -> Self {
        Self {
            close: AcmClose::Off,
            ..Default::default()
        }
    }

    /// Set the idle timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the close policy
    pub fn with_close(mut self, close: AcmClose) -> Self {
        self.close = close;
        self
    }

    /// Check if the monitor has anything to do
    pub fn is_enabled(&self) -> bool {
        self.close != AcmClose::Off && !self.timeout.is_zero()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.close != AcmClose::Off && self.timeout.is_zero() {
            return Err(Error::Config(
                "acm timeout must be greater than 0 when closing is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
