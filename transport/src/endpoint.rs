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

//! Endpoints: immutable descriptions of a transport destination

use crate::Protocol;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Immutable description of a transport target
///
/// Endpoints are independent of address resolution: a single endpoint may resolve to
/// several [`Connector`](crate::Connector)s. All `with_*` methods return a new value and
/// leave the receiver untouched; when nothing changes the returned value is equal to the
/// input, so endpoints can be compared and hashed by value.
///
/// # Example
///
/// ```
/// use switchyard_transport::{Endpoint, Protocol};
/// use std::time::Duration;
///
/// let endpoint = Endpoint::new(Protocol::Tcp, "localhost", 4061)
///     .with_timeout(Some(Duration::from_secs(5)))
///     .with_compress(true);
/// assert_eq!(endpoint.to_string(), "tcp -h localhost -p 4061 -t 5000 -z");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    protocol: Protocol,
    host: String,
    port: u16,
    timeout: Option<Duration>,
    compress: bool,
    connection_id: String,
    source_address: Option<IpAddr>,
}

impl Endpoint {
    /// Create an endpoint with no timeout and compression disabled
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
            timeout: None,
            compress: false,
            connection_id: String::new(),
            source_address: None,
        }
    }

    /// Shorthand for a TCP endpoint
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Protocol::Tcp, host, port)
    }

    /// Shorthand for a UDP endpoint
    pub fn udp(host: impl Into<String>, port: u16) -> Self {
        Self::new(Protocol::Udp, host, port)
    }

    /// Get the protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Get the host name or address
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the connect/validation timeout (`None` means infinite)
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the compression flag
    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Check if the endpoint uses a secure protocol
    pub fn secure(&self) -> bool {
        self.protocol.is_secure()
    }

    /// Check if the endpoint is connectionless
    pub fn datagram(&self) -> bool {
        self.protocol.is_datagram()
    }

    /// Get the connection ID used to force distinct connections to the same address
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Get the local address outgoing connections bind to
    pub fn source_address(&self) -> Option<IpAddr> {
        self.source_address
    }

    /// Return an endpoint with the given timeout
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        Self { timeout, ..self }
    }

    /// Return an endpoint with the given compression flag
    pub fn with_compress(self, compress: bool) -> Self {
        Self { compress, ..self }
    }

    /// Return an endpoint with the given connection ID
    pub fn with_connection_id(self, connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            ..self
        }
    }

    /// Return an endpoint with the given host
    pub fn with_host(self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self
        }
    }

    /// Return an endpoint with the given port
    ///
    /// Used by acceptors to publish the port actually bound when listening on port 0.
    pub fn with_port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    /// Return an endpoint binding outgoing connections to `source`
    pub fn with_source_address(self, source: Option<IpAddr>) -> Self {
        Self {
            source_address: source,
            ..self
        }
    }

    /// Check if two endpoints designate the same listening address
    ///
    /// Only the protocol, host and port are compared; timeouts, compression and
    /// connection IDs are ignored.
    pub fn equivalent(&self, other: &Endpoint) -> bool {
        self.protocol == other.protocol && self.host == other.host && self.port == other.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.protocol)?;
        if !self.host.is_empty() {
            if self.host.contains(':') {
                write!(f, " -h \"{}\"", self.host)?;
            } else {
                write!(f, " -h {}", self.host)?;
            }
        }
        write!(f, " -p {}", self.port)?;
        if let Some(source) = self.source_address {
            write!(f, " --sourceAddress {}", source)?;
        }
        match self.timeout {
            Some(timeout) => write!(f, " -t {}", timeout.as_millis())?,
            None => write!(f, " -t infinite")?,
        }
        if self.compress {
            write!(f, " -z")?;
        }
        Ok(())
    }
}
