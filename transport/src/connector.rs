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

//! Connectors: resolved, comparable transport addresses used as pool keys

use crate::{Endpoint, Protocol};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Resolved address of a connector
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectorAddress {
    /// IP socket address
    Inet(SocketAddr),
    /// Transport-specific address (Bluetooth device, in-memory peer, ...)
    Named(String),
}

impl fmt::Display for ConnectorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{}", addr),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// A concrete, resolved destination plus the options that affect the connection
///
/// Two connectors are equal when they would produce interchangeable connections, which
/// makes the connector the key of the outgoing connection pool and of the pending-attempt
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Connector {
    protocol: Protocol,
    address: ConnectorAddress,
    source_address: Option<IpAddr>,
    timeout: Option<Duration>,
    connection_id: String,
}

impl Connector {
    /// Create a connector for `address` carrying the options of `endpoint`
    pub fn new(endpoint: &Endpoint, address: ConnectorAddress) -> Self {
        Self {
            protocol: endpoint.protocol(),
            address,
            source_address: endpoint.source_address(),
            timeout: endpoint.timeout(),
            connection_id: endpoint.connection_id().to_string(),
        }
    }

    /// Create an IP connector for `addr` carrying the options of `endpoint`
    pub fn inet(endpoint: &Endpoint, addr: SocketAddr) -> Self {
        Self::new(endpoint, ConnectorAddress::Inet(addr))
    }

    /// Get the protocol
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Get the resolved address
    pub fn address(&self) -> &ConnectorAddress {
        &self.address
    }

    /// Get the socket address if this is an IP connector
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match &self.address {
            ConnectorAddress::Inet(addr) => Some(*addr),
            ConnectorAddress::Named(_) => None,
        }
    }

    /// Get the local address to bind before connecting
    pub fn source_address(&self) -> Option<IpAddr> {
        self.source_address
    }

    /// Get the connect timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

/// A connector paired with the endpoint that produced it for one connect attempt
///
/// Equality, ordering and hashing consider the connector only.
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    /// Resolved connector
    pub connector: Connector,
    /// Endpoint the connector was resolved from
    pub endpoint: Endpoint,
}

impl ConnectorInfo {
    /// Pair a connector with its endpoint
    pub fn new(connector: Connector, endpoint: Endpoint) -> Self {
        Self { connector, endpoint }
    }
}

impl PartialEq for ConnectorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.connector == other.connector
    }
}

impl Eq for ConnectorInfo {}

impl PartialOrd for ConnectorInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConnectorInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.connector.cmp(&other.connector)
    }
}

impl Hash for ConnectorInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.connector.hash(state);
    }
}
