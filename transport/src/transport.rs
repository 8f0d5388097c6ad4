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

//! Per-protocol transport capabilities and the registry dispatching over them

use crate::{
    Acceptor, Connector, Endpoint, EndpointSelection, Error, Protocol, Result, TcpTransport,
    Transceiver, UdpTransport,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Capability set of one protocol
///
/// Factories never depend on concrete transports; they look the transport up in a
/// [`TransportRegistry`] by the endpoint's protocol and work through this trait.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Protocol served by this transport
    fn protocol(&self) -> Protocol;

    /// Resolve an endpoint into connectors, in the order they should be tried
    async fn resolve(
        &self,
        endpoint: &Endpoint,
        selection: EndpointSelection,
    ) -> Result<Vec<Connector>>;

    /// Establish an outgoing connection to `connector`
    async fn connect(&self, connector: &Connector) -> Result<Box<dyn Transceiver>>;

    /// Create an acceptor for a stream endpoint
    ///
    /// The acceptor does not bind until [`Acceptor::listen`] is called.
    fn acceptor(&self, endpoint: &Endpoint, adapter_name: &str) -> Result<Box<dyn Acceptor>> {
        let _ = adapter_name;
        Err(Error::Unsupported(format!(
            "`{}` endpoints cannot accept connections",
            endpoint.protocol()
        )))
    }

    /// Bind a connectionless endpoint
    ///
    /// Returns `None` for connection-oriented transports, otherwise the bound transceiver
    /// together with the endpoint actually bound.
    async fn transceiver(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Option<(Box<dyn Transceiver>, Endpoint)>> {
        let _ = endpoint;
        Ok(None)
    }
}

/// Registry of transports keyed by protocol
///
/// # Example
///
/// ```
/// use switchyard_transport::{Protocol, TransportRegistry};
///
/// let registry = TransportRegistry::default();
/// assert!(registry.get(Protocol::Tcp).is_ok());
/// assert!(registry.get(Protocol::Bt).is_err());
/// ```
pub struct TransportRegistry {
    transports: DashMap<Protocol, Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            transports: DashMap::new(),
        }
    }

    /// Register a transport, replacing any previous one for the same protocol
    pub fn register(&self, transport: Arc<dyn Transport>) {
        let protocol = transport.protocol();
        if self.transports.insert(protocol, transport).is_some() {
            tracing::debug!(%protocol, "Replaced transport");
        }
    }

    /// Builder-style registration
    pub fn with(self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    /// Look up the transport for a protocol
    pub fn get(&self, protocol: Protocol) -> Result<Arc<dyn Transport>> {
        self.transports
            .get(&protocol)
            .map(|entry| entry.value().clone())
            .ok_or(Error::UnsupportedProtocol(protocol))
    }

    /// Look up the transport serving an endpoint
    pub fn for_endpoint(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        self.get(endpoint.protocol())
    }

    /// Protocols currently registered
    pub fn protocols(&self) -> Vec<Protocol> {
        let mut protocols: Vec<_> = self.transports.iter().map(|entry| *entry.key()).collect();
        protocols.sort();
        protocols
    }
}

impl Default for TransportRegistry {
    /// Registry with the built-in TCP and UDP transports
    fn default() -> Self {
        Self::new()
            .with(Arc::new(TcpTransport::new()))
            .with(Arc::new(UdpTransport::new()))
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = TransportRegistry::default();
        assert_eq!(registry.protocols(), vec![Protocol::Tcp, Protocol::Udp]);
        assert!(matches!(
            registry.get(Protocol::Ssl),
            Err(Error::UnsupportedProtocol(Protocol::Ssl))
        ));
    }

    #[test]
    fn test_register_replaces() {
        let registry = TransportRegistry::new();
        registry.register(Arc::new(TcpTransport::new()));
        registry.register(Arc::new(TcpTransport::new()));
        assert_eq!(registry.protocols(), vec![Protocol::Tcp]);

        let endpoint = Endpoint::tcp("localhost", 0);
        assert_eq!(
            registry.for_endpoint(&endpoint).unwrap().protocol(),
            Protocol::Tcp
        );
    }
}
