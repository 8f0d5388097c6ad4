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

//! Switchyard Transport Layer
//!
//! Shared building blocks for the outgoing and incoming connection factories:
//!
//! - [`Endpoint`] and [`Connector`] values describing where to connect
//! - [`Transport`], [`Transceiver`] and [`Acceptor`] traits implemented per protocol,
//!   with built-in [`TcpTransport`] and [`UdpTransport`] and a [`TransportRegistry`]
//! - [`Connection`], a lifecycle state machine around one transceiver
//! - [`AcmMonitor`], which tracks connections and collects finished ones for reaping
//! - Lock-free [`FactoryMetrics`] and the shared [`Error`] type
//!
//! # Architecture
//!
//! ```text
//! TransportRegistry ── Transport ── resolve ──→ Connector
//!                          │
//!                          ├── connect ──→ Transceiver ──→ Connection ⇄ ConnectionWorker
//!                          └── acceptor ─→ Acceptor                         │
//!                                                                   AcmMonitor (reap)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use switchyard_transport::{Connection, Endpoint, EndpointSelection, TransportRegistry};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TransportRegistry::default();
//!     let endpoint = Endpoint::tcp("127.0.0.1", 4061);
//!     let transport = registry.for_endpoint(&endpoint)?;
//!
//!     let connectors = transport.resolve(&endpoint, EndpointSelection::Ordered).await?;
//!     let transceiver = transport.connect(&connectors[0]).await?;
//!     let connection = Connection::new(transceiver, endpoint, Some(connectors[0].clone()), None);
//!     connection.start().await?;
//!     connection.activate();
//!     connection.send(Bytes::from_static(b"hello"))?;
//!     connection.close();
//!     connection.wait_until_finished().await;
//!     Ok(())
//! }
//! ```

mod acm;
mod config;
mod connection;
mod connector;
mod endpoint;
mod error;
mod handler;
mod metrics;
mod tcp;
mod transceiver;
mod transport;
mod types;
mod udp;
mod worker;

pub use acm::AcmMonitor;
pub use config::{AcmClose, AcmConfig, Overrides};
pub use connection::Connection;
pub use connector::{Connector, ConnectorAddress, ConnectorInfo};
pub use endpoint::Endpoint;
pub use error::{Error, ErrorKind, Result, is_resource_exhausted};
pub use handler::{Adapter, same_adapter};
pub use self::metrics::{FactoryMetrics, MetricsSnapshot};
pub use tcp::{TcpAcceptor, TcpTransceiver, TcpTransport};
pub use transceiver::{Acceptor, Transceiver};
pub use transport::{Transport, TransportRegistry};
pub use types::{
    CloseReason, ConnectionId, ConnectionState, ConnectionTransition, EndpointSelection,
    Protocol, SocketOperation,
};
pub use udp::{MAX_DATAGRAM_SIZE, UdpTransceiver, UdpTransport};
