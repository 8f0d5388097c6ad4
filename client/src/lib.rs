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

//! # Switchyard Client
//!
//! Outgoing connection establishment and pooling.
//!
//! [`OutgoingConnectionFactory`] hands out connections to any of a list of endpoints. It
//! reuses pooled connections where possible, resolves endpoints to connectors, and dials
//! the connectors in order until one succeeds. Concurrent requests that target a connector
//! already being dialed wait for that attempt instead of opening a second connection.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchyard_client::{ClientConfig, OutgoingConnectionFactory};
//! use switchyard_transport::{Endpoint, EndpointSelection, TransportRegistry};
//!
//! #[tokio::main]
//! async fn main() -> switchyard_transport::Result<()> {
//!     let registry = Arc::new(TransportRegistry::default());
//!     let factory = OutgoingConnectionFactory::new(registry, ClientConfig::default())?;
//!
//!     let (connection, _compress) = factory
//!         .connect(
//!             vec![Endpoint::tcp("localhost", 10000)],
//!             false,
//!             EndpointSelection::Ordered,
//!         )
//!         .await?;
//!     connection.send(bytes::Bytes::from_static(b"hello"))?;
//!
//!     factory.destroy();
//!     factory.wait_until_finished().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Callbacks
//!
//! [`OutgoingConnectionFactory::create`] reports through a [`CreateConnectionCallback`].
//! Any `Fn(Result<(Connection, bool)>)` closure is a callback.

mod callback;
mod config;
mod connect;
mod factory;
mod pool;
mod router;

pub use self::callback::CreateConnectionCallback;
pub use self::config::ClientConfig;
pub use self::factory::OutgoingConnectionFactory;
pub use self::router::RouterInfo;
