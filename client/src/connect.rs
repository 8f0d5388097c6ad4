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

//! Per-request connect driver
//!
//! One [`ConnectDriver`] runs for every `create` call that could not be served from
//! the pool. It walks an explicit state machine:
//!
//! ```text
//! ResolvingEndpoints(i) ──→ Acquiring ──→ Waiting ──┐
//!        │   ↑    │             │  ↑                │
//!        └───┘    │             │  └── retry ───────┘
//!                 │             └──→ Connecting(i) ──→ Done
//!                 └─────────────────────────────────────→ Done
//! ```
//!
//! The driver holds one unit of the factory's pending-connect counter, taken when the
//! request was accepted, and releases it only after the completion callback has run.

use crate::factory::FactoryInner;
use crate::pool::{Acquire, Outcome, RequestId};
use crate::CreateConnectionCallback;
use std::sync::Arc;
use switchyard_transport::{Connection, ConnectorInfo, Endpoint, EndpointSelection, Error, Result};
use tokio::select;
use tokio::sync::oneshot;

enum State {
    ResolvingEndpoints(usize),
    Acquiring,
    Waiting(oneshot::Receiver<Outcome>),
    Connecting(usize),
    Done(Result<(Connection, bool)>),
}

/// Holds one unit of the pending-connect counter, released when dropped
pub(crate) struct PendingConnectGuard(pub(crate) Arc<FactoryInner>);

impl Drop for PendingConnectGuard {
    fn drop(&mut self) {
        self.0.dec_pending_connect_count();
    }
}

pub(crate) struct ConnectDriver {
    factory: Arc<FactoryInner>,
    request: RequestId,
    endpoints: Vec<Endpoint>,
    has_more: bool,
    selection: EndpointSelection,
    connectors: Vec<ConnectorInfo>,
    callback: Box<dyn CreateConnectionCallback>,
    pending: PendingConnectGuard,
}

impl ConnectDriver {
    pub(crate) fn new(
        pending: PendingConnectGuard,
        endpoints: Vec<Endpoint>,
        has_more: bool,
        selection: EndpointSelection,
        callback: Box<dyn CreateConnectionCallback>,
    ) -> Self {
        let factory = pending.0.clone();
        Self {
            request: factory.next_request_id(),
            factory,
            endpoints,
            has_more,
            selection,
            connectors: Vec::new(),
            callback,
            pending,
        }
    }

    /// Drive the request to completion and report the outcome exactly once
    pub(crate) async fn run(mut self) {
        let mut state = State::ResolvingEndpoints(0);
        let result = loop {
            state = match state {
                State::ResolvingEndpoints(index) => self.resolve(index).await,
                State::Acquiring => self.acquire(),
                State::Waiting(outcome) => self.wait(outcome).await,
                State::Connecting(index) => self.connect(index).await,
                State::Done(result) => break result,
            };
        };

        match result {
            Ok((connection, compress)) => self.callback.set_connection(connection, compress),
            Err(err) => self.callback.set_exception(err),
        }
        // Must be the last action
        drop(self.pending);
    }

    async fn resolve(&mut self, index: usize) -> State {
        let endpoint = &self.endpoints[index];
        let result = match self.factory.registry.for_endpoint(endpoint) {
            Ok(transport) => {
                select! {
                    result = transport.resolve(endpoint, self.selection) => result,
                    _ = self.factory.cancel.cancelled() => Err(Error::CommunicatorDestroyed),
                }
            }
            Err(err) => Err(err),
        };
        // A transport may legitimately resolve a host to nothing
        let result = result.and_then(|connectors| {
            if connectors.is_empty() {
                Err(Error::NoAddresses(endpoint.to_string()))
            } else {
                Ok(connectors)
            }
        });

        match result {
            Ok(connectors) => {
                let endpoint = endpoint.clone();
                self.connectors.extend(
                    connectors
                        .into_iter()
                        .map(|connector| ConnectorInfo::new(connector, endpoint.clone())),
                );
                self.after_endpoint(index)
            }
            Err(err) if err.is_shutdown() => State::Done(Err(err)),
            Err(err) => {
                self.factory.metrics.resolve_failure();
                let more = self.has_more || index + 1 < self.endpoints.len();
                tracing::debug!(
                    endpoint = %self.endpoints[index],
                    error = %err,
                    "Couldn't resolve endpoint host{}",
                    if more { ", trying next endpoint" } else { ", giving up" }
                );
                if index + 1 < self.endpoints.len() || !self.connectors.is_empty() {
                    self.after_endpoint(index)
                } else {
                    State::Done(Err(err))
                }
            }
        }
    }

    fn after_endpoint(&self, index: usize) -> State {
        if index + 1 < self.endpoints.len() {
            State::ResolvingEndpoints(index + 1)
        } else {
            State::Acquiring
        }
    }

    fn acquire(&mut self) -> State {
        if self.connectors.is_empty() {
            let endpoint = self.endpoints.last().map(ToString::to_string).unwrap_or_default();
            return State::Done(Err(Error::NoAddresses(endpoint)));
        }
        match self.factory.get_connection(&self.connectors, self.request) {
            Ok(Acquire::Found(connection, compress)) => State::Done(Ok((connection, compress))),
            Ok(Acquire::Pending(outcome)) => State::Waiting(outcome),
            Ok(Acquire::Proceed) => State::Connecting(0),
            Err(err) => State::Done(Err(err)),
        }
    }

    async fn wait(&mut self, outcome: oneshot::Receiver<Outcome>) -> State {
        match outcome.await {
            Ok(Outcome::Connected(connection, compress)) => State::Done(Ok((connection, compress))),
            Ok(Outcome::Failed(err)) => State::Done(Err(err)),
            Ok(Outcome::Retry(connectors)) => {
                self.connectors = connectors;
                State::Acquiring
            }
            // The registry dropped the waiter without resolving it
            Err(_) => State::Done(Err(Error::CommunicatorDestroyed)),
        }
    }

    async fn connect(&mut self, index: usize) -> State {
        let info = self.connectors[index].clone();
        tracing::debug!(
            protocol = %info.connector.protocol(),
            connector = %info.connector,
            "Trying to establish connection"
        );
        self.factory.metrics.connect_attempt();

        let result = select! {
            result = self.establish(&info) => result,
            _ = self.factory.cancel.cancelled() => Err(Error::CommunicatorDestroyed),
        };

        match result {
            Ok(connection) => {
                let compress = self
                    .factory
                    .finish_get_connection(&self.connectors, &info, &connection);
                State::Done(Ok((connection, compress)))
            }
            Err(err) => {
                self.factory.metrics.connect_failure();
                let last = index + 1 == self.connectors.len();
                let more = !last || self.has_more;
                tracing::debug!(
                    connector = %info.connector,
                    error = %err,
                    "Failed to establish connection{}",
                    if err.is_shutdown() || !more {
                        ", giving up"
                    } else {
                        ", trying next connector"
                    }
                );
                if err.is_shutdown() || last {
                    self.factory.finish_get_connection_failed(&self.connectors, &err);
                    State::Done(Err(err))
                } else {
                    State::Connecting(index + 1)
                }
            }
        }
    }

    async fn establish(&self, info: &ConnectorInfo) -> Result<Connection> {
        let transport = self.factory.registry.get(info.connector.protocol())?;
        let transceiver = transport.connect(&info.connector).await?;
        let connection = self.factory.create_connection(transceiver, info).await?;
        connection.start().await?;
        Ok(connection)
    }
}
