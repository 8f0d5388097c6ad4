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

use crate::acceptor::AcceptorHandle;
use crate::config::ServerConfig;
use crate::state::FactoryState;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use switchyard_transport::{
    AcmMonitor, Adapter, CloseReason, Connection, Endpoint, FactoryMetrics, Result,
    Transceiver, Transport, TransportRegistry,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Accepts connections for one endpoint of an adapter
///
/// The factory starts in [`FactoryState::Holding`]: the acceptor listens but nothing is
/// accepted until [`activate`](Self::activate) is called. Accepted connections are
/// validated, then activated or held to follow the factory's state.
///
/// Connectionless endpoints have no acceptor. A single transceiver is bound at creation and
/// serves as the factory's only connection.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use switchyard_server::{IncomingConnectionFactory, ServerConfig};
/// use switchyard_transport::{Adapter, Endpoint, TransportRegistry};
///
/// struct Hello;
///
/// #[async_trait::async_trait]
/// impl Adapter for Hello {
///     fn name(&self) -> &str {
///         "hello"
///     }
/// }
///
/// #[tokio::main]
/// async fn main() -> switchyard_transport::Result<()> {
///     let factory = IncomingConnectionFactory::new(
///         Arc::new(TransportRegistry::default()),
///         Endpoint::tcp("127.0.0.1", 0),
///         Arc::new(Hello),
///         ServerConfig::new("hello"),
///     )
///     .await?;
///     println!("listening on {}", factory.endpoint());
///
///     factory.activate();
///     // ...
///     factory.destroy();
///     factory.wait_until_finished().await;
///     Ok(())
/// }
/// ```
pub struct IncomingConnectionFactory {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: ServerConfig,
    pub(crate) metrics: Arc<FactoryMetrics>,
    transport: Arc<dyn Transport>,
    endpoint: Endpoint,
    adapter: Arc<dyn Adapter>,
    monitor: Arc<AcmMonitor>,
    state: watch::Sender<FactoryState>,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    connections: HashSet<Connection>,
    acceptor: Option<AcceptorHandle>,
    acceptor_stopped: bool,
    restart: Option<JoinHandle<()>>,
    generation: u64,
}

impl IncomingConnectionFactory {
    /// Create a factory for `endpoint`, dispatching to `adapter`
    ///
    /// Stream endpoints start listening immediately, so port 0 is replaced by the bound
    /// port in [`endpoint`](Self::endpoint). Datagram endpoints are bound instead.
    #[tracing::instrument(skip_all, fields(endpoint = %endpoint, adapter = %config.adapter_name))]
    pub async fn new(
        registry: Arc<TransportRegistry>,
        endpoint: Endpoint,
        adapter: Arc<dyn Adapter>,
        config: ServerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let transport = registry.for_endpoint(&endpoint)?;

        let mut endpoint = config.overrides.apply_timeout(endpoint);
        if let Some(compress) = config.overrides.compress {
            endpoint = endpoint.with_compress(compress);
        }

        let mut datagram = None;
        let mut acceptor = None;
        if let Some((transceiver, bound)) = transport.transceiver(&endpoint).await? {
            tracing::debug!(endpoint = %bound, "Bound connectionless endpoint");
            endpoint = bound;
            datagram = Some(transceiver);
        } else {
            let mut listener = transport.acceptor(&endpoint, &config.adapter_name)?;
            endpoint = listener.listen().await?;
            tracing::info!(
                adapter = %config.adapter_name,
                acceptor = %listener,
                "Listening for connections at {}",
                endpoint
            );
            acceptor = Some(listener);
        }

        let (state, _) = watch::channel(FactoryState::Holding);
        let inner = Arc::new(Inner {
            metrics: Arc::new(FactoryMetrics::new()),
            monitor: AcmMonitor::new(config.acm.clone()),
            config,
            transport,
            endpoint,
            adapter,
            state,
            shared: Mutex::new(Shared::default()),
        });

        {
            let mut shared = inner.shared.lock();
            if let Some(transceiver) = datagram {
                inner.start_connection(&mut shared, transceiver, false);
            }
            if let Some(acceptor) = acceptor {
                shared.generation += 1;
                shared.acceptor = Some(AcceptorHandle::spawn(
                    acceptor,
                    Arc::downgrade(&inner),
                    shared.generation,
                    false,
                ));
            }
        }

        Ok(Self { inner })
    }

    /// Start accepting connections and activate held connections
    pub fn activate(&self) {
        self.inner.set_state(FactoryState::Active);
    }

    /// Stop accepting connections and hold existing ones
    pub fn hold(&self) {
        self.inner.set_state(FactoryState::Holding);
    }

    /// Close the acceptor and destroy every connection
    pub fn destroy(&self) {
        self.inner.set_state(FactoryState::Closed);
    }

    /// Current state
    pub fn state(&self) -> FactoryState {
        *self.inner.state.borrow()
    }

    /// Recreate the acceptor after [`stop_acceptor`](Self::stop_acceptor) or a failure
    pub fn start_acceptor(&self) {
        let inner = &self.inner;
        let mut shared = inner.shared.lock();
        if !self.state().is_open() || shared.acceptor.is_some() {
            return;
        }
        shared.acceptor_stopped = false;
        if let Some(restart) = shared.restart.take() {
            restart.abort();
        }
        drop(shared);
        inner.schedule_restart(std::time::Duration::ZERO);
    }

    /// Close the acceptor without scheduling a restart
    ///
    /// Existing connections are unaffected.
    pub fn stop_acceptor(&self) {
        let mut shared = self.inner.shared.lock();
        if !self.state().is_open() {
            return;
        }
        shared.acceptor_stopped = true;
        if let Some(restart) = shared.restart.take() {
            restart.abort();
        }
        // The task closes the acceptor on its own; its report is ignored once detached
        if let Some(acceptor) = shared.acceptor.take() {
            tracing::debug!(endpoint = %self.inner.endpoint, "Stopping acceptor");
            acceptor.finish();
        }
    }

    /// Wait until the factory is no longer active and no connection is dispatching
    pub async fn wait_until_holding(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state >= FactoryState::Holding).await;

        let connections: Vec<Connection> =
            self.inner.shared.lock().connections.iter().cloned().collect();
        for connection in connections {
            connection.wait_until_holding().await;
        }
    }

    /// Wait until the acceptor is closed and every connection has finished
    ///
    /// Only returns after [`destroy`](Self::destroy) has been called.
    pub async fn wait_until_finished(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|state| *state == FactoryState::Finished).await;

        let connections: Vec<Connection> =
            self.inner.shared.lock().connections.iter().cloned().collect();
        futures::future::join_all(connections.iter().map(Connection::wait_until_finished)).await;

        let mut shared = self.inner.shared.lock();
        shared.connections.clear();
        drop(shared);
        self.inner.monitor.destroy();
        tracing::debug!(endpoint = %self.inner.endpoint, "Incoming connection factory finished");
    }

    /// Snapshot of the Active or Holding connections
    pub fn connections(&self) -> Vec<Connection> {
        let mut shared = self.inner.shared.lock();
        self.inner.reap(&mut shared);
        shared
            .connections
            .iter()
            .filter(|connection| connection.is_active_or_holding())
            .cloned()
            .collect()
    }

    /// Flush batched requests on every usable connection
    pub fn flush_async_batch_requests(&self) {
        for connection in self.connections() {
            if let Err(err) = connection.flush_batch_requests() {
                tracing::trace!(connection = %connection, error = %err, "Batch flush failed");
            }
        }
    }

    /// Check if `endpoint` designates this factory
    pub fn is_local(&self, endpoint: &Endpoint) -> bool {
        if let Some(published) = &self.inner.config.published_endpoint {
            if published.equivalent(endpoint) {
                return true;
            }
        }
        self.inner.endpoint.equivalent(endpoint)
    }

    /// The bound endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The endpoint advertised to peers
    pub fn published_endpoint(&self) -> &Endpoint {
        self.inner
            .config
            .published_endpoint
            .as_ref()
            .unwrap_or(&self.inner.endpoint)
    }

    /// Check if an acceptor is running
    pub fn is_accepting(&self) -> bool {
        self.inner.shared.lock().acceptor.is_some()
    }

    /// The adapter accepted connections dispatch to
    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    /// Counters for this factory
    pub fn metrics(&self) -> Arc<FactoryMetrics> {
        self.inner.metrics.clone()
    }
}

impl Drop for IncomingConnectionFactory {
    fn drop(&mut self) {
        if self.state().is_open() {
            tracing::warn!(
                endpoint = %self.inner.endpoint,
                "Incoming connection factory dropped without being destroyed"
            );
            self.inner.set_state(FactoryState::Closed);
        }
    }
}

impl std::fmt::Display for IncomingConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.endpoint)
    }
}

impl std::fmt::Debug for IncomingConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingConnectionFactory")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .field("adapter", &self.inner.adapter.name())
            .finish()
    }
}

impl Inner {
    fn set_state(self: &Arc<Self>, next: FactoryState) {
        let mut shared = self.shared.lock();
        let changed = self.state.send_if_modified(|state| {
            if !state.can_transition_to(next) {
                return false;
            }
            *state = next;
            true
        });
        if !changed {
            return;
        }

        match next {
            FactoryState::Active => {
                if let Some(acceptor) = shared.acceptor.as_ref() {
                    tracing::info!(
                        adapter = %self.config.adapter_name,
                        "Accepting {} connections at {}",
                        self.endpoint.protocol(),
                        self.endpoint
                    );
                    acceptor.register();
                }
                for connection in &shared.connections {
                    connection.activate();
                }
            }
            FactoryState::Holding => {
                if let Some(acceptor) = shared.acceptor.as_ref() {
                    tracing::info!(
                        adapter = %self.config.adapter_name,
                        "Holding {} connections at {}",
                        self.endpoint.protocol(),
                        self.endpoint
                    );
                    acceptor.unregister();
                }
                for connection in &shared.connections {
                    connection.hold();
                }
            }
            FactoryState::Closed => {
                if let Some(restart) = shared.restart.take() {
                    restart.abort();
                }
                match shared.acceptor.as_ref() {
                    Some(acceptor) => {
                        tracing::info!(
                            adapter = %self.config.adapter_name,
                            "Stopping to accept {} connections at {}",
                            self.endpoint.protocol(),
                            self.endpoint
                        );
                        acceptor.finish();
                    }
                    None => {
                        self.state.send_replace(FactoryState::Finished);
                    }
                }
                for connection in &shared.connections {
                    connection.destroy(CloseReason::AdapterDeactivated);
                }
            }
            FactoryState::Finished => {
                shared.acceptor = None;
            }
        }
    }

    /// Called by the accept task once its acceptor is closed
    ///
    /// `close` is false when the acceptor failed on its own.
    pub(crate) fn acceptor_finished(self: &Arc<Self>, generation: u64, close: bool) {
        let mut shared = self.shared.lock();
        if shared
            .acceptor
            .as_ref()
            .is_none_or(|acceptor| acceptor.generation() != generation)
        {
            return;
        }

        let state = *self.state.borrow();
        if state.is_open() {
            shared.acceptor = None;
            if shared.acceptor_stopped || close {
                return;
            }
            drop(shared);
            self.schedule_restart(self.config.acceptor_retry_delay);
        } else if state == FactoryState::Closed {
            drop(shared);
            self.set_state(FactoryState::Finished);
        }
    }

    fn schedule_restart(self: &Arc<Self>, delay: std::time::Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            restart_acceptor(weak).await;
        });
        let mut shared = self.shared.lock();
        if let Some(previous) = shared.restart.replace(task) {
            previous.abort();
        }
    }

    /// Turn an accepted transceiver into a connection
    pub(crate) fn accepted(self: &Arc<Self>, transceiver: Box<dyn Transceiver>) {
        let mut shared = self.shared.lock();
        self.reap(&mut shared);
        if !self.state.borrow().is_open() {
            drop(shared);
            tokio::spawn(async move {
                let mut transceiver = transceiver;
                let _ = transceiver.close().await;
            });
            return;
        }
        self.metrics.connection_accepted();
        self.start_connection(&mut shared, transceiver, true);
    }

    fn start_connection(
        self: &Arc<Self>,
        shared: &mut Shared,
        transceiver: Box<dyn Transceiver>,
        monitored: bool,
    ) {
        let monitor = monitored.then_some(&self.monitor);
        let connection = Connection::new(transceiver, self.endpoint.clone(), None, monitor);
        connection.set_adapter(Some(self.adapter.clone()));
        shared.connections.insert(connection.clone());
        self.metrics.connection_created();

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let started = connection.start().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match started {
                Ok(()) => inner.connection_started(&connection),
                Err(err) => {
                    if inner.config.warn_connections && !err.is_shutdown() {
                        tracing::warn!(
                            connection = %connection,
                            error = %err,
                            "Connection validation failed"
                        );
                    } else {
                        tracing::debug!(
                            connection = %connection,
                            error = %err,
                            "Connection validation failed"
                        );
                    }
                }
            }
        });
    }

    fn connection_started(&self, connection: &Connection) {
        let shared = self.shared.lock();
        if !shared.connections.contains(connection) {
            return;
        }
        if *self.state.borrow() == FactoryState::Active {
            connection.activate();
        }
    }

    fn reap(&self, shared: &mut Shared) {
        let reaped = self.monitor.swap_reaped_connections();
        if reaped.is_empty() {
            return;
        }
        let count = reaped.len() as u64;
        let mut removed = 0;
        for connection in &reaped {
            if shared.connections.remove(connection) {
                removed += 1;
            }
        }
        self.metrics.connections_reaped(count);
        self.metrics.connections_removed(removed);
    }
}

async fn restart_acceptor(factory: Weak<Inner>) {
    let Some(inner) = factory.upgrade() else {
        return;
    };
    {
        let shared = inner.shared.lock();
        if shared.acceptor_stopped || shared.acceptor.is_some() || !inner.state.borrow().is_open() {
            return;
        }
    }

    let created = match inner
        .transport
        .acceptor(&inner.endpoint, &inner.config.adapter_name)
    {
        Ok(mut acceptor) => acceptor.listen().await.map(|_| acceptor),
        Err(err) => Err(err),
    };

    let acceptor = match created {
        Ok(acceptor) => acceptor,
        Err(err) => {
            tracing::error!(
                endpoint = %inner.endpoint,
                error = %err,
                "Acceptor creation failed, retrying in {:?}",
                inner.config.acceptor_retry_delay
            );
            inner.schedule_restart(inner.config.acceptor_retry_delay);
            return;
        }
    };

    let rejected = {
        let mut shared = inner.shared.lock();
        let state = *inner.state.borrow();
        if shared.acceptor_stopped || shared.acceptor.is_some() || !state.is_open() {
            Some(acceptor)
        } else {
            tracing::info!(
                adapter = %inner.config.adapter_name,
                acceptor = %acceptor,
                "Listening for connections at {}",
                inner.endpoint
            );
            shared.generation += 1;
            let generation = shared.generation;
            shared.acceptor = Some(AcceptorHandle::spawn(
                acceptor,
                factory.clone(),
                generation,
                state == FactoryState::Active,
            ));
            None
        }
    };
    if let Some(mut acceptor) = rejected {
        acceptor.close().await;
    }
}
