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

use crate::callback::CreateConnectionCallback;
use crate::config::ClientConfig;
use crate::connect::{ConnectDriver, PendingConnectGuard};
use crate::pool::{Acquire, Deliveries, Pool, RequestId};
use crate::router::RouterInfo;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use switchyard_transport::{
    same_adapter, AcmMonitor, Adapter, CloseReason, Connection, ConnectorInfo, Endpoint,
    EndpointSelection, Error, FactoryMetrics, Result, Transceiver, TransportRegistry,
};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Pool of outgoing connections with de-duplicated establishment
///
/// At most one connection attempt is in flight per connector. Concurrent requests for a
/// connector that is being dialed wait for that attempt instead of dialing again. Pooled
/// connections that finish are reaped through the connection monitor.
///
/// Shutdown is two-phase: [`destroy`](Self::destroy) fails new requests, cancels in-flight
/// attempts and closes pooled connections; [`wait_until_finished`](Self::wait_until_finished)
/// waits until every attempt has reported and every connection has finished.
pub struct OutgoingConnectionFactory {
    inner: Arc<FactoryInner>,
}

pub(crate) struct FactoryInner {
    pub(crate) config: ClientConfig,
    pub(crate) registry: Arc<TransportRegistry>,
    pub(crate) metrics: Arc<FactoryMetrics>,
    pub(crate) cancel: CancellationToken,
    monitor: Arc<AcmMonitor>,
    pool: Mutex<Pool>,
    notify: Notify,
    runtime: Handle,
    next_request: AtomicU64,
}

impl OutgoingConnectionFactory {
    /// Create a factory dialing through the transports in `registry`
    ///
    /// Must be called from within a tokio runtime; connection attempts are spawned onto
    /// that runtime, including attempts started from [`connect_blocking`](Self::connect_blocking).
    pub fn new(registry: Arc<TransportRegistry>, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|err| Error::Config(format!("no tokio runtime available: {err}")))?;
        Ok(Self {
            inner: Arc::new(FactoryInner {
                monitor: AcmMonitor::new(config.acm.clone()),
                config,
                registry,
                metrics: Arc::new(FactoryMetrics::new()),
                cancel: CancellationToken::new(),
                pool: Mutex::new(Pool::default()),
                notify: Notify::new(),
                runtime,
                next_request: AtomicU64::new(1),
            }),
        })
    }

    /// Request a connection to any of `endpoints`
    ///
    /// Returns immediately. When a pooled connection is available the callback is invoked
    /// before this call returns, otherwise it is invoked from a runtime task.
    pub fn create(
        &self,
        endpoints: Vec<Endpoint>,
        has_more: bool,
        selection: EndpointSelection,
        callback: impl CreateConnectionCallback,
    ) {
        self.create_boxed(endpoints, has_more, selection, Box::new(callback));
    }

    fn create_boxed(
        &self,
        endpoints: Vec<Endpoint>,
        has_more: bool,
        selection: EndpointSelection,
        callback: Box<dyn CreateConnectionCallback>,
    ) {
        if endpoints.is_empty() {
            callback.set_exception(Error::Config("no endpoints to connect to".to_string()));
            return;
        }

        let overrides = &self.inner.config.overrides;
        let endpoints: Vec<Endpoint> = endpoints
            .into_iter()
            .map(|endpoint| overrides.apply_timeout(endpoint))
            .collect();

        let found = {
            let mut pool = self.inner.pool.lock();
            if pool.destroyed {
                Err(Error::CommunicatorDestroyed)
            } else {
                let found = pool.find_by_endpoints(&endpoints, overrides);
                if found.is_none() {
                    pool.pending_connect_count += 1;
                }
                Ok(found)
            }
        };

        let pending = match found {
            Err(err) => return callback.set_exception(err),
            Ok(Some((connection, compress))) => {
                self.inner.metrics.pool_hit();
                return callback.set_connection(connection, compress);
            }
            Ok(None) => PendingConnectGuard(self.inner.clone()),
        };

        let driver = ConnectDriver::new(pending, endpoints, has_more, selection, callback);
        self.inner.runtime.spawn(driver.run());
    }

    /// Obtain a connection to any of `endpoints`
    ///
    /// Resolves with the connection and the compression policy to use on it.
    #[instrument(skip(self, endpoints), fields(endpoints = endpoints.len()))]
    pub async fn connect(
        &self,
        endpoints: Vec<Endpoint>,
        has_more: bool,
        selection: EndpointSelection,
    ) -> Result<(Connection, bool)> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.create(endpoints, has_more, selection, move |result| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(result);
            }
        });
        rx.await.unwrap_or(Err(Error::CommunicatorDestroyed))
    }

    /// Blocking form of [`connect`](Self::connect)
    ///
    /// Must not be called from a runtime worker thread.
    pub fn connect_blocking(
        &self,
        endpoints: Vec<Endpoint>,
        has_more: bool,
        selection: EndpointSelection,
    ) -> Result<(Connection, bool)> {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.create(endpoints, has_more, selection, move |result| {
            let _ = tx.send(result);
        });
        rx.recv().unwrap_or(Err(Error::CommunicatorDestroyed))
    }

    /// Associate pooled connections to the router's client endpoints with its adapter
    pub fn set_router_info(&self, router: &RouterInfo) -> Result<()> {
        let overrides = &self.inner.config.overrides;
        let endpoints: Vec<Endpoint> = router
            .client_endpoints()
            .iter()
            .map(|endpoint| overrides.apply_timeout(endpoint.clone()).with_compress(false))
            .collect();

        let pool = self.inner.pool.lock();
        if pool.destroyed {
            return Err(Error::CommunicatorDestroyed);
        }
        for connection in pool.all_connections() {
            if endpoints.contains(connection.endpoint()) {
                connection.set_adapter(router.adapter());
            }
        }
        Ok(())
    }

    /// Detach `adapter` from every pooled connection that dispatches to it
    pub fn remove_adapter(&self, adapter: &Arc<dyn Adapter>) {
        let pool = self.inner.pool.lock();
        if pool.destroyed {
            return;
        }
        for connection in pool.all_connections() {
            if connection
                .adapter()
                .is_some_and(|current| same_adapter(&current, adapter))
            {
                connection.set_adapter(None);
            }
        }
    }

    /// Flush batched requests on every usable pooled connection
    pub fn flush_async_batch_requests(&self) {
        let connections = {
            let pool = self.inner.pool.lock();
            if pool.destroyed {
                return;
            }
            pool.all_connections()
                .filter(|connection| connection.is_active_or_holding())
                .cloned()
                .collect::<Vec<_>>()
        };
        for connection in connections {
            if let Err(err) = connection.flush_batch_requests() {
                tracing::trace!(connection = %connection, error = %err, "Batch flush failed");
            }
        }
    }

    /// Begin shutdown
    ///
    /// New requests fail with [`Error::CommunicatorDestroyed`], in-flight attempts are
    /// cancelled and pooled connections are closed. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Wait until every attempt has reported and every pooled connection has finished
    ///
    /// Only returns after [`destroy`](Self::destroy) has been called.
    pub async fn wait_until_finished(&self) {
        let inner = &self.inner;
        let connections = loop {
            let notified = inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let pool = inner.pool.lock();
                if pool.is_drained() {
                    break pool.all_connections().cloned().collect::<Vec<_>>();
                }
            }
            notified.await;
        };

        futures::future::join_all(connections.iter().map(Connection::wait_until_finished)).await;

        let mut pool = inner.pool.lock();
        let reaped = inner.monitor.swap_reaped_connections();
        let count = reaped.len() as u64;
        let removed = pool.reap(reaped);
        inner.metrics.connections_reaped(count);
        inner.metrics.connections_removed(removed as u64);
        debug_assert_eq!(pool.len(), 0, "finished connections must all be reaped");
        pool.clear();
        drop(pool);
        inner.monitor.destroy();
        tracing::debug!("Outgoing connection factory finished");
    }

    /// Snapshot of the Active or Holding pooled connections
    pub fn connections(&self) -> Vec<Connection> {
        self.inner
            .pool
            .lock()
            .all_connections()
            .filter(|connection| connection.is_active_or_holding())
            .cloned()
            .collect()
    }

    /// Counters for this factory
    pub fn metrics(&self) -> Arc<FactoryMetrics> {
        self.inner.metrics.clone()
    }

    /// Check if [`destroy`](Self::destroy) has been called
    pub fn is_destroyed(&self) -> bool {
        self.inner.pool.lock().destroyed
    }
}

impl Drop for OutgoingConnectionFactory {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            tracing::warn!("Outgoing connection factory dropped without being destroyed");
            self.inner.destroy();
        }
    }
}

impl std::fmt::Debug for OutgoingConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.inner.pool.lock();
        f.debug_struct("OutgoingConnectionFactory")
            .field("destroyed", &pool.destroyed)
            .field("connections", &pool.len())
            .field("pending_connects", &pool.pending_connect_count)
            .finish()
    }
}

impl FactoryInner {
    pub(crate) fn next_request_id(&self) -> RequestId {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn dec_pending_connect_count(&self) {
        let mut pool = self.pool.lock();
        debug_assert!(pool.pending_connect_count > 0);
        pool.pending_connect_count = pool.pending_connect_count.saturating_sub(1);
        if pool.is_drained() {
            self.notify.notify_waiters();
        }
    }

    /// Reap finished connections, then look up or claim `connectors`
    pub(crate) fn get_connection(
        &self,
        connectors: &[ConnectorInfo],
        requester: RequestId,
    ) -> Result<Acquire> {
        let mut pool = self.pool.lock();
        if pool.destroyed {
            return Err(Error::CommunicatorDestroyed);
        }

        let reaped = self.monitor.swap_reaped_connections();
        if !reaped.is_empty() {
            let count = reaped.len() as u64;
            let removed = pool.reap(reaped);
            self.metrics.connections_reaped(count);
            self.metrics.connections_removed(removed as u64);
        }

        let acquire = pool.acquire(requester, connectors, &self.config.overrides);
        match &acquire {
            Acquire::Found(..) => self.metrics.pool_hit(),
            Acquire::Pending(_) => self.metrics.dedup_wait(),
            Acquire::Proceed => {}
        }
        Ok(acquire)
    }

    /// Wrap a dialed transceiver into a pooled connection
    ///
    /// On a destroyed factory the transceiver is closed instead.
    pub(crate) async fn create_connection(
        &self,
        transceiver: Box<dyn Transceiver>,
        info: &ConnectorInfo,
    ) -> Result<Connection> {
        let created = {
            let mut pool = self.pool.lock();
            if pool.destroyed {
                Err(transceiver)
            } else {
                let connection = Connection::new(
                    transceiver,
                    info.endpoint.clone().with_compress(false),
                    Some(info.connector.clone()),
                    Some(&self.monitor),
                );
                pool.insert(info.connector.clone(), connection.clone());
                Ok(connection)
            }
        };

        match created {
            Ok(connection) => {
                self.metrics.connection_created();
                Ok(connection)
            }
            Err(mut transceiver) => {
                let _ = transceiver.close().await;
                Err(Error::CommunicatorDestroyed)
            }
        }
    }

    /// Resolve the attempt for `connectors` with `connection`, dialed through `winner`
    ///
    /// Returns the compression policy for the requester that made the attempt.
    pub(crate) fn finish_get_connection(
        &self,
        connectors: &[ConnectorInfo],
        winner: &ConnectorInfo,
        connection: &Connection,
    ) -> bool {
        let compress = self.config.overrides.compress_for(&winner.endpoint);
        let deliveries = {
            let mut pool = self.pool.lock();
            if !pool.destroyed {
                connection.activate();
            }
            let deliveries =
                pool.finish_success(connectors, &winner.connector, connection, compress);
            if pool.is_drained() {
                self.notify.notify_waiters();
            }
            deliveries
        };
        deliver(deliveries);
        compress
    }

    /// Resolve the attempt for `connectors` with `error`
    pub(crate) fn finish_get_connection_failed(&self, connectors: &[ConnectorInfo], error: &Error) {
        let deliveries = {
            let mut pool = self.pool.lock();
            let deliveries = pool.finish_failure(connectors, error);
            if pool.is_drained() {
                self.notify.notify_waiters();
            }
            deliveries
        };
        deliver(deliveries);
    }

    fn destroy(&self) {
        let connections = {
            let mut pool = self.pool.lock();
            if pool.destroyed {
                return;
            }
            pool.destroyed = true;
            pool.all_connections().cloned().collect::<Vec<_>>()
        };
        tracing::debug!(connections = connections.len(), "Destroying outgoing connection factory");
        for connection in &connections {
            connection.destroy(CloseReason::CommunicatorDestroyed);
        }
        self.cancel.cancel();
        self.notify.notify_waiters();
    }
}

fn deliver(deliveries: Deliveries) {
    for (notify, outcome) in deliveries {
        // The waiter may have been dropped with its runtime
        let _ = notify.send(outcome);
    }
}
