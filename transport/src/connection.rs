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

//! Connection handle and lifecycle state machine
//!
//! A [`Connection`] wraps one [`Transceiver`] driven by a dedicated worker task. The
//! handle is cheap to clone; all clones refer to the same connection. State changes
//! requested through the handle ([`activate`](Connection::activate),
//! [`hold`](Connection::hold), [`destroy`](Connection::destroy)) are synchronous and
//! observed by the worker through a watch channel.

use crate::worker::ConnectionWorker;
use crate::{
    AcmMonitor, Adapter, CloseReason, ConnectionId, ConnectionState, ConnectionTransition,
    Connector, Endpoint, Error, Result, Transceiver,
};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

pub(crate) type StartReply = oneshot::Sender<Result<()>>;

pub(crate) struct ConnectionInner {
    pub(crate) id: ConnectionId,
    pub(crate) endpoint: Endpoint,
    pub(crate) connector: Option<Connector>,
    pub(crate) description: String,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) close_reason: Mutex<Option<CloseReason>>,
    pub(crate) adapter: Mutex<Option<Arc<dyn Adapter>>>,
    pub(crate) monitor: Option<Weak<AcmMonitor>>,
    pub(crate) outgoing: mpsc::UnboundedSender<Bytes>,
    pub(crate) start: Mutex<Option<oneshot::Sender<StartReply>>>,
    pub(crate) dispatch: tokio::sync::Mutex<()>,
    pub(crate) batch: Mutex<BytesMut>,
    pub(crate) last_activity: Mutex<Instant>,
    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,
    pub(crate) created_at: Instant,
}

/// Handle to a connection
///
/// Equality and hashing use the connection's identity, so two handles are equal exactly
/// when they are clones of each other.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap a transceiver in a new connection in the `Validating` state
    ///
    /// The worker task is spawned immediately but does not touch the transceiver until
    /// [`start`](Self::start) is called. Outgoing connections pass the connector they
    /// were dialed through; accepted connections pass `None`. When a monitor is given the
    /// connection registers with it and reports itself for reaping once finished.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn new(
        transceiver: Box<dyn Transceiver>,
        endpoint: Endpoint,
        connector: Option<Connector>,
        monitor: Option<&Arc<AcmMonitor>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Validating);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (start_tx, start_rx) = oneshot::channel();
        let now = Instant::now();

        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                endpoint,
                connector,
                description: transceiver.to_string(),
                state: state_tx,
                close_reason: Mutex::new(None),
                adapter: Mutex::new(None),
                monitor: monitor.map(Arc::downgrade),
                outgoing: outgoing_tx,
                start: Mutex::new(Some(start_tx)),
                dispatch: tokio::sync::Mutex::new(()),
                batch: Mutex::new(BytesMut::new()),
                last_activity: Mutex::new(now),
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                created_at: now,
            }),
        };

        if let Some(monitor) = monitor {
            monitor.add(&connection);
        }

        let worker = ConnectionWorker::new(
            connection.clone(),
            transceiver,
            state_rx,
            outgoing_rx,
            start_rx,
        );
        tokio::spawn(worker.run());

        tracing::trace!(connection = %connection.id(), "Connection created");
        connection
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Get the endpoint the connection was established for
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Get the connector an outgoing connection was dialed through
    pub fn connector(&self) -> Option<&Connector> {
        self.inner.connector.as_ref()
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Check if the connection is usable
    pub fn is_active_or_holding(&self) -> bool {
        self.state().is_active_or_holding()
    }

    /// Get the reason the connection was destroyed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.lock().clone()
    }

    /// Run the transport handshake
    ///
    /// Resolves once the transceiver is initialized and the connection moved to
    /// `Holding`. Fails with the handshake error, with a timeout when the endpoint's
    /// timeout elapses first, or with the close reason if the connection was destroyed
    /// while validating. A failed handshake destroys the connection.
    #[tracing::instrument(
        skip_all,
        fields(connection = %self.inner.id, endpoint = %self.inner.endpoint)
    )]
    pub async fn start(&self) -> Result<()> {
        let Some(start) = self.inner.start.lock().take() else {
            return Err(Error::Unsupported(format!(
                "connection {} was already started",
                self.id()
            )));
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if start.send(reply_tx).is_err() {
            return Err(self.close_error());
        }
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(self.close_error()),
        }
    }

    /// Start reading from the transceiver (`Holding` to `Active`)
    pub fn activate(&self) {
        if self.transition(ConnectionTransition::Activate) {
            self.touch();
        }
    }

    /// Stop reading from the transceiver (`Active` to `Holding`)
    pub fn hold(&self) {
        self.transition(ConnectionTransition::Hold);
    }

    /// Begin shutting the connection down
    ///
    /// Only the first call records its reason; later calls are no-ops.
    pub fn destroy(&self, reason: CloseReason) {
        let mut slot = self.inner.close_reason.lock();
        if self.transition(ConnectionTransition::Destroy) {
            tracing::debug!(connection = %self.id(), %reason, "Destroying connection");
            *slot = Some(reason);
        }
    }

    /// Destroy the connection on behalf of the application
    pub fn close(&self) {
        self.destroy(CloseReason::ClosedLocally);
    }

    /// Wait until the connection is no longer dispatching (`Holding` or beyond)
    pub async fn wait_until_holding(&self) {
        self.wait_for(|state| state >= ConnectionState::Holding)
            .await;
        drop(self.inner.dispatch.lock().await);
    }

    /// Wait until the connection has released all its resources
    pub async fn wait_until_finished(&self) {
        self.wait_for(|state| state == ConnectionState::Finished)
            .await;
    }

    /// Queue bytes to be written by the worker
    pub fn send(&self, data: Bytes) -> Result<()> {
        if self.state().is_terminal() {
            return Err(self.close_error());
        }
        self.inner
            .outgoing
            .send(data)
            .map_err(|_| self.close_error())
    }

    /// Append a request to the batch buffer
    pub fn batch_request(&self, data: &[u8]) {
        self.inner.batch.lock().extend_from_slice(data);
    }

    /// Number of bytes waiting in the batch buffer
    pub fn batch_size(&self) -> usize {
        self.inner.batch.lock().len()
    }

    /// Send all batched requests as one write
    pub fn flush_batch_requests(&self) -> Result<()> {
        let batch = self.inner.batch.lock().split().freeze();
        if batch.is_empty() {
            return Ok(());
        }
        self.send(batch)
    }

    /// Bind the connection to an adapter, or unbind it with `None`
    pub fn set_adapter(&self, adapter: Option<Arc<dyn Adapter>>) {
        *self.inner.adapter.lock() = adapter;
    }

    /// Get the adapter the connection dispatches to
    pub fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        self.inner.adapter.lock().clone()
    }

    /// Time since the last read or write
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Check if an adapter callback is running
    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatch.try_lock().is_err()
    }

    /// Total bytes written
    pub fn bytes_sent(&self) -> u64 {
        self.inner.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes read
    pub fn bytes_received(&self) -> u64 {
        self.inner.bytes_received.load(Ordering::Relaxed)
    }

    /// Time since the connection was created
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Transport description of the underlying socket
    pub fn info(&self) -> &str {
        &self.inner.description
    }

    pub(crate) fn monitor(&self) -> Option<Arc<AcmMonitor>> {
        self.inner.monitor.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn transition(&self, transition: ConnectionTransition) -> bool {
        let changed = self.inner.state.send_if_modified(|state| match state.apply(transition) {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        });
        if changed {
            tracing::trace!(connection = %self.id(), state = %self.state(), "State changed");
        }
        changed
    }

    pub(crate) fn touch(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    pub(crate) fn close_error(&self) -> Error {
        match self.inner.close_reason.lock().as_ref() {
            Some(reason) => reason.to_error(),
            None => Error::ConnectionClosed(format!("connection {} is not usable", self.id())),
        }
    }

    async fn wait_for(&self, predicate: impl Fn(ConnectionState) -> bool) {
        let mut state = self.inner.state.subscribe();
        // The sender lives as long as `self`
        let _ = state.wait_for(|state| predicate(*state)).await;
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.description)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("endpoint", &self.endpoint().to_string())
            .field("connector", &self.connector().map(|c| c.to_string()))
            .finish()
    }
}
