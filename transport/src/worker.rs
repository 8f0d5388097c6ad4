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

//! Connection worker implementation
//!
//! The ConnectionWorker owns the transceiver of a single connection and drives it
//! through its lifecycle:
//! - Waiting for `start` (or an early destroy)
//! - Transport handshake under the endpoint timeout
//! - Reading while `Active` and dispatching to the adapter
//! - Writing queued data
//! - Closing, reaping and finishing

use crate::connection::StartReply;
use crate::{
    CloseReason, Connection, ConnectionState, ConnectionTransition, Error, Result,
    SocketOperation, Transceiver,
};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::select;
use tokio::sync::{mpsc, oneshot, watch};

const READ_BUFFER_SIZE: usize = 8 * 1024;

enum Event {
    Read(Result<usize>),
    Write(Option<Bytes>),
    StateChanged,
}

/// Task driving one connection
pub(crate) struct ConnectionWorker {
    connection: Connection,
    transceiver: Box<dyn Transceiver>,
    state: watch::Receiver<ConnectionState>,
    outgoing: mpsc::UnboundedReceiver<Bytes>,
    start: oneshot::Receiver<StartReply>,
    buffer: BytesMut,
}

impl ConnectionWorker {
    pub(crate) fn new(
        connection: Connection,
        transceiver: Box<dyn Transceiver>,
        state: watch::Receiver<ConnectionState>,
        outgoing: mpsc::UnboundedReceiver<Bytes>,
        start: oneshot::Receiver<StartReply>,
    ) -> Self {
        Self {
            connection,
            transceiver,
            state,
            outgoing,
            start,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Run the worker until the connection is finished
    pub(crate) async fn run(mut self) {
        if let Some(reply) = self.wait_for_start().await {
            let result = self.validate().await;
            let started = result.is_ok();
            let _ = reply.send(result);
            if started {
                self.event_loop().await;
            }
        }
        self.cleanup().await;
    }

    async fn wait_for_start(&mut self) -> Option<StartReply> {
        loop {
            if self.state.borrow_and_update().is_terminal() {
                return None;
            }
            select! {
                reply = &mut self.start => return reply.ok(),
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn validate(&mut self) -> Result<()> {
        let limit = self.connection.endpoint().timeout();
        let transceiver = &mut *self.transceiver;
        let connection = &self.connection;
        let validation = async {
            match limit {
                Some(limit) => match tokio::time::timeout(limit, handshake(transceiver)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::ConnectTimeout {
                        connector: connection.to_string(),
                    }),
                },
                None => handshake(transceiver).await,
            }
        };

        let result = select! {
            result = validation => result,
            _ = closed(&mut self.state) => {
                return Err(self.connection.close_error());
            }
        };

        match result {
            Ok(()) => {
                if self.connection.transition(ConnectionTransition::Validated) {
                    self.connection.touch();
                    Ok(())
                } else {
                    Err(self.connection.close_error())
                }
            }
            Err(err) => {
                tracing::debug!(
                    connection = %self.connection.id(),
                    error = %err,
                    "Connection validation failed"
                );
                self.connection
                    .destroy(CloseReason::Failed(Arc::new(err.clone())));
                Err(err)
            }
        }
    }

    async fn event_loop(&mut self) {
        let datagram = self.transceiver.protocol().is_datagram();
        loop {
            let state = *self.state.borrow_and_update();
            if state.is_terminal() {
                return;
            }
            let reading = state == ConnectionState::Active;
            if reading && !self.buffer.is_empty() {
                self.dispatch_buffered().await;
                continue;
            }

            let event = select! {
                biased;
                changed = self.state.changed() => match changed {
                    Ok(()) => Event::StateChanged,
                    Err(_) => return,
                },
                result = self.transceiver.read(&mut self.buffer), if reading => Event::Read(result),
                data = self.outgoing.recv() => Event::Write(data),
            };

            match event {
                Event::Read(Ok(0)) if !datagram => {
                    self.connection.destroy(CloseReason::PeerClosed);
                }
                Event::Read(Ok(count)) => {
                    self.connection.touch();
                    self.connection
                        .inner
                        .bytes_received
                        .fetch_add(count as u64, Ordering::Relaxed);
                    self.dispatch_buffered().await;
                }
                Event::Read(Err(err)) => {
                    self.connection.destroy(CloseReason::Failed(Arc::new(err)));
                }
                Event::Write(Some(data)) => {
                    if let Err(err) = self.transceiver.write(&data).await {
                        tracing::debug!(
                            connection = %self.connection.id(),
                            error = %err,
                            "Write failed"
                        );
                        self.connection.destroy(CloseReason::Failed(Arc::new(err)));
                    } else {
                        self.connection.touch();
                        self.connection
                            .inner
                            .bytes_sent
                            .fetch_add(data.len() as u64, Ordering::Relaxed);
                    }
                }
                Event::Write(None) | Event::StateChanged => {}
            }
        }
    }

    /// Hand buffered data to the adapter unless the connection was put on hold
    async fn dispatch_buffered(&mut self) {
        if *self.state.borrow() != ConnectionState::Active {
            return;
        }
        let data = self.buffer.split().freeze();
        self.buffer.reserve(READ_BUFFER_SIZE);
        dispatch(&self.connection, data).await;
    }

    async fn cleanup(&mut self) {
        if !self.state.borrow().is_terminal() {
            self.connection.destroy(CloseReason::ClosedLocally);
        }

        if let Err(err) = self.transceiver.close().await {
            tracing::debug!(
                connection = %self.connection.id(),
                error = %err,
                "Failed to close transceiver"
            );
        }
        self.connection.transition(ConnectionTransition::Close);

        // Anything still queued can no longer be written
        self.outgoing.close();
        while self.outgoing.try_recv().is_ok() {}

        let reason = self
            .connection
            .close_reason()
            .unwrap_or(CloseReason::ClosedLocally);
        if let Some(adapter) = self.connection.adapter() {
            adapter.on_close(&self.connection, &reason).await;
        }

        if let Some(monitor) = self.connection.monitor() {
            monitor.reap(&self.connection);
        }
        self.connection.transition(ConnectionTransition::Finish);
        tracing::debug!(connection = %self.connection.id(), %reason, "Connection finished");
    }
}

/// Hand data to the connection's adapter, one dispatch at a time
///
/// Borrows only the connection: the worker owns a transceiver that is `Send` but not
/// `Sync`, so a worker reference must not live across these awaits.
async fn dispatch(connection: &Connection, data: Bytes) {
    let Some(adapter) = connection.adapter() else {
        tracing::trace!(
            connection = %connection.id(),
            bytes = data.len(),
            "No adapter bound, dropping data"
        );
        return;
    };
    let _dispatching = connection.inner.dispatch.lock().await;
    adapter.on_data(connection, data).await;
}

async fn handshake(transceiver: &mut dyn Transceiver) -> Result<()> {
    loop {
        match transceiver.initialize().await? {
            SocketOperation::None => return Ok(()),
            operation => transceiver.wait(operation).await?,
        }
    }
}

async fn closed(state: &mut watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|state| state.is_terminal()).await;
}

impl std::fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("connection", &self.connection.id())
            .field("state", &*self.state.borrow())
            .finish()
    }
}
