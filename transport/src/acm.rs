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

//! Active connection monitoring: idle detection and the reaping list

use crate::{AcmClose, AcmConfig, CloseReason, Connection, ConnectionId, ConnectionState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

struct MonitorState {
    connections: HashMap<ConnectionId, Connection>,
    reaped: Vec<Connection>,
    task: Option<JoinHandle<()>>,
    destroyed: bool,
}

/// Connection monitor shared by all connections of one factory
///
/// The monitor keeps the connections it watches alive until they finish. A finished
/// connection moves itself to the reaped list through [`reap`](Self::reap); the owning
/// factory collects that list with [`swap_reaped_connections`](Self::swap_reaped_connections)
/// and removes the connections from its own indices.
pub struct AcmMonitor {
    config: AcmConfig,
    state: Mutex<MonitorState>,
}

impl AcmMonitor {
    /// Create a monitor
    pub fn new(config: AcmConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(MonitorState {
                connections: HashMap::new(),
                reaped: Vec::new(),
                task: None,
                destroyed: false,
            }),
        })
    }

    /// Get the monitoring configuration
    pub fn config(&self) -> &AcmConfig {
        &self.config
    }

    /// Start watching a connection
    ///
    /// The idle check task is spawned with the first connection.
    pub fn add(self: &Arc<Self>, connection: &Connection) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state
            .connections
            .insert(connection.id(), connection.clone());
        if state.task.is_none() && self.config.is_enabled() {
            state.task = Some(spawn_idle_check(Arc::downgrade(self), self.config.timeout));
        }
    }

    /// Stop watching a connection
    pub fn remove(&self, connection: &Connection) {
        self.state.lock().connections.remove(&connection.id());
    }

    /// Hand a finished connection back for removal from its factory
    pub fn reap(&self, connection: &Connection) {
        let mut state = self.state.lock();
        state.connections.remove(&connection.id());
        state.reaped.push(connection.clone());
    }

    /// Take every connection reaped since the last call
    pub fn swap_reaped_connections(&self) -> Vec<Connection> {
        std::mem::take(&mut self.state.lock().reaped)
    }

    /// Number of connections currently watched
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Stop the idle check and drop every reference the monitor holds
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        state.destroyed = true;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.connections.clear();
        state.reaped.clear();
    }

    /// Check if [`destroy`](Self::destroy) was called
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn check_idle(&self) {
        let candidates: Vec<Connection> = self.state.lock().connections.values().cloned().collect();
        for connection in candidates {
            if connection.state() != ConnectionState::Active {
                continue;
            }
            if connection.idle_for() < self.config.timeout {
                continue;
            }
            if self.config.close == AcmClose::OnIdle && connection.is_dispatching() {
                continue;
            }
            tracing::debug!(connection = %connection.id(), "Closing idle connection");
            connection.destroy(CloseReason::IdleTimeout);
        }
    }
}

impl Drop for AcmMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for AcmMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AcmMonitor")
            .field("config", &self.config)
            .field("connections", &state.connections.len())
            .field("reaped", &state.reaped.len())
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

fn spawn_idle_check(monitor: Weak<AcmMonitor>, timeout: Duration) -> JoinHandle<()> {
    let period = (timeout / 2).max(Duration::from_millis(10));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(monitor) = monitor.upgrade() else {
                break;
            };
            monitor.check_idle();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, SocketOperation, Transceiver};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use std::fmt;

    struct IdleTransceiver;

    impl fmt::Display for IdleTransceiver {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "idle")
        }
    }

    #[async_trait]
    impl Transceiver for IdleTransceiver {
        fn protocol(&self) -> crate::Protocol {
            crate::Protocol::Tcp
        }
        async fn initialize(&mut self) -> crate::Result<SocketOperation> {
            Ok(SocketOperation::None)
        }
        async fn wait(&mut self, _operation: SocketOperation) -> crate::Result<()> {
            Ok(())
        }
        async fn read(&mut self, _buf: &mut BytesMut) -> crate::Result<usize> {
            std::future::pending().await
        }
        async fn write(&mut self, _buf: &[u8]) -> crate::Result<()> {
            Ok(())
        }
        async fn close(&mut self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn connection(monitor: &Arc<AcmMonitor>) -> Connection {
        Connection::new(
            Box::new(IdleTransceiver),
            Endpoint::tcp("127.0.0.1", 4061),
            None,
            Some(monitor),
        )
    }

    #[tokio::test]
    async fn test_finished_connection_is_reaped() {
        let monitor = AcmMonitor::new(AcmConfig::disabled());
        let conn = connection(&monitor);
        assert_eq!(monitor.connection_count(), 1);

        conn.start().await.unwrap();
        conn.destroy(CloseReason::ClosedLocally);
        conn.wait_until_finished().await;

        assert_eq!(monitor.connection_count(), 0);
        let reaped = monitor.swap_reaped_connections();
        assert_eq!(reaped, vec![conn]);
        assert!(monitor.swap_reaped_connections().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_closed() {
        let monitor = AcmMonitor::new(AcmConfig::default().with_timeout(Duration::from_secs(2)));
        let conn = connection(&monitor);
        conn.start().await.unwrap();
        conn.activate();

        tokio::time::sleep(Duration::from_secs(5)).await;
        conn.wait_until_finished().await;

        assert!(matches!(conn.close_reason(), Some(CloseReason::IdleTimeout)));
        assert_eq!(monitor.swap_reaped_connections().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_holding_connection_is_not_idle_closed() {
        let monitor = AcmMonitor::new(AcmConfig::default().with_timeout(Duration::from_secs(2)));
        let conn = connection(&monitor);
        conn.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(conn.state(), ConnectionState::Holding);
        conn.destroy(CloseReason::ClosedLocally);
    }

    #[tokio::test]
    async fn test_destroy_clears_state() {
        let monitor = AcmMonitor::new(AcmConfig::default());
        let conn = connection(&monitor);
        monitor.destroy();

        assert!(monitor.is_destroyed());
        assert_eq!(monitor.connection_count(), 0);
        monitor.add(&conn);
        assert_eq!(monitor.connection_count(), 0);
        conn.destroy(CloseReason::ClosedLocally);
    }
}
