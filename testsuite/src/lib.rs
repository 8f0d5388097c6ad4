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

//! Shared fixtures for end-to-end tests of Switchyard over real sockets

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use switchyard_client::{ClientConfig, OutgoingConnectionFactory};
use switchyard_server::{IncomingConnectionFactory, ServerConfig};
use switchyard_transport::{Adapter, CloseReason, Connection, Endpoint, TransportRegistry};

/// Adapter that writes every received chunk back to its sender
pub struct Echo;

#[async_trait]
impl Adapter for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn on_data(&self, connection: &Connection, data: Bytes) {
        let _ = connection.send(data);
    }
}

/// Adapter collecting received bytes and close reasons
#[derive(Default)]
pub struct Collector {
    data: Mutex<Vec<u8>>,
    closes: Mutex<Vec<String>>,
}

impl Collector {
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Number of bytes received so far
    pub fn received(&self) -> usize {
        self.data.lock().len()
    }

    pub fn closes(&self) -> Vec<String> {
        self.closes.lock().clone()
    }
}

#[async_trait]
impl Adapter for Collector {
    fn name(&self) -> &str {
        "collector"
    }

    async fn on_data(&self, _connection: &Connection, data: Bytes) {
        self.data.lock().extend_from_slice(&data);
    }

    async fn on_close(&self, _connection: &Connection, reason: &CloseReason) {
        self.closes.lock().push(reason.to_string());
    }
}

/// An echo server listening on an ephemeral loopback port
pub async fn echo_server() -> IncomingConnectionFactory {
    let factory = IncomingConnectionFactory::new(
        Arc::new(TransportRegistry::default()),
        Endpoint::tcp("127.0.0.1", 0),
        Arc::new(Echo),
        ServerConfig::new("echo"),
    )
    .await
    .expect("failed to start echo server");
    factory.activate();
    factory
}

/// A client factory over the default transports
pub fn client() -> Arc<OutgoingConnectionFactory> {
    let config = ClientConfig::default().with_timeout_override(Duration::from_secs(5));
    Arc::new(
        OutgoingConnectionFactory::new(Arc::new(TransportRegistry::default()), config)
            .expect("failed to create client factory"),
    )
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
