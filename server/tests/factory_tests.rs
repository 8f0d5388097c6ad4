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

//! Incoming connection factory lifecycle against a scripted transport

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use switchyard_server::{FactoryState, IncomingConnectionFactory, ServerConfig};
use switchyard_testkit::{init_tracing, ScriptedTransport};
use switchyard_transport::{
    Adapter, CloseReason, Connection, ConnectionState, Endpoint, Protocol, Transceiver,
    TransportRegistry,
};

/// Adapter that records everything it is handed
#[derive(Default)]
struct Recorder {
    data: Mutex<Vec<u8>>,
    closed: AtomicUsize,
}

impl Recorder {
    fn data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn on_data(&self, _connection: &Connection, data: Bytes) {
        self.data.lock().extend_from_slice(&data);
    }

    async fn on_close(&self, _connection: &Connection, _reason: &CloseReason) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn listening(
    protocol: Protocol,
    config: ServerConfig,
) -> (Arc<ScriptedTransport>, Arc<Recorder>, IncomingConnectionFactory) {
    init_tracing();
    let transport = Arc::new(ScriptedTransport::new(protocol));
    let registry = Arc::new(TransportRegistry::new().with(transport.clone()));
    let recorder = Arc::new(Recorder::default());
    let factory = IncomingConnectionFactory::new(
        registry,
        Endpoint::new(protocol, "127.0.0.1", 0),
        recorder.clone(),
        config,
    )
    .await
    .unwrap();
    (transport, recorder, factory)
}

#[tokio::test]
async fn test_starts_holding() {
    let (transport, _recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;

    assert_eq!(factory.state(), FactoryState::Holding);
    assert_eq!(factory.endpoint().port(), 20000);
    assert_eq!(transport.listen_count(), 1);
    assert!(factory.is_accepting());

    let _client = transport.dial_in("peer");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(factory.connections().is_empty());

    factory.activate();
    eventually(|| factory.connections().len() == 1).await;
    let connection = factory.connections().pop().unwrap();
    eventually(|| connection.state() == ConnectionState::Active).await;
    assert_eq!(factory.metrics().snapshot().connections_accepted, 1);

    factory.destroy();
    factory.wait_until_finished().await;
}

#[tokio::test]
async fn test_hold_pauses_dispatch() {
    let (transport, recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;
    factory.activate();

    let mut client = transport.dial_in("peer");
    eventually(|| {
        factory
            .connections()
            .iter()
            .any(|connection| connection.state() == ConnectionState::Active)
    })
    .await;

    client.write(b"first").await.unwrap();
    eventually(|| recorder.data() == b"first").await;

    factory.hold();
    assert_eq!(factory.state(), FactoryState::Holding);
    tokio::time::timeout(Duration::from_secs(5), factory.wait_until_holding())
        .await
        .unwrap();
    let connection = factory.connections().pop().unwrap();
    assert_eq!(connection.state(), ConnectionState::Holding);

    client.write(b"second").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.data(), b"first");

    factory.activate();
    eventually(|| recorder.data() == b"firstsecond").await;

    factory.destroy();
    factory.wait_until_finished().await;
}

#[tokio::test]
async fn test_destroy_closes_acceptor_and_connections() {
    let (transport, recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;
    factory.activate();
    let _client = transport.dial_in("peer");
    eventually(|| factory.connections().len() == 1).await;
    let connection = factory.connections().pop().unwrap();

    factory.destroy();
    assert!(factory.state() >= FactoryState::Closed);
    tokio::time::timeout(Duration::from_secs(5), factory.wait_until_finished())
        .await
        .unwrap();

    assert_eq!(factory.state(), FactoryState::Finished);
    assert_eq!(transport.open_acceptors(), 0);
    assert!(!factory.is_accepting());
    assert_eq!(connection.state(), ConnectionState::Finished);
    assert!(matches!(
        connection.close_reason(),
        Some(CloseReason::AdapterDeactivated)
    ));
    assert_eq!(recorder.closed(), 1);
    assert!(factory.connections().is_empty());
}

#[tokio::test]
async fn test_wait_until_finished_requires_destroy() {
    let (_transport, _recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;

    let blocked =
        tokio::time::timeout(Duration::from_millis(50), factory.wait_until_finished()).await;
    assert!(blocked.is_err());

    factory.destroy();
    tokio::time::timeout(Duration::from_secs(5), factory.wait_until_finished())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_illegal_transitions_are_ignored() {
    let (_transport, _recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;

    factory.hold();
    assert_eq!(factory.state(), FactoryState::Holding);

    factory.destroy();
    factory.wait_until_finished().await;
    assert_eq!(factory.state(), FactoryState::Finished);

    factory.activate();
    factory.hold();
    factory.destroy();
    assert_eq!(factory.state(), FactoryState::Finished);
}

#[tokio::test]
async fn test_closed_connections_are_reaped() {
    let (transport, recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;
    factory.activate();

    let client = transport.dial_in("peer");
    eventually(|| factory.connections().len() == 1).await;
    let connection = factory.connections().pop().unwrap();
    drop(client);

    connection.wait_until_finished().await;
    assert!(matches!(connection.close_reason(), Some(CloseReason::PeerClosed)));
    assert_eq!(recorder.closed(), 1);
    assert!(factory.connections().is_empty());

    let metrics = factory.metrics().snapshot();
    assert_eq!(metrics.connections_reaped, 1);
    assert_eq!(metrics.connections_reaped, metrics.connections_removed);

    factory.destroy();
    factory.wait_until_finished().await;
}

#[tokio::test]
async fn test_datagram_endpoint_binds_single_connection() {
    let (transport, _recorder, factory) =
        listening(Protocol::Udp, ServerConfig::new("hello")).await;

    assert_eq!(transport.listen_count(), 0);
    assert!(!factory.is_accepting());
    assert_eq!(factory.endpoint().port(), 20000);

    eventually(|| factory.connections().len() == 1).await;
    let connection = factory.connections().pop().unwrap();
    assert_eq!(connection.state(), ConnectionState::Holding);

    factory.activate();
    assert_eq!(connection.state(), ConnectionState::Active);

    factory.destroy();
    assert_eq!(factory.state(), FactoryState::Finished);
    factory.wait_until_finished().await;
    assert_eq!(connection.state(), ConnectionState::Finished);
}

#[tokio::test]
async fn test_is_local_matches_bound_and_published_endpoints() {
    let published = Endpoint::tcp("public.example.com", 4061);
    let config = ServerConfig::new("hello").with_published_endpoint(published.clone());
    let (_transport, _recorder, factory) = listening(Protocol::Tcp, config).await;

    assert!(factory.is_local(&Endpoint::tcp("127.0.0.1", 20000)));
    assert!(factory.is_local(&published.clone().with_timeout(Some(Duration::from_secs(1)))));
    assert!(!factory.is_local(&Endpoint::tcp("127.0.0.1", 20001)));
    assert!(!factory.is_local(&Endpoint::udp("127.0.0.1", 20000)));
    assert_eq!(factory.published_endpoint(), &published);

    factory.destroy();
    factory.wait_until_finished().await;
}

#[tokio::test]
async fn test_flush_async_batch_requests() {
    let (transport, _recorder, factory) =
        listening(Protocol::Tcp, ServerConfig::new("hello")).await;
    factory.activate();
    let mut client = transport.dial_in("peer");
    eventually(|| factory.connections().len() == 1).await;
    let connection = factory.connections().pop().unwrap();

    connection.batch_request(b"queued");
    factory.flush_async_batch_requests();
    assert_eq!(connection.batch_size(), 0);

    let mut buf = bytes::BytesMut::new();
    while buf.len() < 6 {
        assert_ne!(client.read(&mut buf).await.unwrap(), 0);
    }
    assert_eq!(&buf[..], b"queued");

    factory.destroy();
    factory.wait_until_finished().await;
}
