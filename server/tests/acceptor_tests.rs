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

//! Accept failure handling and acceptor restarts

use std::io;
use std::sync::Arc;
use std::time::Duration;
use switchyard_server::{FactoryState, IncomingConnectionFactory, ServerConfig};
use switchyard_testkit::{init_tracing, ScriptedTransport};
use switchyard_transport::{Adapter, Endpoint, Protocol, TransportRegistry};

struct Null;

#[async_trait::async_trait]
impl Adapter for Null {
    fn name(&self) -> &str {
        "null"
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

async fn active_factory() -> (Arc<ScriptedTransport>, IncomingConnectionFactory) {
    init_tracing();
    let transport = Arc::new(ScriptedTransport::new(Protocol::Tcp));
    let registry = Arc::new(TransportRegistry::new().with(transport.clone()));
    let config = ServerConfig::new("hello")
        .with_warn_connections(true)
        .with_acceptor_retry_delay(Duration::from_millis(20));
    let factory = IncomingConnectionFactory::new(
        registry,
        Endpoint::tcp("127.0.0.1", 0),
        Arc::new(Null),
        config,
    )
    .await
    .unwrap();
    factory.activate();
    (transport, factory)
}

#[tokio::test]
async fn test_resource_exhaustion_restarts_acceptor() {
    let (transport, factory) = active_factory().await;

    transport.inject_accept_error(io::Error::from(io::ErrorKind::OutOfMemory));
    eventually(|| transport.listen_count() == 2 && factory.is_accepting()).await;
    assert_eq!(transport.open_acceptors(), 1);
    assert_eq!(factory.metrics().snapshot().accept_errors, 1);

    let _client = transport.dial_in("after-restart");
    eventually(|| factory.connections().len() == 1).await;

    factory.destroy();
    factory.wait_until_finished().await;
    assert_eq!(transport.open_acceptors(), 0);
}

#[tokio::test]
async fn test_transient_accept_errors_are_ignored() {
    let (transport, factory) = active_factory().await;

    transport.inject_accept_error(io::Error::from(io::ErrorKind::ConnectionAborted));
    let _client = transport.dial_in("peer");
    eventually(|| factory.connections().len() == 1).await;

    assert_eq!(transport.listen_count(), 1);
    assert_eq!(factory.metrics().snapshot().accept_errors, 1);

    factory.destroy();
    factory.wait_until_finished().await;
}

#[tokio::test]
async fn test_stop_acceptor_suppresses_restart() {
    let (transport, factory) = active_factory().await;

    factory.stop_acceptor();
    assert!(!factory.is_accepting());
    eventually(|| transport.open_acceptors() == 0).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.listen_count(), 1);
    assert_eq!(factory.state(), FactoryState::Active);

    factory.start_acceptor();
    eventually(|| transport.listen_count() == 2 && factory.is_accepting()).await;
    let _client = transport.dial_in("peer");
    eventually(|| factory.connections().len() == 1).await;

    factory.destroy();
    factory.wait_until_finished().await;
}

#[tokio::test]
async fn test_destroy_cancels_pending_restart() {
    let transport = Arc::new(ScriptedTransport::new(Protocol::Tcp));
    let registry = Arc::new(TransportRegistry::new().with(transport.clone()));
    let config = ServerConfig::new("hello").with_acceptor_retry_delay(Duration::from_millis(100));
    let factory = IncomingConnectionFactory::new(
        registry,
        Endpoint::tcp("127.0.0.1", 0),
        Arc::new(Null),
        config,
    )
    .await
    .unwrap();
    factory.activate();

    transport.inject_accept_error(io::Error::from(io::ErrorKind::OutOfMemory));
    eventually(|| !factory.is_accepting()).await;

    // No acceptor left to finish, so shutdown completes immediately
    factory.destroy();
    assert_eq!(factory.state(), FactoryState::Finished);
    factory.wait_until_finished().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.listen_count(), 1);
}
