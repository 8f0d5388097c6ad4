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

//! Client and server factories talking over loopback TCP

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use switchyard_testkit::init_tracing;
use switchyard_testsuite::{client, echo_server, eventually, Collector};
use switchyard_transport::{ConnectionState, Endpoint, EndpointSelection, ErrorKind};

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_echo_roundtrip() {
    init_tracing();
    let server = echo_server().await;
    let client = client();

    let (connection, compress) = client
        .connect(vec![server.endpoint().clone()], false, EndpointSelection::Ordered)
        .await
        .unwrap();
    assert!(!compress);
    assert_eq!(connection.state(), ConnectionState::Active);

    let collector = Arc::new(Collector::default());
    connection.set_adapter(Some(collector.clone()));
    connection.send(Bytes::from_static(b"ping")).unwrap();
    eventually(|| collector.data() == b"ping").await;
    assert_eq!(server.metrics().snapshot().connections_accepted, 1);

    client.destroy();
    client.wait_until_finished().await;
    server.destroy();
    server.wait_until_finished().await;
}

#[tokio::test]
async fn test_concurrent_clients_share_connection() {
    init_tracing();
    let server = echo_server().await;
    let client = client();
    let endpoint = server.endpoint().clone();

    let requests: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                client
                    .connect(vec![endpoint], false, EndpointSelection::Ordered)
                    .await
            })
        })
        .collect();
    let mut connections = Vec::new();
    for request in requests {
        connections.push(request.await.unwrap().unwrap().0);
    }
    assert!(connections.iter().all(|connection| *connection == connections[0]));
    assert_eq!(client.metrics().snapshot().connections_created, 1);
    eventually(|| server.connections().len() == 1).await;

    client.destroy();
    client.wait_until_finished().await;
    server.destroy();
    server.wait_until_finished().await;
}

#[tokio::test]
async fn test_unreachable_endpoint_falls_back() {
    init_tracing();
    let server = echo_server().await;
    let client = client();

    let dead = Endpoint::tcp("127.0.0.1", closed_port().await);
    let (connection, _) = client
        .connect(
            vec![dead, server.endpoint().clone()],
            false,
            EndpointSelection::Ordered,
        )
        .await
        .unwrap();
    assert!(server.is_local(connection.endpoint()));
    let metrics = client.metrics().snapshot();
    assert_eq!(metrics.connect_attempts, 2);
    assert_eq!(metrics.connect_failures, 1);

    client.destroy();
    client.wait_until_finished().await;
    server.destroy();
    server.wait_until_finished().await;
}

#[tokio::test]
async fn test_server_hold_delays_echo() {
    init_tracing();
    let server = echo_server().await;
    let client = client();
    let (connection, _) = client
        .connect(vec![server.endpoint().clone()], false, EndpointSelection::Ordered)
        .await
        .unwrap();
    let collector = Arc::new(Collector::default());
    connection.set_adapter(Some(collector.clone()));
    eventually(|| server.connections().len() == 1).await;
    let accepted = server.connections().pop().unwrap();
    eventually(|| accepted.state() == ConnectionState::Active).await;

    server.hold();
    server.wait_until_holding().await;
    connection.send(Bytes::from_static(b"held")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(collector.data().is_empty());

    server.activate();
    eventually(|| collector.data() == b"held").await;

    client.destroy();
    client.wait_until_finished().await;
    server.destroy();
    server.wait_until_finished().await;
}

#[tokio::test]
async fn test_server_shutdown_closes_client_connections() {
    init_tracing();
    let server = echo_server().await;
    let client = client();
    let endpoint = server.endpoint().clone();
    let (connection, _) = client
        .connect(vec![endpoint.clone()], false, EndpointSelection::Ordered)
        .await
        .unwrap();
    let collector = Arc::new(Collector::default());
    connection.set_adapter(Some(collector.clone()));

    server.destroy();
    server.wait_until_finished().await;

    tokio::time::timeout(Duration::from_secs(5), connection.wait_until_finished())
        .await
        .unwrap();
    assert_eq!(collector.closes(), vec!["closed by peer".to_string()]);
    assert!(client.connections().is_empty());

    let err = client
        .connect(vec![endpoint], false, EndpointSelection::Ordered)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFailure);

    client.destroy();
    client.wait_until_finished().await;
}

#[tokio::test]
async fn test_client_shutdown_is_reaped_by_server() {
    init_tracing();
    let server = echo_server().await;
    let client = client();
    client
        .connect(vec![server.endpoint().clone()], false, EndpointSelection::Ordered)
        .await
        .unwrap();
    eventually(|| server.connections().len() == 1).await;

    client.destroy();
    client.wait_until_finished().await;
    eventually(|| server.connections().is_empty()).await;
    assert_eq!(server.metrics().snapshot().connections_reaped, 1);

    server.destroy();
    server.wait_until_finished().await;
}
