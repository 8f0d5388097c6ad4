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

//! Scripted transport with controllable resolution, dialing and accepting

use crate::MemoryTransceiver;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;
use switchyard_transport::{
    Acceptor, Connector, ConnectorAddress, Endpoint, EndpointSelection, Error, Protocol, Result,
    Transceiver, Transport,
};
use tokio::sync::{Notify, mpsc};

/// What a dial to a scripted connector does
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Connect immediately
    Succeed,
    /// Connect after a delay
    Delay(Duration),
    /// Connect once the gate is opened with [`Notify::notify_waiters`] or `notify_one`
    Gate(Arc<Notify>),
    /// Fail with "connection refused"
    Refuse,
    /// Fail with the given error
    Fail(Error),
    /// Connect, but fail the transport handshake with the given error
    FailHandshake(Error),
    /// Never complete
    Hang,
}

/// What resolving a scripted host does
#[derive(Debug, Clone)]
enum Resolution {
    Addresses(Vec<String>),
    Fail,
}

type AcceptQueue = mpsc::UnboundedReceiver<Result<Box<dyn Transceiver>>>;

/// In-memory transport whose behaviour is scripted per host and per connector
///
/// Connectors produced by this transport use [`ConnectorAddress::Named`] addresses. A host
/// without a script resolves to a single connector named `host:port`; a connector without
/// a script connects successfully.
///
/// # Example
///
/// ```
/// use switchyard_testkit::{ConnectOutcome, ScriptedTransport};
/// use switchyard_transport::Protocol;
///
/// let transport = ScriptedTransport::new(Protocol::Tcp)
///     .resolves_to("service", ["a", "b", "c"])
///     .on_connect("a", ConnectOutcome::Refuse)
///     .on_connect("b", ConnectOutcome::Refuse);
/// assert_eq!(transport.attempts("c"), 0);
/// ```
pub struct ScriptedTransport {
    protocol: Protocol,
    resolutions: Mutex<HashMap<String, Resolution>>,
    outcomes: Mutex<HashMap<String, ConnectOutcome>>,
    attempts: DashMap<String, usize>,
    attempt_log: Mutex<Vec<String>>,
    peers: Mutex<Vec<MemoryTransceiver>>,
    accept_tx: mpsc::UnboundedSender<Result<Box<dyn Transceiver>>>,
    accept_rx: Arc<tokio::sync::Mutex<AcceptQueue>>,
    listens: Arc<AtomicUsize>,
    open_acceptors: Arc<AtomicUsize>,
    next_port: AtomicU16,
}

impl ScriptedTransport {
    /// Create a transport serving `protocol`
    pub fn new(protocol: Protocol) -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Self {
            protocol,
            resolutions: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            attempts: DashMap::new(),
            attempt_log: Mutex::new(Vec::new()),
            peers: Mutex::new(Vec::new()),
            accept_tx,
            accept_rx: Arc::new(tokio::sync::Mutex::new(accept_rx)),
            listens: Arc::new(AtomicUsize::new(0)),
            open_acceptors: Arc::new(AtomicUsize::new(0)),
            next_port: AtomicU16::new(20000),
        }
    }

    /// Make `host` resolve to connectors with the given names, in order
    pub fn resolves_to<I, S>(self, host: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        self.resolutions
            .lock()
            .insert(host.to_string(), Resolution::Addresses(names));
        self
    }

    /// Make resolving `host` fail
    pub fn fails_to_resolve(self, host: &str) -> Self {
        self.resolutions
            .lock()
            .insert(host.to_string(), Resolution::Fail);
        self
    }

    /// Script the outcome of dialing the connector named `name`
    pub fn on_connect(self, name: &str, outcome: ConnectOutcome) -> Self {
        self.set_outcome(name, outcome);
        self
    }

    /// Change the outcome of dialing `name` after construction
    pub fn set_outcome(&self, name: &str, outcome: ConnectOutcome) {
        self.outcomes.lock().insert(name.to_string(), outcome);
    }

    /// Number of dials made to the connector named `name`
    pub fn attempts(&self, name: &str) -> usize {
        self.attempts.get(name).map(|count| *count).unwrap_or(0)
    }

    /// Number of dials made to any connector
    pub fn total_attempts(&self) -> usize {
        self.attempts.iter().map(|entry| *entry.value()).sum()
    }

    /// Connector names in the order they were dialed
    pub fn attempt_log(&self) -> Vec<String> {
        self.attempt_log.lock().clone()
    }

    /// Take the remote ends of every successful dial
    pub fn take_peers(&self) -> Vec<MemoryTransceiver> {
        std::mem::take(&mut *self.peers.lock())
    }

    /// Simulate an incoming connection; returns the client end
    pub fn dial_in(&self, name: &str) -> MemoryTransceiver {
        let (client, server) =
            MemoryTransceiver::pair(self.protocol, format!("{}-client", name), name.to_string());
        let _ = self.accept_tx.send(Ok(Box::new(server)));
        client
    }

    /// Make the next accept fail with `error`
    pub fn inject_accept_error(&self, error: io::Error) {
        let _ = self.accept_tx.send(Err(error.into()));
    }

    /// Number of times an acceptor started listening
    pub fn listen_count(&self) -> usize {
        self.listens.load(Ordering::SeqCst)
    }

    /// Number of acceptors listening and not yet closed
    pub fn open_acceptors(&self) -> usize {
        self.open_acceptors.load(Ordering::SeqCst)
    }

    fn outcome(&self, name: &str) -> ConnectOutcome {
        self.outcomes
            .lock()
            .get(name)
            .cloned()
            .unwrap_or(ConnectOutcome::Succeed)
    }

    fn established(&self, name: &str) -> MemoryTransceiver {
        let (local, remote) =
            MemoryTransceiver::pair(self.protocol, name.to_string(), format!("{}-peer", name));
        self.peers.lock().push(remote);
        local
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn resolve(
        &self,
        endpoint: &Endpoint,
        selection: EndpointSelection,
    ) -> Result<Vec<Connector>> {
        tokio::task::yield_now().await;
        let resolution = self.resolutions.lock().get(endpoint.host()).cloned();
        let mut names = match resolution {
            Some(Resolution::Addresses(names)) => names,
            Some(Resolution::Fail) => {
                return Err(Error::Dns {
                    host: endpoint.host().to_string(),
                    source: Arc::new(io::Error::new(io::ErrorKind::NotFound, "scripted failure")),
                });
            }
            None => vec![format!("{}:{}", endpoint.host(), endpoint.port())],
        };
        if names.is_empty() {
            return Err(Error::NoAddresses(endpoint.to_string()));
        }
        if selection == EndpointSelection::Random {
            names.shuffle(&mut rand::thread_rng());
        }
        Ok(names
            .into_iter()
            .map(|name| Connector::new(endpoint, ConnectorAddress::Named(name)))
            .collect())
    }

    async fn connect(&self, connector: &Connector) -> Result<Box<dyn Transceiver>> {
        let name = connector.address().to_string();
        *self.attempts.entry(name.clone()).or_insert(0) += 1;
        self.attempt_log.lock().push(name.clone());
        tracing::debug!(connector = %name, "Scripted dial");

        match self.outcome(&name) {
            ConnectOutcome::Succeed => {}
            ConnectOutcome::Delay(delay) => tokio::time::sleep(delay).await,
            ConnectOutcome::Gate(gate) => gate.notified().await,
            ConnectOutcome::Refuse => {
                return Err(Error::connect_failed(
                    connector,
                    io::Error::from(io::ErrorKind::ConnectionRefused),
                ));
            }
            ConnectOutcome::Fail(error) => return Err(error),
            ConnectOutcome::FailHandshake(error) => {
                return Ok(Box::new(
                    self.established(&name).with_handshake_error(error),
                ));
            }
            ConnectOutcome::Hang => std::future::pending::<()>().await,
        }
        Ok(Box::new(self.established(&name)))
    }

    fn acceptor(&self, endpoint: &Endpoint, adapter_name: &str) -> Result<Box<dyn Acceptor>> {
        if self.protocol.is_datagram() {
            return Err(Error::Unsupported(format!(
                "`{}` endpoints cannot accept connections",
                self.protocol
            )));
        }
        Ok(Box::new(MemoryAcceptor {
            endpoint: endpoint.clone(),
            adapter_name: adapter_name.to_string(),
            queue: self.accept_rx.clone(),
            listens: self.listens.clone(),
            open: self.open_acceptors.clone(),
            listening: false,
            port: if endpoint.port() == 0 {
                self.next_port.fetch_add(1, Ordering::Relaxed)
            } else {
                endpoint.port()
            },
        }))
    }

    async fn transceiver(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Option<(Box<dyn Transceiver>, Endpoint)>> {
        if !self.protocol.is_datagram() {
            return Ok(None);
        }
        let port = match endpoint.port() {
            0 => self.next_port.fetch_add(1, Ordering::Relaxed),
            port => port,
        };
        let bound = endpoint.clone().with_port(port);
        let transceiver = self.established(&format!("{}:{}", endpoint.host(), port));
        Ok(Some((Box::new(transceiver), bound)))
    }
}

impl fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("protocol", &self.protocol)
            .field("total_attempts", &self.total_attempts())
            .field("listens", &self.listen_count())
            .finish()
    }
}

/// Acceptor fed by [`ScriptedTransport::dial_in`] and [`ScriptedTransport::inject_accept_error`]
pub struct MemoryAcceptor {
    endpoint: Endpoint,
    adapter_name: String,
    queue: Arc<tokio::sync::Mutex<AcceptQueue>>,
    listens: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    listening: bool,
    port: u16,
}

impl fmt::Display for MemoryAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory acceptor {} for {}", self.port, self.adapter_name)
    }
}

#[async_trait]
impl Acceptor for MemoryAcceptor {
    async fn listen(&mut self) -> Result<Endpoint> {
        if !self.listening {
            self.listening = true;
            self.listens.fetch_add(1, Ordering::SeqCst);
            self.open.fetch_add(1, Ordering::SeqCst);
        }
        Ok(self.endpoint.clone().with_port(self.port))
    }

    async fn accept(&mut self) -> Result<Box<dyn Transceiver>> {
        if !self.listening {
            return Err(Error::Unsupported("acceptor is not listening".to_string()));
        }
        match self.queue.lock().await.recv().await {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        if std::mem::take(&mut self.listening) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryAcceptor {
    fn drop(&mut self) {
        if self.listening {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
