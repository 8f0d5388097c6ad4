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

//! TCP transport built on tokio sockets

use crate::{
    Acceptor, Connector, Endpoint, EndpointSelection, Error, Protocol, Result, SocketOperation,
    Transceiver, Transport,
};
use async_trait::async_trait;
use bytes::BytesMut;
use rand::seq::SliceRandom;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream, lookup_host};

/// Resolve `host:port` into socket addresses using tokio's blocking resolver pool
pub(crate) async fn resolve_addrs(
    endpoint: &Endpoint,
    selection: EndpointSelection,
) -> Result<Vec<SocketAddr>> {
    let host = match endpoint.host() {
        "" => "0.0.0.0",
        host => host,
    };
    tracing::debug!(%endpoint, "Resolving endpoint");
    let mut addrs: Vec<SocketAddr> = lookup_host((host, endpoint.port()))
        .await
        .map_err(|source| Error::Dns {
            host: host.to_string(),
            source: source.into(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::NoAddresses(endpoint.to_string()));
    }
    if selection == EndpointSelection::Random {
        addrs.shuffle(&mut rand::thread_rng());
    }
    Ok(addrs)
}

fn unspecified_for(addr: &SocketAddr, source: Option<IpAddr>) -> SocketAddr {
    match source {
        Some(ip) => SocketAddr::new(ip, 0),
        None if addr.is_ipv6() => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
    }
}

/// Built-in `tcp` transport
#[derive(Debug, Default, Clone)]
pub struct TcpTransport;

impl TcpTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn resolve(
        &self,
        endpoint: &Endpoint,
        selection: EndpointSelection,
    ) -> Result<Vec<Connector>> {
        let addrs = resolve_addrs(endpoint, selection).await?;
        Ok(addrs
            .into_iter()
            .map(|addr| Connector::inet(endpoint, addr))
            .collect())
    }

    async fn connect(&self, connector: &Connector) -> Result<Box<dyn Transceiver>> {
        let addr = connector
            .socket_addr()
            .ok_or_else(|| Error::Unsupported(format!("`{}` is not an IP connector", connector)))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|err| Error::connect_failed(connector, err))?;
        socket
            .set_nodelay(true)
            .map_err(|err| Error::connect_failed(connector, err))?;
        if connector.source_address().is_some() {
            socket
                .bind(unspecified_for(&addr, connector.source_address()))
                .map_err(|err| Error::connect_failed(connector, err))?;
        }

        let connect = socket.connect(addr);
        let stream = match connector.timeout() {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| Error::ConnectTimeout {
                    connector: connector.to_string(),
                })?,
            None => connect.await,
        }
        .map_err(|err| Error::connect_failed(connector, err))?;

        Ok(Box::new(TcpTransceiver::new(stream)?))
    }

    fn acceptor(&self, endpoint: &Endpoint, adapter_name: &str) -> Result<Box<dyn Acceptor>> {
        Ok(Box::new(TcpAcceptor::new(endpoint.clone(), adapter_name)))
    }
}

/// Transceiver over a connected [`TcpStream`]
pub struct TcpTransceiver {
    stream: TcpStream,
    local: Option<SocketAddr>,
    peer: Option<SocketAddr>,
}

impl TcpTransceiver {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            local: stream.local_addr().ok(),
            peer: stream.peer_addr().ok(),
            stream,
        })
    }

    /// Get the remote address
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl fmt::Display for TcpTransceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.local, self.peer) {
            (Some(local), Some(peer)) => {
                write!(f, "local address = {}\nremote address = {}", local, peer)
            }
            _ => write!(f, "<not connected>"),
        }
    }
}

#[async_trait]
impl Transceiver for TcpTransceiver {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    async fn initialize(&mut self) -> Result<SocketOperation> {
        // tokio completes the connect before handing out the stream
        Ok(SocketOperation::None)
    }

    async fn wait(&mut self, operation: SocketOperation) -> Result<()> {
        match operation {
            SocketOperation::Read => self.stream.readable().await?,
            SocketOperation::Write => self.stream.writable().await?,
            SocketOperation::None => {}
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(self.stream.read_buf(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Listening TCP socket
pub struct TcpAcceptor {
    endpoint: Endpoint,
    adapter_name: String,
    listener: Option<TcpListener>,
}

impl TcpAcceptor {
    /// Create an acceptor for `endpoint`; nothing is bound until [`Acceptor::listen`]
    pub fn new(endpoint: Endpoint, adapter_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            adapter_name: adapter_name.into(),
            listener: None,
        }
    }
}

impl fmt::Display for TcpAcceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.listener.as_ref().and_then(|l| l.local_addr().ok()) {
            Some(addr) => write!(f, "local address = {}", addr),
            None => write!(f, "{}", self.endpoint),
        }
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn listen(&mut self) -> Result<Endpoint> {
        let addrs = resolve_addrs(&self.endpoint, EndpointSelection::Ordered).await?;
        let mut last_error = None;
        for addr in addrs {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let local = listener.local_addr()?;
                    tracing::debug!(
                        adapter = %self.adapter_name,
                        address = %local,
                        "Listening for tcp connections"
                    );
                    self.listener = Some(listener);
                    self.endpoint = self.endpoint.clone().with_port(local.port());
                    return Ok(self.endpoint.clone());
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error
            .map(Error::from)
            .unwrap_or_else(|| Error::NoAddresses(self.endpoint.to_string())))
    }

    async fn accept(&mut self) -> Result<Box<dyn Transceiver>> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::Unsupported("acceptor is not listening".to_string()))?;
        let (stream, peer) = listener.accept().await?;
        tracing::trace!(%peer, "Accepted tcp connection");
        Ok(Box::new(TcpTransceiver::new(stream)?))
    }

    async fn close(&mut self) {
        self.listener = None;
    }
}
