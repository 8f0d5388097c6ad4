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

//! UDP transport: connectionless endpoints served by a single bound socket

use crate::tcp::resolve_addrs;
use crate::{
    Connector, Endpoint, EndpointSelection, Error, Protocol, Result, SocketOperation, Transceiver,
    Transport,
};
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Largest datagram accepted by the transceiver
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Built-in `udp` transport
#[derive(Debug, Default, Clone)]
pub struct UdpTransport;

impl UdpTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
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
        let peer = connector
            .socket_addr()
            .ok_or_else(|| Error::Unsupported(format!("`{}` is not an IP connector", connector)))?;
        let local = match connector.source_address() {
            Some(ip) => SocketAddr::new(ip, 0),
            None if peer.is_ipv6() => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            None => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|err| Error::connect_failed(connector, err))?;
        socket
            .connect(peer)
            .await
            .map_err(|err| Error::connect_failed(connector, err))?;
        Ok(Box::new(UdpTransceiver::connected(socket, peer)))
    }

    async fn transceiver(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Option<(Box<dyn Transceiver>, Endpoint)>> {
        let addrs = resolve_addrs(endpoint, EndpointSelection::Ordered).await?;
        let socket = UdpSocket::bind(addrs.as_slice()).await?;
        let local = socket.local_addr()?;
        tracing::debug!(address = %local, "Bound udp socket");
        let bound = endpoint.clone().with_port(local.port());
        Ok(Some((Box::new(UdpTransceiver::bound(socket)), bound)))
    }
}

/// Transceiver over a UDP socket
///
/// A connected transceiver talks to one peer; a bound (server) transceiver replies to
/// the sender of the most recent datagram.
pub struct UdpTransceiver {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    connected: bool,
}

impl UdpTransceiver {
    fn connected(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer: Some(peer),
            connected: true,
        }
    }

    fn bound(socket: UdpSocket) -> Self {
        Self {
            socket,
            peer: None,
            connected: false,
        }
    }
}

impl fmt::Display for UdpTransceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(local) = self.socket.local_addr() {
            write!(f, "local address = {}", local)?;
        }
        if let Some(peer) = self.peer {
            write!(f, "\nremote address = {}", peer)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transceiver for UdpTransceiver {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    async fn initialize(&mut self) -> Result<SocketOperation> {
        Ok(SocketOperation::None)
    }

    async fn wait(&mut self, operation: SocketOperation) -> Result<()> {
        match operation {
            SocketOperation::Read => self.socket.readable().await?,
            SocketOperation::Write => self.socket.writable().await?,
            SocketOperation::None => {}
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        buf.reserve(MAX_DATAGRAM_SIZE);
        let (len, from) = self.socket.recv_buf_from(buf).await?;
        if !self.connected {
            self.peer = Some(from);
        }
        Ok(len)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        if self.connected {
            self.socket.send(buf).await?;
            return Ok(());
        }
        match self.peer {
            Some(peer) => {
                self.socket.send_to(buf, peer).await?;
                Ok(())
            }
            None => Err(Error::Unsupported(
                "datagram transceiver has no peer to reply to".to_string(),
            )),
        }
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bound_transceiver_replies_to_sender() {
        let transport = UdpTransport::new();
        let (mut server, endpoint) = transport
            .transceiver(&Endpoint::udp("127.0.0.1", 0))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(endpoint.port(), 0);

        let connectors = transport
            .resolve(&endpoint, EndpointSelection::Ordered)
            .await
            .unwrap();
        let mut client = transport.connect(&connectors[0]).await.unwrap();

        client.write(b"hello").await.unwrap();
        let mut buf = BytesMut::new();
        assert_eq!(server.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..], b"hello");

        server.write(b"back").await.unwrap();
        let mut buf = BytesMut::new();
        assert_eq!(client.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..], b"back");
    }

    #[tokio::test]
    async fn test_bound_transceiver_without_peer() {
        let (mut server, _) = UdpTransport::new()
            .transceiver(&Endpoint::udp("127.0.0.1", 0))
            .await
            .unwrap()
            .unwrap();
        assert!(server.write(b"x").await.is_err());
    }

    #[test]
    fn test_udp_has_no_acceptor() {
        let result = UdpTransport::new().acceptor(&Endpoint::udp("127.0.0.1", 0), "a");
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }
}
