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

//! In-memory transceivers over tokio duplex pipes

use async_trait::async_trait;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use switchyard_transport::{Error, Protocol, Result, SocketOperation, Transceiver};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Transceiver backed by one end of a [`tokio::io::duplex`] pipe
///
/// The handshake replays a scripted list of socket operations before reporting
/// completion, and can be scripted to fail.
pub struct MemoryTransceiver {
    name: String,
    protocol: Protocol,
    stream: Option<DuplexStream>,
    handshake: VecDeque<SocketOperation>,
    handshake_error: Option<Error>,
}

impl MemoryTransceiver {
    /// Create a connected pair named `a` and `b`
    pub fn pair(protocol: Protocol, a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (left, right) = duplex(PIPE_CAPACITY);
        (
            Self::from_stream(protocol, a.into(), left),
            Self::from_stream(protocol, b.into(), right),
        )
    }

    fn from_stream(protocol: Protocol, name: String, stream: DuplexStream) -> Self {
        Self {
            name,
            protocol,
            stream: Some(stream),
            handshake: VecDeque::new(),
            handshake_error: None,
        }
    }

    /// Require the given operations to be waited for before the handshake completes
    pub fn with_handshake(mut self, operations: impl IntoIterator<Item = SocketOperation>) -> Self {
        self.handshake = operations.into_iter().collect();
        self
    }

    /// Make the handshake fail with `error`
    pub fn with_handshake_error(mut self, error: Error) -> Self {
        self.handshake_error = Some(error);
        self
    }

    /// Get the transceiver name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the transceiver was closed
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> Result<&mut DuplexStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::from(io::Error::from(io::ErrorKind::NotConnected)))
    }
}

impl fmt::Display for MemoryTransceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory {}", self.name)
    }
}

#[async_trait]
impl Transceiver for MemoryTransceiver {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn initialize(&mut self) -> Result<SocketOperation> {
        if let Some(error) = self.handshake_error.take() {
            return Err(error);
        }
        Ok(self.handshake.pop_front().unwrap_or(SocketOperation::None))
    }

    async fn wait(&mut self, _operation: SocketOperation) -> Result<()> {
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        Ok(self.stream()?.read_buf(buf).await?)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.stream()?.write_all(buf).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (mut a, mut b) = MemoryTransceiver::pair(Protocol::Tcp, "a", "b");
        a.write(b"hello").await.unwrap();

        let mut buf = BytesMut::new();
        assert_eq!(b.read(&mut buf).await.unwrap(), 5);
        assert_eq!(&buf[..], b"hello");

        a.close().await.unwrap();
        assert!(a.is_closed());
        let mut buf = BytesMut::new();
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_scripted_handshake() {
        let (a, _b) = MemoryTransceiver::pair(Protocol::Tcp, "a", "b");
        let mut a = a.with_handshake([SocketOperation::Write, SocketOperation::Read]);

        assert_eq!(a.initialize().await.unwrap(), SocketOperation::Write);
        assert_eq!(a.initialize().await.unwrap(), SocketOperation::Read);
        assert_eq!(a.initialize().await.unwrap(), SocketOperation::None);
    }
}
