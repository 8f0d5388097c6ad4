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

//! Byte-stream and acceptor abstractions implemented by each transport

use crate::{Endpoint, Protocol, Result, SocketOperation};
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;

/// Non-blocking byte-stream I/O over one established socket
///
/// A transceiver is owned by exactly one connection worker. The connection drives the
/// transport handshake by calling [`initialize`](Self::initialize) until it returns
/// [`SocketOperation::None`], waiting for the requested readiness in between.
#[async_trait]
pub trait Transceiver: fmt::Display + Send + 'static {
    /// Protocol of the underlying socket
    fn protocol(&self) -> Protocol;

    /// Advance the transport handshake
    ///
    /// Returns the readiness the transceiver needs before it can make further progress,
    /// or [`SocketOperation::None`] once the handshake is complete. Repeatable.
    async fn initialize(&mut self) -> Result<SocketOperation>;

    /// Wait until the socket is ready for `operation`
    async fn wait(&mut self, operation: SocketOperation) -> Result<()>;

    /// Read available bytes into `buf`, returning the number read (0 means end of stream)
    ///
    /// Must be cancellation safe: if the future is dropped before completion no data
    /// has been consumed.
    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize>;

    /// Write the whole buffer
    async fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Close the socket
    async fn close(&mut self) -> Result<()>;
}

/// Listening socket producing transceivers for incoming connections
#[async_trait]
pub trait Acceptor: fmt::Display + Send + 'static {
    /// Bind and listen, returning the endpoint actually bound
    ///
    /// When the configured endpoint uses port 0 the returned endpoint carries the port
    /// chosen by the operating system.
    async fn listen(&mut self) -> Result<Endpoint>;

    /// Accept the next incoming connection
    ///
    /// Must be cancellation safe.
    async fn accept(&mut self) -> Result<Box<dyn Transceiver>>;

    /// Stop listening and release the socket
    async fn close(&mut self);
}
