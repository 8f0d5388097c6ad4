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

//! Core value types shared by the transport, client and server crates

use crate::Error;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Transport protocol identifier of an endpoint or connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    /// Plain TCP stream
    Tcp,
    /// TLS over TCP
    Ssl,
    /// UDP datagrams (connectionless)
    Udp,
    /// WebSocket over TCP
    Ws,
    /// WebSocket over TLS
    Wss,
    /// Bluetooth RFCOMM
    Bt,
    /// Bluetooth RFCOMM with TLS
    Bts,
}

impl Protocol {
    /// Every protocol, in declaration order
    pub const ALL: [Protocol; 7] = [
        Protocol::Tcp,
        Protocol::Ssl,
        Protocol::Udp,
        Protocol::Ws,
        Protocol::Wss,
        Protocol::Bt,
        Protocol::Bts,
    ];

    /// Protocol name as used in endpoint strings
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ssl => "ssl",
            Self::Udp => "udp",
            Self::Ws => "ws",
            Self::Wss => "wss",
            Self::Bt => "bt",
            Self::Bts => "bts",
        }
    }

    /// Check if the protocol encrypts traffic
    pub fn is_secure(self) -> bool {
        matches!(self, Self::Ssl | Self::Wss | Self::Bts)
    }

    /// Check if the protocol is connectionless
    pub fn is_datagram(self) -> bool {
        matches!(self, Self::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How resolved addresses of an endpoint are ordered before connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EndpointSelection {
    /// Shuffle the resolved addresses
    #[default]
    Random,
    /// Keep the order returned by the resolver
    Ordered,
}

/// Readiness a transceiver is waiting for before it can make progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOperation {
    /// No operation pending, initialization is complete
    None,
    /// Waiting for the socket to become readable
    Read,
    /// Waiting for the socket to become writable
    Write,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a connection ID from a raw value
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocate the next process-wide connection ID
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle state
///
/// The declaration order matters: a connection only ever moves forward except for
/// the `Active`/`Holding` pair, and `state >= Holding` means "not dispatching".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport handshake in progress
    Validating = 0,
    /// Validated and reading from the transceiver
    Active = 1,
    /// Validated but not reading
    Holding = 2,
    /// Destroy requested, transceiver is being closed
    Closing = 3,
    /// Transceiver closed
    Closed = 4,
    /// All resources released, ready to be reaped
    Finished = 5,
}

/// A requested connection state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    /// Handshake completed
    Validated,
    /// Start reading
    Activate,
    /// Stop reading
    Hold,
    /// Begin shutdown
    Destroy,
    /// Transceiver closed
    Close,
    /// Cleanup done
    Finish,
}

impl ConnectionState {
    /// Compute the state reached by applying `transition`, or `None` if the
    /// transition is not legal from this state.
    pub fn apply(self, transition: ConnectionTransition) -> Option<ConnectionState> {
        use ConnectionState::*;
        use ConnectionTransition as T;
        match (self, transition) {
            (Validating, T::Validated) => Some(Holding),
            (Holding, T::Activate) => Some(Active),
            (Active, T::Hold) => Some(Holding),
            (Validating | Active | Holding, T::Destroy) => Some(Closing),
            (Closing, T::Close) => Some(Closed),
            (Closed, T::Finish) => Some(Finished),
            _ => None,
        }
    }

    /// Check if the connection can be handed out for use
    pub fn is_active_or_holding(self) -> bool {
        matches!(self, Self::Active | Self::Holding)
    }

    /// Check if the connection is shutting down or gone
    pub fn is_terminal(self) -> bool {
        self >= Self::Closing
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Active => write!(f, "active"),
            Self::Holding => write!(f, "holding"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Why a connection was destroyed
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The owning outgoing factory was destroyed
    CommunicatorDestroyed,
    /// The owning incoming factory was destroyed
    AdapterDeactivated,
    /// The ACM monitor closed an idle connection
    IdleTimeout,
    /// Closed on request of the local application
    ClosedLocally,
    /// The peer closed the connection
    PeerClosed,
    /// An I/O or handshake error
    Failed(Arc<Error>),
}

impl CloseReason {
    /// Convert the reason into the error reported to users of the connection
    pub fn to_error(&self) -> Error {
        match self {
            Self::CommunicatorDestroyed => Error::CommunicatorDestroyed,
            Self::AdapterDeactivated => Error::AdapterDeactivated,
            Self::Failed(err) => Error::clone(err),
            other => Error::ConnectionClosed(other.to_string()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommunicatorDestroyed => write!(f, "communicator destroyed"),
            Self::AdapterDeactivated => write!(f, "object adapter deactivated"),
            Self::IdleTimeout => write!(f, "closed by ACM after idle timeout"),
            Self::ClosedLocally => write!(f, "closed locally"),
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::Failed(err) => write!(f, "{}", err),
        }
    }
}
