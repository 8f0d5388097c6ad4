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

//! Error types for connection establishment and lifecycle

use crate::Protocol;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], driving retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect, handshake or I/O failure on one connector; try the next connector
    TransportFailure,
    /// Endpoint could not be resolved into connectors; try the next endpoint
    ResolutionFailure,
    /// The factory or communicator is going away; abort immediately
    PlatformShutdown,
    /// An established connection was lost or closed
    ConnectionLost,
    /// Invalid configuration or unsupported request
    Configuration,
}

/// Transport error types
///
/// Errors are cheap to clone so that a single failed attempt can be reported to
/// every requester waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The outgoing factory (or its communicator) was destroyed
    #[error("communicator destroyed")]
    CommunicatorDestroyed,

    /// The incoming factory (or its object adapter) was deactivated
    #[error("object adapter deactivated")]
    AdapterDeactivated,

    /// I/O error from an underlying socket
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Connection establishment failed
    #[error("connect to {connector} failed: {source}")]
    ConnectFailed {
        /// Connector description
        connector: String,
        /// Underlying socket error
        #[source]
        source: Arc<io::Error>,
    },

    /// Connection establishment or validation timed out
    #[error("connect to {connector} timed out")]
    ConnectTimeout {
        /// Connector description
        connector: String,
    },

    /// Host name lookup failed
    #[error("DNS lookup for `{host}` failed: {source}")]
    Dns {
        /// Host that failed to resolve
        host: String,
        /// Underlying resolver error
        #[source]
        source: Arc<io::Error>,
    },

    /// Endpoint resolved to an empty address list
    #[error("endpoint `{0}` resolved to no addresses")]
    NoAddresses(String),

    /// No transport is registered for the protocol
    #[error("no transport registered for protocol `{0}`")]
    UnsupportedProtocol(Protocol),

    /// Operation not supported by this transport
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Connection has been closed
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CommunicatorDestroyed | Self::AdapterDeactivated => ErrorKind::PlatformShutdown,
            Self::Dns { .. } | Self::NoAddresses(_) => ErrorKind::ResolutionFailure,
            Self::Io(_) | Self::ConnectFailed { .. } | Self::ConnectTimeout { .. } => {
                ErrorKind::TransportFailure
            }
            Self::ConnectionClosed(_) => ErrorKind::ConnectionLost,
            Self::UnsupportedProtocol(_) | Self::Unsupported(_) | Self::Config(_) => {
                ErrorKind::Configuration
            }
        }
    }

    /// Check if the error means the platform is shutting down
    ///
    /// Shutdown errors abort every remaining candidate of a connection attempt.
    pub fn is_shutdown(&self) -> bool {
        self.kind() == ErrorKind::PlatformShutdown
    }

    /// Check if trying another candidate might succeed
    pub fn is_recoverable(&self) -> bool {
        !self.is_shutdown()
    }

    /// Check if the error reports exhaustion of file descriptors or memory
    pub fn is_resource_exhausted(&self) -> bool {
        match self {
            Self::Io(err) | Self::ConnectFailed { source: err, .. } => is_resource_exhausted(err),
            _ => false,
        }
    }

    /// Create a connect error for the given connector
    pub fn connect_failed(connector: impl ToString, source: io::Error) -> Self {
        Self::ConnectFailed {
            connector: connector.to_string(),
            source: Arc::new(source),
        }
    }
}

/// Check if an I/O error reports that no more sockets can be created
pub fn is_resource_exhausted(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    match error.raw_os_error() {
        // ENFILE, EMFILE
        #[cfg(unix)]
        Some(23) | Some(24) => true,
        // WSAEMFILE, WSAENOBUFS
        #[cfg(windows)]
        Some(10024) | Some(10055) => true,
        _ => false,
    }
}
