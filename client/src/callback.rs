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

//! Completion callbacks for connection requests

use switchyard_transport::{Connection, Error, Result};

/// Receiver of the outcome of one [`create`](crate::OutgoingConnectionFactory::create) call
///
/// Exactly one of the two methods is called, exactly once. Calls happen either on the
/// caller's thread (when a pooled connection is found immediately) or on a runtime
/// worker thread, so implementations must not block.
pub trait CreateConnectionCallback: Send + Sync + 'static {
    /// A connection is available; `compress` is the resolved compression policy
    fn set_connection(&self, connection: Connection, compress: bool);

    /// The request failed with the last error encountered
    fn set_exception(&self, error: Error);
}

impl<F> CreateConnectionCallback for F
where
    F: Fn(Result<(Connection, bool)>) + Send + Sync + 'static,
{
    fn set_connection(&self, connection: Connection, compress: bool) {
        self(Ok((connection, compress)))
    }

    fn set_exception(&self, error: Error) {
        self(Err(error))
    }
}
