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

//! Adapter trait receiving traffic from connections

use crate::{CloseReason, Connection};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Receiver of the data read on a connection
///
/// Server-side connections are bound to the adapter of the incoming factory that
/// accepted them; client-side connections get one through router configuration.
/// All methods except [`name`](Self::name) have default implementations that do nothing.
///
/// `on_data` runs on the connection's worker task, so implementations that want to
/// reply may call [`Connection::send`] directly.
///
/// # Example
///
/// ```no_run
/// use switchyard_transport::{Adapter, Connection};
/// use async_trait::async_trait;
/// use bytes::Bytes;
///
/// struct Echo;
///
/// #[async_trait]
/// impl Adapter for Echo {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     async fn on_data(&self, connection: &Connection, data: Bytes) {
///         let _ = connection.send(data);
///     }
/// }
/// ```
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Called for every chunk read from an active connection
    async fn on_data(&self, _connection: &Connection, _data: Bytes) {}

    /// Called once when the connection is closed, before it reaches `Finished`
    async fn on_close(&self, _connection: &Connection, _reason: &CloseReason) {}
}

/// Check if two adapter handles refer to the same adapter instance
pub fn same_adapter(a: &Arc<dyn Adapter>, b: &Arc<dyn Adapter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
