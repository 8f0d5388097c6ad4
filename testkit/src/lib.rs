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

//! Switchyard Test Kit
//!
//! In-memory doubles for exercising connection factories without sockets:
//!
//! - [`ScriptedTransport`]: scripted resolution and per-connector dial outcomes
//!   ([`ConnectOutcome`]), attempt counting, and a [`MemoryAcceptor`] fed from the test
//! - [`MemoryTransceiver`]: duplex-pipe transceiver with a scriptable handshake
//! - [`init_tracing`]: installs a `tracing` subscriber once, for ad-hoc debugging

mod transceiver;
mod transport;

pub use transceiver::MemoryTransceiver;
pub use transport::{ConnectOutcome, MemoryAcceptor, ScriptedTransport};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a `tracing-subscriber` formatter honouring `RUST_LOG`, at most once per process
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
