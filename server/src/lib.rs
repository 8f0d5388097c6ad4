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

//! # Switchyard Server
//!
//! Incoming connection factories.
//!
//! An [`IncomingConnectionFactory`] owns the acceptor for one endpoint of an adapter.
//! It follows a small state machine:
//!
//! ```text
//! Holding ⇄ Active
//!    └──┬───┘
//!       ↓ destroy
//!    Closed ──→ Finished (acceptor closed)
//! ```
//!
//! While Holding the acceptor is paused and accepted connections do not dispatch. While
//! Active new connections are accepted, validated and activated. Destroying the factory
//! closes the acceptor and destroys every connection;
//! [`IncomingConnectionFactory::wait_until_finished`] completes once all of them are gone.
//!
//! An acceptor that runs out of file descriptors is closed and recreated after
//! [`ServerConfig::acceptor_retry_delay`].

mod acceptor;
mod config;
mod factory;
mod state;

pub use self::config::ServerConfig;
pub use self::factory::IncomingConnectionFactory;
pub use self::state::FactoryState;
