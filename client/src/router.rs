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

use std::sync::Arc;
use switchyard_transport::{Adapter, Endpoint};

/// Routing information applied to pooled connections
///
/// Connections reaching one of the client endpoints dispatch incoming data to the
/// router's adapter, if any.
#[derive(Clone, Default)]
pub struct RouterInfo {
    adapter: Option<Arc<dyn Adapter>>,
    client_endpoints: Vec<Endpoint>,
}

impl RouterInfo {
    pub fn new(client_endpoints: Vec<Endpoint>) -> Self {
        Self {
            adapter: None,
            client_endpoints,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        self.adapter.clone()
    }

    pub fn client_endpoints(&self) -> &[Endpoint] {
        &self.client_endpoints
    }
}

impl std::fmt::Debug for RouterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterInfo")
            .field("adapter", &self.adapter.as_ref().map(|adapter| adapter.name().to_string()))
            .field("client_endpoints", &self.client_endpoints)
            .finish()
    }
}
