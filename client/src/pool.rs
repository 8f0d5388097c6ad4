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

//! Pool indices and the pending-attempt registry of the outgoing factory
//!
//! Everything here is guarded by the factory's single mutex. Methods never block and
//! never await; outcomes for other requesters are returned to the caller so they can be
//! delivered after the lock is released.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use switchyard_transport::{Connection, Connector, ConnectorInfo, Endpoint, Error, Overrides};
use tokio::sync::oneshot;

/// Identifier of one connect driver
pub(crate) type RequestId = u64;

/// What a waiting requester is told once the attempt it waited on resolves
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The attempt produced a connection to one of the requester's connectors
    Connected(Connection, bool),
    /// Every connector of the requester failed
    Failed(Error),
    /// The attempt resolved without settling this requester; look again with the
    /// remaining connectors
    Retry(Vec<ConnectorInfo>),
}

/// Result of looking up a connection for a set of connectors
#[derive(Debug)]
pub(crate) enum Acquire {
    /// A usable pooled connection
    Found(Connection, bool),
    /// Another requester is connecting to one of the connectors; wait for its outcome
    Pending(oneshot::Receiver<Outcome>),
    /// The caller now owns the attempt for all of its connectors
    Proceed,
}

struct Waiter {
    connectors: Vec<ConnectorInfo>,
    notify: oneshot::Sender<Outcome>,
}

impl Waiter {
    fn has_connector(&self, connector: &Connector) -> bool {
        self.connectors.iter().any(|info| &info.connector == connector)
    }
}

/// Notifications to deliver once the factory lock is released
pub(crate) type Deliveries = Vec<(oneshot::Sender<Outcome>, Outcome)>;

#[derive(Default)]
pub(crate) struct Pool {
    pub(crate) destroyed: bool,
    connections: BTreeMap<Connector, Vec<Connection>>,
    by_endpoint: HashMap<Endpoint, Vec<Connection>>,
    pending: BTreeMap<Connector, BTreeSet<RequestId>>,
    waiters: HashMap<RequestId, Waiter>,
    pub(crate) pending_connect_count: usize,
}

impl Pool {
    /// Remove reaped connections from both indices, returning how many were pooled
    pub(crate) fn reap(&mut self, reaped: Vec<Connection>) -> usize {
        let mut removed = 0;
        for connection in reaped {
            if let Some(connector) = connection.connector() {
                if let Some(list) = self.connections.get_mut(connector) {
                    if remove_connection(list, &connection) {
                        removed += 1;
                    }
                    if list.is_empty() {
                        self.connections.remove(connector);
                    }
                }
            }
            let endpoint = connection.endpoint().clone();
            for key in [endpoint.clone().with_compress(true), endpoint] {
                if let Some(list) = self.by_endpoint.get_mut(&key) {
                    remove_connection(list, &connection);
                    if list.is_empty() {
                        self.by_endpoint.remove(&key);
                    }
                }
            }
        }
        removed
    }

    /// Insert a connection under its connector and both variants of its endpoint
    pub(crate) fn insert(&mut self, connector: Connector, connection: Connection) {
        let endpoint = connection.endpoint().clone();
        self.connections
            .entry(connector)
            .or_default()
            .push(connection.clone());
        self.by_endpoint
            .entry(endpoint.clone().with_compress(true))
            .or_default()
            .push(connection.clone());
        self.by_endpoint.entry(endpoint).or_default().push(connection);
    }

    /// Find a usable connection for any of `endpoints`, in order
    pub(crate) fn find_by_endpoints(
        &self,
        endpoints: &[Endpoint],
        overrides: &Overrides,
    ) -> Option<(Connection, bool)> {
        endpoints.iter().find_map(|endpoint| {
            self.by_endpoint
                .get(endpoint)?
                .iter()
                .find(|connection| connection.is_active_or_holding())
                .map(|connection| (connection.clone(), overrides.compress_for(endpoint)))
        })
    }

    /// Find a usable connection for any of `connectors` that has no attempt in flight
    pub(crate) fn find_by_connectors(
        &self,
        connectors: &[ConnectorInfo],
        overrides: &Overrides,
    ) -> Option<(Connection, bool)> {
        connectors
            .iter()
            .filter(|info| !self.pending.contains_key(&info.connector))
            .find_map(|info| {
                self.connections
                    .get(&info.connector)?
                    .iter()
                    .find(|connection| connection.is_active_or_holding())
                    .map(|connection| (connection.clone(), overrides.compress_for(&info.endpoint)))
            })
    }

    /// Look up a connection or register the requester with the pending registry
    pub(crate) fn acquire(
        &mut self,
        requester: RequestId,
        connectors: &[ConnectorInfo],
        overrides: &Overrides,
    ) -> Acquire {
        if let Some((connection, compress)) = self.find_by_connectors(connectors, overrides) {
            return Acquire::Found(connection, compress);
        }

        let mut waiting = false;
        for info in connectors {
            if let Some(requesters) = self.pending.get_mut(&info.connector) {
                requesters.insert(requester);
                waiting = true;
            }
        }
        if waiting {
            let (notify, receiver) = oneshot::channel();
            self.waiters.insert(
                requester,
                Waiter {
                    connectors: connectors.to_vec(),
                    notify,
                },
            );
            return Acquire::Pending(receiver);
        }

        for info in connectors {
            self.pending.entry(info.connector.clone()).or_default();
        }
        Acquire::Proceed
    }

    /// Resolve the attempt for `connectors` with a connection established through `winner`
    pub(crate) fn finish_success(
        &mut self,
        connectors: &[ConnectorInfo],
        winner: &Connector,
        connection: &Connection,
        compress: bool,
    ) -> Deliveries {
        let mut connected = BTreeSet::new();
        let mut retry = BTreeSet::new();
        for info in connectors {
            let Some(requesters) = self.pending.remove(&info.connector) else {
                continue;
            };
            for id in requesters {
                match self.waiters.get(&id) {
                    Some(waiter) if waiter.has_connector(winner) => {
                        connected.insert(id);
                    }
                    Some(_) => {
                        retry.insert(id);
                    }
                    None => {}
                }
            }
        }

        let mut deliveries = Vec::with_capacity(connected.len() + retry.len());
        for id in connected {
            retry.remove(&id);
            if let Some(waiter) = self.remove_waiter(id) {
                deliveries.push((waiter.notify, Outcome::Connected(connection.clone(), compress)));
            }
        }
        for id in retry {
            if let Some(waiter) = self.remove_waiter(id) {
                deliveries.push((waiter.notify, Outcome::Retry(waiter.connectors)));
            }
        }
        deliveries
    }

    /// Resolve the attempt for `connectors` with a failure
    pub(crate) fn finish_failure(
        &mut self,
        connectors: &[ConnectorInfo],
        error: &Error,
    ) -> Deliveries {
        let mut affected = BTreeSet::new();
        for info in connectors {
            if let Some(requesters) = self.pending.remove(&info.connector) {
                affected.extend(requesters);
            }
        }

        let mut deliveries = Vec::with_capacity(affected.len());
        for id in affected {
            let Some(mut waiter) = self.remove_waiter(id) else {
                continue;
            };
            waiter
                .connectors
                .retain(|candidate| !connectors.contains(candidate));
            let outcome = if waiter.connectors.is_empty() {
                Outcome::Failed(error.clone())
            } else {
                Outcome::Retry(waiter.connectors)
            };
            deliveries.push((waiter.notify, outcome));
        }
        deliveries
    }

    /// Check if shutdown may complete
    pub(crate) fn is_drained(&self) -> bool {
        self.destroyed && self.pending.is_empty() && self.pending_connect_count == 0
    }

    /// Every pooled connection, in connector order
    pub(crate) fn all_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values().flatten()
    }

    /// Number of pooled connections
    pub(crate) fn len(&self) -> usize {
        self.connections.values().map(Vec::len).sum()
    }

    /// Drop every index entry
    pub(crate) fn clear(&mut self) {
        self.connections.clear();
        self.by_endpoint.clear();
    }

    /// Check if `connector` has an attempt in flight
    #[cfg(test)]
    pub(crate) fn is_pending(&self, connector: &Connector) -> bool {
        self.pending.contains_key(connector)
    }

    /// Check if `connection` is indexed under `connector`
    #[cfg(test)]
    pub(crate) fn contains(&self, connector: &Connector, connection: &Connection) -> bool {
        self.connections
            .get(connector)
            .is_some_and(|list| list.contains(connection))
    }

    /// Check if `connection` is indexed under `endpoint`
    #[cfg(test)]
    pub(crate) fn contains_endpoint(&self, endpoint: &Endpoint, connection: &Connection) -> bool {
        self.by_endpoint
            .get(endpoint)
            .is_some_and(|list| list.contains(connection))
    }

    fn remove_waiter(&mut self, id: RequestId) -> Option<Waiter> {
        let waiter = self.waiters.remove(&id)?;
        for info in &waiter.connectors {
            if let Some(requesters) = self.pending.get_mut(&info.connector) {
                requesters.remove(&id);
            }
        }
        Some(waiter)
    }
}

fn remove_connection(list: &mut Vec<Connection>, connection: &Connection) -> bool {
    let before = list.len();
    list.retain(|candidate| candidate != connection);
    list.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use switchyard_testkit::MemoryTransceiver;
    use switchyard_transport::{CloseReason, ConnectorAddress, Protocol};

    fn info(host: &str, name: &str) -> ConnectorInfo {
        let endpoint = Endpoint::tcp(host, 4061);
        let connector = Connector::new(&endpoint, ConnectorAddress::Named(name.to_string()));
        ConnectorInfo::new(connector, endpoint)
    }

    async fn started(info: &ConnectorInfo) -> Connection {
        let (local, _remote) = MemoryTransceiver::pair(Protocol::Tcp, "local", "remote");
        let connection = Connection::new(
            Box::new(local),
            info.endpoint.clone().with_compress(false),
            Some(info.connector.clone()),
            None,
        );
        connection.start().await.unwrap();
        connection
    }

    #[test]
    fn test_acquire_registers_pending() {
        let mut pool = Pool::default();
        let overrides = Overrides::default();
        let (a, b, c) = (info("h", "a"), info("h", "b"), info("h", "c"));

        assert!(matches!(
            pool.acquire(1, &[a.clone(), b.clone()], &overrides),
            Acquire::Proceed
        ));
        assert!(pool.is_pending(&a.connector));
        assert!(pool.is_pending(&b.connector));

        assert!(matches!(
            pool.acquire(2, &[b.clone(), c.clone()], &overrides),
            Acquire::Pending(_)
        ));
        // A waiter does not claim the connectors nobody is working on
        assert!(!pool.is_pending(&c.connector));

        assert!(matches!(
            pool.acquire(3, &[c.clone()], &overrides),
            Acquire::Proceed
        ));
    }

    #[tokio::test]
    async fn test_finish_success_partitions_waiters() {
        let mut pool = Pool::default();
        let overrides = Overrides::default();
        let (a, b, c) = (info("h", "a"), info("h", "b"), info("h", "c"));

        assert!(matches!(pool.acquire(1, &[a.clone(), b.clone()], &overrides), Acquire::Proceed));
        let Acquire::Pending(mut same) = pool.acquire(2, &[a.clone()], &overrides) else {
            panic!("expected pending");
        };
        let Acquire::Pending(mut other) = pool.acquire(3, &[b.clone(), c.clone()], &overrides)
        else {
            panic!("expected pending");
        };

        let connection = started(&a).await;
        pool.insert(a.connector.clone(), connection.clone());
        let deliveries =
            pool.finish_success(&[a.clone(), b.clone()], &a.connector, &connection, false);
        assert_eq!(deliveries.len(), 2);
        for (notify, outcome) in deliveries {
            let _ = notify.send(outcome);
        }

        assert!(matches!(
            same.try_recv(),
            Ok(Outcome::Connected(conn, false)) if conn == connection
        ));
        match other.try_recv() {
            Ok(Outcome::Retry(connectors)) => assert_eq!(connectors, vec![b.clone(), c.clone()]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!pool.is_pending(&a.connector));
        assert!(!pool.is_pending(&b.connector));
        connection.destroy(CloseReason::ClosedLocally);
    }

    #[test]
    fn test_finish_failure_removes_failed_connectors() {
        let mut pool = Pool::default();
        let overrides = Overrides::default();
        let (a, b, c) = (info("h", "a"), info("h", "b"), info("h", "c"));

        assert!(matches!(pool.acquire(1, &[a.clone(), b.clone()], &overrides), Acquire::Proceed));
        let Acquire::Pending(mut exhausted) = pool.acquire(2, &[b.clone()], &overrides) else {
            panic!("expected pending");
        };
        let Acquire::Pending(mut partial) = pool.acquire(3, &[a.clone(), c.clone()], &overrides)
        else {
            panic!("expected pending");
        };

        let deliveries =
            pool.finish_failure(&[a.clone(), b.clone()], &Error::CommunicatorDestroyed);
        for (notify, outcome) in deliveries {
            let _ = notify.send(outcome);
        }

        assert!(matches!(
            exhausted.try_recv(),
            Ok(Outcome::Failed(Error::CommunicatorDestroyed))
        ));
        match partial.try_recv() {
            Ok(Outcome::Retry(connectors)) => assert_eq!(connectors, vec![c.clone()]),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(pool.waiters.is_empty());
        assert!(pool.pending.is_empty());
    }

    #[tokio::test]
    async fn test_reap_removes_from_every_index() {
        let mut pool = Pool::default();
        let a = info("h", "a");
        let connection = started(&a).await;
        pool.insert(a.connector.clone(), connection.clone());

        let endpoint = connection.endpoint().clone();
        assert!(pool.contains(&a.connector, &connection));
        assert!(pool.contains_endpoint(&endpoint, &connection));
        assert!(pool.contains_endpoint(&endpoint.clone().with_compress(true), &connection));
        assert_eq!(pool.len(), 1);

        assert_eq!(pool.reap(vec![connection.clone()]), 1);
        assert!(!pool.contains(&a.connector, &connection));
        assert!(!pool.contains_endpoint(&endpoint, &connection));
        assert!(!pool.contains_endpoint(&endpoint.with_compress(true), &connection));
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.reap(vec![connection.clone()]), 0);
        connection.destroy(CloseReason::ClosedLocally);
    }

    #[tokio::test]
    async fn test_find_skips_pending_and_unusable() {
        let mut pool = Pool::default();
        let overrides = Overrides::default().with_compress(true);
        let (a, b) = (info("h", "a"), info("h", "b"));

        let first = started(&a).await;
        let second = started(&b).await;
        pool.insert(a.connector.clone(), first.clone());
        pool.insert(b.connector.clone(), second.clone());

        let found = pool.find_by_connectors(&[a.clone(), b.clone()], &overrides);
        assert_eq!(found, Some((first.clone(), true)));

        pool.pending.entry(a.connector.clone()).or_default();
        let found = pool.find_by_connectors(&[a.clone(), b.clone()], &overrides);
        assert_eq!(found, Some((second.clone(), true)));

        second.destroy(CloseReason::ClosedLocally);
        assert_eq!(pool.find_by_connectors(&[a.clone(), b.clone()], &overrides), None);

        let found = pool.find_by_endpoints(
            &[a.endpoint.clone().with_compress(true)],
            &Overrides::default(),
        );
        assert_eq!(found, Some((first.clone(), true)));
        first.destroy(CloseReason::ClosedLocally);
    }

    proptest! {
        #[test]
        fn prop_each_connector_is_claimed_once(
            requests in prop::collection::vec(prop::collection::btree_set(0u8..6, 1..4), 1..16)
        ) {
            let mut pool = Pool::default();
            let overrides = Overrides::default();
            let mut claimed = BTreeSet::new();
            for (id, names) in requests.iter().enumerate() {
                let connectors: Vec<_> = names
                    .iter()
                    .map(|name| info("host", &format!("c{}", name)))
                    .collect();
                match pool.acquire(id as RequestId, &connectors, &overrides) {
                    Acquire::Proceed => {
                        for name in names {
                            prop_assert!(claimed.insert(*name));
                        }
                    }
                    Acquire::Pending(_) => {
                        prop_assert!(names.iter().any(|name| claimed.contains(name)));
                    }
                    Acquire::Found(..) => prop_assert!(false, "empty pool served a connection"),
                }
            }
        }
    }
}
