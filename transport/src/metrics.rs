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

//! Lock-free counters for connection factories

use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free factory metrics
///
/// Every recorder also increments the matching `switchyard.*` counter of the
/// [`metrics`] facade, so an installed recorder sees the same numbers as
/// [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct FactoryMetrics {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    resolve_failures: AtomicU64,
    connections_created: AtomicU64,
    pool_hits: AtomicU64,
    dedup_waits: AtomicU64,
    connections_reaped: AtomicU64,
    connections_removed: AtomicU64,
    connections_accepted: AtomicU64,
    accept_errors: AtomicU64,
    created_at: Instant,
}

impl Default for FactoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FactoryMetrics {
    /// Create a zeroed metrics instance
    pub fn new() -> Self {
        Self {
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            resolve_failures: AtomicU64::new(0),
            connections_created: AtomicU64::new(0),
            pool_hits: AtomicU64::new(0),
            dedup_waits: AtomicU64::new(0),
            connections_reaped: AtomicU64::new(0),
            connections_removed: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    // Outgoing

    /// Record a transport-level connect attempt
    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.connect.attempts").increment(1);
    }

    /// Record a failed connect attempt
    pub fn connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.connect.failures").increment(1);
    }

    /// Record an endpoint that could not be resolved
    pub fn resolve_failure(&self) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.resolve.failures").increment(1);
    }

    /// Record a connection inserted into a pool or connection set
    pub fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.connections.created").increment(1);
    }

    /// Record a request served from the pool
    pub fn pool_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.pool.hits").increment(1);
    }

    /// Record a request that waited on another request's attempt
    pub fn dedup_wait(&self) {
        self.dedup_waits.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.pool.dedup_waits").increment(1);
    }

    /// Record connections handed back by the ACM monitor
    pub fn connections_reaped(&self, count: u64) {
        self.connections_reaped.fetch_add(count, Ordering::Relaxed);
        counter!("switchyard.connections.reaped").increment(count);
    }

    /// Record connections removed from the indices
    pub fn connections_removed(&self, count: u64) {
        self.connections_removed.fetch_add(count, Ordering::Relaxed);
        counter!("switchyard.connections.removed").increment(count);
    }

    // Incoming

    /// Record an accepted connection
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.connections.accepted").increment(1);
    }

    /// Record a failed accept
    pub fn accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
        counter!("switchyard.accept.errors").increment(1);
    }

    /// Get a point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            resolve_failures: self.resolve_failures.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            dedup_waits: self.dedup_waits.load(Ordering::Relaxed),
            connections_reaped: self.connections_reaped.load(Ordering::Relaxed),
            connections_removed: self.connections_removed.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            uptime: self.created_at.elapsed(),
        }
    }
}

/// A snapshot of factory metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Transport-level connect attempts
    pub connect_attempts: u64,
    /// Failed connect attempts
    pub connect_failures: u64,
    /// Endpoints that failed to resolve
    pub resolve_failures: u64,
    /// Connections created
    pub connections_created: u64,
    /// Requests served from the pool
    pub pool_hits: u64,
    /// Requests that waited on another attempt
    pub dedup_waits: u64,
    /// Connections handed back for reaping
    pub connections_reaped: u64,
    /// Connections removed from the indices
    pub connections_removed: u64,
    /// Accepted incoming connections
    pub connections_accepted: u64,
    /// Failed accepts
    pub accept_errors: u64,
    /// Time since the factory was created
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Fraction of connect attempts that failed
    pub fn connect_failure_rate(&self) -> f64 {
        if self.connect_attempts == 0 {
            return 0.0;
        }
        self.connect_failures as f64 / self.connect_attempts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = FactoryMetrics::new();
        metrics.connect_attempt();
        metrics.connect_attempt();
        metrics.connect_failure();
        metrics.connection_created();
        metrics.connections_reaped(3);
        metrics.connections_removed(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connect_attempts, 2);
        assert_eq!(snapshot.connect_failures, 1);
        assert_eq!(snapshot.connections_created, 1);
        assert_eq!(snapshot.connections_reaped, snapshot.connections_removed);
        assert!((snapshot.connect_failure_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_rate_without_attempts() {
        assert_eq!(MetricsSnapshot::default().connect_failure_rate(), 0.0);
    }
}
