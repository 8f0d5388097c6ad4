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

//! End-to-end benchmarks over loopback TCP

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use switchyard_testsuite::{Collector, client, echo_server};
use switchyard_transport::EndpointSelection;

fn bench_echo_throughput(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (server, client, connection, collector) = runtime.block_on(async {
        let server = echo_server().await;
        let client = client();
        let (connection, _) = client
            .connect(vec![server.endpoint().clone()], false, EndpointSelection::Ordered)
            .await
            .unwrap();
        let collector = Arc::new(Collector::default());
        connection.set_adapter(Some(collector.clone()));
        (server, client, connection, collector)
    });

    let mut group = c.benchmark_group("echo_throughput");
    for size in [64usize, 1024, 16 * 1024] {
        let payload = Bytes::from(vec![b'x'; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.to_async(&runtime).iter(|| async {
                let target = collector.received() + payload.len();
                connection.send(payload.clone()).unwrap();
                while collector.received() < target {
                    tokio::task::yield_now().await;
                }
            });
        });
    }
    group.finish();

    runtime.block_on(async {
        client.destroy();
        client.wait_until_finished().await;
        server.destroy();
        server.wait_until_finished().await;
    });
}

fn bench_connect_and_shutdown(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(echo_server());

    c.bench_function("connect_and_shutdown", |b| {
        b.to_async(&runtime).iter(|| async {
            let client = client();
            client
                .connect(vec![server.endpoint().clone()], false, EndpointSelection::Ordered)
                .await
                .unwrap();
            client.destroy();
            client.wait_until_finished().await;
        });
    });

    runtime.block_on(async {
        server.destroy();
        server.wait_until_finished().await;
    });
}

criterion_group!(benches, bench_echo_throughput, bench_connect_and_shutdown);
criterion_main!(benches);
