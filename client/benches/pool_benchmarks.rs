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

//! Benchmarks for the outgoing connection factory

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use switchyard_client::{ClientConfig, OutgoingConnectionFactory};
use switchyard_testkit::{ConnectOutcome, ScriptedTransport};
use switchyard_transport::{Endpoint, EndpointSelection, Protocol, TransportRegistry};

fn registry(transport: ScriptedTransport) -> Arc<TransportRegistry> {
    Arc::new(TransportRegistry::new().with(Arc::new(transport)))
}

fn bench_pool_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let endpoint = Endpoint::tcp("server", 4061);
    let factory = runtime.block_on(async {
        let factory = OutgoingConnectionFactory::new(
            registry(ScriptedTransport::new(Protocol::Tcp)),
            ClientConfig::default(),
        )
        .unwrap();
        factory
            .connect(vec![endpoint.clone()], false, EndpointSelection::Ordered)
            .await
            .unwrap();
        factory
    });

    c.bench_function("pool_hit", |b| {
        b.to_async(&runtime).iter(|| async {
            let result = factory
                .connect(vec![endpoint.clone()], false, EndpointSelection::Ordered)
                .await;
            black_box(result.unwrap());
        });
    });

    runtime.block_on(async {
        factory.destroy();
        factory.wait_until_finished().await;
    });
}

fn bench_connector_fallback(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("connector_fallback");

    for failing in [0usize, 1, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(failing), &failing, |b, &failing| {
            b.to_async(&runtime).iter(|| async move {
                let names: Vec<String> = (0..=failing).map(|i| format!("c{}", i)).collect();
                let mut transport =
                    ScriptedTransport::new(Protocol::Tcp).resolves_to("server", names.clone());
                for name in &names[..failing] {
                    transport = transport.on_connect(name, ConnectOutcome::Refuse);
                }
                let factory =
                    OutgoingConnectionFactory::new(registry(transport), ClientConfig::default())
                        .unwrap();
                let result = factory
                    .connect(
                        vec![Endpoint::tcp("server", 4061)],
                        false,
                        EndpointSelection::Ordered,
                    )
                    .await;
                black_box(result.unwrap());
                factory.destroy();
                factory.wait_until_finished().await;
            });
        });
    }
    group.finish();
}

fn bench_concurrent_dedup(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("concurrent_dedup");

    for requests in [2usize, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(requests),
            &requests,
            |b, &requests| {
                b.to_async(&runtime).iter(|| async move {
                    let factory = Arc::new(
                        OutgoingConnectionFactory::new(
                            registry(ScriptedTransport::new(Protocol::Tcp)),
                            ClientConfig::default(),
                        )
                        .unwrap(),
                    );
                    let tasks: Vec<_> = (0..requests)
                        .map(|_| {
                            let factory = factory.clone();
                            tokio::spawn(async move {
                                factory
                                    .connect(
                                        vec![Endpoint::tcp("server", 4061)],
                                        false,
                                        EndpointSelection::Ordered,
                                    )
                                    .await
                            })
                        })
                        .collect();
                    for task in tasks {
                        black_box(task.await.unwrap().unwrap());
                    }
                    factory.destroy();
                    factory.wait_until_finished().await;
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_pool_hit,
    bench_connector_fallback,
    bench_concurrent_dedup
);
criterion_main!(benches);
