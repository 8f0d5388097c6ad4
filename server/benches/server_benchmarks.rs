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

//! Benchmarks for the incoming connection factory

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use switchyard_server::{FactoryState, IncomingConnectionFactory, ServerConfig};
use switchyard_testkit::ScriptedTransport;
use switchyard_transport::{Adapter, Endpoint, Protocol, TransportRegistry};

struct BenchAdapter;

#[async_trait::async_trait]
impl Adapter for BenchAdapter {
    fn name(&self) -> &str {
        "bench"
    }
}

async fn factory() -> (Arc<ScriptedTransport>, IncomingConnectionFactory) {
    let transport = Arc::new(ScriptedTransport::new(Protocol::Tcp));
    let registry = Arc::new(TransportRegistry::new().with(transport.clone()));
    let factory = IncomingConnectionFactory::new(
        registry,
        Endpoint::tcp("127.0.0.1", 0),
        Arc::new(BenchAdapter),
        ServerConfig::new("bench"),
    )
    .await
    .unwrap();
    (transport, factory)
}

fn bench_accept_burst(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("accept_burst");

    for connections in [1usize, 16, 128] {
        group.bench_with_input(
            BenchmarkId::from_parameter(connections),
            &connections,
            |b, &connections| {
                b.to_async(&runtime).iter(|| async move {
                    let (transport, factory) = factory().await;
                    factory.activate();
                    let clients: Vec<_> = (0..connections)
                        .map(|i| transport.dial_in(&format!("peer-{}", i)))
                        .collect();
                    while factory.connections().len() < connections {
                        tokio::time::sleep(Duration::from_micros(100)).await;
                    }
                    factory.destroy();
                    factory.wait_until_finished().await;
                    black_box(clients);
                });
            },
        );
    }
    group.finish();
}

fn bench_state_transitions(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let (_transport, factory) = runtime.block_on(factory());

    c.bench_function("hold_activate", |b| {
        b.iter(|| {
            factory.activate();
            factory.hold();
            black_box(factory.state());
        });
    });

    c.bench_function("state_legality", |b| {
        b.iter(|| {
            black_box(FactoryState::Holding.can_transition_to(black_box(FactoryState::Active)));
        });
    });

    runtime.block_on(async {
        factory.destroy();
        factory.wait_until_finished().await;
    });
}

criterion_group!(benches, bench_accept_burst, bench_state_transitions);
criterion_main!(benches);
