use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use storekeep_core::{Deadline, UserId};
use storekeep_infra::{InMemoryStore, MovementController, NewMovement, RetryPolicy};
use storekeep_inventory::{MovementId, MovementType, StockKey};
use storekeep_products::ProductId;

type Controller = MovementController<Arc<InMemoryStore>>;

fn controller(retry: RetryPolicy) -> Controller {
    MovementController::new(Arc::new(InMemoryStore::new()), retry)
}

fn staged(c: &Controller, key: StockKey, movement_type: MovementType, quantity: i64) -> MovementId {
    let m = c
        .create(NewMovement::new(key, movement_type, quantity), UserId::new())
        .unwrap();
    c.approve(m.id_typed(), UserId::new(), Deadline::none())
        .unwrap();
    m.id_typed()
}

fn bench_movement_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_completion");
    group.throughput(Throughput::Elements(1));

    group.bench_function("inbound_single_key", |b| {
        let movements = controller(RetryPolicy::immediate());
        let key = StockKey::product(ProductId::generate());
        b.iter_batched(
            || staged(&movements, key, MovementType::Inbound, 1),
            |id| black_box(movements.complete(id, Deadline::none()).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("batch_across_keys", batch_size),
            &batch_size,
            |b, &batch_size| {
                let movements = controller(RetryPolicy::immediate());
                let keys: Vec<_> = (0..batch_size)
                    .map(|_| StockKey::product(ProductId::generate()))
                    .collect();
                b.iter_batched(
                    || {
                        keys.iter()
                            .map(|key| staged(&movements, *key, MovementType::Inbound, 1))
                            .collect::<Vec<_>>()
                    },
                    |ids| black_box(movements.complete_batch(&ids, Deadline::none()).unwrap()),
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn bench_contended_reservation(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_reservation");
    group.sample_size(20);

    for writers in [2usize, 4, 8] {
        group.throughput(Throughput::Elements(writers as u64));
        group.bench_with_input(
            BenchmarkId::new("outbound_same_key", writers),
            &writers,
            |b, &writers| {
                let movements = controller(RetryPolicy::exponential(
                    Duration::from_micros(20),
                    Duration::from_millis(1),
                ));
                let key = StockKey::product(ProductId::generate());
                b.iter_batched(
                    || {
                        let stock = staged(&movements, key, MovementType::Inbound, writers as i64);
                        movements.complete(stock, Deadline::none()).unwrap();
                        (0..writers)
                            .map(|_| staged(&movements, key, MovementType::Outbound, 1))
                            .collect::<Vec<_>>()
                    },
                    |ids| {
                        thread::scope(|s| {
                            for id in &ids {
                                let movements = &movements;
                                s.spawn(move || {
                                    movements
                                        .complete(*id, Deadline::within(Duration::from_secs(5)))
                                        .unwrap()
                                });
                            }
                        });
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_movement_completion, bench_contended_reservation);
criterion_main!(benches);
