use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};

use chrono::{TimeZone, Utc};
use stockledger_core::{BatchId, Money, ProductId};
use stockledger_infra::ledger::LedgerEngine;
use stockledger_infra::projections::value_inventory;
use stockledger_infra::store::{InMemoryLedgerStore, LedgerSnapshot, LedgerStore};
use stockledger_inventory::{fifo, LedgerMode, NewProduct, PurchaseBatch};
use tokio::runtime::Runtime;

fn batches(product_id: ProductId, count: usize) -> Vec<PurchaseBatch> {
    (0..count)
        .map(|i| {
            PurchaseBatch::receive(
                BatchId::new(),
                product_id,
                i as u64 + 1,
                10,
                Money::from_minor(100 + i as i64),
                Utc.timestamp_opt(i as i64, 0).unwrap(),
            )
            .unwrap()
        })
        .collect()
}

/// Engine with one product holding `count` batches of 10 units.
fn seeded_engine(rt: &Runtime, count: usize) -> (LedgerEngine<InMemoryLedgerStore>, ProductId) {
    rt.block_on(async {
        let engine = LedgerEngine::new(InMemoryLedgerStore::new());
        let id = engine
            .register_product(NewProduct::named("Widget"))
            .await
            .unwrap()
            .id;
        for i in 0..count {
            engine
                .record_purchase(id, 10, Money::from_minor(100 + i as i64))
                .await
                .unwrap();
        }
        (engine, id)
    })
}

fn bench_fifo_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_planning");
    for count in [1usize, 10, 100, 1_000] {
        let product_id = ProductId::new();
        let ledger = batches(product_id, count);
        let request = (count as i64 * 10) / 2 + 1;
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &ledger, |b, ledger| {
            b.iter(|| fifo::allocate(black_box(ledger), black_box(request)).unwrap());
        });
    }
    group.finish();
}

fn bench_record_sale(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("record_sale");
    for count in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("in_memory", count), &count, |b, &count| {
            b.iter_batched(
                || seeded_engine(&rt, count),
                |(engine, id)| {
                    rt.block_on(async {
                        let qty = count as i64 * 10;
                        engine
                            .record_sale(id, black_box(qty), Money::from_minor(500))
                            .await
                            .unwrap()
                    })
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_valuation(c: &mut Criterion) {
    let mut group = c.benchmark_group("valuation");
    for count in [10usize, 1_000, 10_000] {
        let rt = Runtime::new().unwrap();
        let (engine, _) = seeded_engine(&rt, 1);
        let mut snapshot: LedgerSnapshot = rt.block_on(engine.store().snapshot()).unwrap();
        let product_id = snapshot.products[0].id;
        snapshot.batches = batches(product_id, count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &snapshot, |b, snapshot| {
            b.iter(|| value_inventory(LedgerMode::Fifo, black_box(snapshot)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fifo_planning,
    bench_record_sale,
    bench_valuation
);
criterion_main!(benches);
