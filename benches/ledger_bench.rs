//! Benchmarks for the SchoolCoin ledger
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use schoolcoin::store::*;
use tempfile::tempdir;

struct Fixture {
    store: Store,
    school_id: i64,
    alice: i64,
    bob: i64,
}

fn profile(store: &Store, school_id: i64, name: &str) -> i64 {
    let new = NewProfile {
        school_id: Some(school_id),
        name: name.to_string(),
        email: format!("{}@bench.example", name.to_lowercase()),
        role: Role::Student,
        password: "not-hashed".to_string(),
    };
    // Argon2 would dominate setup time
    store.create_profile_hashed(&new, "bench").unwrap().id
}

fn fixture(store: Store, starting_balance: i64) -> Fixture {
    let school = store
        .create_school(NewSchool {
            name: "Bench School".to_string(),
            coin_name: "Bench Coin".to_string(),
            coin_symbol: "BNC".to_string(),
            max_supply: None,
        })
        .unwrap();
    let alice = profile(&store, school.id, "Alice");
    let bob = profile(&store, school.id, "Bob");

    for id in [alice, bob] {
        store
            .record_transaction(NewTransaction::mint(
                school.id,
                id,
                starting_balance,
                TransactionType::Adjustment,
            ))
            .unwrap();
    }

    Fixture {
        store,
        school_id: school.id,
        alice,
        bob,
    }
}

fn bench_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer");

    group.bench_function("in_memory", |b| {
        let f = fixture(Store::open_in_memory().unwrap(), 1_000_000_000);
        let mut flip = false;

        b.iter(|| {
            flip = !flip;
            let (from, to) = if flip { (f.alice, f.bob) } else { (f.bob, f.alice) };
            f.store.transfer(black_box(from), black_box(to), 1, None).unwrap()
        });
    });

    group.bench_function("on_disk", |b| {
        let dir = tempdir().unwrap();
        let store = Store::open(&StoreConfig::new(dir.path())).unwrap();
        let f = fixture(store, 1_000_000_000);
        let mut flip = false;

        b.iter(|| {
            flip = !flip;
            let (from, to) = if flip { (f.alice, f.bob) } else { (f.bob, f.alice) };
            f.store.transfer(black_box(from), black_box(to), 1, None).unwrap()
        });
    });

    group.bench_function("rejected_overspend", |b| {
        let f = fixture(Store::open_in_memory().unwrap(), 10);

        b.iter(|| {
            assert!(f.store.transfer(f.alice, f.bob, black_box(1_000), None).is_err());
        });
    });

    group.finish();
}

fn bench_purchase(c: &mut Criterion) {
    let mut group = c.benchmark_group("purchase");

    group.bench_function("single_item", |b| {
        let f = fixture(Store::open_in_memory().unwrap(), 1_000_000_000);
        let item = f
            .store
            .create_item(NewItem {
                school_id: f.school_id,
                category_id: None,
                name: "Pencil".to_string(),
                description: None,
                price: 1,
                stock: 1_000_000_000,
            })
            .unwrap();

        b.iter(|| f.store.purchase_item(f.alice, black_box(item.id), 1).unwrap());
    });

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");

    for size in [100, 1000, 10000] {
        let f = fixture(Store::open_in_memory().unwrap(), 1_000_000_000);
        for i in 0..size {
            let (from, to) = if i % 2 == 0 { (f.alice, f.bob) } else { (f.bob, f.alice) };
            f.store.transfer(from, to, 1, None).unwrap();
        }

        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("transactions", size), &f, |b, f| {
            b.iter(|| {
                let report = f.store.reconcile(black_box(f.school_id), false).unwrap();
                assert!(report.is_consistent());
            })
        });

        group.bench_with_input(BenchmarkId::new("list_school", size), &f, |b, f| {
            b.iter(|| {
                f.store
                    .list_transactions(&TransactionFilter::school(black_box(f.school_id)))
                    .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transfer, bench_purchase, bench_reconcile);
criterion_main!(benches);
