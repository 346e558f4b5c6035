use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use actionweb::{cache::LruPool, pool_with_capacity, CacheKey, MemoryPool, Pool, SharedPool};

fn fill(pool: &dyn Pool<CacheKey, String>, size: usize) {
    for i in 0..size {
        let key = CacheKey::name(&format!("key{}", i));
        let _ = pool.get_or_create(&key, &mut || Ok(format!("value{}", i)));
    }
}

fn pool_insert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_insert");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("memory", size), size, |b, &size| {
            b.iter(|| {
                let pool: MemoryPool<CacheKey, String> = MemoryPool::new();
                fill(black_box(&pool), size);
            });
        });
        group.bench_with_input(BenchmarkId::new("lru", size), size, |b, &size| {
            b.iter(|| {
                let pool: LruPool<CacheKey, String> = LruPool::from_capacity(size);
                fill(black_box(&pool), size);
            });
        });
    }

    group.finish();
}

fn pool_hit_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_hit");

    for size in [10, 100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let pool: SharedPool<CacheKey, String> = pool_with_capacity(0);
            fill(pool.as_ref(), size);
            let keys: Vec<CacheKey> = (0..size).map(|i| CacheKey::name(&format!("key{}", i))).collect();

            b.iter(|| {
                for key in &keys {
                    let _ = pool.get_or_create(black_box(key), &mut || Ok(String::new()));
                }
            });
        });
    }

    group.finish();
}

fn pool_eviction_benchmark(c: &mut Criterion) {
    c.bench_function("pool_eviction", |b| {
        b.iter(|| {
            let pool: LruPool<CacheKey, String> = LruPool::from_capacity(100);
            fill(black_box(&pool), 200);
        });
    });
}

fn invalidation_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_invalidation");
    let prefix = vec!["posts".to_string(), "2026".to_string()];
    let pattern = regex::Regex::new("^key1").unwrap();

    group.bench_function("prefix", |b| {
        b.iter(|| {
            let pool: MemoryPool<CacheKey, String> = MemoryPool::new();
            for i in 0..500 {
                let month = format!("{:02}", i % 12);
                let key = CacheKey::path(&["posts", "2026", &month, &i.to_string()]);
                let _ = pool.get_or_create(&key, &mut || Ok(String::new()));
            }
            pool.invalidate_prefix(black_box(&prefix))
        });
    });
    group.bench_function("regex", |b| {
        b.iter(|| {
            let pool: MemoryPool<CacheKey, String> = MemoryPool::new();
            fill(&pool, 500);
            pool.invalidate_matching(black_box(&pattern))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    pool_insert_benchmark,
    pool_hit_benchmark,
    pool_eviction_benchmark,
    invalidation_benchmark
);
criterion_main!(benches);
