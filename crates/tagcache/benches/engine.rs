use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tagcache::{CacheConfig, CacheEntry, MemoryStore, TagCache};
use tokio::runtime::Runtime;

fn populated(keys: usize, tagged_every: usize) -> (Runtime, Arc<TagCache<MemoryStore>>) {
    let rt = Runtime::new().unwrap();
    let cache = Arc::new(
        TagCache::new(Arc::new(MemoryStore::new()), CacheConfig::default()).unwrap(),
    );

    rt.block_on(async {
        for i in 0..keys {
            let tags: Vec<&str> = if i % tagged_every == 0 { vec!["hot"] } else { vec!["cold"] };
            let entry = CacheEntry::new(json!({"page": i}), tags, 0);
            cache.set(&format!("/page/{}", i), &entry).await.unwrap();
        }
    });

    (rt, cache)
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    let (rt, cache) = populated(100, 10);
    let implicit = vec!["_N_T_/page".to_string()];

    group.bench_function("get_with_implicit_tag", |b| {
        let mut counter = 0usize;
        b.to_async(&rt).iter(|| {
            let key = format!("/page/{}", counter % 100);
            counter += 1;
            let cache = Arc::clone(&cache);
            let implicit = implicit.clone();
            async move { black_box(cache.get(&key, &implicit).await.unwrap()) }
        });
    });

    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    let (rt, cache) = populated(0, 1);
    let entry = CacheEntry::new(json!("x".repeat(1024)), ["a", "b"], 0);

    group.bench_function("set_1kb_two_tags", |b| {
        let mut counter = 0usize;
        b.to_async(&rt).iter(|| {
            let key = format!("/set/{}", counter % 1000);
            counter += 1;
            let cache = Arc::clone(&cache);
            let entry = entry.clone();
            async move { cache.set(&key, &entry).await.unwrap() }
        });
    });

    group.finish();
}

fn bench_revalidate(c: &mut Criterion) {
    let mut group = c.benchmark_group("revalidate_tag");
    group.sample_size(20);

    let (rt, cache) = populated(1000, 50);

    group.bench_function("scan_1000_keys_no_match", |b| {
        b.to_async(&rt).iter(|| {
            let cache = Arc::clone(&cache);
            async move { black_box(cache.revalidate_tag("missing").await.unwrap()) }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get, bench_set, bench_revalidate);
criterion_main!(benches);
