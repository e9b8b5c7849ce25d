use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use teapay::model::{Order, OrderDraft, OrderItem};
use teapay::order_number::{fingerprint, format};
use teapay::store::OrderStore;
use teapay::{MemoryStore, OrderNumberConfig, OrderNumberGenerator, SystemClock};
use tokio::runtime::Runtime;

fn items(n: usize) -> Vec<OrderItem> {
  (0..n)
    .map(|i| OrderItem {
      sku_id: format!("SKU-{:05}", i),
      quantity: (i % 3 + 1) as u32,
      price: 1_000 + i as i64 * 37,
      is_virtual: false,
    })
    .collect()
}

fn draft(n: usize) -> OrderDraft {
  let items = items(n);
  let total_amount = items.iter().map(|i| i.price * i64::from(i.quantity)).sum();
  OrderDraft { items, total_amount }
}

fn generator(store: &Arc<MemoryStore>) -> OrderNumberGenerator {
  OrderNumberGenerator::new(
    store.clone(),
    store.clone(),
    store.clone(),
    Arc::new(SystemClock),
    OrderNumberConfig::default(),
  )
}

fn bench_fingerprint(c: &mut Criterion) {
  let mut group = c.benchmark_group("Fingerprint");
  for size in [1usize, 10, 100].iter() {
    let d = draft(*size);
    group.throughput(Throughput::Elements(*size as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), &d, |b, d| {
      b.iter(|| fingerprint(&d.items, d.total_amount))
    });
  }
  group.finish();
}

fn bench_format(c: &mut Criterion) {
  let hash = format::user_hash("oUpF8uMuAJO_M2pxb1Q9zNjWeS6o");
  c.bench_function("Format standard + verify", |b| {
    b.iter(|| {
      let n = format::format_standard("20240301", "02", 42, &hash).unwrap_or_default();
      format::verify_check_digit(&n)
    })
  });
}

fn bench_generate(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("Generate");

  group.bench_function("fresh draft", |b| {
    let store = Arc::new(MemoryStore::new());
    let gen = generator(&store);
    let d = draft(3);
    let mut owner = 0u64;
    b.to_async(&rt).iter(|| {
      owner += 1;
      let owner_id = format!("owner-{}", owner);
      let gen = &gen;
      let d = &d;
      async move { gen.generate(&owner_id, "mini-program", d).await }
    })
  });

  // Every call finds the same pending order among 200 candidates.
  group.bench_function("duplicate hit", |b| {
    let store = Arc::new(MemoryStore::new());
    let gen = generator(&store);
    let wanted = draft(3);
    rt.block_on(async {
      for i in 0..200 {
        let mut other = draft(3);
        other.items[0].sku_id = format!("OTHER-{}", i);
        let order = Order::pending(format!("N{}", i), "owner", other, chrono::Utc::now());
        let _ = store.insert(order).await;
      }
      let order = Order::pending("TARGET", "owner", wanted.clone(), chrono::Utc::now());
      let _ = store.insert(order).await;
    });
    b.to_async(&rt).iter(|| gen.check_existing("owner", &wanted))
  });

  group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_format, bench_generate);
criterion_main!(benches);
