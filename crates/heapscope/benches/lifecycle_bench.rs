//! Lifecycle bookkeeping overhead.
//!
//! Measures frame push/register/pop, rescue, and tag bulk release.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use heapscope::{AllocRegistry, Destructor, ReleaseOrder, ScopeStack, Tag};

fn bench_scope_cycle(c: &mut Criterion) {
    let mut stack = ScopeStack::with_order(ReleaseOrder::Lifo);
    let mut group = c.benchmark_group("scope_cycle");
    for records in [1_usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &n| {
            b.iter(|| {
                stack.push();
                for _ in 0..n {
                    let _ = stack.allocate(32);
                }
                criterion::black_box(stack.pop());
            });
        });
    }
    group.finish();
}

fn bench_scope_rescue(c: &mut Criterion) {
    let mut stack = ScopeStack::new();
    c.bench_function("scope_rescue_16", |b| {
        b.iter(|| {
            stack.push();
            let mut last = std::ptr::null_mut();
            for _ in 0..16 {
                last = stack.allocate(32).as_ptr();
            }
            let record = stack.pop_rescue(last);
            criterion::black_box(record);
        });
    });
}

fn bench_tag_bulk_release(c: &mut Criterion) {
    let registry = AllocRegistry::new();
    let cycle = registry.tagged(Tag::WORK_CYCLE);
    let mut group = c.benchmark_group("tag_bulk_release");
    for records in [16_usize, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let _ = cycle.allocate(32);
                }
                criterion::black_box(cycle.release());
            });
        });
    }
    group.finish();
}

fn bench_tag_release_one(c: &mut Criterion) {
    let registry = AllocRegistry::new();
    let app = registry.tagged(Tag::APPLICATION);
    for _ in 0..1024 {
        let _ = app.allocate(16);
    }
    c.bench_function("tag_register_release_one", |b| {
        b.iter(|| {
            let value = Box::into_raw(Box::new(0_u64));
            // SAFETY: fresh box reclaimed by its matching destructor.
            let ptr = unsafe { app.register(value, Destructor::drop_box::<u64>()) }
                .unwrap_or(value);
            criterion::black_box(app.release_one(ptr));
        });
    });
    app.release();
}

criterion_group!(
    benches,
    bench_scope_cycle,
    bench_scope_rescue,
    bench_tag_bulk_release,
    bench_tag_release_one
);
criterion_main!(benches);
