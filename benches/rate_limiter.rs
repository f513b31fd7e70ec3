use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gateway_guard_service::core::counter_store::MemoryCounterStore;
use gateway_guard_service::core::rate_limiter::{
    RateLimitRule, RateLimiter, RuleSet, GLOBAL_SCOPE,
};
use std::sync::Arc;
use std::time::Duration;

fn rate_limiter_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let rules = RuleSet::new(
        RateLimitRule {
            scope: GLOBAL_SCOPE.to_string(),
            limit: 1_000_000_000,
            window: Duration::from_secs(60),
            burst: 0,
        },
        vec![(
            "/login".to_string(),
            RateLimitRule {
                scope: "endpoint:/login".to_string(),
                limit: 1_000_000_000,
                window: Duration::from_secs(60),
                burst: 0,
            },
        )],
    );
    let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), rules, true);

    c.bench_function("rate_limiter_check", |b| {
        b.iter(|| {
            let decision =
                runtime.block_on(async { limiter.check("1.2.3.4", "/login").await });
            black_box(decision.allowed)
        })
    });
}

criterion_group!(benches, rate_limiter_benchmark);
criterion_main!(benches);
