//! Session churn benchmark suite.
//!
//! Measures how fast a controller settles over the in-memory transport:
//! - Cold start: identity + target to `Ready`
//! - Target churn: N rapid target changes, only the last one binds
//! - Coalescing: N concurrent `ensure` calls sharing one connect
//!
//! Run with: cargo bench --bench session_churn
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::time::Duration;

use chat_session::credential::{AccessToken, Credential, StaticTokenIssuer};
use chat_session::transport::MemoryTransport;
use chat_session::{ConnectionSupervisor, Identity, SessionController, UserId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use futures_util::future::join_all;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CHURN_COUNTS: &[usize] = &[10, 100];
const COALESCE_COUNTS: &[usize] = &[10, 100];

// ============================================================================
// Helpers
// ============================================================================

fn controller(transport: &MemoryTransport) -> SessionController {
    SessionController::builder()
        .issuer(StaticTokenIssuer::new())
        .transport(transport.clone())
        .build()
        .expect("controller")
}

async fn ready_on(controller: &SessionController, peer: &str) {
    controller
        .wait_for(|state| {
            state
                .ready()
                .is_some_and(|ready| ready.channel.members().iter().any(|m| m.as_str() == peer))
        })
        .await
        .expect("ready");
}

// ============================================================================
// Benchmark: Cold Start
// ============================================================================

fn bench_cold_start(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("cold_start", |b| {
        b.to_async(&rt).iter(|| async {
            let transport = MemoryTransport::new();
            let controller = controller(&transport);

            controller
                .set_identity(Some(Identity::new("u1", "Ada")))
                .unwrap();
            controller.set_target(Some(UserId::new("u2"))).unwrap();
            ready_on(&controller, "u2").await;

            controller.dispose().await;
        });
    });
}

// ============================================================================
// Benchmark: Target Churn
// ============================================================================

fn bench_target_churn(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("target_churn");
    group.measurement_time(Duration::from_secs(10));

    for &count in CHURN_COUNTS {
        group.bench_with_input(BenchmarkId::new("changes", count), &count, |b, &changes| {
            b.to_async(&rt).iter(|| async move {
                let transport = MemoryTransport::new();
                let controller = controller(&transport);
                controller
                    .set_identity(Some(Identity::new("me", "Me")))
                    .unwrap();

                for n in 0..changes {
                    controller
                        .set_target(Some(UserId::new(format!("peer{n}"))))
                        .unwrap();
                }
                ready_on(&controller, &format!("peer{}", changes - 1)).await;

                controller.dispose().await;
                assert_eq!(transport.live(), 0);
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Coalesced Connect
// ============================================================================

fn bench_coalesced_ensure(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("coalesced_ensure");

    for &count in COALESCE_COUNTS {
        group.bench_with_input(BenchmarkId::new("callers", count), &count, |b, &callers| {
            b.to_async(&rt).iter(|| async move {
                let transport = MemoryTransport::new();
                let supervisor =
                    ConnectionSupervisor::new(Arc::new(transport.clone()), Duration::from_secs(5));
                let identity = Identity::new("u1", "Ada");
                let credential = Credential::new(UserId::new("u1"), AccessToken::new("t"), None);

                let results = join_all(
                    (0..callers).map(|_| supervisor.ensure(&identity, &credential)),
                )
                .await;
                assert!(results.iter().all(Result::is_ok));
                assert_eq!(transport.opened(), 1);

                supervisor.shutdown().await;
            });
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Setup
// ============================================================================

criterion_group!(
    benches,
    bench_cold_start,
    bench_target_churn,
    bench_coalesced_ensure
);
criterion_main!(benches);
