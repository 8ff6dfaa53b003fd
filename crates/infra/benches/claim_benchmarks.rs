use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use applyflow_batches::{BatchStatus, CompletionStatus, CreateBatchRequest, JobRecord};
use applyflow_core::{BatchId, UserId};
use applyflow_infra::runner::ClaimOutcome;
use applyflow_infra::{BatchRunner, InMemoryBatchStore, InMemoryJobCatalog, RunnerConfig};

type Runner = BatchRunner<Arc<InMemoryBatchStore>, Arc<InMemoryJobCatalog>>;

async fn seeded_batch(size: u32) -> (Arc<Runner>, UserId, BatchId) {
    let catalog = InMemoryJobCatalog::arc();
    let user = UserId::new();
    for i in 0..size {
        catalog
            .upsert(JobRecord::new(user, format!("job {i}"), format!("https://jobs.test/{i}")))
            .unwrap();
    }
    let runner = BatchRunner::new(
        InMemoryBatchStore::arc(),
        catalog,
        RunnerConfig::default().with_create_batch_limit(size),
    );
    let batch = runner
        .create_batch(user, CreateBatchRequest::default())
        .await
        .unwrap();
    (Arc::new(runner), user, batch.id)
}

/// Claim and complete until the batch reports done. Returns the tasks worked.
async fn drain(runner: &Runner, user: UserId, batch_id: BatchId) -> usize {
    let mut worked = 0;
    loop {
        match runner.claim(user, batch_id).await.unwrap() {
            ClaimOutcome::Claimed { task } => {
                runner
                    .complete(user, batch_id, task.task_id, CompletionStatus::Succeeded, None)
                    .await
                    .unwrap();
                worked += 1;
            }
            ClaimOutcome::Done { batch_status, .. } => {
                if batch_status != BatchStatus::Running {
                    return worked;
                }
            }
            ClaimOutcome::Terminal { .. } | ClaimOutcome::NotFound => return worked,
        }
    }
}

fn bench_sequential_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("sequential_drain");

    for size in [10u32, 100, 200].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("claim_complete", size), size, |b, &size| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let (runner, user, batch_id) = seeded_batch(size).await;
                    let start = Instant::now();
                    black_box(drain(&runner, user, batch_id).await);
                    total += start.elapsed();
                }
                total
            });
        });
    }

    group.finish();
}

fn bench_contended_claims(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("contended_claims");
    let size = 100u32;
    group.throughput(Throughput::Elements(size as u64));

    for claimers in [2usize, 8, 32].iter() {
        group.bench_with_input(BenchmarkId::new("claimers", claimers), claimers, |b, &claimers| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let (runner, user, batch_id) = seeded_batch(size).await;
                    let start = Instant::now();
                    let handles: Vec<_> = (0..claimers)
                        .map(|_| {
                            let runner = runner.clone();
                            tokio::spawn(async move { drain(&runner, user, batch_id).await })
                        })
                        .collect();
                    let mut worked = 0;
                    for handle in handles {
                        worked += handle.await.unwrap();
                    }
                    total += start.elapsed();
                    assert_eq!(worked, size as usize);
                }
                total
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_drain, bench_contended_claims);
criterion_main!(benches);
