use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use queuectl_core::{Job, JobId};
use queuectl_infra::jobs::{FileJobStore, InMemoryJobStore, JobStore};

fn seed(store: &impl JobStore, n: usize) {
    let now = Utc::now();
    let jobs: Vec<Job> = (0..n)
        .map(|i| Job::new(JobId::parse(format!("job-{i}")).unwrap(), "exit 0", 3, now))
        .collect();
    store.save(&jobs).unwrap();
}

/// One claim as a worker performs it: snapshot, select, compare-and-swap.
fn claim_one(store: &impl JobStore) -> Option<JobId> {
    let now = Utc::now();
    let mut job = store.load().ok()?.into_iter().find(|j| j.is_eligible(now))?;
    let observed = job.version;
    job.mark_processing(now).ok()?;
    let id = job.id.clone();
    store.compare_and_swap(job, observed).ok()?;
    Some(id)
}

fn bench_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim");

    for size in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("in_memory", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let store = InMemoryJobStore::new();
                    seed(&store, size);
                    store
                },
                |store| black_box(claim_one(&store)),
                BatchSize::SmallInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("file", size), &size, |b, &size| {
            let dir = tempfile::tempdir().unwrap();
            let store = FileJobStore::new(dir.path().join("jobs.json"));
            b.iter_batched(
                || seed(&store, size),
                |()| black_box(claim_one(&store)),
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("file", size), &size, |b, &size| {
            let dir = tempfile::tempdir().unwrap();
            let store = FileJobStore::new(dir.path().join("jobs.json"));
            b.iter_batched(
                || seed(&store, size),
                |()| black_box(store.insert(Job::new(JobId::new(), "exit 0", 3, Utc::now()))),
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_claim, bench_enqueue);
criterion_main!(benches);
