use chrono::DateTime;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use forge_core::capability::CapabilityEvent;
use forge_core::comment::{CommentCreated, CommentEvent};
use forge_core::id::{AggregateId, LabelId, RepositoryId, UserId};
use forge_core::issue::IssueCreated;
use forge_core::lookup::Repository;
use forge_core::{Aggregate, Event, Issue, IssueEvent, fold};

const SIZES: [usize; 3] = [100, 1_000, 5_000];

/// A valid issue log of `len` events cycling through close, reopen, label
/// churn and comments.
fn issue_log(len: usize) -> Vec<Event<IssueEvent>> {
    let mut aggregate = Aggregate::<Issue>::new(AggregateId::new_unchecked("bench"), 1);
    let by = UserId::new_unchecked("alice");
    let label = LabelId::new_unchecked("l1");
    let mut payloads = vec![IssueEvent::Created(IssueCreated {
        repository: Repository {
            id: RepositoryId::new_unchecked("r1"),
            owner: "acme".into(),
            name: "widgets".into(),
        },
        title: "bench".into(),
        description: String::new(),
    })];
    let cycle = [
        IssueEvent::Closed,
        IssueEvent::Reopened,
        IssueEvent::Capability(CapabilityEvent::LabelAssigned(label.clone())),
        IssueEvent::Capability(CapabilityEvent::LabelUnassigned(label)),
        IssueEvent::Comment(CommentEvent::Created(CommentCreated {
            text: "ping".into(),
        })),
    ];
    payloads.extend(cycle.iter().cycle().take(len.saturating_sub(1)).cloned());

    for (i, payload) in payloads.into_iter().enumerate() {
        let offset = i64::try_from(i).expect("log index fits i64");
        let at = DateTime::from_timestamp(1_700_000_000 + offset, 0).expect("timestamp");
        let event = aggregate.stamp(by.clone(), at, payload).expect("stamp");
        aggregate.apply(event).expect("valid bench log");
    }
    assert_eq!(aggregate.version(), len.max(1));
    aggregate.events().as_slice().to_vec()
}

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold.issue");

    for size in SIZES {
        let log = issue_log(size);
        group.throughput(Throughput::Elements(log.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &log, |b, log| {
            b.iter(|| black_box(fold::<Issue>(log)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fold);
criterion_main!(benches);
