use common::EntityId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Aggregate, AggregateRepository, DomainEvent};
use event_store::{InMemoryEventStore, Metadata};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum CounterEvent {
    Incremented { by: i64 },
}

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        "Incremented"
    }
}

#[derive(Debug, Default)]
struct Counter {
    total: i64,
}

impl Aggregate for Counter {
    type Event = CounterEvent;
    const KIND: &'static str = "counter";

    fn apply(&mut self, event: &CounterEvent) {
        let CounterEvent::Incremented { by } = event;
        self.total += by;
    }
}

fn bench_save_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("domain/save_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let repo: AggregateRepository<_, Counter> =
                    AggregateRepository::new(InMemoryEventStore::new());
                let id = EntityId::new("bench").unwrap();
                let mut counter = repo.load_or_create(&id).await.unwrap();
                counter.record(CounterEvent::Incremented { by: 1 });
                repo.save(&mut counter, &Metadata::new()).await.unwrap();
            });
        });
    });
}

fn bench_load_100_events(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let repo: AggregateRepository<_, Counter> = AggregateRepository::new(InMemoryEventStore::new());
    let id = EntityId::new("bench").unwrap();

    rt.block_on(async {
        let mut counter = repo.load_or_create(&id).await.unwrap();
        for _ in 0..100 {
            counter.record(CounterEvent::Incremented { by: 1 });
        }
        repo.save(&mut counter, &Metadata::new()).await.unwrap();
    });

    c.bench_function("domain/load_100_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let counter = repo.load(&id).await.unwrap();
                assert_eq!(counter.state().total, 100);
            });
        });
    });
}

fn bench_load_record_save_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let repo: AggregateRepository<_, Counter> = AggregateRepository::new(InMemoryEventStore::new());
    let id = EntityId::new("cycle").unwrap();

    c.bench_function("domain/load_record_save", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut counter = repo.load_or_create(&id).await.unwrap();
                counter.record(CounterEvent::Incremented { by: 1 });
                repo.save(&mut counter, &Metadata::new()).await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_save_single_event,
    bench_load_100_events,
    bench_load_record_save_cycle,
);
criterion_main!(benches);
