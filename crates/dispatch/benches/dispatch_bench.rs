use std::sync::Arc;

use chrono::Utc;
use common::StreamName;
use criterion::{Criterion, criterion_group, criterion_main};
use dispatch::{EventDispatcher, EventHandlerRouter, EventPayload, EventTypeResolver, HandlerError};
use event_store::{
    EventId, GlobalPosition, InMemoryEventStore, Metadata, RecordedEvent, SubscriptionSettings,
    Version,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CreditReserved {
    #[allow(dead_code)]
    trade_id: String,
    #[allow(dead_code)]
    amount: i64,
}

impl EventPayload for CreditReserved {
    const EVENT_TYPE: &'static str = "CreditReserved";
}

fn recorded(event_type: &str) -> RecordedEvent {
    RecordedEvent {
        event_id: EventId::new(),
        stream_name: StreamName::new("credit_account-1"),
        event_type: event_type.to_string(),
        position: Version::first(),
        global_position: GlobalPosition::new(1),
        timestamp: Utc::now(),
        data: serde_json::json!({"trade_id": "t-1", "amount": 1500}),
        metadata: Metadata::new(),
    }
}

fn dispatcher() -> EventDispatcher<InMemoryEventStore> {
    let resolver = EventTypeResolver::new().register::<CreditReserved>();
    let router = EventHandlerRouter::new()
        .on(|_: Arc<CreditReserved>, _| async { Ok::<(), HandlerError>(()) });
    EventDispatcher::new(
        Arc::new(InMemoryEventStore::new()),
        SubscriptionSettings::new("bench"),
        resolver,
        router,
    )
}

fn bench_decode(c: &mut Criterion) {
    let resolver = EventTypeResolver::new().register::<CreditReserved>();
    let event = recorded("CreditReserved");

    c.bench_function("dispatch/decode", |b| {
        b.iter(|| resolver.decode(&event).unwrap());
    });
}

fn bench_handle_acknowledge(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dispatcher = dispatcher();
    let event = recorded("CreditReserved");

    c.bench_function("dispatch/handle_acknowledge", |b| {
        b.iter(|| rt.block_on(dispatcher.handle(&event)));
    });
}

fn bench_handle_park_unknown(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dispatcher = dispatcher();
    let event = recorded("Unregistered");

    c.bench_function("dispatch/handle_park_unknown", |b| {
        b.iter(|| rt.block_on(dispatcher.handle(&event)));
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_handle_acknowledge,
    bench_handle_park_unknown
);
criterion_main!(benches);
