//! Stream-backed entities: identity, version and uncommitted events around an
//! aggregate or process state.

use common::{EntityId, StreamName};
use event_store::Version;

use crate::aggregate::{Aggregate, DomainEvent, Process};

/// An entity whose state lives in one event stream.
///
/// `version` is the position of the last event applied to this instance, or
/// [`Version::initial`] for an entity that was never persisted. Every applied
/// event, replayed or newly recorded, moves the version forward by one.
pub trait StreamBacked: Send + Sync + Sized {
    /// The events stored in the entity's stream.
    type Event: DomainEvent;

    /// Stream name prefix for this kind of entity.
    fn kind() -> &'static str;

    /// Creates an entity shell that has seen no events.
    fn fresh(id: EntityId) -> Self;

    /// The instance identifier.
    fn id(&self) -> &EntityId;

    /// Position of the last applied event.
    fn version(&self) -> Version;

    /// Events recorded since the last load or save.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Applies a historical event read from the stream.
    fn replay(&mut self, event: Self::Event);

    /// Drops anything replay may have queued. Called at the end of a load.
    fn reset_pending(&mut self);

    /// Clears uncommitted events once they are durably appended.
    fn mark_committed(&mut self);

    /// The entity's stream.
    fn stream_name(&self) -> StreamName {
        StreamName::for_entity(Self::kind(), self.id())
    }

    /// The version the stream must be at for the uncommitted events to apply.
    fn expected_version(&self) -> Version {
        self.version().rewind(self.uncommitted_events().len())
    }

    /// Returns true if the entity has never been persisted.
    fn is_new(&self) -> bool {
        self.version().is_initial()
    }
}

/// Stream-backed wrapper around an [`Aggregate`].
#[derive(Debug)]
pub struct AggregateRoot<A: Aggregate> {
    id: EntityId,
    version: Version,
    state: A,
    uncommitted: Vec<A::Event>,
}

impl<A: Aggregate> AggregateRoot<A> {
    /// Creates an aggregate that has seen no events.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            version: Version::initial(),
            state: A::default(),
            uncommitted: Vec::new(),
        }
    }

    /// The current aggregate state.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Applies a new event and queues it for the next save.
    pub fn record(&mut self, event: A::Event) {
        self.state.apply(&event);
        self.version = self.version.next();
        self.uncommitted.push(event);
    }

    /// Runs a command against the current state and records its events.
    ///
    /// Returns the number of recorded events. Nothing is recorded when the
    /// command is rejected.
    pub fn execute<E, F>(&mut self, command: F) -> Result<usize, E>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, E>,
    {
        let events = command(&self.state)?;
        let count = events.len();
        for event in events {
            self.record(event);
        }
        Ok(count)
    }
}

impl<A: Aggregate> StreamBacked for AggregateRoot<A> {
    type Event = A::Event;

    fn kind() -> &'static str {
        A::KIND
    }

    fn fresh(id: EntityId) -> Self {
        Self::new(id)
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted
    }

    fn replay(&mut self, event: Self::Event) {
        self.state.apply(&event);
        self.version = self.version.next();
    }

    fn reset_pending(&mut self) {
        self.uncommitted.clear();
    }

    fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }
}

/// Stream-backed wrapper around a [`Process`].
///
/// Messages produced while applying events wait in `undispatched` until the
/// repository hands them on after a successful commit.
#[derive(Debug)]
pub struct ProcessRoot<P: Process> {
    id: EntityId,
    version: Version,
    state: P,
    uncommitted: Vec<P::Event>,
    undispatched: Vec<P::Message>,
}

impl<P: Process> ProcessRoot<P> {
    /// Creates a process that has seen no events.
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            version: Version::initial(),
            state: P::default(),
            uncommitted: Vec::new(),
            undispatched: Vec::new(),
        }
    }

    /// The current process state.
    pub fn state(&self) -> &P {
        &self.state
    }

    /// Applies a new event and queues it, and any messages it produces.
    pub fn record(&mut self, event: P::Event) {
        self.state.apply(&event, &mut self.undispatched);
        self.version = self.version.next();
        self.uncommitted.push(event);
    }

    /// Runs a command against the current state and records its events.
    pub fn execute<E, F>(&mut self, command: F) -> Result<usize, E>
    where
        F: FnOnce(&P) -> Result<Vec<P::Event>, E>,
    {
        let events = command(&self.state)?;
        let count = events.len();
        for event in events {
            self.record(event);
        }
        Ok(count)
    }

    /// Messages waiting for dispatch.
    pub fn pending_messages(&self) -> &[P::Message] {
        &self.undispatched
    }

    /// Removes and returns the messages waiting for dispatch.
    pub fn take_messages(&mut self) -> Vec<P::Message> {
        std::mem::take(&mut self.undispatched)
    }
}

impl<P: Process> StreamBacked for ProcessRoot<P> {
    type Event = P::Event;

    fn kind() -> &'static str {
        P::KIND
    }

    fn fresh(id: EntityId) -> Self {
        Self::new(id)
    }

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted
    }

    fn replay(&mut self, event: Self::Event) {
        self.state.apply(&event, &mut self.undispatched);
        self.version = self.version.next();
    }

    fn reset_pending(&mut self) {
        self.uncommitted.clear();
        self.undispatched.clear();
    }

    fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }
}
