//! Stream-backed entities and their repositories.
//!
//! This crate provides:
//! - `DomainEvent`, `Aggregate` and `Process` traits for business types
//! - `AggregateRoot` and `ProcessRoot`, which track identity, version and
//!   uncommitted events around that state
//! - `Repository` and `ProcessRepository`, which replay streams and append new
//!   events under optimistic concurrency

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod repository;

pub use aggregate::{Aggregate, DomainEvent, Process};
pub use entity::{AggregateRoot, ProcessRoot, StreamBacked};
pub use error::DomainError;
pub use repository::{
    AggregateRepository, MessageDispatcher, ProcessRepository, Repository, SaveOutcome,
};
