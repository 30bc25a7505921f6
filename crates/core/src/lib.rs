//! `storekeep-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod deadline;
pub mod entity;
pub mod error;
pub mod id;
pub mod metadata;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use deadline::Deadline;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, UserId};
pub use metadata::{Metadata, MetadataEntry, MetadataValue};
pub use value_object::ValueObject;
