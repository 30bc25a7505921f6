//! Aggregate root trait for the order and movement state machines.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Kept small so each domain crate decides how it models transitions
/// (pure decide/evolve functions) without pulling in storage concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Stores use it as the optimistic concurrency token: a write carries the
    /// version it was decided against.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for a persisted record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, fixtures).
    Any,
    /// The record must not exist yet.
    NoRecord,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation for a record last read at `version` (0 means "never stored").
    pub fn from_read(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NoRecord
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    /// `actual` is `None` when the record does not exist.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::NoRecord, None) => true,
            (ExpectedVersion::NoRecord, Some(_)) => false,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            (ExpectedVersion::Exact(_), None) => false,
        }
    }

    pub fn check(self, actual: Option<u64>) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual:?})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. They only return events
/// describing what happened; the infrastructure layer persists the evolved
/// state and forwards the events.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. State evolution is done through `apply`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Decide, then apply every decided event. Returns the events for publication.
    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_record_only_matches_missing_rows() {
        assert!(ExpectedVersion::NoRecord.matches(None));
        assert!(!ExpectedVersion::NoRecord.matches(Some(1)));
    }

    #[test]
    fn exact_requires_same_version() {
        assert!(ExpectedVersion::Exact(3).matches(Some(3)));
        assert!(!ExpectedVersion::Exact(3).matches(Some(4)));
        assert!(!ExpectedVersion::Exact(3).matches(None));
        assert!(matches!(
            ExpectedVersion::Exact(3).check(Some(2)),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn from_read_maps_zero_to_no_record() {
        assert_eq!(ExpectedVersion::from_read(0), ExpectedVersion::NoRecord);
        assert_eq!(ExpectedVersion::from_read(7), ExpectedVersion::Exact(7));
    }
}
