//! Identity for records that live inside or beside an aggregate.

/// A record with a stable identity but no lifecycle of its own.
///
/// Stock levels, adjustments and order lines are entities: two of them with
/// equal fields are still different records when their ids differ.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
