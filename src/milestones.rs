//! Accessibility contract consumed by the analyses.
//!
//! Milestone and tech-unlock analysis is performed outside this crate; the
//! engines only ever consult these predicates.

use crate::database::ObjectId;

/// Answers whether an object is reachable under the current progression
/// state. Implementations must be pure for the duration of an analysis.
pub trait Accessibility {
    /// Whether the object is obtainable at all.
    fn is_accessible(&self, obj: ObjectId) -> bool;

    /// Whether the object becomes obtainable no later than the next
    /// milestone horizon.
    fn is_accessible_at_next_milestone(&self, obj: ObjectId) -> bool;

    /// The highest milestone gating the object, if any.
    fn highest_milestone(&self, _obj: ObjectId) -> Option<ObjectId> {
        None
    }
}

/// Accessibility for mod packs without milestone gating: everything is
/// reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullAccess;

impl Accessibility for FullAccess {
    fn is_accessible(&self, _obj: ObjectId) -> bool {
        true
    }

    fn is_accessible_at_next_milestone(&self, _obj: ObjectId) -> bool {
        true
    }
}
