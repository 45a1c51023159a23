//! Conflict resolution between stored markers and incoming changes
//!
//! The rule is evaluated inside the store's conditional update (see
//! `domain::mutation`), never ahead of the write by the caller.

use crate::domain::{Attributes, OrderingToken, SyncMarker};

/// Whether a change at `incoming` may overwrite state recorded by `existing`.
///
/// Absent markers always yield; ties apply so redelivery is idempotent.
pub fn should_apply(existing: Option<&SyncMarker>, incoming: &OrderingToken) -> bool {
    match existing {
        None => true,
        Some(marker) => *incoming >= marker.ordering_token,
    }
}

/// `should_apply` against the `_sync` marker stored on `object`
pub fn should_apply_to(object: &Attributes, incoming: &OrderingToken) -> bool {
    should_apply(SyncMarker::read(object).as_ref(), incoming)
}
