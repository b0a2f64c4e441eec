// ============================================================================
// Versioned Records
// ============================================================================
//
// Optimistic concurrency control through an integer version column.
//
// ============================================================================

pub mod outcome;
pub mod policy;
pub mod store;

pub use outcome::{UpdateOutcome, UpdateResponse};
pub use policy::{ConflictRetryPolicy, UpdateStrategy};
pub use store::{EntityDescriptor, VersionedRecordStore};
