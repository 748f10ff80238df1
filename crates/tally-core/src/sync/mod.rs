//! Multi-replica synchronization.
//!
//! Bottom-up: [`value`] (field values and deep equality), [`record`] (the
//! versioned envelope), [`merge`] (pairwise three-way merge), [`reconcile`]
//! (whole collections), [`resolve`] (human conflict decisions) and
//! [`engine`] (the orchestrator that drives stores through a pass).

mod clock;
mod conflict;
mod engine;
mod error;
mod merge;
mod reconcile;
mod record;
mod resolve;
mod scheduler;
mod status;
mod value;

pub use clock::{Clock, FixedClock, SystemClock};
pub use conflict::{
    conflict_key, parse_conflict_key, SyncConflict, DELETED_FIELD, DELETED_SENTINEL,
    EDITED_SENTINEL,
};
pub use engine::{PassOutcome, SyncEngine, SyncReport};
pub use error::SyncError;
pub use merge::{merge_records, MergeAction, MergeOutcome};
pub use reconcile::{reconcile, ReconcileAction, ReconcileCounts, ReconcileOutcome};
pub use record::{Record, RecordKind, Versioned};
pub use resolve::{
    apply_resolution, plan_resolutions, AppliedResolution, Resolution, ResolutionPlan,
    ResolutionReport, ResolutionSource, ResolveError,
};
pub use scheduler::SchedulerHandle;
pub use status::{StatusIndicator, StatusSubscription, SyncPhase, SyncStatus};
pub use value::{deep_equal, FieldError, FieldValue, ValueKind};
