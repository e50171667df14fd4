pub mod group;
pub mod job;
pub mod projection;
pub mod store;

pub use group::{JobGroup, JobGroups, MAIN_GROUP};
pub use job::{ExitOutcome, Job, JobId, JobSnapshot, JobState};
pub use projection::{JobFields, JobRecord, JobsEnvelope, DEFAULT_FIELDS};
pub use store::{JobStore, MemoryJobStore, StoreKind};
