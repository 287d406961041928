//! # Orchestration
//!
//! Owns orchestrations from submission to a terminal state.
//!
//! - [`OrchestrationService`]: submit, run, query, pause, cancel, report
//!   failures and forget finished orchestrations
//! - [`OrchestrationHandle`]: one orchestration's immutable plan plus its
//!   state-machine-guarded record
//! - status types returned by the query surface
//!
//! Orchestration lifecycle: `planning -> executing -> completed | failed |
//! cancelled`, with `planning -> cancelled | failed` when an orchestration is
//! cancelled or reported failed before it runs. Pausing is not a state: a
//! paused orchestration stays `executing` and holds back tasks that have not
//! started yet. A failed orchestration with `rollback_on_failure` set runs its
//! rollback before it becomes `failed`.

pub mod handle;
pub(crate) mod recovery_actions;
pub mod service;
pub mod status;

pub use handle::OrchestrationHandle;
pub use service::{OrchestrationService, OrchestrationServiceBuilder};
pub use status::{
    FailureReport, OrchestrationStatusReport, OrchestrationSummary, Progress, RollbackReport,
    RollbackStatus, StageStatus, StageSummary,
};
