//! # Models
//!
//! Tasks, stages and work orders as submitted by callers and as executed.
//! `*Spec` types are the unvalidated input shapes; converting them validates
//! required fields and fills defaults.

pub mod stage;
pub mod task;
pub mod work_order;

pub use stage::{Stage, StageSpec, StageType};
pub use task::{Task, TaskSpec, TaskType};
pub use work_order::{OrchestrationOptions, WorkOrder, WorkOrderSource};
