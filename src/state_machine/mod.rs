// State definitions for orchestrations and tasks
//
// Transition rules live next to the states; the orchestration registry and the
// result store consult them before mutating anything.

pub mod states;

pub use states::{OrchestrationState, TaskState};
