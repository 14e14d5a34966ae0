//! Migration walks
//!
//! - **hooks**: per-version data hooks, naming convention and skip set
//! - **assertions**: schema checks for use inside hooks
//! - **orchestrator**: the up/down (and snake) walk state machine
//! - **report**: per-walk and per-run records

pub mod assertions;
pub mod hooks;
pub mod orchestrator;
pub mod report;

pub use assertions::{
    assert_column_exists, assert_column_not_exists, assert_column_nullable,
    assert_foreign_key_count, assert_index_exists, assert_index_members, assert_table_exists,
    assert_table_not_exists,
};
pub use hooks::{hook_name, parse_hook_name, Hook, HookKind, HookRegistry, HookSet, SkipSet};
pub use orchestrator::{WalkPlan, WalkState, WalkTarget, Walker};
pub use report::{BackendFailure, Direction, RunReport, StepOutcome, StepRecord, WalkReport};
