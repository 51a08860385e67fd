pub mod planner;
pub mod types;

pub use planner::{PAIR_FORMAT, PARAMS_STRUCT, plan_bindings};
pub use types::{BindingKind, BindingPlan, PlanEntry, ResourceRef};
