//! Scenario runner, virtual-user context and the built-in scripts.

pub mod payload;
pub mod plan;
pub mod runner;
pub mod scenario;
pub mod scripts;

pub use plan::RunPlan;
pub use runner::{RunOptions, RunReport, Runner, StopHandle};
pub use scenario::{Scenario, VuContext};
