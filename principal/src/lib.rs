//! Placement planner core: decides where a deployment's containers and
//! their backing named volumes land on a cluster's machines.
//!
//! A planning session runs in two phases over a shared [`ClusterState`]:
//! [`VolumeScheduler`] first decides which missing named volumes to
//! create and where, then [`ServiceScheduler`] is invoked once per
//! service to pick a machine for each replica container. Neither phase
//! performs I/O; the caller supplies an already-gathered `ClusterState`
//! (see [`runtime::build_cluster_state`]) and consumes the resulting
//! plan.

pub mod config;
pub mod constraints;
pub mod error;
pub mod report;
pub mod runtime;
pub mod service_scheduler;
pub mod volume_scheduler;

pub use config::PlannerConfig;
pub use constraints::{Constraint, ConstraintResult, ConstraintType};
pub use error::PlanningError;
pub use report::{MachineEvaluation, SchedulingReport};
pub use service_scheduler::ServiceScheduler;
pub use volume_scheduler::VolumeScheduler;
