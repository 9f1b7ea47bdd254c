//! Shared data model for the placement planner: machines, cluster state,
//! volume specs and service specs. Pure data + small invariant-preserving
//! methods; no scheduling logic lives here (see the `principal` crate).

pub mod cluster;
pub mod error;
pub mod machine;
pub mod service;
pub mod volume;

pub use cluster::ClusterState;
pub use error::ModelError;
pub use machine::{ExistingVolume, Machine};
pub use service::{
    validate_specs, ContainerSpec, Placement, Resources, ServiceMode, ServiceSpec, VolumeMountSpec,
};
pub use volume::{BindOptions, Driver, TmpfsOptions, VolumeKind, VolumeOptions, VolumeSpec};
