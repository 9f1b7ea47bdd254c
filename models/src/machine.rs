use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::volume::{Driver, VolumeSpec};

/// A named volume already present on a machine, as reported by the
/// cluster inventory. Distinct from `VolumeSpec`: this is what exists, a
/// `VolumeSpec` is what a service wants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingVolume {
    pub docker_name: String,
    pub driver: Option<Driver>,
    pub labels: BTreeMap<String, String>,
}

/// A cluster member capable of running containers. Tracks both resources
/// reported by the machine itself (`total_*`, `reserved_*`,
/// `existing_*`) and reservations made during the current planning
/// session (`scheduled_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: Option<String>,

    pub total_cpu_nanocores: u64,
    pub total_memory_bytes: u64,

    /// Already reserved on the machine before this session started (e.g.
    /// by containers scheduled in a previous session).
    pub reserved_cpu_nanocores: u64,
    pub reserved_memory_bytes: u64,

    pub existing_volumes: Vec<ExistingVolume>,
    pub scheduled_volumes: Vec<VolumeSpec>,

    pub existing_containers: u64,
    pub scheduled_containers: u64,

    pub scheduled_cpu_nanocores: u64,
    pub scheduled_memory_bytes: u64,
}

impl Machine {
    pub fn new(id: impl Into<String>, total_cpu_nanocores: u64, total_memory_bytes: u64) -> Self {
        Self {
            id: id.into(),
            name: None,
            total_cpu_nanocores,
            total_memory_bytes,
            reserved_cpu_nanocores: 0,
            reserved_memory_bytes: 0,
            existing_volumes: Vec::new(),
            scheduled_volumes: Vec::new(),
            existing_containers: 0,
            scheduled_containers: 0,
            scheduled_cpu_nanocores: 0,
            scheduled_memory_bytes: 0,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_existing_volume(mut self, volume: ExistingVolume) -> Self {
        self.existing_volumes.push(volume);
        self
    }

    pub fn with_reserved(mut self, cpu_nanocores: u64, memory_bytes: u64) -> Self {
        self.reserved_cpu_nanocores = cpu_nanocores;
        self.reserved_memory_bytes = memory_bytes;
        self
    }

    pub fn with_existing_containers(mut self, count: u64) -> Self {
        self.existing_containers = count;
        self
    }

    /// True if the given name or id identifies this machine.
    pub fn matches(&self, name_or_id: &str) -> bool {
        self.id == name_or_id || self.name.as_deref() == Some(name_or_id)
    }

    pub fn available_cpu_nanocores(&self) -> u64 {
        self.total_cpu_nanocores
            .saturating_sub(self.reserved_cpu_nanocores)
            .saturating_sub(self.scheduled_cpu_nanocores)
    }

    pub fn available_memory_bytes(&self) -> u64 {
        self.total_memory_bytes
            .saturating_sub(self.reserved_memory_bytes)
            .saturating_sub(self.scheduled_memory_bytes)
    }

    /// Total containers this machine will host once the session commits:
    /// those already running plus those reserved so far this session.
    pub fn total_containers(&self) -> u64 {
        self.existing_containers + self.scheduled_containers
    }

    /// Reserve resources for a container scheduled during this session.
    /// Monotonic: never call to reverse a reservation, use `unreserve`.
    pub fn reserve_resources(&mut self, cpu_nanocores: u64, memory_bytes: u64) {
        self.scheduled_cpu_nanocores += cpu_nanocores;
        self.scheduled_memory_bytes += memory_bytes;
        self.scheduled_containers += 1;
    }

    /// Roll back a container reservation made earlier in the same
    /// session. Clamps `scheduled_containers` at zero.
    pub fn unreserve_resources(&mut self, cpu_nanocores: u64, memory_bytes: u64) {
        self.scheduled_cpu_nanocores = self.scheduled_cpu_nanocores.saturating_sub(cpu_nanocores);
        self.scheduled_memory_bytes = self.scheduled_memory_bytes.saturating_sub(memory_bytes);
        self.scheduled_containers = self.scheduled_containers.saturating_sub(1);
    }

    /// Reserve resources for a volume assigned to this machine this
    /// session (billed the same way as container reservations so later
    /// placements see reduced capacity).
    pub fn reserve_volume_budget(&mut self, cpu_nanocores: u64, memory_bytes: u64) {
        self.scheduled_cpu_nanocores += cpu_nanocores;
        self.scheduled_memory_bytes += memory_bytes;
    }

    pub fn add_scheduled_volume(&mut self, volume: VolumeSpec) {
        self.scheduled_volumes.push(volume);
    }

    /// Find an existing or already-scheduled volume matching the given
    /// docker name, if any.
    pub fn find_existing_volume(&self, docker_name: &str) -> Option<&ExistingVolume> {
        self.existing_volumes
            .iter()
            .find(|v| v.docker_name == docker_name)
    }

    pub fn find_scheduled_volume(&self, docker_name: &str) -> Option<&VolumeSpec> {
        self.scheduled_volumes
            .iter()
            .find(|v| v.docker_name_or_name() == docker_name)
    }
}
