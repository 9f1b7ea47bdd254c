//! Trait-only boundary to the external collaborators named in the
//! scheduling contract: the cluster inventory and the plan executor.
//! Neither has a concrete implementation here — the container runtime
//! client, gossip collection, and the side-effecting executor all live
//! outside this core.

use std::collections::HashMap;

use models::{ClusterState, ExistingVolume, Machine, VolumeSpec};

use crate::error::PlanningError;

/// A machine as reported by cluster inventory, before it becomes a
/// planning-session `Machine`.
#[derive(Debug, Clone)]
pub struct MachineRecord {
    pub id: String,
    pub name: Option<String>,
    pub total_cpu_nanocores: u64,
    pub total_memory_bytes: u64,
    pub reserved_cpu_nanocores: u64,
    pub reserved_memory_bytes: u64,
    pub existing_containers: u64,
}

/// A named volume reported as already present on a given machine.
#[derive(Debug, Clone)]
pub struct MachineVolumeRecord {
    pub machine_id: String,
    pub volume: ExistingVolume,
}

#[derive(Debug, Clone, Default)]
pub struct MachineFilter {
    pub available_only: bool,
    pub names_or_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeFilter {
    pub machine_ids: Option<Vec<String>>,
}

/// Gathers the cluster snapshot a planning session starts from. Called
/// once per session, before scheduling begins; the core itself performs
/// no I/O and holds no reference to this trait after the snapshot is
/// folded into a `ClusterState`.
pub trait InventoryClient {
    fn list_machines(&self, filter: MachineFilter) -> Result<Vec<MachineRecord>, PlanningError>;
    fn list_volumes(&self, filter: Option<VolumeFilter>) -> Result<Vec<MachineVolumeRecord>, PlanningError>;
}

/// Consumes the core's output: the volumes to create per machine, and
/// (via the schedulers directly) the container placements. Exists only
/// to document the contract; the core never calls an executor itself.
pub trait PlacementExecutor {
    fn volumes_to_create(&self) -> &HashMap<String, Vec<VolumeSpec>>;
}

/// Folds already-fetched inventory records into a fresh `ClusterState`.
/// Pure function over data the caller has already retrieved; it
/// performs no I/O itself, keeping the async/IO boundary entirely on
/// the caller's side.
pub fn build_cluster_state(machines: Vec<MachineRecord>, volumes: Vec<MachineVolumeRecord>) -> ClusterState {
    let mut by_id: HashMap<String, Machine> = machines
        .into_iter()
        .map(|record| {
            let machine = Machine {
                id: record.id.clone(),
                name: record.name,
                total_cpu_nanocores: record.total_cpu_nanocores,
                total_memory_bytes: record.total_memory_bytes,
                reserved_cpu_nanocores: record.reserved_cpu_nanocores,
                reserved_memory_bytes: record.reserved_memory_bytes,
                existing_volumes: Vec::new(),
                scheduled_volumes: Vec::new(),
                existing_containers: record.existing_containers,
                scheduled_containers: 0,
                scheduled_cpu_nanocores: 0,
                scheduled_memory_bytes: 0,
            };
            (record.id, machine)
        })
        .collect();

    for record in volumes {
        if let Some(machine) = by_id.get_mut(&record.machine_id) {
            machine.existing_volumes.push(record.volume);
        }
    }

    let mut machines: Vec<Machine> = by_id.into_values().collect();
    machines.sort_by(|a, b| a.id.cmp(&b.id));
    ClusterState::from_machines(machines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_cluster_state_attaches_volumes_to_their_machine() {
        let machines = vec![
            MachineRecord {
                id: "m1".into(),
                name: None,
                total_cpu_nanocores: 4_000_000_000,
                total_memory_bytes: 4_000_000_000,
                reserved_cpu_nanocores: 0,
                reserved_memory_bytes: 0,
                existing_containers: 0,
            },
            MachineRecord {
                id: "m2".into(),
                name: None,
                total_cpu_nanocores: 4_000_000_000,
                total_memory_bytes: 4_000_000_000,
                reserved_cpu_nanocores: 0,
                reserved_memory_bytes: 0,
                existing_containers: 0,
            },
        ];
        let volumes = vec![MachineVolumeRecord {
            machine_id: "m2".into(),
            volume: ExistingVolume {
                docker_name: "v1".into(),
                driver: None,
                labels: Default::default(),
            },
        }];

        let cluster = build_cluster_state(machines, volumes);
        assert!(cluster.machine("m1").unwrap().existing_volumes.is_empty());
        assert_eq!(cluster.machine("m2").unwrap().existing_volumes.len(), 1);
    }
}
