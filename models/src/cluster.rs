use serde::{Deserialize, Serialize};

use crate::machine::Machine;

/// Session-local model of every machine in the cluster, both their
/// existing state and the reservations made so far during the current
/// planning session. Created fresh per deployment request; never shared
/// across sessions (see the crate-level concurrency note in `principal`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterState {
    machines: Vec<Machine>,
}

impl ClusterState {
    pub fn new() -> Self {
        Self { machines: Vec::new() }
    }

    /// Builds cluster state from an ordered list of machines. Iteration
    /// order is preserved and is the order tie-breaks ultimately fall
    /// back to alongside ascending machine id.
    pub fn from_machines(machines: Vec<Machine>) -> Self {
        Self { machines }
    }

    pub fn push(&mut self, machine: Machine) {
        self.machines.push(machine);
    }

    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    pub fn machines_mut(&mut self) -> &mut [Machine] {
        &mut self.machines
    }

    /// First machine whose id or name equals `name_or_id`.
    pub fn machine(&self, name_or_id: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.matches(name_or_id))
    }

    pub fn machine_mut(&mut self, name_or_id: &str) -> Option<&mut Machine> {
        self.machines.iter_mut().find(|m| m.matches(name_or_id))
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}
