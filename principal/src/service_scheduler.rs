use std::cmp::Reverse;
use std::collections::BinaryHeap;

use models::{ClusterState, Machine, ServiceSpec};
use tracing::debug;

use crate::constraints::{derive_constraints, Constraint};
use crate::config::PlannerConfig;
use crate::error::PlanningError;
use crate::report::{MachineEvaluation, SchedulingReport};

/// Orders eligible machines for a single container placement decision.
/// `Less` in the original design corresponds to a smaller `rank_key`
/// here — the heap pops the machine with the smallest key first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ranker {
    /// No CPU or memory reservation requested: spread round-robin by
    /// scheduled-this-session container count, ignoring existing load.
    NoReservation,
    /// A reservation is requested: respect existing load too, so
    /// capacity-budgeted services still spread across the whole fleet.
    Spread,
}

impl Ranker {
    fn for_spec(spec: &ServiceSpec) -> Self {
        if spec.container.resources.is_zero() {
            Ranker::NoReservation
        } else {
            Ranker::Spread
        }
    }

    /// Sort key: (load, machine id). Ties always break on ascending
    /// machine id so plans stay deterministic.
    fn rank_key(&self, machine: &Machine) -> (u64, String) {
        let load = match self {
            Ranker::NoReservation => machine.scheduled_containers,
            Ranker::Spread => machine.total_containers(),
        };
        (load, machine.id.clone())
    }
}

/// Selects an eligible machine for each replica container of a single
/// service, applying placement, volume-existence and resource
/// constraints, and load-balancing across eligible machines as
/// containers are dispensed.
pub struct ServiceScheduler<'a> {
    cluster: &'a mut ClusterState,
    spec: ServiceSpec,
    constraints: Vec<Box<dyn Constraint>>,
    ranker: Ranker,
    config: PlannerConfig,
}

impl<'a> ServiceScheduler<'a> {
    pub fn new(cluster: &'a mut ClusterState, spec: ServiceSpec) -> Self {
        Self::with_config(cluster, spec, PlannerConfig::default())
    }

    pub fn with_config(cluster: &'a mut ClusterState, spec: ServiceSpec, config: PlannerConfig) -> Self {
        let constraints = derive_constraints(&spec);
        let ranker = Ranker::for_spec(&spec);
        Self {
            cluster,
            spec,
            constraints,
            ranker,
            config,
        }
    }

    /// Evaluates every constraint against every machine in the cluster,
    /// without failing even if no machine is eligible.
    pub fn evaluate(&self) -> SchedulingReport {
        let evaluations: Vec<MachineEvaluation> = self
            .cluster
            .machines()
            .iter()
            .map(|machine| {
                let mut results: Vec<_> = self
                    .constraints
                    .iter()
                    .map(|c| c.evaluate(machine))
                    .collect();
                if !self.config.verbose_reports {
                    if let Some(first_failure) = results.iter().position(|r| !r.satisfied) {
                        results = vec![results.swap_remove(first_failure)];
                    } else {
                        results.clear();
                    }
                }
                MachineEvaluation {
                    machine: machine.clone(),
                    results,
                }
            })
            .collect();

        SchedulingReport::from_evaluations(evaluations)
    }

    /// Returns the eligible machine subset and the full report. Fails
    /// with `NoEligibleMachines` (embedding the report) if no machine
    /// satisfies every constraint.
    pub fn eligible_machines(&self) -> Result<(Vec<Machine>, SchedulingReport), PlanningError> {
        let report = self.evaluate();
        if report.eligible.is_empty() {
            return Err(PlanningError::NoEligibleMachines {
                service: self.spec.name.clone(),
                report: report.error_text(),
            });
        }
        Ok((report.eligible.clone(), report))
    }

    /// Picks the best eligible machine for one more replica container,
    /// reserves its resources, and returns it. Re-filters eligibility
    /// from scratch each call since prior reservations shift capacity.
    pub fn schedule_container(&mut self) -> Result<Machine, PlanningError> {
        let (eligible, _report) = self.eligible_machines()?;

        let mut heap: BinaryHeap<Reverse<(u64, String)>> = eligible
            .iter()
            .map(|m| Reverse(self.ranker.rank_key(m)))
            .collect();

        let Reverse((_, chosen_id)) = match heap.pop() {
            Some(entry) => entry,
            None => {
                return Err(PlanningError::Bug(format!(
                    "heap for service '{}' emptied despite eligible_machines returning a non-empty set",
                    self.spec.name
                )))
            }
        };

        let resources = self.spec.container.resources;
        let machine = self
            .cluster
            .machine_mut(&chosen_id)
            .ok_or_else(|| PlanningError::Bug(format!("machine '{chosen_id}' vanished mid-scheduling")))?;
        machine.reserve_resources(resources.cpu_nanocores, resources.memory_bytes);

        debug!(
            service = %self.spec.name,
            machine = %chosen_id,
            cpu_nanocores = resources.cpu_nanocores,
            memory_bytes = resources.memory_bytes,
            "scheduled container"
        );

        Ok(machine.clone())
    }

    /// Rolls back a reservation made by an earlier `schedule_container`
    /// call on this same spec, e.g. because the caller decided an
    /// existing replica already satisfies this slot.
    pub fn unschedule_container(&mut self, machine_id: &str) -> Result<(), PlanningError> {
        let resources = self.spec.container.resources;
        let machine = self
            .cluster
            .machine_mut(machine_id)
            .ok_or_else(|| PlanningError::Bug(format!("unknown machine '{machine_id}' in unschedule")))?;
        machine.unreserve_resources(resources.cpu_nanocores, resources.memory_bytes);
        debug!(service = %self.spec.name, machine = %machine_id, "unscheduled container");
        Ok(())
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{ContainerSpec, Placement, Resources, ServiceMode};

    fn spec(name: &str, resources: Resources) -> ServiceSpec {
        ServiceSpec {
            name: name.into(),
            mode: ServiceMode::Replicated,
            replicas: Some(1),
            placement: Placement::default(),
            container: ContainerSpec {
                image: "nginx".into(),
                volume_mounts: vec![],
                resources,
            },
            volumes: vec![],
        }
    }

    #[test]
    fn no_reservation_ranker_round_robins() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000),
            Machine::new("m2", 4_000_000_000, 4_000_000_000),
        ]);
        let s = spec("s1", Resources::default());

        let mut chosen = Vec::new();
        for _ in 0..4 {
            let mut sched = ServiceScheduler::new(&mut cluster, s.clone());
            chosen.push(sched.schedule_container().unwrap().id);
        }
        assert_eq!(chosen, vec!["m1", "m2", "m1", "m2"]);
    }

    #[test]
    fn spread_ranker_respects_existing_load() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000).with_existing_containers(5),
            Machine::new("m2", 4_000_000_000, 4_000_000_000),
        ]);
        let s = spec(
            "s1",
            Resources { cpu_nanocores: 1_000_000_000, memory_bytes: 1_000_000 },
        );
        let mut sched = ServiceScheduler::new(&mut cluster, s);
        let chosen = sched.schedule_container().unwrap();
        assert_eq!(chosen.id, "m2");
    }

    #[test]
    fn eligible_machines_fails_with_report_when_empty() {
        let mut cluster = ClusterState::from_machines(vec![Machine::new("m1", 1, 1)]);
        let s = spec(
            "s1",
            Resources { cpu_nanocores: 1_000_000_000_000, memory_bytes: 10 },
        );
        let sched = ServiceScheduler::new(&mut cluster, s);
        let err = sched.eligible_machines().unwrap_err();
        match err {
            PlanningError::NoEligibleMachines { service, report } => {
                assert_eq!(service, "s1");
                assert!(report.contains("m1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unschedule_rolls_back_reservation() {
        let mut cluster = ClusterState::from_machines(vec![Machine::new(
            "m1",
            4_000_000_000,
            4_000_000_000,
        )]);
        let s = spec(
            "s1",
            Resources { cpu_nanocores: 1_000_000_000, memory_bytes: 1_000_000 },
        );
        let mut sched = ServiceScheduler::new(&mut cluster, s);
        let machine = sched.schedule_container().unwrap();
        sched.unschedule_container(&machine.id).unwrap();
        let m = cluster.machine("m1").unwrap();
        assert_eq!(m.scheduled_containers, 0);
        assert_eq!(m.scheduled_cpu_nanocores, 0);
        assert_eq!(m.scheduled_memory_bytes, 0);
    }
}
