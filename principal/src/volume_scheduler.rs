use std::collections::{BTreeMap, BTreeSet};

use models::{ClusterState, Machine, Resources, ServiceMode, ServiceSpec, VolumeSpec};
use tracing::{debug, info};

use crate::config::PlannerConfig;
use crate::error::{quoted_sorted_list, PlanningError};
use crate::service_scheduler::ServiceScheduler;

type MachineId = String;
type VolumeKey = String;
type ServiceName = String;

/// Decides which missing named volumes to create on which machines for
/// a multi-service deployment, respecting the global invariant that
/// services sharing a volume must be co-located on a machine that holds
/// (or will hold) it, individual placement constraints are preserved,
/// existing volumes are reused, and combined reservations of services
/// sharing a volume fit on the chosen machine.
pub struct VolumeScheduler<'a> {
    cluster: &'a mut ClusterState,
    config: PlannerConfig,
}

impl<'a> VolumeScheduler<'a> {
    pub fn new(cluster: &'a mut ClusterState) -> Self {
        Self::with_config(cluster, PlannerConfig::default())
    }

    pub fn with_config(cluster: &'a mut ClusterState, config: PlannerConfig) -> Self {
        Self { cluster, config }
    }

    /// Computes the missing-volume placement plan for `specs` and
    /// mutates the cluster state to reflect it (scheduled volumes and
    /// their reserved resources). Returns a deterministic mapping from
    /// machine id to the volumes to create there.
    pub fn plan(&mut self, specs: &[ServiceSpec]) -> Result<BTreeMap<MachineId, Vec<VolumeSpec>>, PlanningError> {
        models::validate_specs(specs)?;

        let (volume_specs, volume_services, volume_mode, volume_budgets) = Self::derive_volume_index(specs)?;

        if volume_specs.is_empty() {
            return Ok(BTreeMap::new());
        }

        let existing_volume_machines = self.existing_volume_machines(&volume_specs)?;

        let mut service_eligible = self.seed_eligibility(specs, &volume_services)?;

        let mut placed_volumes: BTreeSet<VolumeKey> = BTreeSet::new();
        self.intersect_existing_volumes(
            &existing_volume_machines,
            &volume_services,
            &mut service_eligible,
            &mut placed_volumes,
        )?;

        propagate_to_fixed_point(
            self.cluster,
            &volume_services,
            &volume_budgets,
            &mut service_eligible,
            &placed_volumes,
        )?;

        self.assign_missing_volumes(
            &volume_specs,
            &volume_services,
            &volume_mode,
            &volume_budgets,
            &mut service_eligible,
            &mut placed_volumes,
        )
    }

    /// Builds the canonical per-volume index: declared spec, the
    /// services that use it, its shared mode (global xor replicated),
    /// and its combined resource budget. Fails fast on conflicting
    /// declarations or mixed-mode sharing.
    #[allow(clippy::type_complexity)]
    fn derive_volume_index(
        specs: &[ServiceSpec],
    ) -> Result<
        (
            BTreeMap<VolumeKey, VolumeSpec>,
            BTreeMap<VolumeKey, BTreeSet<ServiceName>>,
            BTreeMap<VolumeKey, ServiceMode>,
            BTreeMap<VolumeKey, Resources>,
        ),
        PlanningError,
    > {
        let mut volume_specs: BTreeMap<VolumeKey, VolumeSpec> = BTreeMap::new();
        let mut volume_services: BTreeMap<VolumeKey, BTreeSet<ServiceName>> = BTreeMap::new();
        let mut volume_mode: BTreeMap<VolumeKey, ServiceMode> = BTreeMap::new();

        for spec in specs {
            for mount in spec.named_volume_mounts() {
                let mut vspec = match spec.declared_volume(&mount.volume_name) {
                    Some(v) => v.clone(),
                    None => {
                        return Err(PlanningError::Bug(format!(
                            "service '{}' named_volume_mounts yielded undeclared volume '{}'",
                            spec.name, mount.volume_name
                        )))
                    }
                };
                vspec.set_defaults();
                let key = vspec.docker_name_or_name().to_string();

                if let Some(existing) = volume_specs.get(&key) {
                    if !existing.physically_equivalent(&vspec) {
                        return Err(PlanningError::ConflictingVolumeDeclaration(key));
                    }
                } else {
                    volume_specs.insert(key.clone(), vspec);
                }

                volume_services
                    .entry(key.clone())
                    .or_default()
                    .insert(spec.name.clone());

                match volume_mode.get(&key) {
                    Some(mode) if *mode != spec.mode => {
                        return Err(PlanningError::VolumeModeMismatch(key));
                    }
                    _ => {
                        volume_mode.insert(key.clone(), spec.mode);
                    }
                }
            }
        }

        let mut volume_budgets: BTreeMap<VolumeKey, Resources> = BTreeMap::new();
        for (vol, users) in &volume_services {
            let mut budget = Resources::default();
            for user in users {
                let spec = match specs.iter().find(|s| &s.name == user) {
                    Some(s) => s,
                    None => {
                        return Err(PlanningError::Bug(format!(
                            "service '{user}' referenced by volume '{vol}' is missing from the spec list"
                        )))
                    }
                };
                budget = budget.saturating_add(spec.container.resources.scaled(spec.effective_replica_count()));
            }
            volume_budgets.insert(vol.clone(), budget);
        }

        Ok((volume_specs, volume_services, volume_mode, volume_budgets))
    }

    /// Machines already carrying each declared volume, matched by docker
    /// name and (if declared) driver. A docker-name match with a
    /// mismatched driver/options is a hard error: the user must rename
    /// or remove the conflicting volume before we can plan around it.
    fn existing_volume_machines(
        &self,
        volume_specs: &BTreeMap<VolumeKey, VolumeSpec>,
    ) -> Result<BTreeMap<VolumeKey, BTreeSet<MachineId>>, PlanningError> {
        let mut result: BTreeMap<VolumeKey, BTreeSet<MachineId>> = BTreeMap::new();

        for machine in self.cluster.machines() {
            for (key, vspec) in volume_specs {
                if let Some(existing) = machine.find_existing_volume(vspec.docker_name_or_name()) {
                    if !vspec.matches_driver(existing.driver.as_ref()) {
                        let display_name = machine.name.as_deref().unwrap_or(&machine.id);
                        return Err(PlanningError::ExistingVolumeMismatch {
                            volume: key.clone(),
                            machine: display_name.to_string(),
                        });
                    }
                    result.entry(key.clone()).or_default().insert(machine.id.clone());
                }
            }
        }

        Ok(result)
    }

    /// Baseline eligible machine set for each volume-mounting service,
    /// computed with its volume mounts stripped (a service's own volume
    /// requirements are applied afterwards, during propagation).
    fn seed_eligibility(
        &mut self,
        specs: &[ServiceSpec],
        volume_services: &BTreeMap<VolumeKey, BTreeSet<ServiceName>>,
    ) -> Result<BTreeMap<ServiceName, BTreeSet<MachineId>>, PlanningError> {
        let mut service_names: BTreeSet<&ServiceName> = BTreeSet::new();
        for users in volume_services.values() {
            service_names.extend(users.iter());
        }

        let mut service_eligible = BTreeMap::new();
        for name in service_names {
            let spec = match specs.iter().find(|s| &s.name == name) {
                Some(s) => s,
                None => {
                    return Err(PlanningError::Bug(format!(
                        "service '{name}' referenced by a shared volume is missing from the spec list"
                    )))
                }
            };
            let clone = spec.without_volume_mounts();
            let scheduler = ServiceScheduler::with_config(self.cluster, clone, self.config.clone());
            let (machines, _report) = scheduler.eligible_machines()?;
            let ids: BTreeSet<MachineId> = machines.iter().map(|m| m.id.clone()).collect();
            debug!(service = %name, eligible = ids.len(), "seeded baseline eligibility");
            service_eligible.insert(name.clone(), ids);
        }

        Ok(service_eligible)
    }

    /// Reuses volumes that already exist on one or more machines: every
    /// using service's eligibility is narrowed to the (jointly
    /// intersected) set of machines that both satisfy its other
    /// constraints and already carry the volume, preserving
    /// co-location even when the spec's existing copies span several
    /// machines.
    fn intersect_existing_volumes(
        &self,
        existing_volume_machines: &BTreeMap<VolumeKey, BTreeSet<MachineId>>,
        volume_services: &BTreeMap<VolumeKey, BTreeSet<ServiceName>>,
        service_eligible: &mut BTreeMap<ServiceName, BTreeSet<MachineId>>,
        placed_volumes: &mut BTreeSet<VolumeKey>,
    ) -> Result<(), PlanningError> {
        for (vol, existing_machines) in existing_volume_machines {
            let users = &volume_services[vol];

            let mut combined = intersect_all(users.iter().map(|svc| &service_eligible[svc]));
            combined.retain(|id| existing_machines.contains(id));

            if combined.is_empty() {
                let service = users
                    .iter()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| "<unknown>".to_string());
                return Err(PlanningError::NoMachineWithRequiredVolume {
                    service,
                    volume: vol.clone(),
                });
            }

            for svc in users {
                service_eligible.insert(svc.clone(), combined.clone());
            }
            placed_volumes.insert(vol.clone());
            info!(volume = %vol, machines = combined.len(), "reusing existing volume");
        }

        Ok(())
    }

    /// Sorts missing volumes by decreasing combined CPU, then memory,
    /// then name, and assigns each to a machine in turn, reserving its
    /// budget and narrowing the using services' eligibility before
    /// moving on to the next volume.
    fn assign_missing_volumes(
        &mut self,
        volume_specs: &BTreeMap<VolumeKey, VolumeSpec>,
        volume_services: &BTreeMap<VolumeKey, BTreeSet<ServiceName>>,
        volume_mode: &BTreeMap<VolumeKey, ServiceMode>,
        volume_budgets: &BTreeMap<VolumeKey, Resources>,
        service_eligible: &mut BTreeMap<ServiceName, BTreeSet<MachineId>>,
        placed_volumes: &mut BTreeSet<VolumeKey>,
    ) -> Result<BTreeMap<MachineId, Vec<VolumeSpec>>, PlanningError> {
        let mut missing: Vec<VolumeKey> = volume_specs
            .keys()
            .filter(|v| !placed_volumes.contains(*v))
            .cloned()
            .collect();

        missing.sort_by(|a, b| {
            let ba = volume_budgets[a];
            let bb = volume_budgets[b];
            bb.cpu_nanocores
                .cmp(&ba.cpu_nanocores)
                .then(bb.memory_bytes.cmp(&ba.memory_bytes))
                .then(a.cmp(b))
        });

        let mut plan: BTreeMap<MachineId, Vec<VolumeSpec>> = BTreeMap::new();

        for vol in missing {
            let users = volume_services[&vol].clone();
            let budget = volume_budgets[&vol];
            let vspec = volume_specs[&vol].clone();
            let mode = volume_mode[&vol];

            let first_user = match users.iter().next() {
                Some(u) => u,
                None => {
                    return Err(PlanningError::Bug(format!(
                        "volume '{vol}' has no users at assignment time"
                    )))
                }
            };
            let eligible = service_eligible[first_user].clone();
            if eligible.is_empty() {
                return Err(PlanningError::Bug(format!(
                    "volume '{vol}' has no eligible machines at assignment time"
                )));
            }

            let target_machines: Vec<MachineId> = match mode {
                ServiceMode::Global => eligible.iter().cloned().collect(),
                ServiceMode::Replicated => {
                    vec![self.pick_least_loaded(&eligible)?]
                }
            };

            for machine_id in &target_machines {
                let machine = self
                    .cluster
                    .machine_mut(machine_id)
                    .ok_or_else(|| PlanningError::Bug(format!("machine '{machine_id}' vanished during assignment")))?;
                machine.add_scheduled_volume(vspec.clone());
                machine.reserve_volume_budget(budget.cpu_nanocores, budget.memory_bytes);
                plan.entry(machine_id.clone()).or_default().push(vspec.clone());
            }

            info!(volume = %vol, machines = ?target_machines, "scheduled volume creation");

            let narrowed: BTreeSet<MachineId> = target_machines.into_iter().collect();
            for svc in &users {
                service_eligible.insert(svc.clone(), narrowed.clone());
            }
            placed_volumes.insert(vol.clone());

            propagate_to_fixed_point(
                self.cluster,
                volume_services,
                volume_budgets,
                service_eligible,
                placed_volumes,
            )
            .map_err(|err| {
                PlanningError::Bug(format!(
                    "post-assignment propagation failed after placing volume '{vol}': {err}"
                ))
            })?;
        }

        Ok(plan)
    }

    /// Machine with the fewest already-scheduled volumes in `eligible`,
    /// ties broken by ascending machine id.
    fn pick_least_loaded(&self, eligible: &BTreeSet<MachineId>) -> Result<MachineId, PlanningError> {
        let mut candidates: Vec<&Machine> = eligible
            .iter()
            .map(|id| {
                self.cluster
                    .machine(id)
                    .ok_or_else(|| PlanningError::Bug(format!("unknown machine '{id}' in eligible set")))
            })
            .collect::<Result<_, _>>()?;

        candidates.sort_by(|a, b| {
            a.scheduled_volumes
                .len()
                .cmp(&b.scheduled_volumes.len())
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(candidates[0].id.clone())
    }
}

fn intersect_all<'a, I: Iterator<Item = &'a BTreeSet<MachineId>>>(mut sets: I) -> BTreeSet<MachineId> {
    let first = match sets.next() {
        Some(set) => set.clone(),
        None => return BTreeSet::new(),
    };
    sets.fold(first, |acc, set| acc.intersection(set).cloned().collect())
}

fn placement_conflict_error(users: &BTreeSet<ServiceName>, volume: &str) -> PlanningError {
    PlanningError::PlacementConflict {
        services: quoted_sorted_list(users.iter().map(String::as_str)),
        volume: volume.to_string(),
    }
}

fn resource_conflict_error(users: &BTreeSet<ServiceName>, volume: &str, budget: Resources) -> PlanningError {
    PlanningError::ResourceConflict {
        services: quoted_sorted_list(users.iter().map(String::as_str)),
        volume: volume.to_string(),
        cpu_cores_needed: budget.cpu_nanocores as f64 / 1_000_000_000.0,
        memory_gb_needed: budget.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0),
    }
}

/// Repeatedly intersects each unplaced volume's using-service eligible
/// sets (and, if it has a nonzero resource budget, filters by machine
/// capacity) until no set changes. Each change only ever shrinks a set,
/// so this always terminates.
fn propagate_to_fixed_point(
    cluster: &ClusterState,
    volume_services: &BTreeMap<VolumeKey, BTreeSet<ServiceName>>,
    volume_budgets: &BTreeMap<VolumeKey, Resources>,
    service_eligible: &mut BTreeMap<ServiceName, BTreeSet<MachineId>>,
    placed_volumes: &BTreeSet<VolumeKey>,
) -> Result<(), PlanningError> {
    loop {
        let mut changed = false;

        for (vol, users) in volume_services {
            if placed_volumes.contains(vol) {
                continue;
            }

            let mut eligible = intersect_all(users.iter().map(|svc| &service_eligible[svc]));
            if eligible.is_empty() {
                return Err(placement_conflict_error(users, vol));
            }

            let budget = volume_budgets[vol];
            if !budget.is_zero() {
                let mut affordable = BTreeSet::new();
                for id in &eligible {
                    let machine = cluster.machine(id).ok_or_else(|| {
                        PlanningError::Bug(format!(
                            "machine '{id}' in eligible set for volume '{vol}' is missing from cluster state"
                        ))
                    })?;
                    if machine.available_cpu_nanocores() >= budget.cpu_nanocores
                        && machine.available_memory_bytes() >= budget.memory_bytes
                    {
                        affordable.insert(id.clone());
                    }
                }
                eligible = affordable;
                if eligible.is_empty() {
                    return Err(resource_conflict_error(users, vol, budget));
                }
            }

            for svc in users {
                if service_eligible[svc] != eligible {
                    changed = true;
                }
            }
            for svc in users {
                service_eligible.insert(svc.clone(), eligible.clone());
            }
        }

        if !changed {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{ContainerSpec, Placement, VolumeMountSpec};

    fn mounting(name: &str, mode: ServiceMode, placement: &[&str], resources: Resources, volume: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.into(),
            mode,
            replicas: Some(1),
            placement: Placement {
                machines: placement.iter().map(|s| s.to_string()).collect(),
            },
            container: ContainerSpec {
                image: "nginx".into(),
                volume_mounts: vec![VolumeMountSpec {
                    volume_name: volume.into(),
                    container_path: "/data".into(),
                    read_only: false,
                }],
                resources,
            },
            volumes: vec![VolumeSpec::volume(volume)],
        }
    }

    // S1 — single service, single volume, empty cluster.
    #[test]
    fn single_service_single_volume() {
        let mut cluster = ClusterState::from_machines(vec![Machine::new("m1", 4_000_000_000, 4_000_000_000)]);
        let specs = vec![mounting("s1", ServiceMode::Replicated, &[], Resources::default(), "v1")];

        let plan = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap();
        assert_eq!(plan.get("m1").unwrap().len(), 1);
        assert_eq!(plan.len(), 1);
    }

    // S2 — two services share a missing volume, deterministic tie-break
    // to the lexicographically/numerically first machine id.
    #[test]
    fn shared_missing_volume_ties_break_on_machine_id() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000),
            Machine::new("m2", 4_000_000_000, 4_000_000_000),
        ]);
        let specs = vec![
            mounting("s1", ServiceMode::Replicated, &[], Resources::default(), "v1"),
            mounting("s2", ServiceMode::Replicated, &[], Resources::default(), "v1"),
        ];

        let plan = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.get("m1").unwrap().len(), 1);
    }

    // S3 — existing volume reused, no creation.
    #[test]
    fn existing_volume_is_reused_without_creation() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000),
            Machine::new("m2", 4_000_000_000, 4_000_000_000).with_existing_volume(models::ExistingVolume {
                docker_name: "v1".into(),
                driver: None,
                labels: Default::default(),
            }),
        ]);
        let specs = vec![mounting("s1", ServiceMode::Replicated, &[], Resources::default(), "v1")];

        let plan = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap();
        assert!(plan.is_empty());
    }

    // S4 — placement conflict across a shared volume.
    #[test]
    fn placement_conflict_across_shared_volume() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000),
            Machine::new("m2", 4_000_000_000, 4_000_000_000),
        ]);
        let specs = vec![
            mounting("s1", ServiceMode::Replicated, &["m1"], Resources::default(), "v1"),
            mounting("s2", ServiceMode::Replicated, &["m2"], Resources::default(), "v1"),
        ];

        let err = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("placement constraints for services 's1', 's2'"));
        assert!(msg.contains("share volume 'v1'"));
    }

    // S5 — resource budget exceeds machine capacity.
    #[test]
    fn resource_budget_exceeds_capacity() {
        let mut cluster = ClusterState::from_machines(vec![Machine::new("m1", 3_000_000_000, 8_000_000_000)]);
        let heavy = Resources { cpu_nanocores: 2_000_000_000, memory_bytes: 1_000_000_000 };
        let specs = vec![
            mounting("s1", ServiceMode::Replicated, &[], heavy, "v1"),
            mounting("s2", ServiceMode::Replicated, &[], heavy, "v1"),
        ];

        let err = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("insufficient"));
        assert!(msg.contains("v1"));
    }

    // S6 — resource-aware machine selection overrides alphabetical bias.
    #[test]
    fn resource_aware_selection_overrides_alphabetical_order() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("aaa", 3_000_000_000, 16_000_000_000_000),
            Machine::new("bbb", 6_000_000_000, 16_000_000_000_000),
        ]);
        let each = Resources { cpu_nanocores: 2_000_000_000, memory_bytes: 1_000_000 };
        let specs = vec![
            mounting("s1", ServiceMode::Replicated, &[], each, "v1"),
            mounting("s2", ServiceMode::Replicated, &[], each, "v1"),
        ];

        let plan = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap();
        assert!(plan.contains_key("bbb"));
        assert!(!plan.contains_key("aaa"));
    }

    // S7 — independent volumes spread across machines.
    #[test]
    fn independent_volumes_spread_across_machines() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000),
            Machine::new("m2", 4_000_000_000, 4_000_000_000),
            Machine::new("m3", 4_000_000_000, 4_000_000_000),
        ]);
        let specs = vec![
            mounting("s1", ServiceMode::Replicated, &[], Resources::default(), "v1"),
            mounting("s2", ServiceMode::Replicated, &[], Resources::default(), "v2"),
            mounting("s3", ServiceMode::Replicated, &[], Resources::default(), "v3"),
        ];

        let plan = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap();
        assert_eq!(plan.len(), 3);
        for volumes in plan.values() {
            assert_eq!(volumes.len(), 1);
        }
    }

    // S8 — global vs replicated mixing on a shared volume is rejected.
    #[test]
    fn global_and_replicated_sharing_is_rejected() {
        let mut cluster = ClusterState::from_machines(vec![Machine::new("m1", 4_000_000_000, 4_000_000_000)]);
        let specs = vec![
            mounting("g", ServiceMode::Global, &[], Resources::default(), "shared"),
            mounting("r", ServiceMode::Replicated, &[], Resources::default(), "shared"),
        ];

        let err = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap_err();
        assert!(err.to_string().contains("cannot be shared between global and replicated"));
    }

    #[test]
    fn global_service_missing_volume_places_a_copy_per_eligible_machine() {
        let mut cluster = ClusterState::from_machines(vec![
            Machine::new("m1", 4_000_000_000, 4_000_000_000),
            Machine::new("m2", 4_000_000_000, 4_000_000_000),
        ]);
        let specs = vec![mounting("g", ServiceMode::Global, &[], Resources::default(), "v1")];

        let plan = VolumeScheduler::new(&mut cluster).plan(&specs).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.get("m1").unwrap().len(), 1);
        assert_eq!(plan.get("m2").unwrap().len(), 1);
    }

    #[test]
    fn conflicting_volume_declarations_are_rejected() {
        let mut cluster = ClusterState::from_machines(vec![Machine::new("m1", 4_000_000_000, 4_000_000_000)]);

        let mut s1 = mounting("s1", ServiceMode::Replicated, &[], Resources::default(), "v1");
        let mut s2 = mounting("s2", ServiceMode::Replicated, &[], Resources::default(), "v1");
        s1.volumes[0].kind = models::VolumeKind::Volume(models::VolumeOptions {
            driver: Some(models::Driver { name: "local".into(), options: Default::default() }),
            ..Default::default()
        });
        s2.volumes[0].kind = models::VolumeKind::Volume(models::VolumeOptions {
            driver: Some(models::Driver { name: "nfs".into(), options: Default::default() }),
            ..Default::default()
        });

        let err = VolumeScheduler::new(&mut cluster).plan(&[s1, s2]).unwrap_err();
        match err {
            PlanningError::ConflictingVolumeDeclaration(v) => assert_eq!(v, "v1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
