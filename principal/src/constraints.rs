use models::{Machine, ServiceSpec};

/// Outcome of evaluating one constraint against one machine.
#[derive(Debug, Clone)]
pub struct ConstraintResult {
    pub satisfied: bool,
    pub reason: String,
    pub constraint_type: ConstraintType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    Placement,
    Volumes,
    Resources,
}

impl ConstraintResult {
    fn pass(constraint_type: ConstraintType) -> Self {
        Self {
            satisfied: true,
            reason: String::new(),
            constraint_type,
        }
    }

    fn fail(constraint_type: ConstraintType, reason: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            reason: reason.into(),
            constraint_type,
        }
    }
}

/// A pluggable predicate evaluated against a single machine. Constraints
/// never mutate the machine or cluster state they inspect.
pub trait Constraint {
    fn evaluate(&self, machine: &Machine) -> ConstraintResult;
    fn description(&self) -> String;
}

/// Satisfied iff the machine's id or name is in the spec's placement
/// allow-list.
pub struct PlacementConstraint {
    allowed: Vec<String>,
}

impl PlacementConstraint {
    pub fn new(allowed: Vec<String>) -> Self {
        let mut allowed = allowed;
        allowed.sort_unstable();
        Self { allowed }
    }

    /// Builds the constraint for a spec if it declares a non-empty
    /// placement allow-list.
    pub fn from_spec(spec: &ServiceSpec) -> Option<Self> {
        if spec.placement.machines.is_empty() {
            None
        } else {
            Some(Self::new(spec.placement.machines.clone()))
        }
    }
}

impl Constraint for PlacementConstraint {
    fn evaluate(&self, machine: &Machine) -> ConstraintResult {
        let display_name = machine.name.as_deref().unwrap_or(&machine.id);
        let allowed = self
            .allowed
            .iter()
            .any(|candidate| machine.matches(candidate));

        if allowed {
            ConstraintResult::pass(ConstraintType::Placement)
        } else {
            ConstraintResult::fail(
                ConstraintType::Placement,
                format!(
                    "machine '{}' not in allowed list: [{}]",
                    display_name,
                    self.allowed.join(", ")
                ),
            )
        }
    }

    fn description(&self) -> String {
        format!("placement restricted to: [{}]", self.allowed.join(", "))
    }
}

/// Satisfied iff every `volume`-typed required volume either already
/// exists on the machine and matches the spec, or has been added to the
/// machine's scheduled volumes this session and matches. Bind and tmpfs
/// mounts are not named volumes and are skipped.
pub struct VolumesConstraint {
    required: Vec<models::VolumeSpec>,
}

impl VolumesConstraint {
    pub fn new(required: Vec<models::VolumeSpec>) -> Self {
        Self { required }
    }

    pub fn from_spec(spec: &ServiceSpec) -> Option<Self> {
        let mut required = Vec::new();
        for mount in spec.named_volume_mounts() {
            if let Some(vspec) = spec.declared_volume(&mount.volume_name) {
                let mut vspec = vspec.clone();
                vspec.set_defaults();
                required.push(vspec);
            }
        }
        if required.is_empty() {
            None
        } else {
            Some(Self::new(required))
        }
    }

    fn satisfied_on(&self, machine: &Machine, required: &models::VolumeSpec) -> bool {
        let docker_name = required.docker_name_or_name();

        if let Some(existing) = machine.find_existing_volume(docker_name) {
            return required.matches_driver(existing.driver.as_ref());
        }

        if let Some(scheduled) = machine.find_scheduled_volume(docker_name) {
            return required.matches_driver(scheduled.driver());
        }

        false
    }
}

impl Constraint for VolumesConstraint {
    fn evaluate(&self, machine: &Machine) -> ConstraintResult {
        let mut missing: Vec<&str> = self
            .required
            .iter()
            .filter(|v| !self.satisfied_on(machine, v))
            .map(|v| v.docker_name_or_name())
            .collect();

        if missing.is_empty() {
            ConstraintResult::pass(ConstraintType::Volumes)
        } else {
            missing.sort_unstable();
            ConstraintResult::fail(
                ConstraintType::Volumes,
                format!("missing required volumes: {}", missing.join(", ")),
            )
        }
    }

    fn description(&self) -> String {
        let names: Vec<&str> = self.required.iter().map(|v| v.docker_name_or_name()).collect();
        format!("requires volumes: [{}]", names.join(", "))
    }
}

/// Opt-in: passes immediately if both required CPU and memory are zero.
/// Otherwise requires `AvailableCPU >= RequiredCPU` and
/// `AvailableMemory >= RequiredMemory`.
pub struct ResourceConstraint {
    cpu_nanocores: u64,
    memory_bytes: u64,
}

impl ResourceConstraint {
    pub fn new(cpu_nanocores: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_nanocores,
            memory_bytes,
        }
    }

    pub fn from_spec(spec: &ServiceSpec) -> Option<Self> {
        let resources = spec.container.resources;
        if resources.is_zero() {
            None
        } else {
            Some(Self::new(resources.cpu_nanocores, resources.memory_bytes))
        }
    }
}

impl Constraint for ResourceConstraint {
    fn evaluate(&self, machine: &Machine) -> ConstraintResult {
        if self.cpu_nanocores == 0 && self.memory_bytes == 0 {
            return ConstraintResult::pass(ConstraintType::Resources);
        }

        let available_cpu = machine.available_cpu_nanocores();
        let available_memory = machine.available_memory_bytes();

        if available_cpu >= self.cpu_nanocores && available_memory >= self.memory_bytes {
            ConstraintResult::pass(ConstraintType::Resources)
        } else {
            ConstraintResult::fail(
                ConstraintType::Resources,
                format!(
                    "insufficient resources: total {} cpu / {}, reserved {} cpu / {}, \
                     needs {} cpu / {}, available {} cpu / {}",
                    format_cpu(machine.total_cpu_nanocores),
                    format_bytes(machine.total_memory_bytes),
                    format_cpu(machine.reserved_cpu_nanocores + machine.scheduled_cpu_nanocores),
                    format_bytes(machine.reserved_memory_bytes + machine.scheduled_memory_bytes),
                    format_cpu(self.cpu_nanocores),
                    format_bytes(self.memory_bytes),
                    format_cpu(available_cpu),
                    format_bytes(available_memory),
                ),
            )
        }
    }

    fn description(&self) -> String {
        format!(
            "requires {} cpu / {}",
            format_cpu(self.cpu_nanocores),
            format_bytes(self.memory_bytes)
        )
    }
}

/// Formats nanocores as fractional CPU cores (10^9 nanocores = 1 core).
pub fn format_cpu(nanocores: u64) -> String {
    format!("{:.2} cores", nanocores as f64 / 1_000_000_000.0)
}

/// Formats a byte count as the largest whole unit that keeps the number
/// readable (KB/MB/GB), matching the reporting convention used elsewhere
/// in this crate's error messages.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes = bytes as f64;
    if bytes >= GB {
        format!("{:.2} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes / KB)
    } else {
        format!("{bytes:.0} B")
    }
}

/// Builds the full constraint set derived from a service spec, in the
/// fixed order placement, volumes, resources — matching spec.md's
/// derivation rules.
pub fn derive_constraints(spec: &ServiceSpec) -> Vec<Box<dyn Constraint>> {
    let mut constraints: Vec<Box<dyn Constraint>> = Vec::new();
    if let Some(c) = PlacementConstraint::from_spec(spec) {
        constraints.push(Box::new(c));
    }
    if let Some(c) = VolumesConstraint::from_spec(spec) {
        constraints.push(Box::new(c));
    }
    if let Some(c) = ResourceConstraint::from_spec(spec) {
        constraints.push(Box::new(c));
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{ContainerSpec, Placement, Resources, ServiceMode, ServiceSpec, VolumeMountSpec, VolumeSpec};

    fn base_spec() -> ServiceSpec {
        ServiceSpec {
            name: "s1".into(),
            mode: ServiceMode::Replicated,
            replicas: Some(1),
            placement: Placement::default(),
            container: ContainerSpec {
                image: "nginx".into(),
                volume_mounts: vec![],
                resources: Resources::default(),
            },
            volumes: vec![],
        }
    }

    #[test]
    fn placement_constraint_sorts_allow_list_for_stable_output() {
        let mut spec = base_spec();
        spec.placement.machines = vec!["zeta".into(), "alpha".into()];
        let c = PlacementConstraint::from_spec(&spec).unwrap();
        assert_eq!(c.description(), "placement restricted to: [alpha, zeta]");
    }

    #[test]
    fn placement_constraint_fails_with_reason() {
        let mut spec = base_spec();
        spec.placement.machines = vec!["m2".into()];
        let c = PlacementConstraint::from_spec(&spec).unwrap();
        let m = Machine::new("m1", 1, 1);
        let result = c.evaluate(&m);
        assert!(!result.satisfied);
        assert_eq!(result.reason, "machine 'm1' not in allowed list: [m2]");
    }

    #[test]
    fn resource_constraint_is_opt_in_when_zero() {
        let spec = base_spec();
        assert!(ResourceConstraint::from_spec(&spec).is_none());
    }

    #[test]
    fn volumes_constraint_reports_missing_sorted() {
        let mut spec = base_spec();
        spec.volumes = vec![VolumeSpec::volume("b"), VolumeSpec::volume("a")];
        spec.container.volume_mounts = vec![
            VolumeMountSpec { volume_name: "b".into(), container_path: "/b".into(), read_only: false },
            VolumeMountSpec { volume_name: "a".into(), container_path: "/a".into(), read_only: false },
        ];
        let c = VolumesConstraint::from_spec(&spec).unwrap();
        let m = Machine::new("m1", 1, 1);
        let result = c.evaluate(&m);
        assert!(!result.satisfied);
        assert_eq!(result.reason, "missing required volumes: a, b");
    }
}
