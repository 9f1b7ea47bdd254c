use models::ModelError;

/// Crate-wide error taxonomy for the placement planner. Every variant
/// corresponds to one of the error conditions named in the scheduling
/// contract; the `Display` text reproduces the exact substrings that
/// callers (and tests) match against.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("no eligible machines for service '{service}':\n{report}")]
    NoEligibleMachines { service: String, report: String },

    #[error(
        "unable to find a machine that satisfies service '{service}' placement constraints \
         and has all required volumes: '{volume}'"
    )]
    NoMachineWithRequiredVolume { service: String, volume: String },

    #[error(
        "unable to find a machine that satisfies placement constraints for services {services} \
         that must be placed together to share volume '{volume}'"
    )]
    PlacementConflict { services: String, volume: String },

    #[error(
        "insufficient resources for services {services} sharing volume '{volume}': \
         need {cpu_cores_needed:.2} CPU cores and {memory_gb_needed:.2} GB memory combined"
    )]
    ResourceConflict {
        services: String,
        volume: String,
        cpu_cores_needed: f64,
        memory_gb_needed: f64,
    },

    #[error("volume '{0}' cannot be shared between global and replicated services")]
    VolumeModeMismatch(String),

    #[error("volume '{volume}' specification does not match the existing volume on machine '{machine}'")]
    ExistingVolumeMismatch { volume: String, machine: String },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("duplicate service name: '{0}'")]
    DuplicateServiceName(String),

    #[error(
        "volume '{0}' is declared with conflicting options across services; \
         rename one of them or align their specs"
    )]
    ConflictingVolumeDeclaration(String),

    #[error("bug detected: {0}")]
    Bug(String),
}

impl From<ModelError> for PlanningError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::UndeclaredVolumeMount { service, volume } => PlanningError::InvalidSpec(
                format!("service '{service}' mounts undeclared volume '{volume}'"),
            ),
            ModelError::DuplicateServiceName(name) => PlanningError::DuplicateServiceName(name),
            ModelError::InvalidSpec(reason) => PlanningError::InvalidSpec(reason),
        }
    }
}

/// Joins service names the way every multi-service error message in this
/// crate formats them: `'a', 'b'`, sorted ascending for determinism.
pub fn quoted_sorted_list<'a, I: IntoIterator<Item = &'a str>>(names: I) -> String {
    let mut names: Vec<&str> = names.into_iter().collect();
    names.sort_unstable();
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}
