use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::volume::VolumeSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceMode {
    Replicated,
    Global,
}

/// Allow-list of machines (by name or id) a service's containers may land
/// on. An empty list means no placement restriction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub machines: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu_nanocores: u64,
    pub memory_bytes: u64,
}

impl Resources {
    pub fn is_zero(&self) -> bool {
        self.cpu_nanocores == 0 && self.memory_bytes == 0
    }

    pub fn saturating_add(self, other: Resources) -> Resources {
        Resources {
            cpu_nanocores: self.cpu_nanocores.saturating_add(other.cpu_nanocores),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }

    pub fn scaled(self, factor: u32) -> Resources {
        Resources {
            cpu_nanocores: self.cpu_nanocores.saturating_mul(factor as u64),
            memory_bytes: self.memory_bytes.saturating_mul(factor as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMountSpec {
    pub volume_name: String,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub volume_mounts: Vec<VolumeMountSpec>,
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub mode: ServiceMode,
    /// Ignored for `ServiceMode::Global`.
    pub replicas: Option<u32>,
    pub placement: Placement,
    pub container: ContainerSpec,
    pub volumes: Vec<VolumeSpec>,
}

impl ServiceSpec {
    /// Number of replica containers that will actually land somewhere:
    /// 1 for global services (one replica per eligible machine, handled
    /// specially by the volume scheduler), `replicas` (defaulting to 1)
    /// for replicated services.
    pub fn effective_replica_count(&self) -> u32 {
        match self.mode {
            ServiceMode::Global => 1,
            ServiceMode::Replicated => self.replicas.unwrap_or(1).max(1),
        }
    }

    pub fn declared_volume(&self, logical_name: &str) -> Option<&VolumeSpec> {
        self.volumes.iter().find(|v| v.name == logical_name)
    }

    /// Named-volume mounts only (bind/tmpfs mounts are not subject to
    /// volume-existence constraints and are skipped here).
    pub fn named_volume_mounts(&self) -> impl Iterator<Item = &VolumeMountSpec> {
        self.container.volume_mounts.iter().filter(move |m| {
            self.declared_volume(&m.volume_name)
                .map(VolumeSpec::is_named_volume)
                .unwrap_or(false)
        })
    }

    /// A clone of this spec with all volume mounts stripped, used by the
    /// volume scheduler to compute a service's baseline eligibility
    /// ignoring its own volume requirements.
    pub fn without_volume_mounts(&self) -> ServiceSpec {
        let mut clone = self.clone();
        clone.container.volume_mounts.clear();
        clone
    }

    /// Every volume mount must refer to a declared volume.
    pub fn validate(&self) -> Result<(), ModelError> {
        for mount in &self.container.volume_mounts {
            if self.declared_volume(&mount.volume_name).is_none() {
                return Err(ModelError::UndeclaredVolumeMount {
                    service: self.name.clone(),
                    volume: mount.volume_name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Validates a batch of specs for a single deployment: each spec is
/// individually valid and service names are unique.
pub fn validate_specs(specs: &[ServiceSpec]) -> Result<(), ModelError> {
    let mut seen = std::collections::HashSet::new();
    for spec in specs {
        spec.validate()?;
        if !seen.insert(spec.name.as_str()) {
            return Err(ModelError::DuplicateServiceName(spec.name.clone()));
        }
    }
    Ok(())
}
