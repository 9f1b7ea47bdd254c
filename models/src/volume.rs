use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named volume reference as declared inside a service spec, in its
/// canonical (post `set_defaults`) form. Equality is value equality, never
/// reference equality — two specs describing the same volume the same way
/// compare equal regardless of where they were constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Logical name, as referenced by a service's volume mounts.
    pub name: String,
    /// Physical docker volume name. Defaults to `name` for `Volume` specs
    /// unless overridden by `VolumeOptions::name_override`. Bind and tmpfs
    /// mounts have no docker name of their own.
    pub docker_name: Option<String>,
    pub kind: VolumeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VolumeKind {
    Bind(BindOptions),
    Volume(VolumeOptions),
    Tmpfs(TmpfsOptions),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindOptions {
    pub host_path: String,
    pub propagation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VolumeOptions {
    /// Overrides the docker volume name when set.
    pub name_override: Option<String>,
    pub driver: Option<Driver>,
    pub labels: BTreeMap<String, String>,
    pub no_copy: bool,
    pub sub_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub name: String,
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TmpfsOptions {
    pub size_bytes: Option<u64>,
}

impl VolumeSpec {
    pub fn bind(name: impl Into<String>, host_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docker_name: None,
            kind: VolumeKind::Bind(BindOptions {
                host_path: host_path.into(),
                propagation: None,
            }),
        }
    }

    pub fn volume(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docker_name: None,
            kind: VolumeKind::Volume(VolumeOptions::default()),
        }
    }

    pub fn tmpfs(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docker_name: None,
            kind: VolumeKind::Tmpfs(TmpfsOptions::default()),
        }
    }

    /// Fills in derived fields so that two specs describing the same
    /// volume the same way compare equal. Idempotent.
    pub fn set_defaults(&mut self) {
        if self.docker_name.is_some() {
            return;
        }
        self.docker_name = match &self.kind {
            VolumeKind::Volume(opts) => Some(opts.name_override.clone().unwrap_or_else(|| self.name.clone())),
            VolumeKind::Bind(_) | VolumeKind::Tmpfs(_) => None,
        };
    }

    pub fn with_defaults(mut self) -> Self {
        self.set_defaults();
        self
    }

    /// True for `volume`-typed specs; bind and tmpfs mounts are not named
    /// volumes and are never subject to volume-existence constraints.
    pub fn is_named_volume(&self) -> bool {
        matches!(self.kind, VolumeKind::Volume(_))
    }

    pub fn docker_name_or_name(&self) -> &str {
        self.docker_name.as_deref().unwrap_or(&self.name)
    }

    pub fn driver(&self) -> Option<&Driver> {
        match &self.kind {
            VolumeKind::Volume(opts) => opts.driver.as_ref(),
            _ => None,
        }
    }

    /// True if `other` describes the same physical volume (docker name,
    /// driver, options) regardless of the logical `name` each service
    /// refers to it by. Used to detect two services declaring the same
    /// docker volume with incompatible options.
    pub fn physically_equivalent(&self, other: &VolumeSpec) -> bool {
        self.docker_name == other.docker_name && self.kind == other.kind
    }

    /// Whether this spec matches an existing volume's driver/docker-name.
    /// A spec with no declared driver matches any driver by name only, as
    /// per the canonical matching rule.
    pub fn matches_driver(&self, existing_driver: Option<&Driver>) -> bool {
        match (self.driver(), existing_driver) {
            (Some(want), Some(have)) => want.name == have.name && want.options == have.options,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}
