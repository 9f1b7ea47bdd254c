#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("service '{service}' mounts undeclared volume '{volume}'")]
    UndeclaredVolumeMount { service: String, volume: String },
    #[error("duplicate service name: '{0}'")]
    DuplicateServiceName(String),
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
}
