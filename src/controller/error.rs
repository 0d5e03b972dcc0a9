//! Error types shared by the Verrazzano reconcilers

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`, `YamlError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Check if this error means the object is simply gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => resp.code == 404,
            Error::NotFound(_) => true,
            _ => false,
        }
    }

    /// Check if this error comes from configuration that cannot be read
    /// as-is and will fail the same way on every retry
    pub fn is_unusable_config(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::YamlError(_))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429 || code == 404;
                    }
                    true
                }
                _ => true,
            },
            Error::NotFound(_) => true,
            Error::InvalidConfig(_) => false,
            Error::SerializationError(_) => false,
            Error::YamlError(_) => false,
            Error::MissingObjectKey(_) => false,
        }
    }
}

/// True when a kube error is a 404
pub fn is_kube_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
