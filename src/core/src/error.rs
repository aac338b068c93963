use thiserror::Error;

/// Image modification error types
#[derive(Error, Debug)]
pub enum ModError {
    /// Building the image DAG failed; nothing has been mutated or pushed
    #[error("Failed to acquire {reference}: {source}")]
    AcquisitionError {
        reference: String,
        #[source]
        source: Box<ModError>,
    },

    /// Manifest, blob, or tag does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container registry transport error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// An option rejected its input
    #[error("Option error: {0}")]
    OptionError(String),

    /// A caller-supplied modification step failed
    #[error("{phase} step failed: {source}")]
    StepError {
        phase: &'static str,
        #[source]
        source: Box<ModError>,
    },

    /// Locally computed digest or size disagrees with the registry or the content
    #[error("Consistency error: {0}")]
    ConsistencyError(String),

    /// Temporary storage or stream finalisation failed
    #[error("Resource error: {0}")]
    ResourceError(String),

    /// Cancellation requested before the next node or phase started
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// OCI image error
    #[error("OCI image error: {0}")]
    OciImageError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ModError {
    /// Wrap an error raised while fetching part of the image graph.
    pub fn acquisition(reference: impl Into<String>, source: ModError) -> Self {
        ModError::AcquisitionError {
            reference: reference.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error returned by a registered step.
    pub fn step(phase: &'static str, source: ModError) -> Self {
        ModError::StepError {
            phase,
            source: Box::new(source),
        }
    }

    /// True for the not-found transport kind, looking through acquisition wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            ModError::NotFound(_) => true,
            ModError::AcquisitionError { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ModError {
    fn from(err: serde_json::Error) -> Self {
        ModError::SerializationError(err.to_string())
    }
}

/// Result type alias for image modification operations
pub type Result<T> = std::result::Result<T, ModError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_error_display() {
        let error = ModError::acquisition(
            "docker.io/library/nginx:latest",
            ModError::NotFound("manifest latest".to_string()),
        );
        assert_eq!(
            error.to_string(),
            "Failed to acquire docker.io/library/nginx:latest: Not found: manifest latest"
        );
    }

    #[test]
    fn test_acquisition_error_source() {
        use std::error::Error as _;

        let error = ModError::acquisition(
            "ghcr.io/a3s-box/code:v1",
            ModError::RegistryError {
                registry: "ghcr.io".to_string(),
                message: "401 Unauthorized".to_string(),
            },
        );
        let source = error.source().unwrap();
        assert_eq!(source.to_string(), "Registry error: ghcr.io - 401 Unauthorized");
    }

    #[test]
    fn test_is_not_found() {
        assert!(ModError::NotFound("blob".to_string()).is_not_found());
        assert!(ModError::acquisition("x", ModError::NotFound("blob".to_string())).is_not_found());
        assert!(!ModError::Other("x".to_string()).is_not_found());
    }

    #[test]
    fn test_step_error_display() {
        let error = ModError::step("layer-entry", ModError::Other("bad header".to_string()));
        assert_eq!(error.to_string(), "layer-entry step failed: bad header");
    }

    #[test]
    fn test_option_error_display() {
        let error = ModError::OptionError("data size must be -1 or greater".to_string());
        assert_eq!(
            error.to_string(),
            "Option error: data size must be -1 or greater"
        );
    }

    #[test]
    fn test_consistency_error_display() {
        let error = ModError::ConsistencyError("layer digest mismatch".to_string());
        assert_eq!(error.to_string(), "Consistency error: layer digest mismatch");
    }

    #[test]
    fn test_resource_error_display() {
        let error = ModError::ResourceError("failed to close gzip writer".to_string());
        assert_eq!(
            error.to_string(),
            "Resource error: failed to close gzip writer"
        );
    }

    #[test]
    fn test_cancelled_display() {
        let error = ModError::Cancelled("before layer phase".to_string());
        assert_eq!(error.to_string(), "Cancelled: before layer phase");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mod_error: ModError = io_error.into();
        assert!(matches!(mod_error, ModError::IoError(_)));
        assert!(mod_error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ invalid json }");
        let mod_error: ModError = result.unwrap_err().into();
        assert!(matches!(mod_error, ModError::SerializationError(_)));
    }

    #[test]
    fn test_registry_error_display() {
        let error = ModError::RegistryError {
            registry: "ghcr.io".to_string(),
            message: "Authentication failed".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Registry error: ghcr.io - Authentication failed"
        );
    }
}
