use thiserror::Error;
use vulnwatch_model::ModelError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing annotation: {0}")]
    MissingAnnotation(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Missing selector: {0}")]
    MissingSelector(String),

    #[error("expected 1 pod controlled by {job}, but got {found}")]
    PodResolution { job: String, found: usize },

    #[error("Unknown workload kind: {0}")]
    UnknownWorkloadKind(String),

    #[error("Log stream unavailable: {0}")]
    Logs(String),

    #[error("Scan report parse error: {0}")]
    Parse(String),

    #[error("failed to write reports for containers {containers:?}: {source}")]
    PartialWrite {
        containers: Vec<String>,
        #[source]
        source: Box<ScanError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Transport failures are worth redelivering; structurally broken
    /// objects never heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::Kube(_) | ScanError::Io(_) | ScanError::Logs(_) => true,
            ScanError::PartialWrite { source, .. } => source.is_retryable(),
            ScanError::Serialization(_)
            | ScanError::MissingAnnotation(_)
            | ScanError::MalformedData(_)
            | ScanError::MissingSelector(_)
            | ScanError::PodResolution { .. }
            | ScanError::UnknownWorkloadKind(_)
            | ScanError::Parse(_)
            | ScanError::Internal(_) => false,
        }
    }
}

impl From<ModelError> for ScanError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::MissingLabel(key) => {
                ScanError::MalformedData(format!("missing label {key}"))
            }
            ModelError::MalformedImages(err) => {
                ScanError::MalformedData(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
