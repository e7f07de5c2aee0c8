use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("required label not found: {0}")]
    MissingLabel(&'static str),

    #[error("malformed container images: {0}")]
    MalformedImages(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
