use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("control command failed: {0}")]
    Command(String),
    #[error("invalid volume configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for VolumeError {
    fn from(error: serde_json::Error) -> Self {
        VolumeError::Protocol(error.to_string())
    }
}
