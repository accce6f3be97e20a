use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("topic `{0}` has no device segment")]
    MissingDeviceId(String),
    #[error("payload is not valid utf-8")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("telemetry payload rejected: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("device id must not be empty")]
    EmptyDeviceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid document path `{0}`")]
    InvalidPath(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
