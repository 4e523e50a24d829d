/// Protocol-level errors for Skein.
///
/// Transport failures are recoverable by design — the topology controller
/// retries with backoff — so nothing here is fatal to a running mesh.
#[derive(Debug, thiserror::Error)]
pub enum SkeinError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("mesh service shut down")]
    ServiceStopped,
}

impl From<rmp_serde::encode::Error> for SkeinError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SkeinError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SkeinError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SkeinError::Deserialization(e.to_string())
    }
}
