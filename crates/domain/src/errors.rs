use thiserror::Error;

/// Error taxonomy for the streaming gateway (spec.md §7).
///
/// Session-scoped variants are recorded on the session record and
/// translated to an HTTP status at the `api-server` boundary; they
/// never unwind across that boundary as a Rust panic or `?`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("BadRequest: {0}")]
    BadRequest(String),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("StorageError: {0}")]
    StorageError(String),

    #[error("NoPlayableFile: no file with a supported media extension in source")]
    NoPlayableFile,

    #[error("ExternalToolMissing: {0}")]
    ExternalToolMissing(String),

    #[error("ExternalToolFailed: {0}")]
    ExternalToolFailed(String),

    #[error("TranscoderError: {0}")]
    TranscoderError(String),

    #[error("TorrentError: {0}")]
    TorrentError(String),

    #[error("OutOfRange: {0}")]
    OutOfRange(String),

    #[error("AccessDenied: {0}")]
    AccessDenied(String),

    #[error("InvalidTransition: {0}")]
    InvalidTransition(String),
}

impl DomainError {
    /// The `<kind>` half of the `<kind>: <message>` wire format (§7).
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::BadRequest(_) => "BadRequest",
            DomainError::NotFound(_) => "NotFound",
            DomainError::StorageError(_) => "StorageError",
            DomainError::NoPlayableFile => "NoPlayableFile",
            DomainError::ExternalToolMissing(_) => "ExternalToolMissing",
            DomainError::ExternalToolFailed(_) => "ExternalToolFailed",
            DomainError::TranscoderError(_) => "TranscoderError",
            DomainError::TorrentError(_) => "TorrentError",
            DomainError::OutOfRange(_) => "OutOfRange",
            DomainError::AccessDenied(_) => "AccessDenied",
            DomainError::InvalidTransition(_) => "InvalidTransition",
        }
    }
}
