use thiserror::Error;

/// Error taxonomy for the node's public API and internal collaborators.
///
/// Transport and timeout failures that occur *inside* a lookup are
/// recovered locally (the offending contact is marked failed) and never
/// reach this type unless the entire lookup exhausts its candidates; see
/// `lookup::Lookup::run`.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("transport failure reaching {0}")]
    TransportFailure(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("key not found")]
    NotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("value rejected by validator")]
    InvalidValue,

    #[error("internal error: {0}")]
    Internal(String),
}
