use thiserror::Error;

/// The error type for the few fallible operations of the crate.
///
/// Nothing on the per-tick path fails: vehicles that cannot be positioned are skipped.
#[derive(Debug, Error)]
pub enum Error {
    /// No feature with this ID is registered.
    #[error("unknown feature `{0}`")]
    UnknownFeature(String),
    /// A configuration document could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
