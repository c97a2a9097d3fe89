//! Error type for the one part of the core that genuinely fails rather than
//! degrades: parsing a malformed config file. Every other failure mode §7
//! describes (inference timeout, buffer lock timeout, save/load I/O) is
//! handled by construction — clamping, defaulting, or logging and carrying
//! on — and never reaches a `Result`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to parse config: {0}")]
    Config(#[from] serde_yaml::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
