//! Error taxonomy for the `Gateway`/`Service`/`Client` roles.
//!
//! Resolution misses (404) and the "not started" gate (503) are not modeled
//! here at all: both are ordinary `StatusCode`s returned from
//! [`crate::gateway::Gateway::serve_http`], not faults. Only the kinds a
//! caller cannot route around end up in this enum.

use thiserror::Error;
use zephyr_kernel::error::{ConfigError, PatternError, TransportError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}
