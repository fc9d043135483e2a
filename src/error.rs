use thiserror::Error;

use crate::http::ParseError;
use crate::runtime::RuntimeError;

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over the module errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
