pub mod verify_internal;
pub mod verify_pos;

use thiserror::Error;

use crate::util::env::EnvErr;

pub type MiddlewareResult<T> = core::result::Result<T, MiddlewareErr>;

#[derive(Debug, Error)]
pub enum MiddlewareErr {
    #[error(transparent)]
    EnvErr(#[from] EnvErr),
}
