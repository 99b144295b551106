//! Error types for the auth crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("auth: repository error: {0}")]
    Repository(String),

    #[error("auth: password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

pub type Result<T> = std::result::Result<T, Error>;
