use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Credit already exists: {0}")]
    CreditAlreadyExists(String),

    #[error("Invalid business key: {0}")]
    InvalidBusinessKey(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] anyhow::Error),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
