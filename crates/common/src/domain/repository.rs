use crate::domain::{DomainResult, PersistedCredit, ValidatedCredit};
use async_trait::async_trait;

/// Storage handle for constituted credits.
///
/// Writes only happen through a [`CreditTransaction`] obtained from [`CreditRepository::begin`].
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CreditRepository: Send + Sync {
    /// All persisted credits with the given business key (zero or one in practice)
    async fn find_by_business_key(&self, business_key: &str) -> DomainResult<Vec<PersistedCredit>>;

    /// Open a new unit of work.
    ///
    /// Fails with [`crate::domain::DomainError::StorageUnavailable`] when no connection can be
    /// obtained.
    async fn begin(&self) -> DomainResult<Box<dyn CreditTransaction>>;
}

/// One open transaction against the credit store.
///
/// Dropping a transaction without calling [`commit`](CreditTransaction::commit) must discard
/// everything written through it.
#[async_trait]
pub trait CreditTransaction: Send {
    async fn find_by_business_key(
        &mut self,
        business_key: &str,
    ) -> DomainResult<Vec<PersistedCredit>>;

    /// Insert a credit. A business key collision yields
    /// [`crate::domain::DomainError::CreditAlreadyExists`].
    async fn insert(&mut self, credit: &ValidatedCredit) -> DomainResult<PersistedCredit>;

    async fn commit(self: Box<Self>) -> DomainResult<()>;

    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}
