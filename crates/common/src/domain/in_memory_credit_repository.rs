use crate::domain::{
    CreditRepository, CreditTransaction, DomainError, DomainResult, PersistedCredit,
    ValidatedCredit,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of CreditRepository with the same uniqueness rule as the
/// relational store: one row per business key.
#[derive(Clone)]
pub struct InMemoryCreditRepository {
    rows: Arc<RwLock<Vec<PersistedCredit>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryCreditRepository {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Number of committed credits
    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Snapshot of all committed credits in insertion order
    pub async fn all(&self) -> Vec<PersistedCredit> {
        self.rows.read().await.clone()
    }
}

impl Default for InMemoryCreditRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn matching(rows: &[PersistedCredit], business_key: &str) -> Vec<PersistedCredit> {
    rows.iter()
        .filter(|row| row.business_key == business_key)
        .cloned()
        .collect()
}

#[async_trait]
impl CreditRepository for InMemoryCreditRepository {
    async fn find_by_business_key(&self, business_key: &str) -> DomainResult<Vec<PersistedCredit>> {
        let rows = self.rows.read().await;
        Ok(matching(&rows, business_key))
    }

    async fn begin(&self) -> DomainResult<Box<dyn CreditTransaction>> {
        Ok(Box::new(InMemoryCreditTransaction {
            rows: self.rows.clone(),
            next_id: self.next_id.clone(),
            staged: Vec::new(),
        }))
    }
}

/// Buffers inserts until commit; dropping it discards them.
pub struct InMemoryCreditTransaction {
    rows: Arc<RwLock<Vec<PersistedCredit>>>,
    next_id: Arc<AtomicI64>,
    staged: Vec<PersistedCredit>,
}

#[async_trait]
impl CreditTransaction for InMemoryCreditTransaction {
    async fn find_by_business_key(
        &mut self,
        business_key: &str,
    ) -> DomainResult<Vec<PersistedCredit>> {
        let rows = self.rows.read().await;
        let mut found = matching(&rows, business_key);
        found.extend(matching(&self.staged, business_key));
        Ok(found)
    }

    async fn insert(&mut self, credit: &ValidatedCredit) -> DomainResult<PersistedCredit> {
        let key = credit.business_key();
        let exists = !matching(&self.staged, key).is_empty()
            || !matching(&self.rows.read().await, key).is_empty();
        if exists {
            return Err(DomainError::CreditAlreadyExists(key.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let persisted = PersistedCredit::from_validated(id, credit, Utc::now());
        self.staged.push(persisted.clone());
        Ok(persisted)
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        let InMemoryCreditTransaction { rows, staged, .. } = *self;
        let mut rows = rows.write().await;

        // Another transaction may have committed the same key since our insert.
        if let Some(conflict) = staged
            .iter()
            .find(|staged| rows.iter().any(|row| row.business_key == staged.business_key))
        {
            return Err(DomainError::CreditAlreadyExists(conflict.business_key.clone()));
        }

        rows.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        Ok(())
    }
}
