use crate::domain::{CreditBatch, IdempotentWriter, WriteOutcome};
use common::domain::{CandidateCredit, CreditRepository, CreditTransaction, DomainError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// A record that did not make it into storage, with the reason why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub business_key: String,
    pub reason: String,
}

/// Per-record results for one batch.
///
/// `rejected` holds validation failures only. `failed` holds records whose own transaction
/// hit a storage error that did not take the store down with it (a bad value, a constraint
/// other than the business key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub skipped: usize,
    pub rejected: Vec<RecordFailure>,
    pub failed: Vec<RecordFailure>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.skipped + self.rejected.len() + self.failed.len()
    }
}

/// The batch as a whole could not be processed and must not be committed.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] DomainError),

    #[error("batch cancelled after {processed} of {total} records")]
    Cancelled { processed: usize, total: usize },
}

/// Processes a batch record by record, each in its own transaction, so one bad record
/// never takes the rest of the batch down with it.
pub struct BatchProcessor {
    repository: Arc<dyn CreditRepository>,
    writer: IdempotentWriter,
}

impl BatchProcessor {
    pub fn new(repository: Arc<dyn CreditRepository>, writer: IdempotentWriter) -> Self {
        Self { repository, writer }
    }

    #[instrument(skip_all, fields(records = batch.len()))]
    pub async fn process(
        &self,
        batch: &CreditBatch,
        ctx: &CancellationToken,
    ) -> Result<BatchOutcome, BatchError> {
        let total = batch.len();
        let mut outcome = BatchOutcome::default();

        for (processed, candidate) in batch.credits.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(BatchError::Cancelled { processed, total });
            }

            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    warn!(processed, total, "Batch cancelled mid-record, open transaction rolled back");
                    return Err(BatchError::Cancelled { processed, total });
                }
                result = self.process_record(candidate, &mut outcome) => result?,
            }
        }

        info!(
            inserted = outcome.inserted,
            skipped = outcome.skipped,
            rejected = outcome.rejected.len(),
            failed = outcome.failed.len(),
            "Batch processed"
        );

        Ok(outcome)
    }

    /// Dropping this future drops the open transaction, which rolls it back.
    async fn process_record(
        &self,
        candidate: &CandidateCredit,
        outcome: &mut BatchOutcome,
    ) -> Result<(), BatchError> {
        let business_key = candidate.business_key.trim().to_string();

        let mut tx = self.repository.begin().await.map_err(|e| {
            error!(business_key = %business_key, error = %e, "Failed to open transaction");
            BatchError::StorageUnavailable(e)
        })?;

        let written = match self.writer.write(candidate, tx.as_mut()).await {
            Ok(written) => written,
            Err(e @ DomainError::StorageUnavailable(_)) => {
                error!(business_key = %business_key, error = %e, "Storage lost mid-record");
                release(tx).await;
                return Err(BatchError::StorageUnavailable(e));
            }
            Err(e) => {
                error!(business_key = %business_key, error = %e, "Failed to write credit");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                outcome.failed.push(RecordFailure {
                    business_key,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        match written {
            WriteOutcome::Inserted(persisted) => match tx.commit().await {
                Ok(()) => {
                    info!(business_key = %business_key, id = persisted.id, "Credit stored");
                    outcome.inserted += 1;
                }
                Err(DomainError::CreditAlreadyExists(_)) => {
                    warn!(business_key = %business_key, "Lost commit race, skipping");
                    outcome.skipped += 1;
                }
                // The commit may or may not have landed; redelivery settles it.
                Err(e @ DomainError::StorageUnavailable(_)) => {
                    error!(business_key = %business_key, error = %e, "Storage lost on commit");
                    return Err(BatchError::StorageUnavailable(e));
                }
                Err(e) => {
                    error!(business_key = %business_key, error = %e, "Failed to commit credit");
                    outcome.failed.push(RecordFailure {
                        business_key,
                        reason: e.to_string(),
                    });
                }
            },
            WriteOutcome::SkippedDuplicate => {
                release(tx).await;
                outcome.skipped += 1;
            }
            WriteOutcome::Rejected(failure) => {
                release(tx).await;
                outcome.rejected.push(RecordFailure {
                    business_key,
                    reason: failure.to_string(),
                });
            }
        }

        Ok(())
    }
}

async fn release(tx: Box<dyn CreditTransaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use common::domain::{
        DomainResult, FixedClock, InMemoryCreditRepository, MockCreditRepository,
        PersistedCredit, ValidatedCredit,
    };
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
    }

    fn candidate(business_key: &str, tax_amount: &str) -> CandidateCredit {
        CandidateCredit {
            business_key: business_key.to_string(),
            document_reference: format!("NF-{business_key}"),
            constitution_date: today(),
            tax_amount: Decimal::from_str(tax_amount).unwrap(),
            category: "ISSQN".to_string(),
            simplified_regime: true,
            rate: Decimal::from(5),
            billed_amount: Decimal::from(1000),
            deduction_amount: Decimal::ZERO,
            tax_base: Decimal::from(1000),
        }
    }

    fn processor(repository: Arc<dyn CreditRepository>) -> BatchProcessor {
        BatchProcessor::new(
            repository,
            IdempotentWriter::new(Arc::new(FixedClock(today()))),
        )
    }

    #[tokio::test]
    async fn test_mixed_batch_inserts_valid_and_reports_rejected() {
        let repository = Arc::new(InMemoryCreditRepository::new());
        let batch = CreditBatch {
            credits: vec![
                candidate("C-1", "100.00"),
                candidate("C-2", "0"),
                candidate("C-3", "5.00"),
            ],
        };

        let outcome = processor(repository.clone())
            .process(&batch, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(
            outcome.rejected,
            vec![RecordFailure {
                business_key: "C-2".to_string(),
                reason: "tax amount must be > 0".to_string(),
            }]
        );
        assert!(outcome.failed.is_empty());

        let keys: Vec<String> = repository
            .all()
            .await
            .into_iter()
            .map(|c| c.business_key)
            .collect();
        assert_eq!(keys, vec!["C-1", "C-3"]);
    }

    #[tokio::test]
    async fn test_replayed_batch_is_all_skips() {
        let repository = Arc::new(InMemoryCreditRepository::new());
        let processor = processor(repository.clone());
        let batch = CreditBatch {
            credits: vec![candidate("C-1", "100.00"), candidate("C-3", "5.00")],
        };

        processor
            .process(&batch, &CancellationToken::new())
            .await
            .unwrap();
        let replay = processor
            .process(&batch, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(replay.inserted, 0);
        assert_eq!(replay.skipped, 2);
        assert_eq!(repository.count().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_key_within_batch_inserts_once() {
        let repository = Arc::new(InMemoryCreditRepository::new());
        let batch = CreditBatch {
            credits: vec![candidate("C-1", "100.00"), candidate("C-1", "200.00")],
        };

        let outcome = processor(repository.clone())
            .process(&batch, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(
            repository.all().await[0].tax_amount,
            Decimal::from_str("100.00").unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let mut repository = MockCreditRepository::new();
        repository.expect_begin().never();

        let outcome = processor(Arc::new(repository))
            .process(&CreditBatch::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, BatchOutcome::default());
    }

    #[tokio::test]
    async fn test_unavailable_storage_aborts_batch() {
        let mut repository = MockCreditRepository::new();
        repository.expect_begin().times(1).returning(|| {
            Err(DomainError::StorageUnavailable(anyhow::anyhow!(
                "connection refused"
            )))
        });

        let batch = CreditBatch {
            credits: vec![candidate("C-1", "100.00"), candidate("C-3", "5.00")],
        };
        let result = processor(Arc::new(repository))
            .process(&batch, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(BatchError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_next_record() {
        let repository = Arc::new(InMemoryCreditRepository::new());
        let ctx = CancellationToken::new();
        ctx.cancel();

        let batch = CreditBatch {
            credits: vec![candidate("C-1", "100.00")],
        };
        let result = processor(repository.clone()).process(&batch, &ctx).await;

        assert!(matches!(
            result,
            Err(BatchError::Cancelled {
                processed: 0,
                total: 1
            })
        ));
        assert_eq!(repository.count().await, 0);
    }

    /// Delegates to an in-memory store but fails every insert of one business key.
    struct FlakyRepository {
        inner: InMemoryCreditRepository,
        failing_key: &'static str,
        fault: fn() -> DomainError,
        rollbacks: Arc<AtomicUsize>,
    }

    struct FlakyTransaction {
        inner: Box<dyn CreditTransaction>,
        failing_key: &'static str,
        fault: fn() -> DomainError,
        rollbacks: Arc<AtomicUsize>,
    }

    fn numeric_overflow() -> DomainError {
        DomainError::RepositoryError(anyhow::anyhow!("numeric field overflow"))
    }

    fn connection_closed() -> DomainError {
        DomainError::StorageUnavailable(anyhow::anyhow!("connection closed"))
    }

    fn flaky(
        inner: &InMemoryCreditRepository,
        failing_key: &'static str,
        fault: fn() -> DomainError,
    ) -> (Arc<FlakyRepository>, Arc<AtomicUsize>) {
        let rollbacks = Arc::new(AtomicUsize::new(0));
        let repository = Arc::new(FlakyRepository {
            inner: inner.clone(),
            failing_key,
            fault,
            rollbacks: rollbacks.clone(),
        });
        (repository, rollbacks)
    }

    #[async_trait]
    impl CreditRepository for FlakyRepository {
        async fn find_by_business_key(
            &self,
            business_key: &str,
        ) -> DomainResult<Vec<PersistedCredit>> {
            self.inner.find_by_business_key(business_key).await
        }

        async fn begin(&self) -> DomainResult<Box<dyn CreditTransaction>> {
            Ok(Box::new(FlakyTransaction {
                inner: self.inner.begin().await?,
                failing_key: self.failing_key,
                fault: self.fault,
                rollbacks: self.rollbacks.clone(),
            }))
        }
    }

    #[async_trait]
    impl CreditTransaction for FlakyTransaction {
        async fn find_by_business_key(
            &mut self,
            business_key: &str,
        ) -> DomainResult<Vec<PersistedCredit>> {
            self.inner.find_by_business_key(business_key).await
        }

        async fn insert(&mut self, credit: &ValidatedCredit) -> DomainResult<PersistedCredit> {
            if credit.business_key() == self.failing_key {
                return Err((self.fault)());
            }
            self.inner.insert(credit).await
        }

        async fn commit(self: Box<Self>) -> DomainResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> DomainResult<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_storage_error_on_one_record_does_not_affect_others() {
        let inner = InMemoryCreditRepository::new();
        let (repository, rollbacks) = flaky(&inner, "C-2", numeric_overflow);

        let batch = CreditBatch {
            credits: vec![
                candidate("C-1", "100.00"),
                candidate("C-2", "50.00"),
                candidate("C-3", "5.00"),
            ],
        };
        let outcome = processor(repository)
            .process(&batch, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert!(outcome.rejected.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].business_key, "C-2");
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(inner.count().await, 2);
        assert_eq!(outcome.total(), 3);
    }

    #[tokio::test]
    async fn test_storage_lost_mid_batch_aborts_instead_of_reporting_failure() {
        let inner = InMemoryCreditRepository::new();
        let (repository, rollbacks) = flaky(&inner, "C-3", connection_closed);

        let batch = CreditBatch {
            credits: vec![candidate("C-1", "100.00"), candidate("C-3", "5.00")],
        };
        let result = processor(repository)
            .process(&batch, &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(BatchError::StorageUnavailable(DomainError::StorageUnavailable(_)))
        ));
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
        let keys: Vec<String> = inner.all().await.into_iter().map(|c| c.business_key).collect();
        assert_eq!(keys, vec!["C-1"]);
    }
}
