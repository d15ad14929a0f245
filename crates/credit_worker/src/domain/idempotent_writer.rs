use common::domain::{
    CandidateCredit, Clock, CreditTransaction, DomainError, DomainResult, PersistedCredit,
    ValidatedCredit, ValidationFailure,
};
use std::sync::Arc;
use tracing::warn;

/// What happened to one candidate credit inside its transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Inserted(PersistedCredit),
    SkippedDuplicate,
    Rejected(ValidationFailure),
}

/// Writes a candidate credit at most once per business key.
///
/// The existence check runs before validation, so a redelivered record that already landed
/// is skipped even if it would no longer pass the constitution date check.
pub struct IdempotentWriter {
    clock: Arc<dyn Clock>,
}

impl IdempotentWriter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Only storage failures are errors. The caller owns the transaction and decides
    /// whether to commit it.
    pub async fn write(
        &self,
        candidate: &CandidateCredit,
        tx: &mut dyn CreditTransaction,
    ) -> DomainResult<WriteOutcome> {
        let business_key = candidate.business_key.trim();

        if !business_key.is_empty() && !tx.find_by_business_key(business_key).await?.is_empty() {
            warn!(business_key = %business_key, "Credit already stored, skipping");
            return Ok(WriteOutcome::SkippedDuplicate);
        }

        let validated = match ValidatedCredit::validate(candidate, self.clock.today()) {
            Ok(validated) => validated,
            Err(failure) => {
                warn!(
                    business_key = %business_key,
                    reason = %failure,
                    "Credit rejected by validation"
                );
                return Ok(WriteOutcome::Rejected(failure));
            }
        };

        match tx.insert(&validated).await {
            Ok(persisted) => Ok(WriteOutcome::Inserted(persisted)),
            // A concurrent writer got there first.
            Err(DomainError::CreditAlreadyExists(_)) => {
                warn!(business_key = %business_key, "Lost insert race, skipping");
                Ok(WriteOutcome::SkippedDuplicate)
            }
            Err(e) => Err(e),
        }
    }
}
