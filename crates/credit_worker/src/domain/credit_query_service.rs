use common::domain::{CreditRepository, DomainError, DomainResult, PersistedCredit};
use std::sync::Arc;
use tracing::debug;

/// Point lookups over stored credits.
pub struct CreditQueryService {
    repository: Arc<dyn CreditRepository>,
}

impl CreditQueryService {
    pub fn new(repository: Arc<dyn CreditRepository>) -> Self {
        Self { repository }
    }

    /// First stored credit for the trimmed business key, if any.
    pub async fn get_by_business_key(
        &self,
        business_key: &str,
    ) -> DomainResult<Option<PersistedCredit>> {
        let business_key = business_key.trim();
        if business_key.is_empty() {
            return Err(DomainError::InvalidBusinessKey(
                "business key must not be empty".to_string(),
            ));
        }

        let found = self
            .repository
            .find_by_business_key(business_key)
            .await?
            .into_iter()
            .next();

        debug!(business_key = %business_key, found = found.is_some(), "Looked up credit");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::MockCreditRepository;
    use mockall::predicate::eq;
    use rust_decimal::Decimal;

    fn persisted(id: i64, business_key: &str) -> PersistedCredit {
        PersistedCredit {
            id,
            business_key: business_key.to_string(),
            document_reference: "NF-1".to_string(),
            constitution_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            tax_amount: Decimal::from(100),
            category: "ISSQN".to_string(),
            simplified_regime: false,
            rate: Decimal::from(5),
            billed_amount: Decimal::from(2000),
            deduction_amount: Decimal::ZERO,
            tax_base: Decimal::from(2000),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_returns_first_match_for_trimmed_key() {
        let mut repository = MockCreditRepository::new();
        repository
            .expect_find_by_business_key()
            .with(eq("C-1"))
            .times(1)
            .returning(|key| Ok(vec![persisted(7, key), persisted(8, key)]));

        let service = CreditQueryService::new(Arc::new(repository));
        let found = service.get_by_business_key("  C-1 ").await.unwrap();

        assert_eq!(found.map(|c| c.id), Some(7));
    }

    #[tokio::test]
    async fn test_unknown_key_is_none() {
        let mut repository = MockCreditRepository::new();
        repository
            .expect_find_by_business_key()
            .returning(|_| Ok(Vec::new()));

        let service = CreditQueryService::new(Arc::new(repository));

        assert!(service.get_by_business_key("C-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_key_is_rejected_without_lookup() {
        let mut repository = MockCreditRepository::new();
        repository.expect_find_by_business_key().never();

        let service = CreditQueryService::new(Arc::new(repository));
        let result = service.get_by_business_key("   ").await;

        assert!(matches!(result, Err(DomainError::InvalidBusinessKey(_))));
    }
}
