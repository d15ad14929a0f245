use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// A constituted credit exactly as it arrived on the queue. Nothing about it is trusted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateCredit {
    /// Credit number, the natural key used for deduplication.
    pub business_key: String,
    /// Service invoice (NFS-e) number the credit refers to.
    pub document_reference: String,
    pub constitution_date: NaiveDate,
    pub tax_amount: Decimal,
    pub category: String,
    pub simplified_regime: bool,
    pub rate: Decimal,
    pub billed_amount: Decimal,
    pub deduction_amount: Decimal,
    pub tax_base: Decimal,
}

/// Why a candidate was rejected. The display text is the rejection reason reported downstream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("business key must not be empty")]
    EmptyBusinessKey,

    #[error("document reference must not be empty")]
    EmptyDocumentReference,

    #[error("category must not be empty")]
    EmptyCategory,

    #[error("tax amount must be > 0")]
    NonPositiveTaxAmount,

    #[error("rate must be > 0")]
    NonPositiveRate,

    #[error("billed amount must be > 0")]
    NonPositiveBilledAmount,

    #[error("tax base must be > 0")]
    NonPositiveTaxBase,

    #[error("constitution date must not be in the past")]
    ConstitutionDateInPast,
}

/// A credit that satisfies every invariant. Only this type can reach storage.
///
/// Fields are private so the only way to obtain one is [`ValidatedCredit::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedCredit {
    business_key: String,
    document_reference: String,
    constitution_date: NaiveDate,
    tax_amount: Decimal,
    category: String,
    simplified_regime: bool,
    rate: Decimal,
    billed_amount: Decimal,
    deduction_amount: Decimal,
    tax_base: Decimal,
}

impl ValidatedCredit {
    /// Checks the candidate against the invariants and returns the first one violated.
    ///
    /// Check order is stable: required strings, then the positive amounts in field order,
    /// then the constitution date against `today`. String fields are stored trimmed.
    pub fn validate(
        candidate: &CandidateCredit,
        today: NaiveDate,
    ) -> Result<Self, ValidationFailure> {
        let business_key = candidate.business_key.trim();
        let document_reference = candidate.document_reference.trim();
        let category = candidate.category.trim();

        if business_key.is_empty() {
            return Err(ValidationFailure::EmptyBusinessKey);
        }
        if document_reference.is_empty() {
            return Err(ValidationFailure::EmptyDocumentReference);
        }
        if category.is_empty() {
            return Err(ValidationFailure::EmptyCategory);
        }

        if candidate.tax_amount <= Decimal::ZERO {
            return Err(ValidationFailure::NonPositiveTaxAmount);
        }
        if candidate.rate <= Decimal::ZERO {
            return Err(ValidationFailure::NonPositiveRate);
        }
        if candidate.billed_amount <= Decimal::ZERO {
            return Err(ValidationFailure::NonPositiveBilledAmount);
        }
        if candidate.tax_base <= Decimal::ZERO {
            return Err(ValidationFailure::NonPositiveTaxBase);
        }

        if candidate.constitution_date < today {
            return Err(ValidationFailure::ConstitutionDateInPast);
        }

        Ok(Self {
            business_key: business_key.to_string(),
            document_reference: document_reference.to_string(),
            constitution_date: candidate.constitution_date,
            tax_amount: candidate.tax_amount,
            category: category.to_string(),
            simplified_regime: candidate.simplified_regime,
            rate: candidate.rate,
            billed_amount: candidate.billed_amount,
            deduction_amount: candidate.deduction_amount,
            tax_base: candidate.tax_base,
        })
    }

    pub fn business_key(&self) -> &str {
        &self.business_key
    }

    pub fn document_reference(&self) -> &str {
        &self.document_reference
    }

    pub fn constitution_date(&self) -> NaiveDate {
        self.constitution_date
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn simplified_regime(&self) -> bool {
        self.simplified_regime
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    pub fn billed_amount(&self) -> Decimal {
        self.billed_amount
    }

    pub fn deduction_amount(&self) -> Decimal {
        self.deduction_amount
    }

    pub fn tax_base(&self) -> Decimal {
        self.tax_base
    }
}

/// A credit as stored, with its store-assigned identity.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedCredit {
    pub id: i64,
    pub business_key: String,
    pub document_reference: String,
    pub constitution_date: NaiveDate,
    pub tax_amount: Decimal,
    pub category: String,
    pub simplified_regime: bool,
    pub rate: Decimal,
    pub billed_amount: Decimal,
    pub deduction_amount: Decimal,
    pub tax_base: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PersistedCredit {
    /// Builds the stored representation of a validated credit.
    pub fn from_validated(id: i64, credit: &ValidatedCredit, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            business_key: credit.business_key.clone(),
            document_reference: credit.document_reference.clone(),
            constitution_date: credit.constitution_date,
            tax_amount: credit.tax_amount,
            category: credit.category.clone(),
            simplified_regime: credit.simplified_regime,
            rate: credit.rate,
            billed_amount: credit.billed_amount,
            deduction_amount: credit.deduction_amount,
            tax_base: credit.tax_base,
            created_at,
        }
    }
}
