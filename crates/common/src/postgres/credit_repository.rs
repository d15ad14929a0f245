use crate::domain::{
    CreditRepository, CreditTransaction, DomainError, DomainResult, PersistedCredit,
    ValidatedCredit,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tokio_postgres::Row;
use tracing::{debug, warn};

const SELECT_BY_BUSINESS_KEY: &str =
    "SELECT id, numero_credito, numero_nfse, data_constituicao, valor_issqn, tipo_credito,
            simples_nacional, aliquota, valor_faturado, valor_deducao, base_calculo, created_at
     FROM credito
     WHERE numero_credito = $1
     ORDER BY id";

const UNIQUE_VIOLATION: &str = "23505";

/// Server-side codes that mean the connection is going away: class 08 (connection exception)
/// and the 57P0x shutdown codes.
fn is_connection_lost(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

/// A lost connection means the store is gone, not that this row is bad.
fn storage_error(e: tokio_postgres::Error) -> DomainError {
    let io_failure =
        std::error::Error::source(&e).is_some_and(|source| source.is::<std::io::Error>());
    let lost = e
        .code()
        .is_some_and(|code| is_connection_lost(code.code()));

    if e.is_closed() || io_failure || lost {
        DomainError::StorageUnavailable(e.into())
    } else {
        DomainError::RepositoryError(e.into())
    }
}

fn row_to_credit(row: &Row) -> PersistedCredit {
    PersistedCredit {
        id: row.get(0),
        business_key: row.get(1),
        document_reference: row.get(2),
        constitution_date: row.get(3),
        tax_amount: row.get(4),
        category: row.get(5),
        simplified_regime: row.get(6),
        rate: row.get(7),
        billed_amount: row.get(8),
        deduction_amount: row.get(9),
        tax_base: row.get(10),
        created_at: row.get(11),
    }
}

async fn select_by_business_key(
    conn: &deadpool_postgres::Client,
    business_key: &str,
) -> DomainResult<Vec<PersistedCredit>> {
    let rows = conn
        .query(SELECT_BY_BUSINESS_KEY, &[&business_key])
        .await
        .map_err(storage_error)?;

    Ok(rows.iter().map(row_to_credit).collect())
}

#[derive(Clone)]
pub struct PostgresCreditRepository {
    client: PostgresClient,
}

impl PostgresCreditRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CreditRepository for PostgresCreditRepository {
    async fn find_by_business_key(&self, business_key: &str) -> DomainResult<Vec<PersistedCredit>> {
        debug!(business_key = %business_key, "Looking up credit by business key");

        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::StorageUnavailable)?;

        select_by_business_key(&conn, business_key).await
    }

    async fn begin(&self) -> DomainResult<Box<dyn CreditTransaction>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::StorageUnavailable)?;

        conn.batch_execute("BEGIN")
            .await
            .map_err(|e| DomainError::StorageUnavailable(e.into()))?;

        Ok(Box::new(PostgresCreditTransaction { conn: Some(conn) }))
    }
}

/// A transaction pinned to one pooled connection.
///
/// If it is dropped while still open (e.g. the surrounding future was cancelled) a `ROLLBACK`
/// is issued in the background before the connection goes back to the pool.
pub struct PostgresCreditTransaction {
    conn: Option<deadpool_postgres::Client>,
}

impl PostgresCreditTransaction {
    fn conn(&self) -> DomainResult<&deadpool_postgres::Client> {
        self.conn.as_ref().ok_or_else(|| {
            DomainError::RepositoryError(anyhow::anyhow!("transaction already finished"))
        })
    }

    fn finish(&mut self) -> DomainResult<deadpool_postgres::Client> {
        self.conn.take().ok_or_else(|| {
            DomainError::RepositoryError(anyhow::anyhow!("transaction already finished"))
        })
    }
}

#[async_trait]
impl CreditTransaction for PostgresCreditTransaction {
    async fn find_by_business_key(
        &mut self,
        business_key: &str,
    ) -> DomainResult<Vec<PersistedCredit>> {
        select_by_business_key(self.conn()?, business_key).await
    }

    async fn insert(&mut self, credit: &ValidatedCredit) -> DomainResult<PersistedCredit> {
        debug!(business_key = %credit.business_key(), "Inserting credit");

        let result = self
            .conn()?
            .query_one(
                "INSERT INTO credito (numero_credito, numero_nfse, data_constituicao, valor_issqn,
                                      tipo_credito, simples_nacional, aliquota, valor_faturado,
                                      valor_deducao, base_calculo)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING id, created_at",
                &[
                    &credit.business_key(),
                    &credit.document_reference(),
                    &credit.constitution_date(),
                    &credit.tax_amount(),
                    &credit.category(),
                    &credit.simplified_regime(),
                    &credit.rate(),
                    &credit.billed_amount(),
                    &credit.deduction_amount(),
                    &credit.tax_base(),
                ],
            )
            .await;

        let row = match result {
            Ok(row) => row,
            Err(e) => {
                if let Some(db_err) = e.as_db_error() {
                    if db_err.code().code() == UNIQUE_VIOLATION {
                        return Err(DomainError::CreditAlreadyExists(
                            credit.business_key().to_string(),
                        ));
                    }
                }
                return Err(storage_error(e));
            }
        };

        Ok(PersistedCredit::from_validated(
            row.get(0),
            credit,
            row.get(1),
        ))
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        let mut this = self;
        let conn = this.finish()?;
        conn.batch_execute("COMMIT").await.map_err(storage_error)?;
        debug!("Credit transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        let mut this = self;
        let conn = this.finish()?;
        conn.batch_execute("ROLLBACK").await.map_err(storage_error)
    }
}

impl Drop for PostgresCreditTransaction {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.batch_execute("ROLLBACK").await {
                        warn!(error = %e, "Failed to roll back abandoned transaction");
                    }
                });
            }
            Err(_) => {
                warn!("Abandoned transaction dropped outside a runtime; connection discarded");
                drop(deadpool_postgres::Object::take(conn));
            }
        }
    }
}
