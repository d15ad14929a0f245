#![cfg(feature = "integration-tests")]

use chrono::NaiveDate;
use common::domain::{
    CandidateCredit, CreditRepository, CreditTransaction, DomainError, ValidatedCredit,
};
use common::postgres::{PostgresClient, PostgresCreditRepository};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;

async fn setup_test_db() -> (ContainerAsync<Postgres>, PostgresCreditRepository, PostgresClient) {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(
        &host.to_string(),
        port,
        "postgres",
        "postgres",
        "postgres",
        5,
    )
    .expect("Failed to create client");

    client.apply_schema().await.expect("Schema failed");
    // Applying twice must be harmless.
    client.apply_schema().await.expect("Schema is not idempotent");

    let repository = PostgresCreditRepository::new(client.clone());
    (postgres, repository, client)
}

fn validated(business_key: &str) -> ValidatedCredit {
    let date = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
    ValidatedCredit::validate(
        &CandidateCredit {
            business_key: business_key.to_string(),
            document_reference: "7891011".to_string(),
            constitution_date: date,
            tax_amount: Decimal::from_str("1500.75").unwrap(),
            category: "ISSQN".to_string(),
            simplified_regime: true,
            rate: Decimal::from_str("5.00").unwrap(),
            billed_amount: Decimal::from_str("30000.00").unwrap(),
            deduction_amount: Decimal::from_str("5000.00").unwrap(),
            tax_base: Decimal::from_str("25000.00").unwrap(),
        },
        date,
    )
    .unwrap()
}

#[tokio::test]
async fn test_insert_commit_and_find() {
    let (_container, repository, _client) = setup_test_db().await;

    let mut tx = repository.begin().await.unwrap();
    let persisted = tx.insert(&validated("123456")).await.unwrap();
    tx.commit().await.unwrap();

    assert!(persisted.id > 0);
    assert_eq!(persisted.tax_amount, Decimal::from_str("1500.75").unwrap());

    let found = repository.find_by_business_key("123456").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, persisted.id);
    assert_eq!(found[0].document_reference, "7891011");
    assert_eq!(
        found[0].constitution_date,
        NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
    );
    assert!(found[0].simplified_regime);
    assert_eq!(found[0].tax_base, Decimal::from(25000));
}

#[tokio::test]
async fn test_rollback_discards_insert() {
    let (_container, repository, _client) = setup_test_db().await;

    let mut tx = repository.begin().await.unwrap();
    tx.insert(&validated("C-rollback")).await.unwrap();
    assert_eq!(tx.find_by_business_key("C-rollback").await.unwrap().len(), 1);
    tx.rollback().await.unwrap();

    assert!(
        repository
            .find_by_business_key("C-rollback")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_dropped_transaction_is_rolled_back() {
    let (_container, repository, _client) = setup_test_db().await;

    {
        let mut tx = repository.begin().await.unwrap();
        tx.insert(&validated("C-dropped")).await.unwrap();
    }

    // The rollback runs on a spawned task.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(
        repository
            .find_by_business_key("C-dropped")
            .await
            .unwrap()
            .is_empty()
    );

    // The key is free again.
    let mut tx = repository.begin().await.unwrap();
    tx.insert(&validated("C-dropped")).await.unwrap();
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_unique_violation_maps_to_already_exists() {
    let (_container, repository, _client) = setup_test_db().await;

    let mut tx = repository.begin().await.unwrap();
    tx.insert(&validated("C-dup")).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repository.begin().await.unwrap();
    let result = tx.insert(&validated("C-dup")).await;
    assert!(matches!(result, Err(DomainError::CreditAlreadyExists(key)) if key == "C-dup"));
    tx.rollback().await.unwrap();

    assert_eq!(repository.find_by_business_key("C-dup").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unavailable_database_is_storage_unavailable() {
    let (container, repository, _client) = setup_test_db().await;
    container.stop().await.unwrap();

    let result = repository.begin().await;

    assert!(matches!(result, Err(DomainError::StorageUnavailable(_))));
}

#[tokio::test]
async fn test_connection_lost_mid_transaction_is_storage_unavailable() {
    let (container, repository, _client) = setup_test_db().await;

    let mut tx = repository.begin().await.unwrap();
    tx.insert(&validated("C-before")).await.unwrap();
    container.stop().await.unwrap();

    let result = tx.insert(&validated("C-after")).await;
    assert!(matches!(result, Err(DomainError::StorageUnavailable(_))));

    let result = tx.commit().await;
    assert!(matches!(result, Err(DomainError::StorageUnavailable(_))));
}
