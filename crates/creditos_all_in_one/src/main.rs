mod config;

use common::domain::SystemClock;
use common::nats::{JetStreamSubscription, NatsClient};
use common::postgres::{PostgresClient, PostgresCreditRepository};
use common::telemetry::init_telemetry;
use config::ServiceConfig;
use credit_worker::credit_worker::{CreditWorker, CreditWorkerConfig};
use creditos_runner::Runner;
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.telemetry_config()) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(
        stream = %config.credits_stream,
        consumer = %config.credits_consumer_name,
        "Starting creditos-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let deps = match tokio::time::timeout(
        config.startup_timeout(),
        initialize_shared_dependencies(&config),
    )
    .await
    {
        Ok(Ok(deps)) => deps,
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "Failed to initialize shared dependencies");
            std::process::exit(1);
        }
        Err(_) => {
            error!(
                timeout_secs = config.startup_timeout_secs,
                "Timed out initializing shared dependencies"
            );
            std::process::exit(1);
        }
    };

    let credit_worker = CreditWorker::new(
        Arc::new(PostgresCreditRepository::new(deps.postgres.clone())),
        Arc::new(deps.subscription),
        Arc::new(SystemClock),
        CreditWorkerConfig {
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            max_messages_per_cycle: config.max_messages_per_cycle,
        },
    );

    let nats_client = deps.nats;
    let postgres_client = deps.postgres;

    let runner = Runner::new()
        .with_app_process(credit_worker.into_runner_process())
        .with_closer(move || async move { nats_client.close().await })
        .with_closer(move || async move {
            info!("Closing PostgreSQL pool");
            postgres_client.close();
            Ok(())
        })
        .with_closer_timeout(config.closer_timeout());

    if let Err(e) = runner.run().await {
        error!(error = %format!("{e:#}"), "Service stopped with error");
        std::process::exit(1);
    }

    info!("Service stopped");
}

struct SharedDependencies {
    postgres: PostgresClient,
    nats: NatsClient,
    subscription: JetStreamSubscription,
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<SharedDependencies> {
    // PostgreSQL initialization
    info!("Initializing PostgreSQL...");
    let postgres = PostgresClient::from_config(&config.postgres_config())?;
    postgres.ping().await?;
    postgres.apply_schema().await?;

    // NATS initialization
    info!("Initializing NATS...");
    let nats = NatsClient::connect(&config.nats_url, config.startup_timeout()).await?;
    nats.ensure_stream(&config.credits_stream, &config.credits_subject)
        .await?;
    let subscription = nats.subscribe(&config.subscription_config()).await?;

    Ok(SharedDependencies {
        postgres,
        nats,
        subscription,
    })
}
