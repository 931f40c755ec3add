//! Binary for running the termination registrar.
//!
//! ```text
//! // Create the termination tables and their PENDING indexes.
//! termination-registrar migrate --database-url postgres://localhost/terminations
//!
//! // Consume termination intents with two workers until Ctrl+C.
//! termination-registrar consume --kafka localhost:9092 --concurrency 2
//!
//! // Try it locally without a database.
//! termination-registrar consume --store memory
//!
//! // Publish a consent withdrawal for manual testing.
//! termination-registrar publish --topic mydata --account-id 777 --reason PFM_SERVICE_CLOSED_BY_USER
//! ```

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::sync::Arc;
use std::time::Duration;
use termination_kafka::{Consumer, ConsumerConfig, Producer};
use termination_messages::{ConsentData, ConsentMessage, PayAccountDeleted};
use termination_registrar::config::{
    DatabaseConfig, ServiceConfig, StoreBackend, DEFAULT_MYDATA_TABLE, DEFAULT_PAY_TABLE,
};
use termination_registrar::store::{MemoryTerminationStore, PgTerminationStore, TerminationStore};
use termination_registrar::{termination_handlers, TerminationRegistrar};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = build_app().get_matches();

    match matches.subcommand() {
        Some(("consume", consume_matches)) => consume(service_config(consume_matches)?).await,
        Some(("migrate", migrate_matches)) => migrate(database_config(migrate_matches)?).await,
        Some(("publish", publish_matches)) => publish(publish_matches).await,
        _ => unreachable!("clap requires a subcommand"),
    }
}

async fn consume(config: ServiceConfig) -> anyhow::Result<()> {
    match &config.store {
        StoreBackend::Postgres(database) => {
            let pool = database.connect().await?;
            let mydata = TerminationRegistrar::new(
                PgTerminationStore::new(pool.clone(), &database.mydata_table)?,
                "mydata",
            );
            let pay = TerminationRegistrar::new(
                PgTerminationStore::new(pool, &database.pay_table)?,
                "pay",
            );
            run_workers(&config, mydata, pay).await
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, termination records are lost on exit");
            let mydata = TerminationRegistrar::new(MemoryTerminationStore::new(), "mydata");
            let pay = TerminationRegistrar::new(MemoryTerminationStore::new(), "pay");
            run_workers(&config, mydata, pay).await
        }
    }
}

async fn run_workers<S>(
    config: &ServiceConfig,
    mydata: TerminationRegistrar<S>,
    pay: TerminationRegistrar<S>,
) -> anyhow::Result<()>
where
    S: TerminationStore + 'static,
{
    let mydata = Arc::new(mydata);
    let pay = Arc::new(pay);
    let mut workers = JoinSet::new();
    let mut shutdown_handles = Vec::with_capacity(config.concurrency);

    for worker in 0..config.concurrency {
        let handlers = termination_handlers(Arc::clone(&mydata), Arc::clone(&pay));
        let consumer = Consumer::new(config.kafka.clone(), handlers)?;
        consumer.subscribe()?;
        shutdown_handles.push(consumer.shutdown_handle());

        workers.spawn(async move {
            info!("Consumer worker {} started", worker);
            consumer.run().await
        });
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
            Err(e) => error!("Failed to listen for Ctrl+C, shutting down: {}", e),
        }
        for handle in &shutdown_handles {
            handle.shutdown().await;
        }
    });

    info!(
        "Consuming with {} worker(s)... Press Ctrl+C to stop",
        config.concurrency
    );

    let mut result = Ok(());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Consumer worker failed: {}", e);
                result = Err(e.into());
            }
            Err(e) => {
                error!("Consumer worker panicked: {}", e);
                result = Err(e.into());
            }
        }
    }

    info!("Consumers shut down");
    result
}

async fn migrate(config: DatabaseConfig) -> anyhow::Result<()> {
    let pool = config.connect().await?;
    for table in [&config.mydata_table, &config.pay_table] {
        PgTerminationStore::new(pool.clone(), table)?.migrate().await?;
    }
    info!("Schema is up to date");
    Ok(())
}

async fn publish(matches: &ArgMatches) -> anyhow::Result<()> {
    let brokers = required_string(matches, "kafka")?;
    let account_id = *matches
        .get_one::<i64>("account_id")
        .context("--account-id is required")?;
    let reason = matches.get_one::<String>("reason").cloned();
    let producer = Producer::new(&brokers)?;

    match required_string(matches, "topic")?.as_str() {
        "mydata" => {
            let message = ConsentMessage {
                data: ConsentData {
                    delete_event_type: reason
                        .unwrap_or_else(|| "PFM_SERVICE_CLOSED_BY_USER".to_string()),
                    pay_account_id: account_id,
                    is_remove: !matches.get_flag("keep"),
                    is_force: false,
                },
                kind: "WITHDRAW".to_string(),
            };
            producer.send(&message).await?;
        }
        "pay" => {
            let message = PayAccountDeleted {
                uuid: format!("manual-{}-{}", account_id, chrono::Utc::now().timestamp_millis()),
                occurred_at: chrono::Utc::now().timestamp_millis(),
                pay_account_id: account_id,
                reason,
            };
            producer.send(&message).await?;
        }
        other => anyhow::bail!("unknown topic alias '{}'", other),
    }

    producer.flush(Duration::from_secs(5))?;
    info!("Published termination event for account_id={}", account_id);
    Ok(())
}

fn required_string(matches: &ArgMatches, id: &str) -> anyhow::Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .with_context(|| format!("missing --{}", id.replace('_', "-")))
}

fn database_config(matches: &ArgMatches) -> anyhow::Result<DatabaseConfig> {
    let mydata_table = required_string(matches, "mydata_table")?;
    let pay_table = required_string(matches, "pay_table")?;
    let max_connections = *matches
        .get_one::<u32>("db_max_connections")
        .context("missing --db-max-connections")?;

    Ok(DatabaseConfig::new(required_string(matches, "database_url")?)
        .with_max_connections(max_connections)
        .with_tables(mydata_table, pay_table))
}

fn service_config(matches: &ArgMatches) -> anyhow::Result<ServiceConfig> {
    let retries = *matches
        .get_one::<u32>("max_retries")
        .context("missing --max-retries")?;
    let backoff_ms = *matches
        .get_one::<u64>("retry_backoff_ms")
        .context("missing --retry-backoff-ms")?;
    let concurrency = *matches
        .get_one::<usize>("concurrency")
        .context("missing --concurrency")?;

    let kafka = ConsumerConfig::new(
        required_string(matches, "kafka")?,
        required_string(matches, "consumer_group")?,
    )
    .with_auto_offset_reset(required_string(matches, "auto_offset_reset")?)
    .with_max_retries(retries)
    .with_initial_backoff(Duration::from_millis(backoff_ms));

    let store = match required_string(matches, "store")?.as_str() {
        "memory" => StoreBackend::Memory,
        _ => StoreBackend::Postgres(database_config(matches)?),
    };

    Ok(ServiceConfig::new(kafka, store).with_concurrency(concurrency))
}

fn kafka_arg() -> Arg {
    Arg::new("kafka")
        .long("kafka")
        .short('k')
        .env("KAFKA_BROKERS")
        .default_value("localhost:9092")
        .help("Kafka broker connection string to use")
}

fn database_args(url_required: bool) -> Vec<Arg> {
    vec![
        Arg::new("database_url")
            .long("database-url")
            .env("DATABASE_URL")
            .required(url_required)
            .help("PostgreSQL connection URL"),
        Arg::new("db_max_connections")
            .long("db-max-connections")
            .env("DATABASE_MAX_CONNECTIONS")
            .default_value("10")
            .value_parser(clap::value_parser!(u32))
            .help("Maximum number of pooled database connections"),
        Arg::new("mydata_table")
            .long("mydata-table")
            .env("MYDATA_TERMINATE_TABLE")
            .default_value(DEFAULT_MYDATA_TABLE)
            .help("Table receiving terminations from consent messages"),
        Arg::new("pay_table")
            .long("pay-table")
            .env("PAY_TERMINATE_TABLE")
            .default_value(DEFAULT_PAY_TABLE)
            .help("Table receiving terminations from pay-account deletions"),
    ]
}

fn consume_args() -> Vec<Arg> {
    vec![
        Arg::new("store")
            .long("store")
            .env("TERMINATION_STORE")
            .value_parser(["postgres", "memory"])
            .default_value("postgres")
            .help("Where to keep termination records; memory needs no database"),
        Arg::new("consumer_group")
            .long("consumer-group")
            .short('g')
            .env("KAFKA_GROUP_ID")
            .default_value("termination-registrar")
            .help("Consumer group to use when subscribing to Kafka topics"),
        Arg::new("auto_offset_reset")
            .long("auto-offset-reset")
            .env("AUTO_OFFSET_RESET")
            .value_parser(["earliest", "latest"])
            .default_value("earliest")
            .help("Where to start when the group has no committed offset"),
        Arg::new("concurrency")
            .long("concurrency")
            .short('c')
            .env("CONSUMER_CONCURRENCY")
            .default_value("1")
            .value_parser(clap::value_parser!(usize))
            .help("Number of consumer workers to run in the group"),
        Arg::new("max_retries")
            .long("max-retries")
            .env("CONSUMER_MAX_RETRIES")
            .default_value("2")
            .value_parser(clap::value_parser!(u32))
            .help("In-place retries before a failed event is handed back for redelivery"),
        Arg::new("retry_backoff_ms")
            .long("retry-backoff-ms")
            .env("CONSUMER_RETRY_BACKOFF_MS")
            .default_value("1000")
            .value_parser(clap::value_parser!(u64))
            .help("Initial backoff between retries, in milliseconds"),
    ]
}

fn publish_args() -> Vec<Arg> {
    vec![
        Arg::new("topic")
            .long("topic")
            .short('t')
            .value_parser(["mydata", "pay"])
            .required(true)
            .help("Event type to publish"),
        Arg::new("account_id")
            .long("account-id")
            .short('a')
            .required(true)
            .value_parser(clap::value_parser!(i64))
            .help("Account to terminate"),
        Arg::new("reason")
            .long("reason")
            .short('r')
            .help("Termination reason"),
        Arg::new("keep")
            .long("keep")
            .action(ArgAction::SetTrue)
            .help("Publish a consent message that does not request removal"),
    ]
}

fn build_app() -> Command {
    Command::new("termination-registrar")
        .version(clap::crate_version!())
        .about("Registers account termination requests consumed from Kafka")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("consume")
                .about("Consume termination events until interrupted")
                .arg(kafka_arg())
                .args(database_args(false))
                .args(consume_args()),
        )
        .subcommand(
            Command::new("migrate")
                .about("Create termination tables and their indexes")
                .args(database_args(true)),
        )
        .subcommand(
            Command::new("publish")
                .about("Publish a single termination event")
                .arg(kafka_arg())
                .args(publish_args()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        build_app().debug_assert();
    }

    #[test]
    fn consume_flags_build_service_config() {
        let matches = build_app().get_matches_from([
            "termination-registrar",
            "consume",
            "--kafka",
            "broker:9092",
            "--database-url",
            "postgres://app:pw@db/terminations",
            "--concurrency",
            "3",
            "--max-retries",
            "4",
            "--pay-table",
            "pay_terminations",
        ]);
        let (_, consume_matches) = matches.subcommand().unwrap();

        let config = service_config(consume_matches).unwrap();
        assert_eq!(config.kafka.brokers, "broker:9092");
        assert_eq!(config.kafka.max_retries, 4);
        assert_eq!(config.concurrency, 3);
        match config.store {
            StoreBackend::Postgres(database) => {
                assert_eq!(database.mydata_table, DEFAULT_MYDATA_TABLE);
                assert_eq!(database.pay_table, "pay_terminations");
            }
            StoreBackend::Memory => panic!("expected the postgres store by default"),
        }
    }

    #[test]
    fn memory_store_needs_no_database_url() {
        let matches = build_app().get_matches_from([
            "termination-registrar",
            "consume",
            "--store",
            "memory",
        ]);
        let (_, consume_matches) = matches.subcommand().unwrap();

        let config = service_config(consume_matches).unwrap();
        assert!(matches!(config.store, StoreBackend::Memory));
    }

    #[test]
    fn publish_rejects_unknown_topics() {
        let result = build_app().try_get_matches_from([
            "termination-registrar",
            "publish",
            "--topic",
            "billing",
            "--account-id",
            "1",
        ]);
        assert!(result.is_err());
    }
}
