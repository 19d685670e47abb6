use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storage_class_migrator::{drivers, CliArgs, MigrationConfig, MigrationQueue, Migrator};
use storage_class_migrator::drivers::s3::S3Config;

/// Exit code after Ctrl-C (128 + SIGINT)
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_class_migrator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();
    let (config, s3_config) = match args.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Parameter problem: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    // Queue and error log are durable, so dropping the run mid-way is safe to resume
    tokio::select! {
        result = run(config, s3_config) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Problem: {:#}", e);
                ExitCode::FAILURE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

async fn run(config: MigrationConfig, s3_config: S3Config) -> anyhow::Result<()> {
    tracing::info!(
        "Migrating {} to {} (queue: {:?} table {})",
        config.display_path(),
        config.storage_class,
        config.db_path,
        config.table
    );

    let store = drivers::create_store(&config.bucket, &s3_config)?;
    let queue = MigrationQueue::connect(&config.database_url(), &config.table).await?;

    if !config.gather && !config.update {
        tracing::info!("Neither --gather nor --update given, only checking the queue");
    }

    let migrator = Migrator::new(config, queue.clone(), store);
    let result = migrator.run().await;
    queue.close().await;

    let summary = result?;
    if let Some(update) = summary.update {
        if update.failed > 0 {
            tracing::warn!(
                "{} object(s) could not be updated, rerun with --update to retry them",
                update.failed
            );
        }
    }
    Ok(())
}
