mod cli;
mod commands;

use crate::cli::{BackendArg, Command, LogFormat, CLI};
use clap::Parser;
use shortcut_core::LinkStore;
use shortcut_storage::{
    DynamoDbBackend, DynamoDbBackendConfig, InMemoryBackend, RedisBackend, RedisBackendConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error>;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries command output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn dynamodb_backend(config: &CLI) -> Result<DynamoDbBackend, BoxError> {
    let table = config
        .dynamodb_table
        .clone()
        .ok_or("dynamodb table is required when backend is dynamodb")?;

    let mut backend_config = DynamoDbBackendConfig::builder().table(table).build();
    backend_config.region = config.dynamodb_region.clone();
    backend_config.endpoint = config.dynamodb_endpoint.clone();

    let sdk_config = aws_config::load_from_env().await;
    Ok(DynamoDbBackend::new(&sdk_config, backend_config))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = CLI::parse();
    init_tracing(config.log_format);

    info!(backend = %config.backend, "Opening link store");

    let store = match config.backend {
        BackendArg::InMemory => LinkStore::new(InMemoryBackend::new()),
        BackendArg::Redis => {
            let url = config
                .redis_url
                .clone()
                .ok_or("redis url is required when backend is redis")?;
            let backend = RedisBackend::new(
                RedisBackendConfig::builder()
                    .url(url)
                    .prefix(config.redis_prefix.clone())
                    .build(),
            )?;
            LinkStore::new(backend)
        }
        BackendArg::DynamoDb => {
            let backend = dynamodb_backend(&config).await?;
            if config.command == Command::Init {
                backend.create_table().await?;
                info!(table = %backend.table(), "DynamoDB table is ready");
            }
            LinkStore::new(backend)
        }
    };

    let output = commands::run(&store, config.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
