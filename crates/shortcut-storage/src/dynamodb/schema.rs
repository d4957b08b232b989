use super::{map_sdk_error, DynamoDbBackendConfig};
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, GlobalSecondaryIndex, KeySchemaElement, KeyType, Projection,
    ProjectionType, ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;
use shortcut_core::{Result, StoreError};
use std::time::Duration;
use tracing::{debug, info};

pub const ATTR_NAME: &str = "name";
pub const ATTR_URL: &str = "url";
pub const ATTR_UPDATED_AT: &str = "updated_at";
pub const ATTR_PARTITION: &str = "updated_at_partition";

pub const DEFAULT_URL_INDEX: &str = "url-updated_at-index";
pub const DEFAULT_RECENCY_INDEX: &str = "updated_at_partition-updated_at-index";

const ACTIVE_POLL: Duration = Duration::from_millis(200);
const ACTIVE_ATTEMPTS: u32 = 150;

fn build_error(err: aws_sdk_dynamodb::error::BuildError) -> StoreError {
    StoreError::Operation(format!("invalid table definition: {err}"))
}

fn string_attribute(name: &str) -> Result<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(name)
        .attribute_type(ScalarAttributeType::S)
        .build()
        .map_err(build_error)
}

fn key(name: &str, key_type: KeyType) -> Result<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(build_error)
}

fn index(name: &str, hash: &str, range: &str) -> Result<GlobalSecondaryIndex> {
    GlobalSecondaryIndex::builder()
        .index_name(name)
        .key_schema(key(hash, KeyType::Hash)?)
        .key_schema(key(range, KeyType::Range)?)
        .projection(
            Projection::builder()
                .projection_type(ProjectionType::KeysOnly)
                .build(),
        )
        .build()
        .map_err(build_error)
}

/// Provisions the link table and both secondary indexes, then waits for the
/// table to become active. An existing table is left as is.
pub(super) async fn create_table(client: &Client, config: &DynamoDbBackendConfig) -> Result<()> {
    let created = client
        .create_table()
        .table_name(&config.table)
        .billing_mode(BillingMode::PayPerRequest)
        .attribute_definitions(string_attribute(ATTR_NAME)?)
        .attribute_definitions(string_attribute(ATTR_URL)?)
        .attribute_definitions(string_attribute(ATTR_UPDATED_AT)?)
        .attribute_definitions(string_attribute(ATTR_PARTITION)?)
        .key_schema(key(ATTR_NAME, KeyType::Hash)?)
        .global_secondary_indexes(index(&config.url_index, ATTR_URL, ATTR_UPDATED_AT)?)
        .global_secondary_indexes(index(
            &config.recency_index,
            ATTR_PARTITION,
            ATTR_UPDATED_AT,
        )?)
        .send()
        .await;

    match created {
        Ok(_) => info!(table = %config.table, "Created DynamoDB table"),
        Err(SdkError::ServiceError(e))
            if matches!(e.err(), CreateTableError::ResourceInUseException(_)) =>
        {
            debug!(table = %config.table, "DynamoDB table already exists");
        }
        Err(e) => return Err(map_sdk_error("failed to create table", e)),
    }

    wait_until_active(client, &config.table).await
}

async fn wait_until_active(client: &Client, table: &str) -> Result<()> {
    for _ in 0..ACTIVE_ATTEMPTS {
        let described = client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| map_sdk_error("failed to describe table", e))?;

        let status = described.table().and_then(|t| t.table_status());
        if status == Some(&TableStatus::Active) {
            return Ok(());
        }
        debug!(table = %table, status = ?status, "Waiting for DynamoDB table");
        tokio::time::sleep(ACTIVE_POLL).await;
    }

    Err(StoreError::Timeout(format!(
        "table '{table}' did not become active"
    )))
}
