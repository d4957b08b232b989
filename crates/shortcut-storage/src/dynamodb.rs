mod bucket;
mod schema;

pub use bucket::{DynamoDbCursor, MonthBucket};
pub use schema::{DEFAULT_RECENCY_INDEX, DEFAULT_URL_INDEX};

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use jiff::Timestamp;
use schema::{ATTR_NAME, ATTR_PARTITION, ATTR_UPDATED_AT, ATTR_URL};
use shortcut_core::link::{format_timestamp, parse_timestamp};
use shortcut_core::{
    Clock, Link, LinkBackend, LinkName, LinkPage, Result, StoreError, SystemClock,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

type Item = HashMap<String, AttributeValue>;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DynamoDbBackendConfig {
    #[builder(setter(into))]
    pub table: String,
    /// Overrides the region of the shared SDK config.
    #[builder(default, setter(strip_option, into))]
    pub region: Option<String>,
    /// Overrides the service endpoint, e.g. for DynamoDB Local.
    #[builder(default, setter(strip_option, into))]
    pub endpoint: Option<String>,
    #[builder(default = DEFAULT_URL_INDEX.to_string(), setter(into))]
    pub url_index: String,
    #[builder(default = DEFAULT_RECENCY_INDEX.to_string(), setter(into))]
    pub recency_index: String,
    /// Consecutive empty months after which a listing reports the end of
    /// history.
    #[builder(default = 24)]
    pub max_empty_buckets: u32,
}

/// DynamoDB implementation of [`LinkBackend`].
///
/// Items are keyed by `name`. Two global secondary indexes serve the
/// queries: one by `url`, one by month bucket (`updated_at_partition`),
/// both ranged on `updated_at`. Index reads are eventually consistent.
///
/// DynamoDB has no multi-item rename, so renames use the create-then-delete
/// fallback of [`LinkBackend::rename_link`].
#[derive(Clone)]
pub struct DynamoDbBackend {
    client: Client,
    config: DynamoDbBackendConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DynamoDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbBackend")
            .field("table", &self.config.table)
            .finish_non_exhaustive()
    }
}

pub(crate) fn map_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::TimeoutError(_) => StoreError::Timeout(message),
        SdkError::DispatchFailure(_) => StoreError::Unavailable(message),
        SdkError::ServiceError(_) => StoreError::Query(message),
        _ => StoreError::Operation(message),
    }
}

fn is_conditional_check_failed(err: &SdkError<UpdateItemError>) -> bool {
    matches!(
        err,
        SdkError::ServiceError(service_err)
            if matches!(service_err.err(), UpdateItemError::ConditionalCheckFailedException(_))
    )
}

fn string_attr<'a>(item: &'a Item, attr: &str) -> Option<&'a String> {
    item.get(attr).and_then(|v| v.as_s().ok())
}

fn item_to_link(item: &Item) -> Result<Link> {
    let invalid = |what: &str| StoreError::InvalidData(format!("dynamodb item: {what}"));

    let name = string_attr(item, ATTR_NAME).ok_or_else(|| invalid("missing name"))?;
    let name = LinkName::new(name.as_str()).map_err(|e| invalid(&e.to_string()))?;
    let url = string_attr(item, ATTR_URL).ok_or_else(|| invalid("missing url"))?;
    let updated_at = string_attr(item, ATTR_UPDATED_AT)
        .map(|raw| parse_timestamp(raw))
        .transpose()
        .map_err(|e| invalid(&format!("bad updated_at: {e}")))?;

    Link::with_name(name, url.as_str())
        .map(|link| link.with_updated_at(updated_at))
        .map_err(|e| invalid(&e.to_string()))
}

fn item_name(item: &Item) -> Result<LinkName> {
    string_attr(item, ATTR_NAME)
        .map(|name| LinkName::new_unchecked(name.as_str()))
        .ok_or_else(|| StoreError::InvalidData("index entry without name".to_string()))
}

impl DynamoDbBackend {
    /// Creates a backend from shared SDK settings plus the overrides in
    /// `config`.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: DynamoDbBackendConfig) -> Self {
        let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
        if let Some(region) = &config.region {
            builder = builder.region(aws_sdk_dynamodb::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self::from_client(Client::from_conf(builder.build()), config)
    }

    /// Creates a backend over a pre-built client. `region` and `endpoint`
    /// in `config` are ignored.
    pub fn from_client(client: Client, config: DynamoDbBackendConfig) -> Self {
        Self {
            client,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock that picks the first month of a fresh listing.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    /// Creates the table and its indexes if they do not exist yet.
    pub async fn create_table(&self) -> Result<()> {
        schema::create_table(&self.client, &self.config).await
    }

    /// Reads newest-first index entries of one bucket.
    async fn query_bucket(
        &self,
        bucket: MonthBucket,
        start_key: Option<Item>,
        limit: usize,
    ) -> Result<(Vec<Item>, Option<Item>)> {
        let response = self
            .client
            .query()
            .table_name(&self.config.table)
            .index_name(&self.config.recency_index)
            .key_condition_expression("#p = :partition")
            .expression_attribute_names("#p", ATTR_PARTITION)
            .expression_attribute_values(":partition", AttributeValue::S(bucket.to_string()))
            .scan_index_forward(false)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .map_err(|e| map_sdk_error("failed to query recency index", e))?;

        let last_key = response
            .last_evaluated_key()
            .filter(|key| !key.is_empty())
            .cloned();
        Ok((response.items().to_vec(), last_key))
    }
}

fn start_key(bucket: MonthBucket, name: &LinkName, updated_at: &str) -> Item {
    HashMap::from([
        (ATTR_NAME.to_string(), AttributeValue::S(name.to_string())),
        (ATTR_PARTITION.to_string(), AttributeValue::S(bucket.to_string())),
        (
            ATTR_UPDATED_AT.to_string(),
            AttributeValue::S(updated_at.to_string()),
        ),
    ])
}

#[async_trait]
impl LinkBackend for DynamoDbBackend {
    async fn put_link(&self, link: &Link, create_only: bool) -> Result<()> {
        let updated_at = link.stamped_at()?;
        trace!(name = %link.name(), create_only, "Writing link to DynamoDB");

        let mut request = self
            .client
            .update_item()
            .table_name(&self.config.table)
            .key(ATTR_NAME, AttributeValue::S(link.name().to_string()))
            .update_expression("SET #u = :url, #p = :partition, #t = :updated_at")
            .expression_attribute_names("#u", ATTR_URL)
            .expression_attribute_names("#p", ATTR_PARTITION)
            .expression_attribute_names("#t", ATTR_UPDATED_AT)
            .expression_attribute_values(":url", AttributeValue::S(link.url().to_string()))
            .expression_attribute_values(
                ":partition",
                AttributeValue::S(MonthBucket::of(updated_at).to_string()),
            )
            .expression_attribute_values(
                ":updated_at",
                AttributeValue::S(format_timestamp(updated_at)),
            );
        if create_only {
            request = request
                .condition_expression("attribute_not_exists(#n)")
                .expression_attribute_names("#n", ATTR_NAME);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e) if is_conditional_check_failed(&e) => {
                debug!(name = %link.name(), "Link already exists");
                Err(StoreError::Conflict(link.name().to_string()))
            }
            Err(e) => Err(map_sdk_error("failed to write link", e)),
        }
    }

    async fn get_link(&self, name: &LinkName) -> Result<Option<Link>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.config.table)
            .key(ATTR_NAME, AttributeValue::S(name.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| map_sdk_error("failed to fetch link", e))?;

        response.item().map(item_to_link).transpose()
    }

    async fn delete_link(&self, name: &LinkName) -> Result<()> {
        trace!(name = %name, "Deleting link from DynamoDB");
        self.client
            .delete_item()
            .table_name(&self.config.table)
            .key(ATTR_NAME, AttributeValue::S(name.to_string()))
            .send()
            .await
            .map_err(|e| map_sdk_error("failed to delete link", e))?;
        Ok(())
    }

    async fn list_links_by_url(&self, url: &str) -> Result<Vec<LinkName>> {
        let mut names = Vec::new();
        let mut last_evaluated_key = None;

        loop {
            let response = self
                .client
                .query()
                .table_name(&self.config.table)
                .index_name(&self.config.url_index)
                .key_condition_expression("#u = :url")
                .expression_attribute_names("#u", ATTR_URL)
                .expression_attribute_values(":url", AttributeValue::S(url.to_string()))
                .scan_index_forward(false)
                .set_exclusive_start_key(last_evaluated_key.take())
                .send()
                .await
                .map_err(|e| map_sdk_error("failed to query url index", e))?;

            for item in response.items() {
                names.push(item_name(item)?);
            }

            match response.last_evaluated_key() {
                Some(key) if !key.is_empty() => last_evaluated_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(names)
    }

    /// Walks month buckets backwards from the token (or the current month),
    /// filling the page across bucket boundaries.
    async fn list_links(&self, token: Option<&str>, limit: usize) -> Result<LinkPage> {
        let cursor = token.map(str::parse::<DynamoDbCursor>).transpose()?;
        let (mut bucket, mut start) = match cursor {
            None => (MonthBucket::of(self.clock.now()), None),
            Some(DynamoDbCursor::Bucket(bucket)) => (bucket, None),
            Some(DynamoDbCursor::After {
                bucket,
                name,
                updated_at,
            }) => (
                bucket,
                Some(start_key(bucket, &name, &format_timestamp(updated_at))),
            ),
        };

        if limit == 0 {
            return Ok(LinkPage::default());
        }

        let mut names: Vec<LinkName> = Vec::new();
        let mut last: Option<(LinkName, Timestamp)> = None;
        let mut empty_buckets = 0;
        let mut bucket_hits = 0;
        // a bucket entered mid-way may have nothing left without being empty
        let mut resumed = start.is_some();

        loop {
            let (items, last_key) = self
                .query_bucket(bucket, start.take(), limit - names.len())
                .await?;
            bucket_hits += items.len();
            for item in &items {
                let name = item_name(item)?;
                let updated_at = string_attr(item, ATTR_UPDATED_AT)
                    .and_then(|raw| parse_timestamp(raw).ok())
                    .ok_or_else(|| {
                        StoreError::InvalidData(format!("index entry '{name}' has no valid updated_at"))
                    })?;
                last = Some((name.clone(), updated_at));
                names.push(name);
            }

            if names.len() == limit {
                let next = match (last_key, last) {
                    (Some(_), Some((name, updated_at))) => Some(DynamoDbCursor::After {
                        bucket,
                        name,
                        updated_at,
                    }),
                    // the bucket ended exactly at the page boundary
                    _ => bucket.prev().map(DynamoDbCursor::Bucket),
                };
                let next_token = next.map(|cursor| cursor.to_string());
                return Ok(LinkPage { names, next_token });
            }
            if last_key.is_some() {
                // short read inside the bucket, keep going
                start = last_key;
                continue;
            }

            if bucket_hits == 0 && !resumed {
                empty_buckets += 1;
                if empty_buckets >= self.config.max_empty_buckets {
                    trace!(bucket = %bucket, "Recency listing reached end of history");
                    return Ok(LinkPage::last(names));
                }
            } else {
                empty_buckets = 0;
            }

            let Some(prev) = bucket.prev() else {
                return Ok(LinkPage::last(names));
            };
            bucket = prev;
            bucket_hits = 0;
            resumed = false;
        }
    }
}
