//! Storage backends for the Shortcut link store.
//!
//! - [`InMemoryBackend`]: process-local maps, for tests and development
//! - [`RedisBackend`]: hashes plus sorted-set indexes, optimistic transactions
//! - [`DynamoDbBackend`]: one item per link, secondary indexes by url and month

pub mod dynamodb;
pub mod memory;
pub mod redis;

pub use dynamodb::{DynamoDbBackend, DynamoDbBackendConfig};
pub use memory::InMemoryBackend;
pub use redis::{RedisBackend, RedisBackendConfig};
