use crate::name::LinkName;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Trait for generating candidate link names.
///
/// Implementations are pure generators that don't interact with storage;
/// uniqueness is enforced by the store's create-only write.
pub trait NameGenerator: Send + Sync {
    /// Generates a candidate name.
    fn generate(&self) -> LinkName;
}

/// Generates random alphanumeric names of a fixed length.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RandomNameGenerator {
    #[builder(default = 6)]
    length: usize,
    #[builder(default, setter(into))]
    prefix: String,
}

impl Default for RandomNameGenerator {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl NameGenerator for RandomNameGenerator {
    fn generate(&self) -> LinkName {
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(self.length.max(1))
            .map(char::from)
            .collect();
        LinkName::new_unchecked(format!("{}{}", self.prefix, suffix))
    }
}

/// Bounds the retry loop of
/// [`LinkStore::create_with_generated_name`](crate::LinkStore::create_with_generated_name).
#[derive(Debug, Clone, TypedBuilder)]
pub struct RetryPolicy {
    /// Total number of names tried before giving up.
    #[builder(default = 5)]
    pub max_attempts: u32,

    /// Delay between a conflict and the next attempt.
    #[builder(default = Duration::from_millis(50))]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}
