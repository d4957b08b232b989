use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::link::{truncate_to_millis, Link};
use crate::name::LinkName;
use crate::retry::{NameGenerator, RetryPolicy};
use async_trait::async_trait;
use jiff::Timestamp;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Page size used when a caller has no preference.
pub const DEFAULT_PAGE_LIMIT: usize = 30;

/// One page of a recency listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkPage {
    /// Names, most recently updated first.
    pub names: Vec<LinkName>,
    /// Opaque token resuming the scan, or `None` once history is exhausted.
    ///
    /// The format belongs to the backend that produced it and must not be
    /// fed to a different backend type.
    pub next_token: Option<String>,
}

impl LinkPage {
    pub fn last(names: Vec<LinkName>) -> Self {
        Self {
            names,
            next_token: None,
        }
    }
}

/// Storage backend for links.
///
/// Every backend must make `put_link(.., create_only = true)` atomic per
/// name: of any number of concurrent create-only writes for one name, at
/// most one succeeds and the rest return [`StoreError::Conflict`].
#[async_trait]
pub trait LinkBackend: Send + Sync + 'static {
    /// Upserts the name -> url mapping of a stamped link.
    ///
    /// With `create_only`, returns `Err(Conflict)` if the name already exists.
    async fn put_link(&self, link: &Link, create_only: bool) -> Result<()>;

    /// Point lookup. Returns `None` if the name does not exist.
    async fn get_link(&self, name: &LinkName) -> Result<Option<Link>>;

    /// Removes a link. Deleting a missing name is a no-op.
    async fn delete_link(&self, name: &LinkName) -> Result<()>;

    /// Moves a link to `new_name`.
    ///
    /// The provided implementation is for backends without an atomic rename
    /// primitive: it creates the new name (create-only) and then deletes the
    /// old one. A failure between the two steps leaves the link under both
    /// names; callers that need atomicity must use a backend overriding this.
    async fn rename_link(&self, link: &Link, new_name: &LinkName) -> Result<()> {
        let Some(current) = self.get_link(link.name()).await? else {
            return Err(StoreError::NotFound(link.name().to_string()));
        };

        debug!(name = %link.name(), new_name = %new_name, "Renaming link by create + delete");
        self.put_link(&current.renamed(new_name.clone()), true)
            .await?;
        self.delete_link(link.name()).await
    }

    /// All names currently pointing at `url`, newest first where supported.
    async fn list_links_by_url(&self, url: &str) -> Result<Vec<LinkName>>;

    /// Up to `limit` names in descending recency order, resuming after `token`.
    async fn list_links(&self, token: Option<&str>, limit: usize) -> Result<LinkPage>;
}

/// Cloneable handle over the backend chosen at construction time.
///
/// The handle stamps `updated_at` on writes and attaches itself to links it
/// returns.
#[derive(Clone)]
pub struct LinkStore {
    backend: Arc<dyn LinkBackend>,
    clock: Arc<dyn Clock>,
}

impl LinkStore {
    pub fn new(backend: impl LinkBackend) -> Self {
        Self::with_clock(backend, SystemClock)
    }

    pub fn with_clock(backend: impl LinkBackend, clock: impl Clock) -> Self {
        Self {
            backend: Arc::new(backend),
            clock: Arc::new(clock),
        }
    }

    /// Creates a store over a backend that is already shared.
    pub fn from_shared(backend: Arc<dyn LinkBackend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    pub fn backend(&self) -> &dyn LinkBackend {
        self.backend.as_ref()
    }

    /// Current time at the precision persisted by every backend.
    pub fn now(&self) -> Timestamp {
        truncate_to_millis(self.clock.now())
    }

    /// Validates and stamps `link`, then writes it.
    ///
    /// The link is stamped even if the write fails; it is attached to this
    /// store only on success.
    pub async fn put_link(&self, link: &mut Link, create_only: bool) -> Result<()> {
        link.validate()?;
        link.stamp(self.now());
        self.backend.put_link(link, create_only).await?;
        link.attach(self);
        Ok(())
    }

    pub async fn get_link(&self, name: &LinkName) -> Result<Option<Link>> {
        let mut link = self.backend.get_link(name).await?;
        if let Some(link) = link.as_mut() {
            link.attach(self);
        }
        Ok(link)
    }

    pub async fn delete_link(&self, name: &LinkName) -> Result<()> {
        self.backend.delete_link(name).await
    }

    /// Renames `link` and, on success, updates its name in place.
    ///
    /// Renaming a link to its own name is a no-op.
    pub async fn rename_link(&self, link: &mut Link, new_name: LinkName) -> Result<()> {
        if link.name() == &new_name {
            return Ok(());
        }
        self.backend.rename_link(link, &new_name).await?;
        link.set_name(new_name);
        link.attach(self);
        Ok(())
    }

    pub async fn list_links_by_url(&self, url: &str) -> Result<Vec<LinkName>> {
        self.backend.list_links_by_url(url).await
    }

    pub async fn list_links(&self, token: Option<&str>, limit: usize) -> Result<LinkPage> {
        if limit == 0 {
            return Ok(LinkPage::default());
        }
        self.backend.list_links(token, limit).await
    }

    /// Creates a link under a freshly generated name.
    ///
    /// A name collision is expected under load: each conflict draws a new
    /// name after `policy.backoff`. Gives up with
    /// [`StoreError::RetryExhausted`] after `policy.max_attempts` conflicts.
    /// Any other error is returned as is.
    pub async fn create_with_generated_name<G: NameGenerator + ?Sized>(
        &self,
        url: &str,
        generator: &G,
        policy: &RetryPolicy,
    ) -> Result<Link> {
        for attempt in 1..=policy.max_attempts {
            let mut link = Link::with_name(generator.generate(), url)?;
            match self.put_link(&mut link, true).await {
                Ok(()) => return Ok(link),
                Err(StoreError::Conflict(name)) => {
                    debug!(name = %name, attempt, "Generated name already taken");
                    if attempt < policy.max_attempts {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            attempts = policy.max_attempts,
            "Giving up on generated link names"
        );
        Err(StoreError::RetryExhausted {
            attempts: policy.max_attempts,
        })
    }
}

impl fmt::Debug for LinkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Minimal backend without a rename override, used to exercise the
    /// handle and the provided rename.
    #[derive(Default)]
    struct MapBackend {
        links: Mutex<HashMap<LinkName, Link>>,
    }

    #[async_trait]
    impl LinkBackend for MapBackend {
        async fn put_link(&self, link: &Link, create_only: bool) -> Result<()> {
            link.stamped_at()?;
            let mut links = self.links.lock();
            if create_only && links.contains_key(link.name()) {
                return Err(StoreError::Conflict(link.name().to_string()));
            }
            links.insert(link.name().clone(), link.clone());
            Ok(())
        }

        async fn get_link(&self, name: &LinkName) -> Result<Option<Link>> {
            Ok(self.links.lock().get(name).cloned())
        }

        async fn delete_link(&self, name: &LinkName) -> Result<()> {
            self.links.lock().remove(name);
            Ok(())
        }

        async fn list_links_by_url(&self, url: &str) -> Result<Vec<LinkName>> {
            Ok(self
                .links
                .lock()
                .values()
                .filter(|l| l.url() == url)
                .map(|l| l.name().clone())
                .collect())
        }

        async fn list_links(&self, _token: Option<&str>, _limit: usize) -> Result<LinkPage> {
            Ok(LinkPage::last(self.links.lock().keys().cloned().collect()))
        }
    }

    struct FixedNames {
        names: Vec<&'static str>,
        next: AtomicUsize,
    }

    impl NameGenerator for FixedNames {
        fn generate(&self) -> LinkName {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            LinkName::new_unchecked(self.names[i % self.names.len()])
        }
    }

    fn name(s: &str) -> LinkName {
        LinkName::new(s).unwrap()
    }

    fn clock() -> ManualClock {
        ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap())
    }

    #[tokio::test]
    async fn save_stamps_and_attaches() {
        let clock = clock();
        let store = LinkStore::with_clock(MapBackend::default(), clock.clone());

        let mut link = Link::new("demo", "https://example.org").unwrap();
        link.save_to(&store, true).await.unwrap();
        assert_eq!(link.updated_at(), Some(clock.now()));

        // the link now remembers its store
        clock.advance(jiff::SignedDuration::from_secs(5));
        link.set_url("https://example.com");
        link.save(false).await.unwrap();
        assert_eq!(link.updated_at(), Some(clock.now()));

        let stored = store.get_link(&name("demo")).await.unwrap().unwrap();
        assert_eq!(stored.url(), "https://example.com");
        assert!(stored.store().is_some());
    }

    #[tokio::test]
    async fn invalid_link_is_rejected_before_write() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());

        let mut link = Link::new("demo", "https://example.org").unwrap();
        link.set_url("not-a-url");
        let err = link.save_to(&store, false).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.get_link(&name("demo")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provided_rename_moves_link() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());

        let mut link = Link::new("old", "https://example.org").unwrap();
        link.save_to(&store, true).await.unwrap();
        store.rename_link(&mut link, name("new")).await.unwrap();

        assert_eq!(link.name().as_str(), "new");
        assert!(store.get_link(&name("old")).await.unwrap().is_none());
        let moved = store.get_link(&name("new")).await.unwrap().unwrap();
        assert_eq!(moved.url(), "https://example.org");
    }

    #[tokio::test]
    async fn provided_rename_refuses_existing_destination() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());

        let mut a = Link::new("a", "https://a.example").unwrap();
        let mut b = Link::new("b", "https://b.example").unwrap();
        a.save_to(&store, true).await.unwrap();
        b.save_to(&store, true).await.unwrap();

        let err = store.rename_link(&mut a, name("b")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(a.name().as_str(), "a");
        let b = store.get_link(&name("b")).await.unwrap().unwrap();
        assert_eq!(b.url(), "https://b.example");
    }

    #[tokio::test]
    async fn provided_rename_of_missing_link() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());
        let mut ghost = Link::new("ghost", "https://example.org").unwrap();

        let err = store.rename_link(&mut ghost, name("other")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_limit_lists_nothing() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());
        let mut link = Link::new("demo", "https://example.org").unwrap();
        link.save_to(&store, true).await.unwrap();

        let page = store.list_links(None, 0).await.unwrap();
        assert!(page.names.is_empty());
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn generated_name_retries_past_conflicts() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());
        let mut taken = Link::new("taken", "https://example.org").unwrap();
        taken.save_to(&store, true).await.unwrap();

        let generator = FixedNames {
            names: vec!["taken", "taken", "free"],
            next: AtomicUsize::new(0),
        };
        let policy = RetryPolicy::builder()
            .max_attempts(5)
            .backoff(std::time::Duration::ZERO)
            .build();

        let link = store
            .create_with_generated_name("https://example.com", &generator, &policy)
            .await
            .unwrap();
        assert_eq!(link.name().as_str(), "free");
        assert_eq!(generator.next.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn generated_name_gives_up() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());
        let mut taken = Link::new("taken", "https://example.org").unwrap();
        taken.save_to(&store, true).await.unwrap();

        let generator = FixedNames {
            names: vec!["taken"],
            next: AtomicUsize::new(0),
        };
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .backoff(std::time::Duration::ZERO)
            .build();

        let err = store
            .create_with_generated_name("https://example.com", &generator, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RetryExhausted { attempts: 3 }));
        assert_eq!(generator.next.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn generated_name_does_not_retry_validation_errors() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());
        let generator = FixedNames {
            names: vec!["fine"],
            next: AtomicUsize::new(0),
        };

        let err = store
            .create_with_generated_name("not-a-url", &generator, &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(generator.next.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detached_link_cannot_save() {
        let mut link = Link::new("demo", "https://example.org").unwrap();
        assert!(matches!(link.save(true).await, Err(StoreError::NoBackend)));
    }

    #[tokio::test]
    async fn rename_to_same_name_is_a_no_op() {
        let store = LinkStore::with_clock(MapBackend::default(), clock());
        let mut link = Link::new("demo", "https://example.org").unwrap();
        link.save_to(&store, true).await.unwrap();

        store.rename_link(&mut link, name("demo")).await.unwrap();
        assert_eq!(link.name().as_str(), "demo");
        assert!(store.get_link(&name("demo")).await.unwrap().is_some());
    }
}
