use async_trait::async_trait;
use jiff::Timestamp;
use parking_lot::Mutex;
use shortcut_core::{Link, LinkBackend, LinkName, LinkPage, Result, StoreError};
use std::collections::{BTreeSet, HashMap};

/// In-memory storage entry for a link.
#[derive(Debug, Clone)]
struct Entry {
    url: String,
    updated_at: Timestamp,
}

#[derive(Debug, Default)]
struct State {
    links: HashMap<LinkName, Entry>,
    by_url: HashMap<String, BTreeSet<LinkName>>,
}

impl State {
    fn unindex(&mut self, url: &str, name: &LinkName) {
        if let Some(names) = self.by_url.get_mut(url) {
            names.remove(name);
            if names.is_empty() {
                self.by_url.remove(url);
            }
        }
    }

    fn index(&mut self, url: &str, name: &LinkName) {
        self.by_url
            .entry(url.to_owned())
            .or_default()
            .insert(name.clone());
    }
}

/// In-memory implementation of [`LinkBackend`].
///
/// One mutex guards both the name -> record map and the url -> names
/// index, so every mutation of the two happens in a single critical
/// section. Listing returns everything in one page.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live links.
    pub fn len(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entry_to_link(name: &LinkName, entry: &Entry) -> Result<Link> {
    Link::with_name(name.clone(), entry.url.clone())
        .map(|link| link.with_updated_at(Some(entry.updated_at)))
        .map_err(|e| StoreError::InvalidData(format!("link '{name}': {e}")))
}

#[async_trait]
impl LinkBackend for InMemoryBackend {
    async fn put_link(&self, link: &Link, create_only: bool) -> Result<()> {
        let updated_at = link.stamped_at()?;
        let name = link.name();

        let mut state = self.state.lock();
        let old_url = state.links.get(name).map(|entry| entry.url.clone());
        if create_only && old_url.is_some() {
            return Err(StoreError::Conflict(name.to_string()));
        }

        if let Some(old_url) = old_url.filter(|old| old != link.url()) {
            state.unindex(&old_url, name);
        }
        state.links.insert(
            name.clone(),
            Entry {
                url: link.url().to_owned(),
                updated_at,
            },
        );
        state.index(link.url(), name);
        Ok(())
    }

    async fn get_link(&self, name: &LinkName) -> Result<Option<Link>> {
        let state = self.state.lock();
        state
            .links
            .get(name)
            .map(|entry| entry_to_link(name, entry))
            .transpose()
    }

    async fn delete_link(&self, name: &LinkName) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.links.remove(name) {
            state.unindex(&entry.url, name);
        }
        Ok(())
    }

    async fn rename_link(&self, link: &Link, new_name: &LinkName) -> Result<()> {
        let mut state = self.state.lock();
        if state.links.contains_key(new_name) {
            return Err(StoreError::Conflict(new_name.to_string()));
        }
        let Some(entry) = state.links.remove(link.name()) else {
            return Err(StoreError::NotFound(link.name().to_string()));
        };

        state.unindex(&entry.url, link.name());
        state.index(&entry.url, new_name);
        state.links.insert(new_name.clone(), entry);
        Ok(())
    }

    async fn list_links_by_url(&self, url: &str) -> Result<Vec<LinkName>> {
        let state = self.state.lock();
        let Some(names) = state.by_url.get(url) else {
            return Ok(Vec::new());
        };
        Ok(newest_first(names.iter().filter_map(|name| {
            state.links.get(name).map(|entry| (name, entry.updated_at))
        })))
    }

    async fn list_links(&self, _token: Option<&str>, _limit: usize) -> Result<LinkPage> {
        let state = self.state.lock();
        Ok(LinkPage::last(newest_first(
            state
                .links
                .iter()
                .map(|(name, entry)| (name, entry.updated_at)),
        )))
    }
}

/// Orders names by update time, then by name, both descending.
fn newest_first<'a>(entries: impl Iterator<Item = (&'a LinkName, Timestamp)>) -> Vec<LinkName> {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(a.0)));
    entries.into_iter().map(|(name, _)| name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;
    use shortcut_core::{LinkStore, ManualClock};
    use shortcut_test_infra::contract;
    use std::sync::Arc;

    fn store() -> (LinkStore, ManualClock) {
        let clock = ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap());
        (
            LinkStore::with_clock(InMemoryBackend::new(), clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn concrete_scenario() {
        let (store, clock) = store();
        contract::concrete_scenario(&store, &clock).await;
    }

    #[tokio::test]
    async fn create_only_conflicts() {
        let (store, _) = store();
        contract::create_only_conflicts(&store).await;
    }

    #[tokio::test]
    async fn concurrent_create_only_has_one_winner() {
        let (store, _) = store();
        contract::concurrent_create_only_has_one_winner(&store).await;
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (store, _) = store();
        contract::delete_is_idempotent(&store).await;
    }

    #[tokio::test]
    async fn url_index_follows_updates() {
        let (store, clock) = store();
        contract::url_index_follows_updates(&store, &clock).await;
    }

    #[tokio::test]
    async fn rename_moves_link_and_index() {
        let (store, clock) = store();
        contract::rename_moves_link_and_index(&store, &clock).await;
    }

    #[tokio::test]
    async fn rename_onto_existing_name_conflicts() {
        let (store, clock) = store();
        contract::rename_onto_existing_name_conflicts(&store, &clock).await;
    }

    #[tokio::test]
    async fn pagination_is_exhaustive() {
        let (store, clock) = store();
        contract::pagination_is_exhaustive(&store, &clock, 3).await;
    }

    #[tokio::test]
    async fn list_links_is_a_single_page_newest_first() {
        let (store, clock) = store();
        for name in ["a", "b", "c"] {
            let mut link = Link::new(name, "https://example.org").unwrap();
            link.save_to(&store, true).await.unwrap();
            clock.advance(SignedDuration::from_secs(1));
        }

        let page = store.list_links(None, 1).await.unwrap();
        let names: Vec<_> = page.names.iter().map(LinkName::as_str).collect();
        assert_eq!(names, ["c", "b", "a"]);
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn list_links_by_url_is_newest_first() {
        let (store, clock) = store();
        for name in ["a", "c", "b"] {
            let mut link = Link::new(name, "https://example.org").unwrap();
            link.save_to(&store, true).await.unwrap();
            clock.advance(SignedDuration::from_secs(1));
        }
        // same instant as "b", ties fall back to name
        clock.advance(SignedDuration::from_secs(-1));
        let mut tied = Link::new("d", "https://example.org").unwrap();
        tied.save_to(&store, true).await.unwrap();

        let names = store.list_links_by_url("https://example.org").await.unwrap();
        let names: Vec<_> = names.iter().map(LinkName::as_str).collect();
        assert_eq!(names, ["d", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn empty_url_buckets_are_pruned() {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = ManualClock::new(Timestamp::from_second(1_700_000_000).unwrap());
        let store = LinkStore::from_shared(backend.clone(), Arc::new(clock));

        let mut link = Link::new("a", "https://example.org").unwrap();
        link.save_to(&store, true).await.unwrap();
        link.set_url("https://example.com");
        link.save(false).await.unwrap();
        assert_eq!(backend.state.lock().by_url.len(), 1);

        store.delete_link(link.name()).await.unwrap();
        assert!(backend.is_empty());
        assert!(backend.state.lock().by_url.is_empty());
    }
}
