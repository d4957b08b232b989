//! Behavior every link backend must share.
//!
//! Each function drives a fresh, empty [`LinkStore`] and panics on the
//! first deviation. Listing assertions are polled, since some backends only
//! converge eventually on their secondary indexes.

use jiff::SignedDuration;
use shortcut_core::{Link, LinkName, LinkStore, ManualClock, StoreError};
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
const SETTLE_POLL: Duration = Duration::from_millis(50);

fn name(s: &str) -> LinkName {
    LinkName::new(s).expect("test names are valid")
}

async fn create(store: &LinkStore, name: &str, url: &str) -> Link {
    let mut link = Link::new(name, url).expect("test links are valid");
    link.save_to(store, true).await.expect("create link");
    link
}

/// Waits until `condition` holds, failing the test after a timeout.
pub async fn eventually<F, Fut>(condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    awaitility::at_most(SETTLE_TIMEOUT)
        .poll_interval(SETTLE_POLL)
        .until_async(condition)
        .await;
}

async fn url_lists(store: &LinkStore, url: &str, expected: &LinkName, present: bool) {
    eventually(|| async move {
        let names = store
            .list_links_by_url(url)
            .await
            .expect("list links by url");
        names.contains(expected) == present
    })
    .await;
}

/// Create, read, repoint, delete a single link.
pub async fn concrete_scenario(store: &LinkStore, clock: &ManualClock) {
    let demo = name("demo");
    let created = create(store, "demo", "https://example.org").await;

    let mut fetched = store
        .get_link(&demo)
        .await
        .expect("get link")
        .expect("link exists");
    assert_eq!(fetched.url(), "https://example.org");
    assert_eq!(fetched.updated_at(), created.updated_at());
    url_lists(store, "https://example.org", &demo, true).await;

    clock.advance(SignedDuration::from_secs(1));
    fetched.set_url("https://example.com");
    fetched.save(false).await.expect("update through fetched link");
    assert!(fetched.updated_at() > created.updated_at());

    url_lists(store, "https://example.org", &demo, false).await;
    url_lists(store, "https://example.com", &demo, true).await;

    store.delete_link(&demo).await.expect("delete link");
    assert!(store.get_link(&demo).await.expect("get link").is_none());
    url_lists(store, "https://example.com", &demo, false).await;
}

pub async fn create_only_conflicts(store: &LinkStore) {
    create(store, "taken", "https://example.org").await;

    let mut again = Link::new("taken", "https://example.com").unwrap();
    let err = again.save_to(store, true).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(ref n) if n == "taken"), "{err:?}");

    let kept = store.get_link(&name("taken")).await.unwrap().unwrap();
    assert_eq!(kept.url(), "https://example.org");

    // a plain upsert still goes through
    again.save_to(store, false).await.unwrap();
    let updated = store.get_link(&name("taken")).await.unwrap().unwrap();
    assert_eq!(updated.url(), "https://example.com");
}

/// Of many racing create-only writes for one name exactly one wins.
pub async fn concurrent_create_only_has_one_winner(store: &LinkStore) {
    const RACERS: usize = 16;

    let mut handles = Vec::with_capacity(RACERS);
    for i in 0..RACERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut link = Link::new("race", format!("https://example{i}.org")).unwrap();
            link.save_to(&store, true).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(()) => winners += 1,
            Err(StoreError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert!(store.get_link(&name("race")).await.unwrap().is_some());
}

pub async fn delete_is_idempotent(store: &LinkStore) {
    create(store, "keep", "https://example.org").await;

    store.delete_link(&name("missing")).await.unwrap();
    store.delete_link(&name("missing")).await.unwrap();

    assert!(store.get_link(&name("keep")).await.unwrap().is_some());
    url_lists(store, "https://example.org", &name("keep"), true).await;
}

/// Many names may share a URL; moving one leaves the others indexed.
pub async fn url_index_follows_updates(store: &LinkStore, clock: &ManualClock) {
    create(store, "a", "https://example.org").await;
    clock.advance(SignedDuration::from_secs(1));
    let mut b = create(store, "b", "https://example.org").await;
    clock.advance(SignedDuration::from_secs(1));
    create(store, "c", "https://example.com").await;

    let org = "https://example.org";
    eventually(|| async move {
        let mut names = store.list_links_by_url(org).await.unwrap();
        names.sort();
        names == [name("a"), name("b")]
    })
    .await;

    clock.advance(SignedDuration::from_secs(1));
    b.set_url("https://example.com");
    b.save(false).await.unwrap();

    url_lists(store, org, &name("b"), false).await;
    url_lists(store, org, &name("a"), true).await;
    url_lists(store, "https://example.com", &name("b"), true).await;
    url_lists(store, "https://example.com", &name("c"), true).await;
}

pub async fn rename_moves_link_and_index(store: &LinkStore, clock: &ManualClock) {
    let mut link = create(store, "before", "https://example.org").await;
    let stamped = link.updated_at();
    clock.advance(SignedDuration::from_secs(1));

    store.rename_link(&mut link, name("after")).await.unwrap();
    assert_eq!(link.name().as_str(), "after");

    assert!(store.get_link(&name("before")).await.unwrap().is_none());
    let moved = store.get_link(&name("after")).await.unwrap().unwrap();
    assert_eq!(moved.url(), "https://example.org");
    assert_eq!(moved.updated_at(), stamped);

    url_lists(store, "https://example.org", &name("before"), false).await;
    url_lists(store, "https://example.org", &name("after"), true).await;
}

/// Renaming onto a live name must fail and leave both links untouched.
pub async fn rename_onto_existing_name_conflicts(store: &LinkStore, clock: &ManualClock) {
    let mut a = create(store, "a", "https://a.example").await;
    clock.advance(SignedDuration::from_secs(1));
    create(store, "b", "https://b.example").await;

    let err = store.rename_link(&mut a, name("b")).await.unwrap_err();
    assert!(err.is_conflict(), "{err:?}");
    assert_eq!(a.name().as_str(), "a");

    let a = store.get_link(&name("a")).await.unwrap().unwrap();
    let b = store.get_link(&name("b")).await.unwrap().unwrap();
    assert_eq!(a.url(), "https://a.example");
    assert_eq!(b.url(), "https://b.example");

    let mut ghost = Link::new("ghost", "https://example.org").unwrap();
    let err = store.rename_link(&mut ghost, name("c")).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)), "{err:?}");
}

/// Following tokens from `None` visits every live link exactly once,
/// including links that share a timestamp.
pub async fn pagination_is_exhaustive(store: &LinkStore, clock: &ManualClock, limit: usize) {
    let mut expected = HashSet::new();
    for i in 0..7 {
        let link = create(store, &format!("spaced-{i}"), "https://example.org").await;
        expected.insert(link.name().clone());
        clock.advance(SignedDuration::from_secs(1));
    }
    for i in 0..4 {
        let link = create(store, &format!("tied-{i}"), "https://example.com").await;
        expected.insert(link.name().clone());
    }
    let deleted = create(store, "deleted", "https://example.net").await;
    store.delete_link(deleted.name()).await.unwrap();

    let expected = &expected;
    eventually(|| async move { collect_all(store, limit).await == *expected }).await;
}

async fn collect_all(store: &LinkStore, limit: usize) -> HashSet<LinkName> {
    let mut seen = HashSet::new();
    let mut token: Option<String> = None;

    // generous bound; a correct backend finishes long before
    for _ in 0..100 {
        let page = store
            .list_links(token.as_deref(), limit)
            .await
            .expect("list links");
        for name in page.names {
            assert!(seen.insert(name.clone()), "duplicate name {name}");
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => return seen,
        }
    }
    panic!("pagination did not terminate");
}
