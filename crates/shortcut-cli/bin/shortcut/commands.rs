use crate::cli::Command;
use serde_json::{json, Value};
use shortcut_core::{
    Link, LinkName, LinkStore, RandomNameGenerator, Result, RetryPolicy, StoreError,
};
use tracing::info;

/// Runs one store command and renders its outcome as JSON.
///
/// `Init` is handled by the caller, since it needs the concrete backend.
pub async fn run(store: &LinkStore, command: Command) -> Result<Value> {
    match command {
        Command::Init => Ok(json!({ "initialized": true })),
        Command::Create { name, url } => {
            let mut link = Link::new(name, url)?;
            link.save_to(store, true).await?;
            info!(name = %link.name(), "Created link");
            Ok(json!(link))
        }
        Command::Generate {
            url,
            length,
            prefix,
            attempts,
        } => {
            let generator = RandomNameGenerator::builder()
                .length(length)
                .prefix(prefix)
                .build();
            let policy = RetryPolicy::builder().max_attempts(attempts).build();
            let link = store
                .create_with_generated_name(&url, &generator, &policy)
                .await?;
            info!(name = %link.name(), "Created link under generated name");
            Ok(json!(link))
        }
        Command::Get { name } => {
            let name = LinkName::new(name)?;
            let link = store
                .get_link(&name)
                .await?
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            Ok(json!(link))
        }
        Command::Update { name, url } => {
            let name = LinkName::new(name)?;
            let mut link = store
                .get_link(&name)
                .await?
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            link.set_url(url);
            link.save(false).await?;
            info!(name = %link.name(), "Updated link");
            Ok(json!(link))
        }
        Command::Rename { name, new_name } => {
            let name = LinkName::new(name)?;
            let new_name = LinkName::new(new_name)?;
            let mut link = store
                .get_link(&name)
                .await?
                .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
            store.rename_link(&mut link, new_name).await?;
            info!(name = %name, new_name = %link.name(), "Renamed link");
            Ok(json!(link))
        }
        Command::Delete { name } => {
            let name = LinkName::new(name)?;
            store.delete_link(&name).await?;
            Ok(json!({ "deleted": name }))
        }
        Command::ByUrl { url } => {
            let names = store.list_links_by_url(&url).await?;
            Ok(json!({ "url": url, "names": names }))
        }
        Command::List { token, limit } => {
            let page = store.list_links(token.as_deref(), limit).await?;
            Ok(json!({ "names": page.names, "next_token": page.next_token }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortcut_core::ManualClock;
    use shortcut_storage::InMemoryBackend;

    fn store() -> LinkStore {
        let clock = ManualClock::new("2023-11-14T22:13:20Z".parse().unwrap());
        LinkStore::with_clock(InMemoryBackend::new(), clock)
    }

    fn create(name: &str, url: &str) -> Command {
        Command::Create {
            name: name.into(),
            url: url.into(),
        }
    }

    #[tokio::test]
    async fn create_get_and_list() {
        let store = store();
        let created = run(&store, create("demo", "https://example.org")).await.unwrap();
        assert_eq!(
            created,
            json!({
                "name": "demo",
                "url": "https://example.org",
                "updated_at": "2023-11-14T22:13:20.000Z",
            })
        );

        let fetched = run(&store, Command::Get { name: "demo".into() }).await.unwrap();
        assert_eq!(fetched, created);

        let listed = run(
            &store,
            Command::List {
                token: None,
                limit: 10,
            },
        )
        .await
        .unwrap();
        assert_eq!(listed, json!({ "names": ["demo"], "next_token": null }));
    }

    #[tokio::test]
    async fn update_rename_delete() {
        let store = store();
        run(&store, create("demo", "https://example.org")).await.unwrap();

        let updated = run(
            &store,
            Command::Update {
                name: "demo".into(),
                url: "https://example.com".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated["url"], "https://example.com");

        let renamed = run(
            &store,
            Command::Rename {
                name: "demo".into(),
                new_name: "go/demo".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(renamed["name"], "go/demo");

        let by_url = run(
            &store,
            Command::ByUrl {
                url: "https://example.com".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(by_url["names"], json!(["go/demo"]));

        run(&store, Command::Delete { name: "go/demo".into() })
            .await
            .unwrap();
        let err = run(&store, Command::Get { name: "go/demo".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn generate_uses_prefix_and_length() {
        let store = store();
        let generated = run(
            &store,
            Command::Generate {
                url: "https://example.org".into(),
                length: 8,
                prefix: "r/".into(),
                attempts: 3,
            },
        )
        .await
        .unwrap();

        let name = generated["name"].as_str().unwrap();
        assert!(name.starts_with("r/"));
        assert_eq!(name.len(), 10);
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let store = store();
        let err = run(&store, create("bad name", "https://example.org"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = run(&store, create("demo", "not a url")).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        run(&store, create("demo", "https://example.org")).await.unwrap();
        let err = run(&store, create("demo", "https://example.org"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
