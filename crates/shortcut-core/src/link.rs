use crate::error::{Result, StoreError, ValidationError};
use crate::name::LinkName;
use crate::store::LinkStore;
use jiff::Timestamp;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A named mapping from a short name to a target URL.
///
/// A `Link` read from a store is a detached copy: changing it has no effect
/// until it is saved again. Links fetched through a [`LinkStore`] remember
/// that store, so [`Link::save`] needs no explicit handle.
#[derive(Clone)]
pub struct Link {
    name: LinkName,
    url: String,
    updated_at: Option<Timestamp>,
    store: Option<LinkStore>,
}

impl Link {
    /// Creates a validated link that is not yet associated with a store.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        let link = Self {
            name: LinkName::new(name)?,
            url: url.into(),
            updated_at: None,
            store: None,
        };
        link.validate()?;
        Ok(link)
    }

    /// Creates a link from an already validated name.
    pub fn with_name(
        name: LinkName,
        url: impl Into<String>,
    ) -> std::result::Result<Self, ValidationError> {
        let link = Self {
            name,
            url: url.into(),
            updated_at: None,
            store: None,
        };
        link.validate()?;
        Ok(link)
    }

    /// Sets the last-update timestamp, as read back from a backend.
    pub fn with_updated_at(mut self, updated_at: Option<Timestamp>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn name(&self) -> &LinkName {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    /// Returns the timestamp stamped by the store on the last save.
    ///
    /// Backends call this from `put_link`; an unstamped link never reaches a
    /// backend through [`LinkStore`].
    pub fn stamped_at(&self) -> Result<Timestamp> {
        self.updated_at.ok_or_else(|| {
            StoreError::InvalidData(format!("link '{}' has no updated_at stamp", self.name))
        })
    }

    /// The store this link was fetched from or last saved to.
    pub fn store(&self) -> Option<&LinkStore> {
        self.store.as_ref()
    }

    /// Checks the name character class and that the URL has a scheme and a host.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        LinkName::validate(self.name.as_str())?;
        validate_url(&self.url)
    }

    /// Validates, stamps and writes the link through the remembered store.
    pub async fn save(&mut self, create_only: bool) -> Result<()> {
        let store = self.store.clone().ok_or(StoreError::NoBackend)?;
        store.put_link(self, create_only).await
    }

    /// Associates the link with `store`, then saves it there.
    pub async fn save_to(&mut self, store: &LinkStore, create_only: bool) -> Result<()> {
        self.store = Some(store.clone());
        store.put_link(self, create_only).await
    }

    pub(crate) fn stamp(&mut self, now: Timestamp) {
        self.updated_at = Some(now);
    }

    pub(crate) fn attach(&mut self, store: &LinkStore) {
        self.store = Some(store.clone());
    }

    pub(crate) fn set_name(&mut self, name: LinkName) {
        self.name = name;
    }

    /// A copy of this link under another name, keeping url and timestamp.
    pub fn renamed(&self, name: LinkName) -> Self {
        Self {
            name,
            url: self.url.clone(),
            updated_at: self.updated_at,
            store: self.store.clone(),
        }
    }
}

fn validate_url(raw: &str) -> std::result::Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::MissingField("url"));
    }

    let parsed =
        url::Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(format!("{raw}: {e}")))?;

    if parsed.scheme().is_empty() || !parsed.has_host() {
        return Err(ValidationError::InvalidUrl(raw.to_string()));
    }

    Ok(())
}

/// Formats a timestamp as fixed-width RFC 3339 UTC with millisecond precision.
///
/// Every rendered value has the same width, so lexical order of the strings
/// equals chronological order. Range-keyed backends rely on this.
pub fn format_timestamp(ts: Timestamp) -> String {
    let millis = ts.as_millisecond().rem_euclid(1000);
    format!("{}.{:03}Z", ts.strftime("%Y-%m-%dT%H:%M:%S"), millis)
}

/// Parses an RFC 3339 timestamp as written by [`format_timestamp`] (or any
/// other RFC 3339 rendering).
pub fn parse_timestamp(raw: &str) -> std::result::Result<Timestamp, jiff::Error> {
    raw.parse()
}

/// Drops sub-millisecond precision so that a timestamp survives a round
/// trip through [`format_timestamp`] unchanged.
pub fn truncate_to_millis(ts: Timestamp) -> Timestamp {
    Timestamp::from_millisecond(ts.as_millisecond()).unwrap_or(ts)
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.url == other.url && self.updated_at == other.updated_at
    }
}

impl Eq for Link {}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("updated_at", &self.updated_at)
            .field("attached", &self.store.is_some())
            .finish()
    }
}

impl Serialize for Link {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Link", 3)?;
        state.serialize_field("name", self.name.as_str())?;
        state.serialize_field("url", &self.url)?;
        state.serialize_field("updated_at", &self.updated_at.map(format_timestamp))?;
        state.end()
    }
}

/// `updated_at` as it may appear on the wire.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    UnixSeconds(i64),
}

#[derive(Deserialize)]
struct RawLink {
    name: Option<String>,
    url: Option<String>,
    #[serde(default)]
    updated_at: Option<RawTimestamp>,
}

impl<'de> Deserialize<'de> for Link {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let raw = RawLink::deserialize(deserializer)?;
        let name = raw
            .name
            .ok_or_else(|| D::Error::custom(ValidationError::MissingField("name")))?;
        let url = raw
            .url
            .ok_or_else(|| D::Error::custom(ValidationError::MissingField("url")))?;
        let updated_at = match raw.updated_at {
            None => None,
            Some(RawTimestamp::Text(text)) => Some(parse_timestamp(&text).map_err(|e| {
                D::Error::custom(format!("updated_at is not an RFC 3339 timestamp: {e}"))
            })?),
            Some(RawTimestamp::UnixSeconds(secs)) => {
                Some(Timestamp::from_second(secs).map_err(D::Error::custom)?)
            }
        };

        Link::new(name, url)
            .map(|link| link.with_updated_at(updated_at))
            .map_err(D::Error::custom)
    }
}
