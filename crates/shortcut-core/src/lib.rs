//! Core types and traits for the Shortcut link store.
//!
//! This crate defines the [`Link`] entity, the [`LinkBackend`] contract that
//! every storage backend implements, and the [`LinkStore`] handle callers
//! use to reach whichever backend was injected.

pub mod clock;
pub mod error;
pub mod link;
pub mod name;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError, ValidationError};
pub use link::Link;
pub use name::LinkName;
pub use retry::{NameGenerator, RandomNameGenerator, RetryPolicy};
pub use store::{LinkBackend, LinkPage, LinkStore, DEFAULT_PAGE_LIMIT};
