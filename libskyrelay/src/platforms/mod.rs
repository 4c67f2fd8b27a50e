//! Remote social service abstraction and implementations
//!
//! The pipeline talks to the service only through [`SocialClient`]. Clients
//! are responsible for normalizing whatever the service returns into fully
//! typed [`FeedItem`](crate::types::FeedItem)s; nothing downstream inspects
//! raw payloads.
//!
//! # Examples
//!
//! ```no_run
//! use libskyrelay::platforms::{bluesky::BlueskyClient, SocialClient};
//! use libskyrelay::config::Credentials;
//! use std::time::Duration;
//!
//! # async fn example(credentials: Credentials) -> libskyrelay::error::Result<()> {
//! let mut client = BlueskyClient::new("https://bsky.social", credentials, Duration::from_secs(30))?;
//! client.authenticate().await?;
//!
//! let page = client
//!     .fetch_feed("at://did:plc:xyz/app.bsky.feed.generator/art", 100)
//!     .await?;
//! println!("fetched {} items ({} malformed)", page.len(), page.malformed);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PlatformResult;
use crate::types::{FeedPage, Subject};

pub mod bluesky;

// Mock client is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Operations the pipeline needs from the remote service
///
/// Every method maps to exactly one remote call (list membership may page).
/// Calls are never retried here; a failure is returned to the caller, which
/// decides whether it aborts the run or only the current item.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Establish a session for the configured account
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` if the credentials are rejected.
    async fn authenticate(&mut self) -> PlatformResult<()>;

    /// Identifier (DID) of the authenticated account, used as the write actor
    fn actor_id(&self) -> Option<&str>;

    /// Items of a feed generator, in feed order
    ///
    /// Entries that cannot be normalized are dropped and counted in
    /// [`FeedPage::malformed`]; only a response that is not a feed at all
    /// is an error.
    async fn fetch_feed(&self, feed_uri: &str, limit: u32) -> PlatformResult<FeedPage>;

    /// Items of one author's feed, in feed order
    ///
    /// `filter` is passed through to the service (e.g. `posts_no_replies`).
    async fn fetch_author_feed(
        &self,
        author: &str,
        limit: u32,
        filter: Option<&str>,
    ) -> PlatformResult<FeedPage>;

    /// Account identifiers (DIDs) that are members of a list
    async fn fetch_list_members(&self, list_uri: &str) -> PlatformResult<Vec<String>>;

    /// Repost `subject` as `actor`; returns the uri of the new repost record
    async fn create_repost(
        &self,
        actor: &str,
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> PlatformResult<String>;

    /// Like `subject` as `actor`; returns the uri of the new like record
    async fn create_like(
        &self,
        actor: &str,
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> PlatformResult<String>;

    /// Lowercase identifier for logs (e.g. "bluesky")
    fn name(&self) -> &str;
}
