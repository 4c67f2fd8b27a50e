//! Mock client implementation for testing
//!
//! Serves canned feeds and records every call, so the pipeline can be driven
//! end to end without credentials or network access. Clones share state:
//! keep one handle in the test and hand the other to the code under test.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, PlatformResult};
use crate::platforms::SocialClient;
use crate::types::{ActionKind, EmbedKind, FeedItem, FeedPage, Subject};

/// One observed call against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Authenticate,
    FetchFeed(String),
    FetchAuthorFeed(String),
    FetchListMembers(String),
    Write(ActionKind, String),
}

#[derive(Debug, Default)]
struct MockState {
    feeds: HashMap<String, Vec<FeedItem>>,
    author_feeds: HashMap<String, Vec<FeedItem>>,
    lists: HashMap<String, Vec<String>>,
    /// Malformed entries reported alongside a feed or author feed
    malformed: HashMap<String, usize>,
    auth_error: Option<PlatformError>,
    fetch_error: Option<PlatformError>,
    repost_failures: HashMap<String, PlatformError>,
    like_failures: HashMap<String, PlatformError>,
    calls: Vec<MockCall>,
    write_times: Vec<tokio::time::Instant>,
}

/// Mock social client for testing
#[derive(Debug, Clone)]
pub struct MockClient {
    name: String,
    actor: String,
    authenticated: bool,
    delay: Duration,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// Create a mock that succeeds at everything and serves empty feeds
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            actor: "did:plc:curator".to_string(),
            authenticated: false,
            delay: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock that is already authenticated
    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            ..Self::new()
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Simulate network latency on every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_feed(self, feed_uri: &str, items: Vec<FeedItem>) -> Self {
        self.state
            .lock()
            .unwrap()
            .feeds
            .insert(feed_uri.to_string(), items);
        self
    }

    pub fn with_author_feed(self, author: &str, items: Vec<FeedItem>) -> Self {
        self.state
            .lock()
            .unwrap()
            .author_feeds
            .insert(author.to_string(), items);
        self
    }

    /// Report `count` dropped entries whenever `feed_or_author` is fetched
    pub fn with_malformed(self, feed_or_author: &str, count: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .malformed
            .insert(feed_or_author.to_string(), count);
        self
    }

    pub fn with_list(self, list_uri: &str, members: &[&str]) -> Self {
        self.state.lock().unwrap().lists.insert(
            list_uri.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub fn failing_auth(self, error: PlatformError) -> Self {
        self.state.lock().unwrap().auth_error = Some(error);
        self
    }

    /// Make every fetch fail
    pub fn failing_fetch(self, error: PlatformError) -> Self {
        self.state.lock().unwrap().fetch_error = Some(error);
        self
    }

    /// Make the repost of `uri` fail
    pub fn failing_repost(self, uri: &str, error: PlatformError) -> Self {
        self.state
            .lock()
            .unwrap()
            .repost_failures
            .insert(uri.to_string(), error);
        self
    }

    /// Make the like of `uri` fail
    pub fn failing_like(self, uri: &str, error: PlatformError) -> Self {
        self.state
            .lock()
            .unwrap()
            .like_failures
            .insert(uri.to_string(), error);
        self
    }

    /// Replace the items served for a feed (between runs)
    pub fn set_feed(&self, feed_uri: &str, items: Vec<FeedItem>) {
        self.state
            .lock()
            .unwrap()
            .feeds
            .insert(feed_uri.to_string(), items);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Write calls attempted, successful or not
    pub fn write_calls(&self) -> Vec<(ActionKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Write(kind, uri) => Some((kind, uri)),
                _ => None,
            })
            .collect()
    }

    /// Uris whose repost was attempted
    pub fn repost_attempts(&self) -> Vec<String> {
        self.attempts(ActionKind::Repost)
    }

    /// Uris whose like was attempted
    pub fn like_attempts(&self) -> Vec<String> {
        self.attempts(ActionKind::Like)
    }

    /// Uris reposted successfully
    pub fn reposted(&self) -> Vec<String> {
        let failures: HashSet<String> = self
            .state
            .lock()
            .unwrap()
            .repost_failures
            .keys()
            .cloned()
            .collect();
        self.repost_attempts()
            .into_iter()
            .filter(|uri| !failures.contains(uri))
            .collect()
    }

    /// Instants at which writes were issued (tokio clock, so paused time works)
    pub fn write_times(&self) -> Vec<tokio::time::Instant> {
        self.state.lock().unwrap().write_times.clone()
    }

    fn attempts(&self, kind: ActionKind) -> Vec<String> {
        self.write_calls()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, uri)| uri)
            .collect()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    async fn simulate_latency(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }

    fn check_fetch(&self) -> PlatformResult<()> {
        if !self.authenticated {
            return Err(PlatformError::Authentication(
                "Not authenticated".to_string(),
            ));
        }
        match &self.state.lock().unwrap().fetch_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn write(&self, kind: ActionKind, actor: &str, subject: &Subject) -> PlatformResult<String> {
        self.record(MockCall::Write(kind, subject.uri.clone()));
        self.state
            .lock()
            .unwrap()
            .write_times
            .push(tokio::time::Instant::now());
        self.simulate_latency().await;

        if !self.authenticated {
            return Err(PlatformError::Authentication(
                "Not authenticated".to_string(),
            ));
        }

        let failure = {
            let state = self.state.lock().unwrap();
            match kind {
                ActionKind::Repost => state.repost_failures.get(&subject.uri).cloned(),
                ActionKind::Like => state.like_failures.get(&subject.uri).cloned(),
            }
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let rkey = subject.uri.rsplit('/').next().unwrap_or_default();
        Ok(format!("at://{}/{}/{}", actor, kind.collection(), rkey))
    }
}

#[async_trait]
impl SocialClient for MockClient {
    async fn authenticate(&mut self) -> PlatformResult<()> {
        self.record(MockCall::Authenticate);
        self.simulate_latency().await;

        if let Some(error) = self.state.lock().unwrap().auth_error.clone() {
            return Err(error);
        }
        self.authenticated = true;
        Ok(())
    }

    fn actor_id(&self) -> Option<&str> {
        self.authenticated.then_some(self.actor.as_str())
    }

    async fn fetch_feed(&self, feed_uri: &str, limit: u32) -> PlatformResult<FeedPage> {
        self.record(MockCall::FetchFeed(feed_uri.to_string()));
        self.simulate_latency().await;
        self.check_fetch()?;

        let state = self.state.lock().unwrap();
        let items = state.feeds.get(feed_uri).ok_or_else(|| {
            PlatformError::Validation(format!("InvalidRequest: unknown feed {}", feed_uri))
        })?;
        Ok(FeedPage {
            items: items.iter().take(limit as usize).cloned().collect(),
            malformed: state.malformed.get(feed_uri).copied().unwrap_or(0),
        })
    }

    async fn fetch_author_feed(
        &self,
        author: &str,
        limit: u32,
        _filter: Option<&str>,
    ) -> PlatformResult<FeedPage> {
        self.record(MockCall::FetchAuthorFeed(author.to_string()));
        self.simulate_latency().await;
        self.check_fetch()?;

        let state = self.state.lock().unwrap();
        Ok(FeedPage {
            items: state
                .author_feeds
                .get(author)
                .map(|items| items.iter().take(limit as usize).cloned().collect())
                .unwrap_or_default(),
            malformed: state.malformed.get(author).copied().unwrap_or(0),
        })
    }

    async fn fetch_list_members(&self, list_uri: &str) -> PlatformResult<Vec<String>> {
        self.record(MockCall::FetchListMembers(list_uri.to_string()));
        self.simulate_latency().await;
        self.check_fetch()?;

        let state = self.state.lock().unwrap();
        state.lists.get(list_uri).cloned().ok_or_else(|| {
            PlatformError::Validation(format!("InvalidRequest: unknown list {}", list_uri))
        })
    }

    async fn create_repost(
        &self,
        actor: &str,
        subject: &Subject,
        _at: DateTime<Utc>,
    ) -> PlatformResult<String> {
        self.write(ActionKind::Repost, actor, subject).await
    }

    async fn create_like(
        &self,
        actor: &str,
        subject: &Subject,
        _at: DateTime<Utc>,
    ) -> PlatformResult<String> {
        self.write(ActionKind::Like, actor, subject).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// An original, top-level image post by `author_did`
///
/// Handle is derived from the DID (`did:plc:alice` -> `alice.test`).
pub fn image_post(author_did: &str, rkey: &str, created_at: DateTime<Utc>) -> FeedItem {
    FeedItem {
        uri: format!("at://{}/app.bsky.feed.post/{}", author_did, rkey),
        cid: format!("bafy{}", rkey),
        author_did: author_did.to_string(),
        author_handle: format!("{}.test", author_did.trim_start_matches("did:plc:")),
        created_at: Some(created_at),
        indexed_at: Some(created_at),
        is_reply: false,
        reason: None,
        embed: EmbedKind::Image,
    }
}
