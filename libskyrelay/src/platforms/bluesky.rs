//! Bluesky / AT Protocol client over XRPC
//!
//! Feed views are normalized into [`FeedItem`]s here: the record's
//! `createdAt`, the view's `indexedAt`, reply markers, the feed reason and
//! the embed type are all resolved once, at this boundary. Entries without
//! a uri, cid or author DID are dropped and counted, never fatal.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Credentials;
use crate::error::{PlatformError, PlatformResult};
use crate::platforms::SocialClient;
use crate::time::{format_timestamp, parse_timestamp};
use crate::types::{ActionKind, EmbedKind, FeedItem, FeedPage, FeedReason, MediaKind, Subject};

/// Page size for list membership requests
const LIST_PAGE_SIZE: u32 = 100;

/// Upper bound on list pages followed in one fetch
const MAX_LIST_PAGES: usize = 50;

/// Map an XRPC failure to PlatformError
///
/// Uses the HTTP status when there is one and falls back to the AT Protocol
/// error codes carried in the message (`RateLimitExceeded`, `InvalidRequest`, ...).
///
/// # Arguments
///
/// * `status` - HTTP status of the response, if the request got that far
/// * `message` - Error text (XRPC `error: message`, or the transport error)
/// * `context` - The operation context (e.g., "authentication", "repost")
fn map_bluesky_error(status: Option<u16>, message: &str, context: &str) -> PlatformError {
    let status = status.unwrap_or(0);

    if status == 401
        || status == 403
        || message.contains("AuthenticationRequired")
        || message.contains("InvalidToken")
        || message.contains("ExpiredToken")
        || message.contains("AccountTakedown")
    {
        return PlatformError::Authentication(format!(
            "Bluesky authentication failed during {}: {}. Please check your credentials and re-authenticate.",
            context, message
        ));
    }

    if message.contains("InvalidCredentials") || message.contains("AccountNotFound") {
        return PlatformError::Authentication(format!(
            "Invalid Bluesky credentials: {}. Please check your handle and app password.",
            message
        ));
    }

    if status == 429 || message.contains("RateLimitExceeded") || message.contains("TooManyRequests")
    {
        return PlatformError::RateLimit(format!(
            "Bluesky rate limit exceeded during {}: {}",
            context, message
        ));
    }

    if status == 400
        || message.contains("InvalidRequest")
        || message.contains("InvalidRecord")
        || message.contains("InvalidSwap")
    {
        return PlatformError::Validation(format!(
            "Bluesky rejected the request during {}: {}",
            context, message
        ));
    }

    if matches!(status, 502..=504) {
        return PlatformError::Network(format!(
            "Bluesky PDS unavailable during {} (HTTP {}): {}",
            context, status, message
        ));
    }

    PlatformError::Request(format!(
        "Bluesky operation failed during {}: {}",
        context, message
    ))
}

fn map_transport_error(error: reqwest::Error, context: &str) -> PlatformError {
    if error.is_decode() {
        return PlatformError::Request(format!(
            "Unexpected Bluesky response during {}: {}",
            context, error
        ));
    }
    if let Some(status) = error.status() {
        return map_bluesky_error(Some(status.as_u16()), &error.to_string(), context);
    }
    PlatformError::Network(format!(
        "Network error while connecting to Bluesky PDS during {}: {}",
        context, error
    ))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    access_jwt: String,
    did: String,
    handle: String,
}

/// Entries stay raw until normalization so one bad entry cannot fail the page
#[derive(Debug, Deserialize)]
struct FeedResponse {
    feed: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct FeedViewPost {
    post: PostView,
    #[serde(default)]
    reply: Option<Value>,
    #[serde(default)]
    reason: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostView {
    uri: String,
    cid: String,
    author: ProfileView,
    #[serde(default)]
    record: Value,
    #[serde(default)]
    embed: Option<Value>,
    #[serde(default)]
    indexed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileView {
    did: String,
    #[serde(default)]
    handle: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListItemView>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItemView {
    subject: ProfileView,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a `getFeed` / `getAuthorFeed` response
///
/// Entries that do not deserialize, or that lack a uri, cid or author DID,
/// are skipped and counted in `malformed`.
fn normalize_feed(response: FeedResponse, context: &str) -> FeedPage {
    let mut page = FeedPage::default();

    for (position, entry) in response.feed.into_iter().enumerate() {
        let view = serde_json::from_value::<FeedViewPost>(entry)
            .map_err(|e| e.to_string())
            .and_then(|view| {
                if view.is_actionable() {
                    Ok(view)
                } else {
                    Err("empty uri, cid or author did".to_string())
                }
            });

        match view {
            Ok(view) => page.items.push(normalize(view)),
            Err(reason) => {
                tracing::debug!(context, position, reason = %reason, "Skipping malformed feed entry");
                page.malformed += 1;
            }
        }
    }

    if page.malformed > 0 {
        tracing::warn!(
            context,
            malformed = page.malformed,
            kept = page.items.len(),
            "Skipped malformed feed entries"
        );
    }
    page
}

impl FeedViewPost {
    fn is_actionable(&self) -> bool {
        !self.post.uri.trim().is_empty()
            && !self.post.cid.trim().is_empty()
            && !self.post.author.did.trim().is_empty()
    }
}

fn normalize(view: FeedViewPost) -> FeedItem {
    let post = view.post;
    let record_reply = post.record.get("reply").is_some_and(|r| !r.is_null());
    let embed = post.embed.as_ref().or_else(|| post.record.get("embed"));

    FeedItem {
        created_at: post
            .record
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        indexed_at: post.indexed_at.as_deref().and_then(parse_timestamp),
        is_reply: view.reply.is_some_and(|r| !r.is_null()) || record_reply,
        reason: view.reason.as_ref().and_then(feed_reason),
        embed: embed_kind(embed),
        uri: post.uri,
        cid: post.cid,
        author_did: post.author.did,
        author_handle: post.author.handle,
    }
}

fn type_of(value: &Value) -> &str {
    value
        .get("$type")
        .and_then(Value::as_str)
        .map(|t| t.trim_end_matches("#view"))
        .unwrap_or("")
}

fn feed_reason(reason: &Value) -> Option<FeedReason> {
    if reason.is_null() {
        return None;
    }
    match type_of(reason) {
        "app.bsky.feed.defs#reasonRepost" => {
            let by = reason
                .get("by")
                .and_then(|by| by.get("did"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(FeedReason::Repost { by: by.to_string() })
        }
        "app.bsky.feed.defs#reasonPin" => Some(FeedReason::Pin),
        other => Some(FeedReason::Other(other.to_string())),
    }
}

fn embed_kind(embed: Option<&Value>) -> EmbedKind {
    let Some(embed) = embed.filter(|e| !e.is_null()) else {
        return EmbedKind::None;
    };
    match type_of(embed) {
        "app.bsky.embed.images" => EmbedKind::Image,
        "app.bsky.embed.video" => EmbedKind::Video,
        "app.bsky.embed.external" => EmbedKind::External,
        "app.bsky.embed.record" => EmbedKind::Record,
        "app.bsky.embed.recordWithMedia" => EmbedKind::RecordWithMedia(media_kind(embed.get("media"))),
        _ => EmbedKind::Unknown,
    }
}

fn media_kind(media: Option<&Value>) -> MediaKind {
    match media.map(type_of) {
        Some("app.bsky.embed.images") => MediaKind::Image,
        Some("app.bsky.embed.video") => MediaKind::Video,
        Some("app.bsky.embed.external") => MediaKind::External,
        _ => MediaKind::Unknown,
    }
}

// ============================================================================
// Client
// ============================================================================

struct Session {
    did: String,
    handle: String,
    access_jwt: SecretString,
}

pub struct BlueskyClient {
    http: reqwest::Client,
    service: String,
    credentials: Credentials,
    session: Option<Session>,
}

impl BlueskyClient {
    /// Create a new Bluesky client
    ///
    /// # Arguments
    ///
    /// * `service` - PDS / XRPC base URL (e.g., "https://bsky.social")
    /// * `credentials` - Handle or DID plus app password
    /// * `timeout` - Upper bound on every request
    pub fn new(service: &str, credentials: Credentials, timeout: Duration) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("skyrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PlatformError::Request(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            service: service.trim_end_matches('/').to_string(),
            credentials,
            session: None,
        })
    }

    fn xrpc_url(&self, nsid: &str) -> String {
        format!("{}/xrpc/{}", self.service, nsid)
    }

    fn access_token(&self) -> PlatformResult<&str> {
        self.session
            .as_ref()
            .map(|s| s.access_jwt.expose_secret())
            .ok_or_else(|| PlatformError::Authentication("Not authenticated".to_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        nsid: &str,
        query: &[(&str, String)],
    ) -> PlatformResult<T> {
        let mut request = self.http.get(self.xrpc_url(nsid)).query(query);
        if let Ok(token) = self.access_token() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, nsid))?;
        read_response(response, nsid).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &B,
        token: Option<&str>,
    ) -> PlatformResult<T> {
        let mut request = self.http.post(self.xrpc_url(nsid)).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| map_transport_error(e, nsid))?;
        read_response(response, nsid).await
    }

    async fn create_record(
        &self,
        kind: ActionKind,
        actor: &str,
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> PlatformResult<String> {
        let token = self.access_token()?;
        let body = json!({
            "repo": actor,
            "collection": kind.collection(),
            "record": {
                "$type": kind.collection(),
                "subject": { "uri": subject.uri, "cid": subject.cid },
                "createdAt": format_timestamp(at),
            }
        });

        let response: CreateRecordResponse = self
            .post_json("com.atproto.repo.createRecord", &body, Some(token))
            .await
            .map_err(|e| with_context(e, kind.as_str()))?;

        tracing::debug!(subject = %subject.uri, record = %response.uri, "Created {} record", kind);
        Ok(response.uri)
    }
}

async fn read_response<T: DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> PlatformResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<XrpcErrorBody>(&body) {
            Ok(XrpcErrorBody {
                error: Some(code),
                message,
            }) => format!("{}: {}", code, message.unwrap_or_default()),
            _ => format!("HTTP {}: {}", status.as_u16(), body),
        };
        return Err(map_bluesky_error(Some(status.as_u16()), &message, context));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| map_transport_error(e, context))
}

/// Prefix the action name so item-level errors read well in the summary
fn with_context(error: PlatformError, action: &str) -> PlatformError {
    match error {
        PlatformError::Authentication(m) => PlatformError::Authentication(format!("{}: {}", action, m)),
        PlatformError::Validation(m) => PlatformError::Validation(format!("{}: {}", action, m)),
        PlatformError::Request(m) => PlatformError::Request(format!("{}: {}", action, m)),
        PlatformError::Network(m) => PlatformError::Network(format!("{}: {}", action, m)),
        PlatformError::RateLimit(m) => PlatformError::RateLimit(format!("{}: {}", action, m)),
    }
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, 100)
}

#[async_trait]
impl SocialClient for BlueskyClient {
    async fn authenticate(&mut self) -> PlatformResult<()> {
        tracing::debug!(
            "Creating Bluesky session for {}",
            self.credentials.identifier
        );

        let request = CreateSessionRequest {
            identifier: &self.credentials.identifier,
            password: self.credentials.password.expose_secret(),
        };
        let response: CreateSessionResponse = self
            .post_json("com.atproto.server.createSession", &request, None)
            .await
            .map_err(|e| match e {
                PlatformError::Validation(m) => {
                    map_bluesky_error(None, &format!("InvalidCredentials {}", m), "authentication")
                }
                other => other,
            })?;

        tracing::info!(handle = %response.handle, did = %response.did, "Bluesky session created");
        self.session = Some(Session {
            did: response.did,
            handle: response.handle,
            access_jwt: SecretString::from(response.access_jwt),
        });
        Ok(())
    }

    fn actor_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.did.as_str())
    }

    async fn fetch_feed(&self, feed_uri: &str, limit: u32) -> PlatformResult<FeedPage> {
        let response: FeedResponse = self
            .get_json(
                "app.bsky.feed.getFeed",
                &[
                    ("feed", feed_uri.to_string()),
                    ("limit", clamp_limit(limit).to_string()),
                ],
            )
            .await?;
        Ok(normalize_feed(response, "app.bsky.feed.getFeed"))
    }

    async fn fetch_author_feed(
        &self,
        author: &str,
        limit: u32,
        filter: Option<&str>,
    ) -> PlatformResult<FeedPage> {
        let mut query = vec![
            ("actor", author.to_string()),
            ("limit", clamp_limit(limit).to_string()),
        ];
        if let Some(filter) = filter {
            query.push(("filter", filter.to_string()));
        }
        let response: FeedResponse = self.get_json("app.bsky.feed.getAuthorFeed", &query).await?;
        Ok(normalize_feed(response, "app.bsky.feed.getAuthorFeed"))
    }

    async fn fetch_list_members(&self, list_uri: &str) -> PlatformResult<Vec<String>> {
        let mut members = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut query = vec![
                ("list", list_uri.to_string()),
                ("limit", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }

            let page: ListResponse = self.get_json("app.bsky.graph.getList", &query).await?;
            let fetched = page.items.len();
            members.extend(page.items.into_iter().map(|item| item.subject.did));

            match page.cursor {
                Some(next) if fetched > 0 => cursor = Some(next),
                _ => break,
            }
        }

        Ok(members)
    }

    async fn create_repost(
        &self,
        actor: &str,
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> PlatformResult<String> {
        self.create_record(ActionKind::Repost, actor, subject, at).await
    }

    async fn create_like(
        &self,
        actor: &str,
        subject: &Subject,
        at: DateTime<Utc>,
    ) -> PlatformResult<String> {
        self.create_record(ActionKind::Like, actor, subject, at).await
    }

    fn name(&self) -> &str {
        "bluesky"
    }
}

impl std::fmt::Debug for BlueskyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlueskyClient")
            .field("service", &self.service)
            .field("identifier", &self.credentials.identifier)
            .field("session", &self.session.as_ref().map(|s| s.handle.as_str()))
            .finish()
    }
}
