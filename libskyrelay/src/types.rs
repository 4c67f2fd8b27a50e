//! Core types for Skyrelay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ActionError;
use crate::time::same_identity;

// ============================================================================
// Feed items
// ============================================================================

/// Kind of media nested inside a quote-with-media embed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    External,
    Unknown,
}

/// What a post embeds, as reported by the feed view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedKind {
    None,
    Image,
    Video,
    /// Link card
    External,
    /// Quote of another record
    Record,
    /// Quote of another record plus attached media
    RecordWithMedia(MediaKind),
    Unknown,
}

impl EmbedKind {
    /// True for images or video, directly or nested in a quote
    pub fn has_visual_media(&self) -> bool {
        matches!(
            self,
            EmbedKind::Image
                | EmbedKind::Video
                | EmbedKind::RecordWithMedia(MediaKind::Image)
                | EmbedKind::RecordWithMedia(MediaKind::Video)
        )
    }
}

/// Why an item shows up in a feed, when it is not simply authored there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedReason {
    /// Someone reposted the item into this feed
    Repost { by: String },
    /// Pinned to the top of an author feed
    Pin,
    Other(String),
}

/// A feed item after normalization at the source boundary
///
/// Produced by a [`SocialClient`](crate::platforms::SocialClient); every field
/// is already typed, so the filter never inspects raw payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub uri: String,
    pub cid: String,
    pub author_did: String,
    pub author_handle: String,
    /// Timestamp the author's client wrote into the record
    pub created_at: Option<DateTime<Utc>>,
    /// Timestamp at which the service indexed the record
    pub indexed_at: Option<DateTime<Utc>>,
    pub is_reply: bool,
    pub reason: Option<FeedReason>,
    pub embed: EmbedKind,
}

impl FeedItem {
    /// True when the feed entry is someone else's repost of this item
    pub fn is_reshare_of_other(&self) -> bool {
        match &self.reason {
            Some(FeedReason::Repost { by }) => {
                !(same_identity(by, &self.author_did) || same_identity(by, &self.author_handle))
            }
            _ => false,
        }
    }
}

/// Items returned by one or more feed fetches
///
/// `malformed` counts entries the client dropped because they lacked a uri,
/// cid or author and could not be acted on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub malformed: usize,
}

impl FeedPage {
    pub fn new(items: Vec<FeedItem>) -> Self {
        Self {
            items,
            malformed: 0,
        }
    }

    /// Append another page, keeping feed order
    pub fn extend(&mut self, other: FeedPage) {
        self.items.extend(other.items);
        self.malformed += other.malformed;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Candidates and actions
// ============================================================================

/// Which timestamp a candidate's `created_at` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Record,
    Indexed,
}

/// A feed item that passed every filter and may be acted on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateItem {
    pub uri: String,
    pub content_id: String,
    pub author_id: String,
    pub author_handle: String,
    pub created_at: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
    pub is_reply: bool,
    pub is_reshare_of_other: bool,
    pub has_media: bool,
    pub embed_kind: EmbedKind,
    /// Position in the fetched feed; breaks ordering ties
    pub arrival: usize,
}

impl CandidateItem {
    pub fn subject(&self) -> Subject {
        Subject {
            uri: self.uri.clone(),
            cid: self.content_id.clone(),
        }
    }
}

/// Strong reference to a record, as required by repost and like writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub uri: String,
    pub cid: String,
}

/// Write actions issued per item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Repost,
    Like,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Repost => "repost",
            ActionKind::Like => "like",
        }
    }

    /// Record collection written for this action
    pub fn collection(&self) -> &'static str {
        match self {
            ActionKind::Repost => "app.bsky.feed.repost",
            ActionKind::Like => "app.bsky.feed.like",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-item progress through the executor
///
/// `Planned -> Reposting -> {Reposted -> Liking -> {Liked | LikeFailed}} | RepostFailed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Planned,
    Reposting,
    Reposted,
    Liking,
    Liked,
    LikeFailed,
    RepostFailed,
}

impl ItemState {
    /// Whether the repost went through, which is what the store records
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            ItemState::Reposted | ItemState::Liking | ItemState::Liked | ItemState::LikeFailed
        )
    }

    /// Terminal states for a single run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Liked | ItemState::LikeFailed | ItemState::RepostFailed
        )
    }
}

/// Outcome of attempting one planned item
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub uri: String,
    pub author_id: String,
    pub state: ItemState,
    pub repost_succeeded: bool,
    pub like_succeeded: bool,
    pub error: Option<ActionError>,
}

impl ActionRecord {
    pub fn planned(item: &CandidateItem) -> Self {
        Self {
            uri: item.uri.clone(),
            author_id: item.author_id.clone(),
            state: ItemState::Planned,
            repost_succeeded: false,
            like_succeeded: false,
            error: None,
        }
    }

    /// Only a successful repost marks an item as done in the progress store
    pub fn marks_done(&self) -> bool {
        self.repost_succeeded
    }
}
