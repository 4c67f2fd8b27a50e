//! Candidate selection
//!
//! Classifies each normalized [`FeedItem`] as eligible or rejected. The checks
//! run in a fixed precedence and the first failing check decides the
//! rejection reason:
//!
//! 1. not original (someone else's repost entry)
//! 2. reply
//! 3. no timestamp (unless indexed-at fallback is allowed)
//! 4. stale (older than the freshness window)
//! 5. no media (only when media is required)
//! 6. already done (uri present in the progress store)

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::types::{CandidateItem, EmbedKind, FeedItem, MediaKind, TimestampSource};

/// Selection policy applied to every feed item
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPolicy {
    /// Items created before `now - max_age` are stale
    pub max_age: Duration,
    /// Reject items without an image or video
    pub require_media: bool,
    /// Let link cards satisfy `require_media`
    pub external_counts_as_media: bool,
    /// Use the service's indexing time when the record has no usable timestamp
    pub allow_indexed_at_fallback: bool,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(8 * 3600),
            require_media: false,
            external_counts_as_media: false,
            allow_indexed_at_fallback: false,
        }
    }
}

/// Why an item was not selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    NotOriginal,
    Reply,
    NoTimestamp,
    Stale,
    NoMedia,
    AlreadyDone,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NotOriginal => "not_original",
            Rejection::Reply => "reply",
            Rejection::NoTimestamp => "no_timestamp",
            Rejection::Stale => "stale",
            Rejection::NoMedia => "no_media",
            Rejection::AlreadyDone => "already_done",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Set of uris already acted upon
pub trait SeenSet {
    fn contains_uri(&self, uri: &str) -> bool;
}

impl SeenSet for HashSet<String> {
    fn contains_uri(&self, uri: &str) -> bool {
        self.contains(uri)
    }
}

/// Classify one item against the policy
///
/// `arrival` is the item's position in the fetched feed and is carried onto
/// the candidate for tie-breaking in the planner.
pub fn classify(
    item: &FeedItem,
    arrival: usize,
    now: DateTime<Utc>,
    policy: &FilterPolicy,
    seen: &dyn SeenSet,
) -> Result<CandidateItem, Rejection> {
    if item.is_reshare_of_other() {
        return Err(Rejection::NotOriginal);
    }

    if item.is_reply {
        return Err(Rejection::Reply);
    }

    let (created_at, timestamp_source) = match (item.created_at, item.indexed_at) {
        (Some(created), _) => (created, TimestampSource::Record),
        (None, Some(indexed)) if policy.allow_indexed_at_fallback => {
            (indexed, TimestampSource::Indexed)
        }
        _ => return Err(Rejection::NoTimestamp),
    };

    if let Some(cutoff) = freshness_cutoff(now, policy.max_age) {
        if created_at < cutoff {
            return Err(Rejection::Stale);
        }
    }

    if policy.require_media && !satisfies_media(item.embed, policy.external_counts_as_media) {
        return Err(Rejection::NoMedia);
    }

    if seen.contains_uri(&item.uri) {
        return Err(Rejection::AlreadyDone);
    }

    Ok(CandidateItem {
        uri: item.uri.clone(),
        content_id: item.cid.clone(),
        author_id: item.author_did.clone(),
        author_handle: item.author_handle.clone(),
        created_at,
        timestamp_source,
        is_reply: item.is_reply,
        is_reshare_of_other: false,
        has_media: item.embed.has_visual_media(),
        embed_kind: item.embed,
        arrival,
    })
}

/// Oldest acceptable creation time, or `None` if the window exceeds the calendar
fn freshness_cutoff(now: DateTime<Utc>, max_age: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
}

fn satisfies_media(embed: EmbedKind, external_counts: bool) -> bool {
    match embed {
        EmbedKind::Image | EmbedKind::Video => true,
        EmbedKind::External => external_counts,
        // Nested media only counts when it is itself visual
        EmbedKind::RecordWithMedia(media) => matches!(media, MediaKind::Image | MediaKind::Video),
        EmbedKind::Record | EmbedKind::None | EmbedKind::Unknown => false,
    }
}

/// Result of filtering a whole fetch
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub candidates: Vec<CandidateItem>,
    pub rejections: Vec<(String, Rejection)>,
    /// Items dropped because their uri already appeared earlier in the fetch
    pub duplicates: usize,
}

impl Selection {
    pub fn rejection_counts(&self) -> BTreeMap<Rejection, usize> {
        let mut counts = BTreeMap::new();
        for (_, reason) in &self.rejections {
            *counts.entry(*reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Filter a fetched feed, collapsing duplicate uris to their first occurrence
pub fn select(
    items: &[FeedItem],
    now: DateTime<Utc>,
    policy: &FilterPolicy,
    seen: &dyn SeenSet,
) -> Selection {
    let mut selection = Selection::default();
    let mut uris: HashSet<&str> = HashSet::with_capacity(items.len());

    for (arrival, item) in items.iter().enumerate() {
        if !uris.insert(item.uri.as_str()) {
            selection.duplicates += 1;
            continue;
        }

        match classify(item, arrival, now, policy, seen) {
            Ok(candidate) => selection.candidates.push(candidate),
            Err(reason) => {
                debug!(uri = %item.uri, reason = %reason, "Rejected feed item");
                selection.rejections.push((item.uri.clone(), reason));
            }
        }
    }

    selection
}
