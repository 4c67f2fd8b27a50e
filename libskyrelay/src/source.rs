//! Candidate retrieval
//!
//! Fetches the raw items for one run from a feed generator, the members of a
//! list, or an explicit author set. Any fetch failure aborts the run before a
//! single write is issued.

use tracing::{debug, info};

use crate::config::{SourceConfig, SourceKind};
use crate::error::{Result, SkyrelayError};
use crate::platforms::SocialClient;
use crate::types::FeedPage;

/// Fetch every item for the configured source, in feed order
///
/// Author-based sources concatenate each author's feed in turn. Items are
/// not deduplicated here; [`select`](crate::filter::select) keeps the first
/// occurrence of each uri. Entries the client could not normalize are
/// summed into [`FeedPage::malformed`].
///
/// # Errors
///
/// Returns `SkyrelayError::SourceFetch` if any request fails, or
/// `SkyrelayError::InvalidInput` if the source has nothing to fetch.
pub async fn collect(client: &dyn SocialClient, source: &SourceConfig) -> Result<FeedPage> {
    let filter = source.author_filter.as_deref();

    let page = match source.kind {
        SourceKind::Feed => {
            let uri = required_uri(source)?;
            client
                .fetch_feed(uri, source.limit)
                .await
                .map_err(|e| SkyrelayError::source_fetch(format!("feed {}", uri), e))?
        }
        SourceKind::List => {
            let uri = required_uri(source)?;
            let members = client
                .fetch_list_members(uri)
                .await
                .map_err(|e| SkyrelayError::source_fetch(format!("list {}", uri), e))?;
            info!(list = %uri, members = members.len(), "Resolved list members");
            fetch_authors(client, &members, source.limit, filter).await?
        }
        SourceKind::Authors => {
            let authors: Vec<String> = source
                .authors
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            if authors.is_empty() {
                return Err(SkyrelayError::InvalidInput(
                    "Author source has no authors".to_string(),
                ));
            }
            fetch_authors(client, &authors, source.limit, filter).await?
        }
    };

    info!(
        source = ?source.kind,
        platform = client.name(),
        items = page.len(),
        malformed = page.malformed,
        "Fetched candidate items"
    );
    Ok(page)
}

fn required_uri(source: &SourceConfig) -> Result<&str> {
    source
        .uri
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| SkyrelayError::InvalidInput("Source uri is required".to_string()))
}

async fn fetch_authors(
    client: &dyn SocialClient,
    authors: &[String],
    limit: u32,
    filter: Option<&str>,
) -> Result<FeedPage> {
    let mut page = FeedPage::default();
    for author in authors {
        let fetched = client
            .fetch_author_feed(author, limit, filter)
            .await
            .map_err(|e| SkyrelayError::source_fetch(format!("author feed {}", author), e))?;
        debug!(author = %author, items = fetched.len(), "Fetched author feed");
        page.extend(fetched);
    }
    Ok(page)
}
