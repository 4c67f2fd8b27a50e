//! Skyrelay - scheduled curation for Bluesky
//!
//! Pulls items from a feed, list or author set, keeps the original, fresh
//! (and optionally media-bearing) posts, orders them under global and
//! per-author caps, then reposts and likes them at a controlled pace. A
//! progress store makes every repost happen at most once across runs.

pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod logging;
pub mod pacing;
pub mod pipeline;
pub mod plan;
pub mod platforms;
pub mod source;
pub mod store;
pub mod summary;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use config::{Config, Credentials};
pub use error::{PlatformError, Result, SkyrelayError};
pub use filter::{FilterPolicy, Rejection};
pub use plan::{QuotaConfig, SortOrder};
pub use platforms::SocialClient;
pub use store::{ProgressStore, StoreMode};
pub use summary::RunSummary;
pub use types::{ActionRecord, CandidateItem, FeedItem, FeedPage, ItemState};
