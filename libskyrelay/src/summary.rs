//! Run summary
//!
//! Counts for one run, printed by the binary as text or JSON on stdout.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::filter::Rejection;
use crate::plan::SortOrder;
use crate::types::{ActionKind, ActionRecord, CandidateItem, ItemState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAction {
    pub uri: String,
    pub action: ActionKind,
    pub error: String,
}

/// A planned item as reported by a dry run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedItem {
    pub uri: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

impl From<&CandidateItem> for PlannedItem {
    fn from(item: &CandidateItem) -> Self {
        Self {
            uri: item.uri.clone(),
            author: item.author_handle.clone(),
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub order: Option<SortOrder>,

    /// Items returned by the source, duplicates included
    pub fetched: usize,
    /// Source entries dropped because they could not be normalized
    pub malformed: usize,
    pub duplicates: usize,
    pub eligible: usize,
    pub rejected: BTreeMap<Rejection, usize>,

    pub planned: usize,
    pub dropped_per_author: usize,
    pub dropped_global: usize,

    pub reposted: usize,
    pub liked: usize,
    pub repost_failed: usize,
    pub like_failed: usize,
    pub writes: usize,
    pub ceiling_reached: bool,
    /// Planned items left for the next run by the ceiling
    pub unexecuted: usize,
    pub failures: Vec<FailedAction>,

    pub store_entries: usize,
    pub pruned: usize,
    /// The store could not be read at start and was reset
    pub store_degraded: bool,
    /// Persisting the store failed; progress may be lost
    pub store_error: Option<String>,

    /// Only filled for dry runs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub would_act_on: Vec<PlannedItem>,
}

impl RunSummary {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            dry_run: false,
            order: None,
            fetched: 0,
            malformed: 0,
            duplicates: 0,
            eligible: 0,
            rejected: BTreeMap::new(),
            planned: 0,
            dropped_per_author: 0,
            dropped_global: 0,
            reposted: 0,
            liked: 0,
            repost_failed: 0,
            like_failed: 0,
            writes: 0,
            ceiling_reached: false,
            unexecuted: 0,
            failures: Vec::new(),
            store_entries: 0,
            pruned: 0,
            store_degraded: false,
            store_error: None,
            would_act_on: Vec::new(),
        }
    }

    /// Summary counting only the given action records
    pub fn from_records(run_id: Uuid, started_at: DateTime<Utc>, records: &[ActionRecord]) -> Self {
        let mut summary = Self::new(run_id, started_at);
        summary.apply_records(records);
        summary
    }

    /// Add per-item outcomes to the counters
    pub fn apply_records(&mut self, records: &[ActionRecord]) {
        for record in records {
            if record.repost_succeeded {
                self.reposted += 1;
            }
            if record.like_succeeded {
                self.liked += 1;
            }
            match record.state {
                ItemState::RepostFailed => self.repost_failed += 1,
                ItemState::LikeFailed => self.like_failed += 1,
                _ => {}
            }
            if let Some(error) = &record.error {
                self.failures.push(FailedAction {
                    uri: record.uri.clone(),
                    action: error.action,
                    error: error.error.to_string(),
                });
            }
        }
    }

    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }

    /// False when progress could not be persisted
    pub fn is_success(&self) -> bool {
        self.store_error.is_none()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();

        let order = self
            .order
            .map(|o| o.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(out, "Run {} ({})", self.run_id, order);
        if self.dry_run {
            let _ = writeln!(out, "  DRY RUN: nothing was written");
        }

        let _ = writeln!(
            out,
            "  fetched:   {} ({} duplicates, {} malformed)",
            self.fetched, self.duplicates, self.malformed
        );
        let _ = writeln!(out, "  eligible:  {}", self.eligible);

        let reasons: Vec<String> = self
            .rejected
            .iter()
            .map(|(reason, count)| format!("{} {}", reason, count))
            .collect();
        if reasons.is_empty() {
            let _ = writeln!(out, "  rejected:  0");
        } else {
            let _ = writeln!(
                out,
                "  rejected:  {} ({})",
                self.rejected_total(),
                reasons.join(", ")
            );
        }

        let _ = writeln!(
            out,
            "  planned:   {} (dropped: {} per-author cap, {} global cap)",
            self.planned, self.dropped_per_author, self.dropped_global
        );

        if self.dry_run {
            for item in &self.would_act_on {
                let _ = writeln!(
                    out,
                    "    {} {} @{}",
                    item.created_at.format("%Y-%m-%d %H:%M"),
                    item.uri,
                    item.author
                );
            }
        } else {
            let _ = writeln!(out, "  reposted:  {}", self.reposted);
            let _ = writeln!(out, "  liked:     {}", self.liked);
            let _ = writeln!(
                out,
                "  failed:    {} repost, {} like",
                self.repost_failed, self.like_failed
            );
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "    {} {}: {}",
                    failure.action, failure.uri, failure.error
                );
            }
            if self.ceiling_reached {
                let _ = writeln!(
                    out,
                    "  ceiling:   reached after {} writes, {} items left for next run",
                    self.writes, self.unexecuted
                );
            }
        }

        let _ = writeln!(
            out,
            "  store:     {} entries ({} pruned){}",
            self.store_entries,
            self.pruned,
            if self.store_degraded {
                ", reset after unreadable file"
            } else {
                ""
            }
        );
        if let Some(error) = &self.store_error {
            let _ = writeln!(out, "  store error: {}", error);
        }

        let elapsed = (self.finished_at - self.started_at)
            .to_std()
            .map(|d| std::time::Duration::from_secs(d.as_secs()))
            .unwrap_or_default();
        let _ = write!(
            out,
            "  finished:  {} ({})",
            self.finished_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            humantime::format_duration(elapsed)
        );

        out
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render_text())
    }
}
