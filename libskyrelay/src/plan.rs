//! Ordering and quota enforcement
//!
//! Turns the eligible candidates into the action plan for one run: a stable
//! sort by creation time followed by a single walk that applies the global
//! and per-author caps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::time::same_identity;
use crate::types::CandidateItem;

/// Which end of the timeline is acted on first
///
/// This decides which items are dropped when a cap binds, so every
/// deployment picks one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    OldestFirst,
    NewestFirst,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::OldestFirst => write!(f, "oldest_first"),
            SortOrder::NewestFirst => write!(f, "newest_first"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaConfig {
    pub order: SortOrder,
    /// Maximum items acted on in one run, exempt author included
    pub global_cap: usize,
    /// Maximum items per author in one run
    pub per_author_cap: usize,
    /// Single author (handle or DID) not subject to `per_author_cap`
    pub exempt_author: Option<String>,
}

impl QuotaConfig {
    pub fn is_exempt(&self, item: &CandidateItem) -> bool {
        match &self.exempt_author {
            Some(exempt) => {
                same_identity(exempt, &item.author_id) || same_identity(exempt, &item.author_handle)
            }
            None => false,
        }
    }
}

/// Counters for one planning walk
#[derive(Debug, Default, Clone)]
pub struct RunQuotaState {
    pub total_actions_so_far: usize,
    pub per_author_count: HashMap<String, usize>,
}

impl RunQuotaState {
    pub fn count_for(&self, author_id: &str) -> usize {
        self.per_author_count.get(author_id).copied().unwrap_or(0)
    }

    fn admit(&mut self, author_id: &str) {
        self.total_actions_so_far += 1;
        *self
            .per_author_count
            .entry(author_id.to_string())
            .or_insert(0) += 1;
    }
}

/// Planned items plus what the caps dropped
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub items: Vec<CandidateItem>,
    pub dropped_per_author: usize,
    /// Candidates never evaluated because the global cap was reached
    pub dropped_global: usize,
}

/// Order candidates and apply the run's caps
pub fn plan(candidates: Vec<CandidateItem>, quota: &QuotaConfig) -> Vec<CandidateItem> {
    build_plan(candidates, quota).items
}

/// Like [`plan`], also reporting how many candidates each cap removed
pub fn build_plan(mut candidates: Vec<CandidateItem>, quota: &QuotaConfig) -> Plan {
    sort_candidates(&mut candidates, quota.order);

    let total = candidates.len();
    let mut state = RunQuotaState::default();
    let mut plan = Plan::default();

    for (index, item) in candidates.into_iter().enumerate() {
        if state.total_actions_so_far >= quota.global_cap {
            plan.dropped_global = total - index;
            debug!(
                global_cap = quota.global_cap,
                remaining = plan.dropped_global,
                "Global cap reached, ending plan"
            );
            break;
        }

        if !quota.is_exempt(&item) && state.count_for(&item.author_id) >= quota.per_author_cap {
            debug!(uri = %item.uri, author = %item.author_id, "Per-author cap reached, skipping");
            plan.dropped_per_author += 1;
            continue;
        }

        state.admit(&item.author_id);
        plan.items.push(item);
    }

    plan
}

/// Stable sort by creation time; equal timestamps keep feed-arrival order
fn sort_candidates(candidates: &mut [CandidateItem], order: SortOrder) {
    candidates.sort_by(|a, b| {
        let by_time = match order {
            SortOrder::OldestFirst => a.created_at.cmp(&b.created_at),
            SortOrder::NewestFirst => b.created_at.cmp(&a.created_at),
        };
        by_time.then(a.arrival.cmp(&b.arrival))
    });
}
