//! One curation run
//!
//! fetch -> filter -> plan -> execute -> persist -> summarize, strictly in
//! that order with no concurrency inside the run. A fetch failure aborts the
//! run before any write; a write failure never does.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::executor::Executor;
use crate::filter::{select, FilterPolicy, SeenSet};
use crate::plan::{build_plan, QuotaConfig};
use crate::platforms::SocialClient;
use crate::source;
use crate::store::ProgressStore;
use crate::summary::{PlannedItem, RunSummary};
use crate::types::CandidateItem;

/// Execute one run against an authenticated client
///
/// `now` anchors the freshness window. With `run.dry_run` set the plan is
/// computed and reported, but nothing is written to the service or the
/// progress store.
///
/// # Errors
///
/// Configuration problems, a locked or unusable progress store, a missing
/// session, and source fetch failures abort the run. Per-item write
/// failures are reported in the returned summary instead.
pub async fn run(client: &dyn SocialClient, config: &Config, now: DateTime<Utc>) -> Result<RunSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("run", run_id = %run_id, dry_run = config.run.dry_run);
    run_inner(client, config, now, run_id).instrument(span).await
}

async fn run_inner(
    client: &dyn SocialClient,
    config: &Config,
    now: DateTime<Utc>,
    run_id: Uuid,
) -> Result<RunSummary> {
    config.validate()?;
    let policy = config.filter_policy()?;
    let quota = config.quota();
    let store_path = config.store_path()?;

    let mut summary = RunSummary::new(run_id, now);
    summary.dry_run = config.run.dry_run;
    summary.order = Some(quota.order);

    info!(
        order = %quota.order,
        global_cap = quota.global_cap,
        per_author_cap = quota.per_author_cap,
        exempt = quota.exempt_author.as_deref().unwrap_or("-"),
        max_age = %config.filter.max_age,
        "Starting run"
    );

    if config.run.dry_run {
        let seen = match ProgressStore::load(&store_path) {
            Ok(seen) => seen,
            Err(e) => {
                warn!(path = %store_path.display(), error = %e, "Progress store unreadable, treating as empty");
                summary.store_degraded = true;
                HashSet::new()
            }
        };
        summary.store_entries = seen.len();

        plan_and_report(client, config, now, &seen, &policy, &quota, &mut summary).await?;
        summary.finished_at = Utc::now();
        info!(planned = summary.planned, "Dry run complete");
        return Ok(summary);
    }

    let actor = client
        .actor_id()
        .map(str::to_string)
        .ok_or_else(|| PlatformError::Authentication("No session; authenticate first".to_string()))?;

    let mut store = ProgressStore::open(&store_path, config.store.mode, config.store_retention()?)?;
    summary.store_degraded = store.is_degraded();

    let plan = plan_and_report(client, config, now, &store, &policy, &quota, &mut summary).await?;

    let executor = Executor::new(client, actor, config.pacer()?, config.executor_config());
    let execution = executor.execute(&plan, &mut store).await;

    summary.apply_records(&execution.records);
    summary.writes = execution.writes;
    summary.ceiling_reached = execution.ceiling_reached;
    summary.unexecuted = execution.unexecuted;

    summary.pruned = store.prune(Utc::now());
    if let Err(e) = store.flush() {
        warn!(path = %store_path.display(), error = %e, "Failed to persist progress store");
        summary.store_error = Some(e.to_string());
    }
    summary.store_entries = store.len();
    summary.finished_at = Utc::now();

    info!(
        reposted = summary.reposted,
        liked = summary.liked,
        repost_failed = summary.repost_failed,
        like_failed = summary.like_failed,
        "Run complete"
    );
    Ok(summary)
}

/// Fetch, filter and plan, recording the counts on `summary`
async fn plan_and_report(
    client: &dyn SocialClient,
    config: &Config,
    now: DateTime<Utc>,
    seen: &(dyn SeenSet + Sync),
    policy: &FilterPolicy,
    quota: &QuotaConfig,
    summary: &mut RunSummary,
) -> Result<Vec<CandidateItem>> {
    let page = source::collect(client, &config.source).await?;
    let selection = select(&page.items, now, policy, seen);

    summary.fetched = page.len();
    summary.malformed = page.malformed;
    summary.duplicates = selection.duplicates;
    summary.eligible = selection.candidates.len();
    summary.rejected = selection.rejection_counts();

    let plan = build_plan(selection.candidates, quota);
    summary.planned = plan.items.len();
    summary.dropped_per_author = plan.dropped_per_author;
    summary.dropped_global = plan.dropped_global;

    info!(
        fetched = summary.fetched,
        malformed = summary.malformed,
        eligible = summary.eligible,
        planned = summary.planned,
        "Plan ready"
    );

    if config.run.dry_run {
        summary.would_act_on = plan.items.iter().map(PlannedItem::from).collect();
    }
    Ok(plan.items)
}
