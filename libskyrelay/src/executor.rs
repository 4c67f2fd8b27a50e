//! Action executor
//!
//! Walks the plan in order and, for each item, reposts and then likes it.
//! A failed write only affects its own item; the run always moves on to the
//! next planned item. Only a successful repost marks an item done in the
//! progress store, so an item whose repost failed is offered again on the
//! next run. Nothing is retried within a run.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::ActionError;
use crate::pacing::Pacer;
use crate::platforms::SocialClient;
use crate::store::ProgressStore;
use crate::types::{ActionKind, ActionRecord, CandidateItem, ItemState};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Like each item after reposting it
    pub like: bool,
    /// Safety ceiling on write calls (reposts and likes) for the whole run
    pub max_actions: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            like: true,
            max_actions: None,
        }
    }
}

/// Outcome of executing a plan
#[derive(Debug, Clone, Default)]
pub struct Execution {
    /// One record per item that was started, in plan order
    pub records: Vec<ActionRecord>,
    /// Write calls issued, successful or not
    pub writes: usize,
    pub ceiling_reached: bool,
    /// Planned items never started because the ceiling was reached
    pub unexecuted: usize,
    /// Reposts that succeeded but could not be written to the store right away
    pub store_errors: usize,
}

impl Execution {
    pub fn count(&self, state: ItemState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    pub fn reposted(&self) -> usize {
        self.records.iter().filter(|r| r.repost_succeeded).count()
    }

    pub fn liked(&self) -> usize {
        self.records.iter().filter(|r| r.like_succeeded).count()
    }
}

pub struct Executor<'a> {
    client: &'a dyn SocialClient,
    actor: String,
    pacer: Pacer,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    /// Create an executor writing as `actor` (the account DID)
    pub fn new(
        client: &'a dyn SocialClient,
        actor: impl Into<String>,
        pacer: Pacer,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            client,
            actor: actor.into(),
            pacer,
            config,
        }
    }

    /// Write calls the plan will need, bounded by the ceiling
    pub fn planned_writes(&self, items: usize) -> usize {
        let per_item = if self.config.like { 2 } else { 1 };
        let writes = items * per_item;
        match self.config.max_actions {
            Some(max) => writes.min(max),
            None => writes,
        }
    }

    fn ceiling_hit(&self, writes: usize) -> bool {
        self.config.max_actions.is_some_and(|max| writes >= max)
    }

    /// Execute the plan, recording completed reposts in `store`
    pub async fn execute(&self, plan: &[CandidateItem], store: &mut ProgressStore) -> Execution {
        let planned_writes = self.planned_writes(plan.len());
        let mut execution = Execution::default();

        info!(
            items = plan.len(),
            planned_writes,
            like = self.config.like,
            "Executing plan"
        );

        for (index, item) in plan.iter().enumerate() {
            if self.ceiling_hit(execution.writes) {
                execution.ceiling_reached = true;
                execution.unexecuted = plan.len() - index;
                warn!(
                    writes = execution.writes,
                    remaining = execution.unexecuted,
                    "Action ceiling reached, leaving remaining items for the next run"
                );
                break;
            }

            let subject = item.subject();
            let mut record = ActionRecord::planned(item);

            self.pacer.pause(execution.writes, planned_writes).await;
            record.state = ItemState::Reposting;
            execution.writes += 1;

            match self
                .client
                .create_repost(&self.actor, &subject, Utc::now())
                .await
            {
                Ok(repost_uri) => {
                    record.state = ItemState::Reposted;
                    record.repost_succeeded = true;
                    info!(uri = %item.uri, author = %item.author_handle, repost = %repost_uri, "Reposted");

                    if let Err(e) = store.mark_done(&item.uri, Utc::now()) {
                        execution.store_errors += 1;
                        error!(uri = %item.uri, error = %e, "Failed to record repost in progress store");
                    }
                }
                Err(e) => {
                    warn!(
                        uri = %item.uri,
                        transient = e.is_transient(),
                        error = %e,
                        "Repost failed, item stays eligible"
                    );
                    record.state = ItemState::RepostFailed;
                    record.error = Some(ActionError {
                        action: ActionKind::Repost,
                        error: e,
                    });
                    execution.records.push(record);
                    continue;
                }
            }

            if self.config.like {
                if self.ceiling_hit(execution.writes) {
                    execution.ceiling_reached = true;
                    execution.unexecuted = plan.len() - index - 1;
                    warn!(
                        uri = %item.uri,
                        writes = execution.writes,
                        "Action ceiling reached before like"
                    );
                    execution.records.push(record);
                    break;
                }

                self.pacer.pause(execution.writes, planned_writes).await;
                record.state = ItemState::Liking;
                execution.writes += 1;

                match self
                    .client
                    .create_like(&self.actor, &subject, Utc::now())
                    .await
                {
                    Ok(_) => {
                        record.state = ItemState::Liked;
                        record.like_succeeded = true;
                    }
                    Err(e) => {
                        warn!(uri = %item.uri, error = %e, "Like failed, repost kept");
                        record.state = ItemState::LikeFailed;
                        record.error = Some(ActionError {
                            action: ActionKind::Like,
                            error: e,
                        });
                    }
                }
            }

            execution.records.push(record);
        }

        info!(
            reposted = execution.reposted(),
            liked = execution.liked(),
            writes = execution.writes,
            "Plan executed"
        );
        execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::pacing::PacingPolicy;
    use crate::platforms::mock::MockClient;
    use crate::store::StoreMode;
    use crate::types::{EmbedKind, TimestampSource};
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::time::Duration;
    use tempfile::TempDir;

    fn candidate(n: usize) -> CandidateItem {
        let created_at = DateTime::parse_from_rfc3339("2026-10-16T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + ChronoDuration::minutes(n as i64);
        CandidateItem {
            uri: format!("at://did:plc:u{}/app.bsky.feed.post/{}", n, n),
            content_id: format!("bafy{}", n),
            author_id: format!("did:plc:u{}", n),
            author_handle: format!("u{}.test", n),
            created_at,
            timestamp_source: TimestampSource::Record,
            is_reply: false,
            is_reshare_of_other: false,
            has_media: true,
            embed_kind: EmbedKind::Image,
            arrival: n,
        }
    }

    fn store(dir: &TempDir) -> ProgressStore {
        ProgressStore::open(dir.path().join("done.txt"), StoreMode::Append, None).unwrap()
    }

    fn executor(client: &MockClient, config: ExecutorConfig) -> Executor<'_> {
        Executor::new(client, "did:plc:curator", Pacer::immediate(), config)
    }

    #[tokio::test]
    async fn test_repost_then_like_each_item() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let client = MockClient::authenticated();
        let plan: Vec<_> = (0..3).map(candidate).collect();

        let execution = executor(&client, ExecutorConfig::default())
            .execute(&plan, &mut store)
            .await;

        assert_eq!(execution.writes, 6);
        assert_eq!(execution.count(ItemState::Liked), 3);
        assert!(!execution.ceiling_reached);

        let writes = client.write_calls();
        assert_eq!(writes[0], (ActionKind::Repost, plan[0].uri.clone()));
        assert_eq!(writes[1], (ActionKind::Like, plan[0].uri.clone()));
        assert_eq!(writes[2], (ActionKind::Repost, plan[1].uri.clone()));

        for item in &plan {
            assert!(store.contains(&item.uri));
        }
    }

    #[tokio::test]
    async fn test_repost_failure_skips_like_and_store() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let plan: Vec<_> = (0..3).map(candidate).collect();
        let client = MockClient::authenticated().failing_repost(
            &plan[1].uri,
            PlatformError::RateLimit("RateLimitExceeded".to_string()),
        );

        let execution = executor(&client, ExecutorConfig::default())
            .execute(&plan, &mut store)
            .await;

        let failed = &execution.records[1];
        assert_eq!(failed.state, ItemState::RepostFailed);
        assert!(!failed.repost_succeeded);
        assert_eq!(failed.error.as_ref().unwrap().action, ActionKind::Repost);

        assert!(!client.like_attempts().contains(&plan[1].uri));
        assert!(!store.contains(&plan[1].uri));

        // Items after the failure are unaffected
        assert_eq!(execution.records[2].state, ItemState::Liked);
        assert!(store.contains(&plan[2].uri));
        assert_eq!(execution.writes, 5);
    }

    #[tokio::test]
    async fn test_like_failure_still_marks_done() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let plan = vec![candidate(0)];
        let client = MockClient::authenticated()
            .failing_like(&plan[0].uri, PlatformError::Network("timeout".to_string()));

        let execution = executor(&client, ExecutorConfig::default())
            .execute(&plan, &mut store)
            .await;

        let record = &execution.records[0];
        assert_eq!(record.state, ItemState::LikeFailed);
        assert!(record.repost_succeeded);
        assert!(!record.like_succeeded);
        assert!(record.marks_done());
        assert!(store.contains(&plan[0].uri));
        assert_eq!(client.reposted(), vec![plan[0].uri.clone()]);
    }

    #[tokio::test]
    async fn test_like_disabled() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let client = MockClient::authenticated();
        let plan: Vec<_> = (0..2).map(candidate).collect();
        let config = ExecutorConfig {
            like: false,
            max_actions: None,
        };

        let execution = executor(&client, config).execute(&plan, &mut store).await;

        assert_eq!(execution.writes, 2);
        assert_eq!(execution.count(ItemState::Reposted), 2);
        assert!(client.like_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_ceiling_between_repost_and_like() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let client = MockClient::authenticated();
        let plan: Vec<_> = (0..4).map(candidate).collect();
        let config = ExecutorConfig {
            like: true,
            max_actions: Some(3),
        };

        let execution = executor(&client, config).execute(&plan, &mut store).await;

        assert!(execution.ceiling_reached);
        assert_eq!(execution.writes, 3);
        assert_eq!(execution.records.len(), 2);
        assert_eq!(execution.records[0].state, ItemState::Liked);
        assert_eq!(execution.records[1].state, ItemState::Reposted);
        assert_eq!(execution.unexecuted, 2);

        assert!(store.contains(&plan[1].uri));
        assert!(!store.contains(&plan[2].uri));
        assert!(!store.contains(&plan[3].uri));
    }

    #[tokio::test]
    async fn test_ceiling_before_item() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let client = MockClient::authenticated();
        let plan: Vec<_> = (0..5).map(candidate).collect();
        let config = ExecutorConfig {
            like: false,
            max_actions: Some(2),
        };

        let execution = executor(&client, config).execute(&plan, &mut store).await;

        assert!(execution.ceiling_reached);
        assert_eq!(execution.records.len(), 2);
        assert_eq!(execution.unexecuted, 3);
        assert_eq!(client.write_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_applies_between_every_write() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        let client = MockClient::authenticated();
        let plan: Vec<_> = (0..2).map(candidate).collect();
        let pacer = Pacer::new(
            PacingPolicy::Fixed {
                delay: Duration::from_secs(2),
            },
            Duration::ZERO,
        );

        Executor::new(&client, "did:plc:curator", pacer, ExecutorConfig::default())
            .execute(&plan, &mut store)
            .await;

        let times = client.write_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(2));
        }
    }

    #[test]
    fn test_planned_writes() {
        let client = MockClient::authenticated();
        let with_like = executor(&client, ExecutorConfig::default());
        assert_eq!(with_like.planned_writes(5), 10);

        let capped = executor(
            &client,
            ExecutorConfig {
                like: true,
                max_actions: Some(4),
            },
        );
        assert_eq!(capped.planned_writes(5), 4);
    }
}
