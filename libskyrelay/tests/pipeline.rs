//! End-to-end runs against the mock client
//!
//! Each test drives `pipeline::run` with a temp progress store, so the
//! whole fetch -> filter -> plan -> execute -> persist path is exercised.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use libskyrelay::config::{Config, SourceKind};
use libskyrelay::error::{PlatformError, SkyrelayError, StoreError};
use libskyrelay::filter::Rejection;
use libskyrelay::pipeline;
use libskyrelay::platforms::mock::{image_post, MockClient};
use libskyrelay::store::{ProgressStore, StoreMode};
use libskyrelay::types::{EmbedKind, FeedItem, FeedReason};
use libskyrelay::SortOrder;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const FEED: &str = "at://did:plc:curator/app.bsky.feed.generator/art";

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("data").join("reposted.txt")
}

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.source.uri = Some(FEED.to_string());
    config.pacing.delay = "0s".to_string();
    config.store.path = store_path(dir).to_string_lossy().to_string();
    config
}

fn minutes_ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now - Duration::minutes(minutes)
}

fn post(author: &str, rkey: &str, created_at: DateTime<Utc>) -> FeedItem {
    image_post(&format!("did:plc:{}", author), rkey, created_at)
}

fn stored_uris(dir: &TempDir) -> HashSet<String> {
    ProgressStore::load(&store_path(dir)).unwrap()
}

#[tokio::test]
async fn test_second_run_is_idempotent() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items: Vec<_> = (0..4)
        .map(|i| post(&format!("u{}", i), &format!("p{}", i), minutes_ago(now, 10 + i)))
        .collect();
    let client = MockClient::authenticated().with_feed(FEED, items);
    let config = config(&dir);

    let first = pipeline::run(&client, &config, now).await?;
    assert_eq!(first.reposted, 4);
    assert_eq!(first.liked, 4);
    assert_eq!(stored_uris(&dir).len(), 4);

    let second = pipeline::run(&client, &config, now).await?;
    assert_eq!(second.reposted, 0);
    assert_eq!(second.planned, 0);
    assert_eq!(second.rejected.get(&Rejection::AlreadyDone), Some(&4));

    // No new writes on the second run
    assert_eq!(client.repost_attempts().len(), 4);
    assert_eq!(client.like_attempts().len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_next_run_picks_up_only_new_items() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let first_item = post("a", "p1", minutes_ago(now, 40));
    let client = MockClient::authenticated().with_feed(FEED, vec![first_item.clone()]);
    let config = config(&dir);

    pipeline::run(&client, &config, now).await?;

    let new_item = post("b", "p2", minutes_ago(now, 5));
    client.set_feed(FEED, vec![new_item.clone(), first_item.clone()]);
    let second = pipeline::run(&client, &config, now).await?;

    assert_eq!(second.fetched, 2);
    assert_eq!(second.reposted, 1);
    assert_eq!(client.repost_attempts(), vec![first_item.uri, new_item.uri]);
    Ok(())
}

#[tokio::test]
async fn test_malformed_entries_do_not_abort_run() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let good = post("a", "p1", minutes_ago(now, 10));
    let client = MockClient::authenticated()
        .with_feed(FEED, vec![good.clone()])
        .with_malformed(FEED, 1);

    let summary = pipeline::run(&client, &config(&dir), now).await?;

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.reposted, 1);
    assert!(summary.render_text().contains("1 malformed"));
    assert_eq!(stored_uris(&dir), HashSet::from([good.uri]));
    Ok(())
}

#[tokio::test]
async fn test_failed_repost_is_retried_next_run() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items = vec![
        post("a", "ok", minutes_ago(now, 30)),
        post("b", "broken", minutes_ago(now, 20)),
    ];
    let broken_uri = items[1].uri.clone();
    let config = config(&dir);

    let failing = MockClient::authenticated()
        .with_feed(FEED, items.clone())
        .failing_repost(&broken_uri, PlatformError::Network("reset".to_string()));
    let first = pipeline::run(&failing, &config, now).await?;

    assert_eq!(first.reposted, 1);
    assert_eq!(first.repost_failed, 1);
    assert!(!failing.like_attempts().contains(&broken_uri));
    assert!(!stored_uris(&dir).contains(&broken_uri));

    let healthy = MockClient::authenticated().with_feed(FEED, items);
    let second = pipeline::run(&healthy, &config, now).await?;

    assert_eq!(second.reposted, 1);
    assert_eq!(healthy.repost_attempts(), vec![broken_uri.clone()]);
    assert!(stored_uris(&dir).contains(&broken_uri));
    Ok(())
}

#[tokio::test]
async fn test_partial_failure_isolation() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items: Vec<_> = (0..5)
        .map(|i| post(&format!("u{}", i), &format!("p{}", i), minutes_ago(now, 50 - i)))
        .collect();
    let failing_uri = items[1].uri.clone();
    let client = MockClient::authenticated()
        .with_feed(FEED, items.clone())
        .failing_repost(&failing_uri, PlatformError::RateLimit("429".to_string()));

    let summary = pipeline::run(&client, &config(&dir), now).await?;

    assert_eq!(summary.reposted, 4);
    assert_eq!(summary.repost_failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].uri, failing_uri);

    let attempted = client.repost_attempts();
    for item in &items[2..] {
        assert!(attempted.contains(&item.uri));
    }
    Ok(())
}

#[tokio::test]
async fn test_like_failure_keeps_item_done() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let item = post("a", "p1", minutes_ago(now, 5));
    let client = MockClient::authenticated()
        .with_feed(FEED, vec![item.clone()])
        .failing_like(&item.uri, PlatformError::Request("boom".to_string()));

    let summary = pipeline::run(&client, &config(&dir), now).await?;

    assert_eq!(summary.reposted, 1);
    assert_eq!(summary.liked, 0);
    assert_eq!(summary.like_failed, 1);
    assert!(stored_uris(&dir).contains(&item.uri));
    Ok(())
}

#[tokio::test]
async fn test_exempt_author_scenario() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let a1 = post("a", "A1", minutes_ago(now, 40));
    let a2 = post("a", "A2", minutes_ago(now, 30));
    let a3 = post("a", "A3", minutes_ago(now, 20));
    let e1 = post("e", "E1", minutes_ago(now, 10));
    // Feed order differs from creation order
    let client = MockClient::authenticated().with_feed(
        FEED,
        vec![e1.clone(), a3.clone(), a2.clone(), a1.clone()],
    );

    let mut config = config(&dir);
    config.plan.global_cap = 5;
    config.plan.per_author_cap = 2;
    config.plan.exempt_author = Some("e.test".to_string());
    config.plan.order = SortOrder::OldestFirst;

    let summary = pipeline::run(&client, &config, now).await?;

    assert_eq!(summary.eligible, 4);
    assert_eq!(summary.planned, 3);
    assert_eq!(summary.dropped_per_author, 1);
    assert_eq!(client.repost_attempts(), vec![a1.uri, a2.uri, e1.uri]);
    assert!(!stored_uris(&dir).contains(&a3.uri));
    Ok(())
}

#[tokio::test]
async fn test_quota_invariant_over_a_run() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items: Vec<_> = (0..60)
        .map(|i| post(&format!("u{}", i % 6), &format!("p{}", i), minutes_ago(now, i)))
        .collect();
    let client = MockClient::authenticated().with_feed(FEED, items);

    let mut config = config(&dir);
    config.plan.global_cap = 10;
    config.plan.per_author_cap = 3;
    config.plan.order = SortOrder::NewestFirst;

    let summary = pipeline::run(&client, &config, now).await?;

    let reposts = client.repost_attempts();
    assert!(reposts.len() <= 10);
    assert_eq!(summary.reposted, reposts.len());

    let mut per_author: HashMap<String, usize> = HashMap::new();
    for uri in &reposts {
        let author = uri.split('/').nth(2).unwrap().to_string();
        *per_author.entry(author).or_insert(0) += 1;
    }
    assert!(per_author.values().all(|&n| n <= 3));
    Ok(())
}

#[tokio::test]
async fn test_filter_rejections_are_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();

    let original = post("a", "original", minutes_ago(now, 5));
    let mut reply = post("b", "reply", minutes_ago(now, 5));
    reply.is_reply = true;
    let mut reshare = post("c", "reshare", minutes_ago(now, 5));
    reshare.reason = Some(FeedReason::Repost {
        by: "did:plc:someone".to_string(),
    });
    let stale = post("d", "stale", now - Duration::days(2));
    let mut text_only = post("e", "text", minutes_ago(now, 5));
    text_only.embed = EmbedKind::None;
    let mut undated = post("f", "undated", minutes_ago(now, 5));
    undated.created_at = None;

    let client = MockClient::authenticated().with_feed(
        FEED,
        vec![
            original.clone(),
            reply,
            reshare,
            stale,
            text_only,
            undated,
            original.clone(),
        ],
    );

    let mut config = config(&dir);
    config.filter.max_age = "8h".to_string();
    config.filter.require_media = true;

    let summary = pipeline::run(&client, &config, now).await?;

    assert_eq!(summary.fetched, 7);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.rejected.get(&Rejection::Reply), Some(&1));
    assert_eq!(summary.rejected.get(&Rejection::NotOriginal), Some(&1));
    assert_eq!(summary.rejected.get(&Rejection::Stale), Some(&1));
    assert_eq!(summary.rejected.get(&Rejection::NoMedia), Some(&1));
    assert_eq!(summary.rejected.get(&Rejection::NoTimestamp), Some(&1));
    assert_eq!(client.repost_attempts(), vec![original.uri]);
    Ok(())
}

#[tokio::test]
async fn test_action_ceiling_leaves_rest_for_next_run() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items: Vec<_> = (0..4)
        .map(|i| post(&format!("u{}", i), &format!("p{}", i), minutes_ago(now, 40 - i)))
        .collect();
    let client = MockClient::authenticated().with_feed(FEED, items);

    let mut config = config(&dir);
    config.run.max_actions = 4;

    let summary = pipeline::run(&client, &config, now).await?;

    assert!(summary.ceiling_reached);
    assert_eq!(summary.writes, 4);
    assert_eq!(summary.reposted, 2);
    assert_eq!(summary.unexecuted, 2);
    assert_eq!(stored_uris(&dir).len(), 2);

    config.run.max_actions = 0;
    let next = pipeline::run(&client, &config, now).await?;
    assert_eq!(next.reposted, 2);
    assert_eq!(stored_uris(&dir).len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_writes_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items = vec![
        post("a", "p1", minutes_ago(now, 20)),
        post("b", "p2", minutes_ago(now, 10)),
    ];
    // Dry runs do not need a write actor
    let client = MockClient::authenticated().with_feed(FEED, items);

    let mut config = config(&dir);
    config.run.dry_run = true;

    let summary = pipeline::run(&client, &config, now).await?;

    assert!(summary.dry_run);
    assert_eq!(summary.planned, 2);
    assert_eq!(summary.would_act_on.len(), 2);
    assert_eq!(summary.reposted, 0);
    assert!(client.write_calls().is_empty());
    assert!(!store_path(&dir).exists());
    Ok(())
}

#[tokio::test]
async fn test_source_failure_aborts_before_writes() -> Result<()> {
    let dir = TempDir::new()?;
    let client = MockClient::authenticated()
        .failing_fetch(PlatformError::Network("connection refused".to_string()));

    let result = pipeline::run(&client, &config(&dir), Utc::now()).await;

    match result {
        Err(e @ SkyrelayError::SourceFetch { .. }) => assert_eq!(e.exit_code(), 1),
        other => panic!("Expected SourceFetch error, got {:?}", other),
    }
    assert!(client.write_calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_run_requires_session() -> Result<()> {
    let dir = TempDir::new()?;
    let client = MockClient::new().with_feed(FEED, vec![]);

    let result = pipeline::run(&client, &config(&dir), Utc::now()).await;

    match result {
        Err(e @ SkyrelayError::Platform(PlatformError::Authentication(_))) => {
            assert_eq!(e.exit_code(), 2)
        }
        other => panic!("Expected authentication error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_locked_store_aborts_run() -> Result<()> {
    let dir = TempDir::new()?;
    let _held = ProgressStore::open(store_path(&dir), StoreMode::Append, None)?;
    let client = MockClient::authenticated().with_feed(FEED, vec![]);

    let result = pipeline::run(&client, &config(&dir), Utc::now()).await;

    assert!(matches!(
        result,
        Err(SkyrelayError::Store(StoreError::Locked(_)))
    ));
    assert!(client.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_retention_prunes_old_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().unwrap())?;

    let old = (now - Duration::days(40)).to_rfc3339();
    let recent = (now - Duration::days(1)).to_rfc3339();
    fs::write(
        &path,
        format!("at://old/1\t{}\nat://recent/1\t{}\nat://legacy/1\n", old, recent),
    )?;

    let item = post("a", "p1", minutes_ago(now, 5));
    let client = MockClient::authenticated().with_feed(FEED, vec![item.clone()]);

    let mut config = config(&dir);
    config.store.retention = Some("30d".to_string());

    let summary = pipeline::run(&client, &config, now).await?;

    assert_eq!(summary.pruned, 1);
    let stored = stored_uris(&dir);
    assert!(!stored.contains("at://old/1"));
    assert!(stored.contains("at://recent/1"));
    assert!(stored.contains("at://legacy/1"));
    assert!(stored.contains(&item.uri));
    assert_eq!(summary.store_entries, 3);
    Ok(())
}

#[tokio::test]
async fn test_overwrite_mode_persists_at_end() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let items = vec![
        post("a", "p1", minutes_ago(now, 20)),
        post("b", "p2", minutes_ago(now, 10)),
    ];
    let client = MockClient::authenticated().with_feed(FEED, items.clone());

    let mut config = config(&dir);
    config.store.mode = StoreMode::Overwrite;

    pipeline::run(&client, &config, now).await?;

    let content = fs::read_to_string(store_path(&dir))?;
    assert_eq!(content, format!("{}\n{}\n", items[0].uri, items[1].uri));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_store_fails_safe() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().unwrap())?;
    fs::write(&path, "at://x/1\tnot-a-timestamp\n")?;

    let item = post("a", "p1", minutes_ago(now, 5));
    let client = MockClient::authenticated().with_feed(FEED, vec![item.clone()]);

    let summary = pipeline::run(&client, &config(&dir), now).await?;

    assert!(summary.store_degraded);
    assert_eq!(summary.reposted, 1);
    assert!(dir.path().join("data").join("reposted.txt.corrupt").exists());
    assert_eq!(stored_uris(&dir), HashSet::from([item.uri]));
    Ok(())
}

#[tokio::test]
async fn test_list_source() -> Result<()> {
    let dir = TempDir::new()?;
    let now = Utc::now();
    let list = "at://did:plc:curator/app.bsky.graph.list/artists";
    let client = MockClient::authenticated()
        .with_list(list, &["did:plc:a", "did:plc:b"])
        .with_author_feed("did:plc:a", vec![post("a", "p1", minutes_ago(now, 15))])
        .with_author_feed("did:plc:b", vec![post("b", "p2", minutes_ago(now, 25))]);

    let mut config = config(&dir);
    config.source.kind = SourceKind::List;
    config.source.uri = Some(list.to_string());

    let summary = pipeline::run(&client, &config, now).await?;

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.reposted, 2);
    // Oldest first across authors
    assert_eq!(
        client.repost_attempts(),
        vec![
            "at://did:plc:b/app.bsky.feed.post/p2".to_string(),
            "at://did:plc:a/app.bsky.feed.post/p1".to_string(),
        ]
    );
    Ok(())
}
