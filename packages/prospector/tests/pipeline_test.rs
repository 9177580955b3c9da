//! End-to-end pipeline and scheduler tests over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use prospector::capabilities::{Actor, Classifier, Composer, Crawler};
use prospector::dedup::DuplicateDetector;
use prospector::jobs::{recovery, JobScheduler, JobSnapshot, PipelineDeps, SchedulerConfig, StartJobError};
use prospector::pipeline::PacingPolicy;
use prospector::store::{MemoryStore, Store};
use prospector::testing::{
    inviter_bot, item, lead_bot, post, utc, FailingClassifier, KeywordClassifier, RecordingActor,
    ScriptedCrawler, StallCrawler, TemplateComposer,
};
use prospector::types::{Classification, JobKind, JobStatus, Run, SourceGroup};
use uuid::Uuid;

struct Harness {
    store: Arc<MemoryStore>,
    scheduler: Arc<JobScheduler>,
}

fn harness(
    crawler: Arc<dyn Crawler>,
    classifier: Arc<dyn Classifier>,
    actor: Arc<dyn Actor>,
) -> Harness {
    harness_with_config(crawler, classifier, actor, SchedulerConfig::default())
}

fn harness_with_config(
    crawler: Arc<dyn Crawler>,
    classifier: Arc<dyn Classifier>,
    actor: Arc<dyn Actor>,
    config: SchedulerConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let composer: Arc<dyn Composer> = Arc::new(TemplateComposer);
    let deps = PipelineDeps {
        crawler,
        classifier,
        composer,
        actor,
        detector: DuplicateDetector::default(),
        pacing: PacingPolicy::none(),
    };
    let scheduler = Arc::new(JobScheduler::new(
        Arc::clone(&store) as Arc<dyn Store>,
        deps,
        config,
    ));
    Harness { store, scheduler }
}

async fn wait_for_terminal(scheduler: &Arc<JobScheduler>, job_id: Uuid) -> JobSnapshot {
    for _ in 0..500 {
        if let Some(snap) = scheduler.job_status(job_id) {
            if snap.status.is_terminal() {
                return snap;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

async fn wait_for_running(scheduler: &Arc<JobScheduler>, job_id: Uuid) {
    for _ in 0..500 {
        if let Some(snap) = scheduler.job_status(job_id) {
            if snap.status == JobStatus::Running {
                return;
            }
            assert!(!snap.status.is_terminal(), "job finished before it could be observed running");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} never started running");
}

fn watermarked_group(bot_id: &str, group_id: &str) -> SourceGroup {
    SourceGroup {
        group_id: group_id.to_string(),
        bot_id: bot_id.to_string(),
        last_sync_watermark: Some(utc(2024, 1, 1)),
        last_run_failed: false,
        last_error: None,
    }
}

#[tokio::test]
async fn collect_stops_after_old_item_streak_and_resets_on_recent() {
    // Six dated posts, newest first, against a 2024-01-01 watermark. The two
    // old posts after the reset never reach a streak of three, so exactly the
    // three recent posts are ingested.
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![vec![
            post("p1", "a1", "newest post, clearly recent", Some(utc(2024, 1, 5))),
            post("p2", "a2", "second recent post here", Some(utc(2024, 1, 3))),
            post("p3", "a3", "stale post number one", Some(utc(2023, 12, 31))),
            post("p4", "a4", "third recent post, resets streak", Some(utc(2024, 1, 2))),
            post("p5", "a5", "stale post number two", Some(utc(2023, 12, 30))),
            post("p6", "a6", "stale post number three", Some(utc(2023, 12, 29))),
        ]],
    );
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));
    h.store.seed_group(watermarked_group("scout", "g1"));

    let started = chrono::Utc::now();
    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    let items = h.store.items();
    assert_eq!(items.len(), 3);
    let ids: Vec<&str> = items.iter().map(|i| i.external_id.as_str()).collect();
    assert!(ids.contains(&"p1") && ids.contains(&"p2") && ids.contains(&"p4"));

    // Watermark advanced to the crawl start time, not any post timestamp.
    let group = h.store.group("scout", "g1").unwrap();
    let watermark = group.last_sync_watermark.unwrap();
    assert!(watermark >= started);
    assert!(!group.last_run_failed);
}

#[tokio::test]
async fn collect_stops_on_three_consecutive_old_items() {
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![
            vec![
                post("p1", "a1", "fresh post before the old run", Some(utc(2024, 1, 4))),
                post("p2", "a2", "old one", Some(utc(2023, 12, 31))),
                post("p3", "a3", "old two", Some(utc(2023, 12, 30))),
                post("p4", "a4", "old three", Some(utc(2023, 12, 29))),
            ],
            // A later page that must never be fetched.
            vec![post("p5", "a5", "would be fresh", Some(utc(2024, 1, 5)))],
        ],
    );
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));
    h.store.seed_group(watermarked_group("scout", "g1"));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_terminal(&h.scheduler, job_id).await;

    let items = h.store.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].external_id, "p1");
}

#[tokio::test]
async fn rerun_after_watermark_advance_ingests_nothing() {
    let crawler = Arc::new(ScriptedCrawler::new().with_pages(
        "g1",
        vec![vec![
            post("p1", "a1", "only post in the group", Some(utc(2024, 1, 5))),
        ]],
    ));
    let h = harness(
        Arc::clone(&crawler) as Arc<dyn Crawler>,
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let first = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_terminal(&h.scheduler, first).await;
    assert_eq!(h.store.items().len(), 1);

    let second = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, second).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(h.store.items().len(), 1, "rerun must not duplicate items");
}

#[tokio::test]
async fn exact_duplicate_by_same_author_is_never_persisted_twice() {
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![vec![
            post("p1", "a1", "Selling a blue couch, great condition!", Some(utc(2024, 1, 5))),
            // Same author, same normalized content, different external id.
            post("p2", "a1", "selling a blue couch GREAT condition", Some(utc(2024, 1, 4))),
            // Different author, same content: allowed.
            post("p3", "a2", "Selling a blue couch, great condition!", Some(utc(2024, 1, 3))),
        ]],
    );
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["couch"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_terminal(&h.scheduler, job_id).await;

    let items = h.store.items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().any(|i| i.external_id == "p1"));
    assert!(items.iter().any(|i| i.external_id == "p3"));
}

#[tokio::test]
async fn classify_demotes_reworded_repost_by_same_author() {
    let h = harness(
        Arc::new(ScriptedCrawler::new()),
        Arc::new(KeywordClassifier::new(&["babysitter"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let mut prior = item("scout", "g1", "old1", "a1", "Looking for a babysitter this weekend, DM me");
    prior.classification = Classification::Included;
    h.store.seed_item(prior);
    // Same author, lightly reworded: should be demoted.
    h.store.seed_item(item(
        "scout", "g1", "new1", "a1",
        "Looking for a babysitter this weekend, DM me!!",
    ));
    // Different author, same text: stays included.
    h.store.seed_item(item(
        "scout", "g1", "new2", "a2",
        "Looking for a babysitter this weekend, DM me",
    ));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Classify, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;
    assert_eq!(snap.status, JobStatus::Completed);

    let items = h.store.items();
    let by_id = |ext: &str| items.iter().find(|i| i.external_id == ext).unwrap();
    assert_eq!(by_id("new1").classification, Classification::Excluded);
    assert_eq!(by_id("new2").classification, Classification::Included);
}

#[tokio::test]
async fn act_skips_failing_item_and_continues() {
    let actor = Arc::new(RecordingActor::failing_for(&["a2"]));
    let h = harness(
        Arc::new(ScriptedCrawler::new()),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::clone(&actor) as Arc<dyn Actor>,
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));
    for author in ["a1", "a2", "a3"] {
        let mut it = item("scout", "g1", &format!("p-{author}"), author, &format!("post from {author}"));
        it.classification = Classification::Included;
        h.store.seed_item(it);
    }

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Act, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;
    assert_eq!(snap.status, JobStatus::Completed);

    assert_eq!(actor.delivered().len(), 2);
    assert_eq!(h.store.actions().len(), 2);
    let items = h.store.items();
    let failed = items.iter().find(|i| i.author_id == "a2").unwrap();
    assert!(!failed.processed, "failed delivery must stay unprocessed");
    let run = h.store.run(snap.run_id).unwrap();
    assert_eq!(run.processed_items, 2);
    assert_eq!(run.total_items, 3);
}

#[tokio::test]
async fn inviter_bot_delivers_templated_invites() {
    let actor = Arc::new(RecordingActor::new());
    let h = harness(
        Arc::new(ScriptedCrawler::new()),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::clone(&actor) as Arc<dyn Actor>,
    );
    h.store.seed_bot(inviter_bot("greeter", &["g1"], "target-group"));
    let mut it = item("greeter", "g1", "p1", "a9", "hello neighbors");
    it.classification = Classification::Included;
    h.store.seed_item(it);

    let job_id = h
        .scheduler
        .start_job("greeter", JobKind::Act, "test")
        .await
        .unwrap();
    wait_for_terminal(&h.scheduler, job_id).await;

    let delivered = actor.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].1, "Hi Author a9, join us!");
}

#[tokio::test]
async fn full_job_with_failing_classifier_keeps_collected_items() {
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![vec![
            post("p1", "a1", "first collected post", Some(utc(2024, 1, 5))),
            post("p2", "a2", "second collected post", Some(utc(2024, 1, 4))),
        ]],
    );
    let h = harness(
        Arc::new(crawler),
        Arc::new(FailingClassifier),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Full, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;

    assert_eq!(snap.status, JobStatus::Failed);
    // Collect's work survives the classify failure.
    assert_eq!(h.store.items().len(), 2);
    assert!(h.store.items().iter().all(|i| i.classification == Classification::Unclassified));
    // Progress froze inside the classify window.
    assert!((33..66).contains(&snap.progress), "progress was {}", snap.progress);

    let run = h.store.run(snap.run_id).unwrap();
    assert_eq!(run.status, JobStatus::Failed);
    assert!(run.error.as_deref().unwrap_or_default().contains("classify"));
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn group_failure_flags_group_and_other_groups_still_crawl() {
    let crawler = ScriptedCrawler::new()
        .with_failing_group("bad")
        .with_pages(
            "good",
            vec![vec![post("p1", "a1", "healthy group post", Some(utc(2024, 1, 5)))]],
        );
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["bad", "good"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(h.store.items().len(), 1);

    let bad = h.store.group("scout", "bad").unwrap();
    assert!(bad.last_run_failed);
    assert!(bad.last_error.is_some());
    assert!(bad.last_sync_watermark.is_none(), "failed group keeps its watermark");

    let good = h.store.group("scout", "good").unwrap();
    assert!(!good.last_run_failed);
    assert!(good.last_sync_watermark.is_some());
}

#[tokio::test]
async fn collect_fails_when_every_group_fails() {
    let crawler = ScriptedCrawler::new()
        .with_failing_group("g1")
        .with_failing_group("g2");
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1", "g2"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;
    assert_eq!(snap.status, JobStatus::Failed);
}

#[tokio::test]
async fn overlapping_job_for_same_bot_is_rejected() {
    let h = harness(
        Arc::new(StallCrawler::new(Duration::from_millis(20))),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));
    h.store.seed_bot(lead_bot("other", &["g2"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Full, "test")
        .await
        .unwrap();
    wait_for_running(&h.scheduler, job_id).await;

    let err = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, StartJobError::Overlap { .. }));

    // A different bot is unaffected.
    let other = h
        .scheduler
        .start_job("other", JobKind::Collect, "test")
        .await;
    assert!(other.is_ok());

    assert!(h.scheduler.cancel_job(job_id));
    wait_for_terminal(&h.scheduler, job_id).await;
}

#[tokio::test]
async fn cancel_stops_a_running_job_and_is_rejected_after() {
    let h = harness(
        Arc::new(StallCrawler::new(Duration::from_millis(20))),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_running(&h.scheduler, job_id).await;

    assert!(h.scheduler.cancel_job(job_id));
    let snap = wait_for_terminal(&h.scheduler, job_id).await;
    assert_eq!(snap.status, JobStatus::Cancelled);

    // Terminal jobs cannot be cancelled, and unknown ids report false.
    assert!(!h.scheduler.cancel_job(job_id));
    assert!(!h.scheduler.cancel_job(Uuid::new_v4()));

    let run = h.store.run(snap.run_id).unwrap();
    assert_eq!(run.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn unknown_and_disabled_bots_are_refused() {
    let h = harness(
        Arc::new(ScriptedCrawler::new()),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::new(RecordingActor::new()),
    );
    let mut disabled = lead_bot("sleeper", &["g1"]);
    disabled.enabled = false;
    h.store.seed_bot(disabled);

    let err = h
        .scheduler
        .start_job("ghost", JobKind::Collect, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, StartJobError::UnknownBot(_)));

    let err = h
        .scheduler
        .start_job("sleeper", JobKind::Collect, "test")
        .await
        .unwrap_err();
    assert!(matches!(err, StartJobError::BotDisabled(_)));
}

#[tokio::test]
async fn active_jobs_filters_by_bot_and_hides_terminal() {
    let h = harness(
        Arc::new(StallCrawler::new(Duration::from_millis(20))),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));
    h.store.seed_bot(lead_bot("other", &["g2"]));

    let a = h.scheduler.start_job("scout", JobKind::Collect, "test").await.unwrap();
    let b = h.scheduler.start_job("other", JobKind::Collect, "test").await.unwrap();
    wait_for_running(&h.scheduler, a).await;
    wait_for_running(&h.scheduler, b).await;

    assert_eq!(h.scheduler.active_jobs(None).len(), 2);
    assert_eq!(h.scheduler.active_jobs(Some("scout")).len(), 1);

    h.scheduler.cancel_job(a);
    wait_for_terminal(&h.scheduler, a).await;
    assert_eq!(h.scheduler.active_jobs(None).len(), 1);

    h.scheduler.cancel_job(b);
    wait_for_terminal(&h.scheduler, b).await;
}

#[tokio::test]
async fn recovery_sweeps_pending_and_running_runs() {
    let store = Arc::new(MemoryStore::new());
    let mut running = Run::new("scout", JobKind::Full, "manual");
    running.status = JobStatus::Running;
    let pending = Run::new("scout", JobKind::Collect, "manual");
    let mut done = Run::new("scout", JobKind::Act, "manual");
    done.status = JobStatus::Completed;
    let running_id = running.id;
    let done_id = done.id;
    store.seed_run(running);
    store.seed_run(pending);
    store.seed_run(done);

    let store_dyn: Arc<dyn Store> = store.clone();
    let swept = recovery::fail_interrupted_jobs(&store_dyn).await.unwrap();
    assert_eq!(swept, 2);

    let swept_run = store.run(running_id).unwrap();
    assert_eq!(swept_run.status, JobStatus::Failed);
    assert_eq!(swept_run.error.as_deref(), Some(recovery::INTERRUPTED_MESSAGE));
    assert!(swept_run.finished_at.is_some());

    assert_eq!(store.run(done_id).unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn full_job_runs_collect_classify_act_end_to_end() {
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![vec![
            post("p1", "a1", "ISO a plumber for a leaky faucet", Some(utc(2024, 1, 5))),
            post("p2", "a2", "Selling old textbooks, cheap", Some(utc(2024, 1, 4))),
        ]],
    );
    let actor = Arc::new(RecordingActor::new());
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["plumber"])),
        Arc::clone(&actor) as Arc<dyn Actor>,
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Full, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.progress, 100);

    let items = h.store.items();
    assert_eq!(items.len(), 2);
    let lead = items.iter().find(|i| i.external_id == "p1").unwrap();
    assert_eq!(lead.classification, Classification::Included);
    assert!(lead.processed);
    let other = items.iter().find(|i| i.external_id == "p2").unwrap();
    assert_eq!(other.classification, Classification::Excluded);

    assert_eq!(actor.delivered().len(), 1);
    assert_eq!(h.store.actions().len(), 1);

    // The durable job row mirrors the terminal snapshot.
    let row = h.store.job_row(job_id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert!(!row.log.is_empty());
}

#[tokio::test]
async fn force_full_recrawl_ignores_the_watermark() {
    // Every post predates the 2024-01-01 watermark; an incremental crawl
    // would stop after three of them and keep nothing.
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![vec![
            post("p1", "a1", "archived post one", Some(utc(2023, 12, 20))),
            post("p2", "a2", "archived post two", Some(utc(2023, 12, 19))),
            post("p3", "a3", "archived post three", Some(utc(2023, 12, 18))),
            post("p4", "a4", "archived post four", Some(utc(2023, 12, 17))),
        ]],
    );
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    let mut bot = lead_bot("scout", &["g1"]);
    bot.force_full_recrawl = true;
    h.store.seed_bot(bot);
    h.store.seed_group(watermarked_group("scout", "g1"));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;

    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(h.store.items().len(), 4);
}

#[tokio::test]
async fn collect_stops_after_three_consecutive_empty_pages() {
    // Three empty pages in a row exhaust the group even though the source
    // still advertises a next cursor; the fourth page is never fetched.
    let crawler = ScriptedCrawler::new().with_pages(
        "g1",
        vec![
            vec![],
            vec![],
            vec![],
            vec![post("p1", "a1", "unreachable post", Some(utc(2024, 1, 5)))],
        ],
    );
    let h = harness(
        Arc::new(crawler),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let started = chrono::Utc::now();
    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    let snap = wait_for_terminal(&h.scheduler, job_id).await;

    // An empty group is exhaustion, not an error.
    assert_eq!(snap.status, JobStatus::Completed);
    assert!(h.store.items().is_empty());
    let group = h.store.group("scout", "g1").unwrap();
    assert!(group.last_sync_watermark.unwrap() >= started);
}

#[tokio::test]
async fn cleanup_purges_expired_terminal_handles_but_keeps_running_jobs() {
    let h = harness_with_config(
        Arc::new(StallCrawler::new(Duration::from_millis(20))),
        Arc::new(KeywordClassifier::new(&["x"])),
        Arc::new(RecordingActor::new()),
        SchedulerConfig {
            retention: Duration::ZERO,
            ..SchedulerConfig::default()
        },
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));
    h.store.seed_bot(lead_bot("other", &["g2"]));

    let finished = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    h.scheduler.cancel_job(finished);
    wait_for_terminal(&h.scheduler, finished).await;

    let running = h
        .scheduler
        .start_job("other", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_running(&h.scheduler, running).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    h.scheduler.cleanup();

    assert!(h.scheduler.job_status(finished).is_none());
    assert!(h.scheduler.job_status(running).is_some());

    h.scheduler.cancel_job(running);
    wait_for_terminal(&h.scheduler, running).await;
}

#[tokio::test]
async fn cleanup_keeps_terminal_handles_inside_the_retention_window() {
    let h = harness(
        Arc::new(ScriptedCrawler::new().with_pages(
            "g1",
            vec![vec![post("p1", "a1", "lone post", Some(utc(2024, 1, 5)))]],
        )),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_terminal(&h.scheduler, job_id).await;

    // Finished moments ago, well inside the default ten-minute retention.
    h.scheduler.cleanup();
    let snap = h.scheduler.job_status(job_id).unwrap();
    assert_eq!(snap.status, JobStatus::Completed);
}

#[tokio::test]
async fn job_row_outlives_the_purged_registry_handle() {
    let h = harness_with_config(
        Arc::new(ScriptedCrawler::new().with_pages(
            "g1",
            vec![vec![post("p1", "a1", "lone post", Some(utc(2024, 1, 5)))]],
        )),
        Arc::new(KeywordClassifier::new(&["post"])),
        Arc::new(RecordingActor::new()),
        SchedulerConfig {
            retention: Duration::ZERO,
            ..SchedulerConfig::default()
        },
    );
    h.store.seed_bot(lead_bot("scout", &["g1"]));

    let job_id = h
        .scheduler
        .start_job("scout", JobKind::Collect, "test")
        .await
        .unwrap();
    wait_for_terminal(&h.scheduler, job_id).await;

    tokio::time::sleep(Duration::from_millis(10)).await;
    h.scheduler.cleanup();
    assert!(h.scheduler.job_status(job_id).is_none());

    // The persisted row still answers for the purged id.
    let row = h.store.job_row(job_id).await.unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert!(row.finished_at.is_some());
}
