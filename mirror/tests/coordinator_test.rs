//! Integration tests for mirror coordinators, one-way and paired.
//!
//! All tests run on paused time; the copy tool is replaced by a runner that
//! sleeps and records.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{FakeWatch, RecordingRunner, at, secs, settle_tasks};
use pretty_assertions::assert_eq;
use syncwatch_directory_watcher::{ChangeEvent, ChangeKind, Watch};
use syncwatch_mirror::{
    DirectionPair, EngineSettings, MappingConfig, MirrorCoordinator, MirrorPhase,
    MonitoredMapping,
};
use tempfile::TempDir;
use tokio::time::Instant;

fn settings() -> EngineSettings {
    EngineSettings {
        settle_delay: secs(1),
        retry_interval: secs(10),
    }
}

async fn start(
    mapping: MonitoredMapping,
    watch: &Arc<FakeWatch>,
    runner: &Arc<RecordingRunner>,
) -> MirrorCoordinator {
    let subscription = watch.subscribe(&mapping.config().source, true).unwrap();
    MirrorCoordinator::start(
        mapping,
        subscription,
        Path::new("rsync"),
        runner.clone(),
        settings(),
    )
    .await
}

async fn start_pair(
    config: &MappingConfig,
    watch: &Arc<FakeWatch>,
    runner: &Arc<RecordingRunner>,
) -> (MirrorCoordinator, MirrorCoordinator) {
    let DirectionPair { forward, inverse } = DirectionPair::new(config);
    let forward = start(forward, watch, runner).await;
    let inverse = start(inverse, watch, runner).await;
    (forward, inverse)
}

fn destination_of(invocation: &syncwatch_mirror::CopyInvocation) -> PathBuf {
    PathBuf::from(invocation.args.last().unwrap())
}

fn dirs() -> (TempDir, TempDir) {
    (TempDir::new().unwrap(), TempDir::new().unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_quiet_period_then_single_run() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(2)));
    let mapping = MonitoredMapping::new(MappingConfig::new("docs", a.path(), b.path()));
    let coordinator = start(mapping, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Created, a.path().join("x.txt")));
    at(t0, secs(3)).await;
    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("x.txt")));
    settle_tasks().await;
    assert_eq!(coordinator.phase().await, MirrorPhase::Watching);

    at(t0, secs(60)).await;
    let runs = runner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].started - t0, secs(13));
    assert_eq!(runs[0].source, a.path());
    assert_eq!(runs[0].destination, b.path());
    assert_eq!(coordinator.phase().await, MirrorPhase::Idle);
    assert!(coordinator.mapping().state().is_settled().await);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_changes_during_run_coalesce_into_one_rerun() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(5)));
    let config = MappingConfig::new("docs", a.path(), b.path()).with_quiet_delay(secs(2));
    let coordinator = start(MonitoredMapping::new(config), &watch, &runner).await;
    let t0 = Instant::now();

    let change = |name: &str| ChangeEvent::file(ChangeKind::Modified, a.path().join(name));
    watch.emit(a.path(), change("one.txt"));
    at(t0, secs(3)).await;
    watch.emit(a.path(), change("two.txt"));
    at(t0, secs(4)).await;
    watch.emit(a.path(), change("three.txt"));
    at(t0, secs(5)).await;
    assert_eq!(coordinator.phase().await, MirrorPhase::Syncing);

    at(t0, secs(60)).await;
    let runs = runner.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].started - t0, secs(2));
    assert_eq!(runs[1].started - t0, secs(7));
    assert_eq!(runner.max_in_flight(), 1);

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_initial_sync_runs_without_events() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(1)));
    let config = MappingConfig::new("docs", a.path(), b.path()).with_initial_sync();
    let t0 = Instant::now();
    let coordinator = start(MonitoredMapping::new(config), &watch, &runner).await;

    at(t0, secs(30)).await;
    let runs = runner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].started - t0, secs(10));

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_keeps_watching() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(1)).exiting_with(23));
    let mapping = MonitoredMapping::new(MappingConfig::new("docs", a.path(), b.path()));
    let coordinator = start(mapping, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("x.txt")));
    at(t0, secs(20)).await;
    assert_eq!(runner.runs().len(), 1);
    assert!(coordinator.mapping().state().is_settled().await);

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("y.txt")));
    at(t0, secs(40)).await;
    let runs = runner.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].started - t0, secs(30));

    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_armed_timer() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(1)));
    let mapping = MonitoredMapping::new(MappingConfig::new("docs", a.path(), b.path()));
    let coordinator = start(mapping, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("x.txt")));
    at(t0, secs(5)).await;
    coordinator.shutdown().await;
    assert_eq!(coordinator.phase().await, MirrorPhase::Idle);

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("y.txt")));
    coordinator
        .on_change(ChangeEvent::file(ChangeKind::Modified, a.path().join("z.txt")))
        .await;
    at(t0, secs(60)).await;
    assert!(runner.runs().is_empty());

    // Second call is a no-op.
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_run() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(5)));
    let mapping = MonitoredMapping::new(MappingConfig::new("docs", a.path(), b.path()));
    let coordinator = start(mapping, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("x.txt")));
    at(t0, secs(12)).await;
    assert_eq!(coordinator.phase().await, MirrorPhase::Syncing);

    coordinator.shutdown().await;
    assert!(Instant::now() - t0 >= secs(15));
    assert_eq!(runner.runs().len(), 1);

    at(t0, secs(60)).await;
    assert_eq!(runner.runs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mirrored_writes_do_not_bounce_back() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(2)).on_run({
        let watch = watch.clone();
        move |invocation| {
            // What the copy tool leaves behind on the destination: a temp
            // file, the final file and a touched root.
            let dest = destination_of(invocation);
            watch.emit(&dest, ChangeEvent::file(ChangeKind::Created, dest.join(".notes.txt.Xy12ab")));
            watch.emit(&dest, ChangeEvent::file(ChangeKind::Moved, dest.join("notes.txt")));
            watch.emit(&dest, ChangeEvent::directory(ChangeKind::Modified, &dest));
        }
    }));
    let config = MappingConfig::new("docs", a.path(), b.path()).bidirectional();
    let (forward, inverse) = start_pair(&config, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("notes.txt")));
    at(t0, secs(11)).await;
    assert_eq!(forward.phase().await, MirrorPhase::Syncing);
    assert_eq!(inverse.phase().await, MirrorPhase::Idle);

    at(t0, secs(120)).await;
    let runs = runner.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].source, a.path());
    assert!(runner.runs_from(b.path()).is_empty());

    forward.shutdown().await;
    inverse.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_genuine_edit_during_reverse_run_is_kept() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(2)).on_run({
        let watch = watch.clone();
        let b_root = b.path().to_path_buf();
        move |invocation| {
            let dest = destination_of(invocation);
            if dest == b_root {
                // Echo of notes.txt, plus a real edit of other.txt.
                watch.emit(&dest, ChangeEvent::file(ChangeKind::Modified, dest.join("notes.txt")));
                watch.emit(&dest, ChangeEvent::file(ChangeKind::Modified, dest.join("other.txt")));
            } else {
                watch.emit(&dest, ChangeEvent::file(ChangeKind::Modified, dest.join("other.txt")));
            }
        }
    }));
    let config = MappingConfig::new("docs", a.path(), b.path()).bidirectional();
    let (forward, inverse) = start_pair(&config, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("notes.txt")));
    at(t0, secs(11)).await;
    let pending = inverse.mapping().state().pending().await;
    assert_eq!(
        pending,
        vec![ChangeEvent::file(ChangeKind::Modified, b.path().join("other.txt"))]
    );
    assert_eq!(inverse.phase().await, MirrorPhase::Watching);

    at(t0, secs(120)).await;
    let runs = runner.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].source, a.path());
    assert_eq!(runs[1].source, b.path());
    assert_eq!(runs[1].started - t0, secs(20));
    assert!(runs[1].started >= runs[0].finished + secs(1));
    assert_eq!(runner.max_in_flight(), 1);

    forward.shutdown().await;
    inverse.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_waits_for_counterpart_to_settle() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(5)));
    let config = MappingConfig::new("docs", a.path(), b.path()).bidirectional();
    let (forward, inverse) = start_pair(&config, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("a.txt")));
    at(t0, secs(1)).await;
    watch.emit(b.path(), ChangeEvent::file(ChangeKind::Modified, b.path().join("b.txt")));

    at(t0, secs(12)).await;
    assert_eq!(forward.phase().await, MirrorPhase::Syncing);
    assert_eq!(inverse.phase().await, MirrorPhase::WaitingOnCounterpart);

    at(t0, secs(60)).await;
    let forward_runs = runner.runs_from(a.path());
    let inverse_runs = runner.runs_from(b.path());
    assert_eq!(forward_runs.len(), 1);
    assert_eq!(inverse_runs.len(), 1);
    assert_eq!(forward_runs[0].started - t0, secs(10));
    // Forward finishes at 15 and settles one second later.
    assert_eq!(inverse_runs[0].started - t0, secs(16));
    assert_eq!(runner.max_in_flight(), 1);
    assert_eq!(inverse.phase().await, MirrorPhase::Idle);

    forward.shutdown().await;
    inverse.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopping_pair_keeps_waiting_side_idle() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(5)));
    let config = MappingConfig::new("docs", a.path(), b.path()).bidirectional();
    let (forward, inverse) = start_pair(&config, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("a.txt")));
    at(t0, secs(1)).await;
    watch.emit(b.path(), ChangeEvent::file(ChangeKind::Modified, b.path().join("b.txt")));
    at(t0, secs(12)).await;
    assert_eq!(inverse.phase().await, MirrorPhase::WaitingOnCounterpart);

    assert!(forward.begin_shutdown().await);
    assert!(inverse.begin_shutdown().await);
    assert!(!inverse.begin_shutdown().await);

    // The forward copy still runs to completion; the inverse never starts.
    forward.shutdown().await;
    inverse.shutdown().await;
    at(t0, secs(60)).await;
    assert_eq!(runner.runs().len(), 1);
    assert!(runner.runs_from(b.path()).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_counterpart_wait_timeout_proceeds() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(20)));
    let config = MappingConfig::new("docs", a.path(), b.path())
        .bidirectional()
        .with_counterpart_wait_timeout(secs(2));
    let (forward, inverse) = start_pair(&config, &watch, &runner).await;
    let t0 = Instant::now();

    watch.emit(a.path(), ChangeEvent::file(ChangeKind::Modified, a.path().join("a.txt")));
    at(t0, secs(1)).await;
    watch.emit(b.path(), ChangeEvent::file(ChangeKind::Modified, b.path().join("b.txt")));

    at(t0, secs(120)).await;
    let inverse_runs = runner.runs_from(b.path());
    assert_eq!(inverse_runs.len(), 1);
    assert_eq!(inverse_runs[0].started - t0, secs(13));

    forward.shutdown().await;
    inverse.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pair_never_syncs_both_ways_at_once() {
    let (a, b) = dirs();
    let watch = FakeWatch::new();
    let runner = Arc::new(RecordingRunner::new(secs(2)));
    let config = MappingConfig::new("docs", a.path(), b.path())
        .bidirectional()
        .with_quiet_delay(secs(3))
        .fixed_window();
    let (forward, inverse) = start_pair(&config, &watch, &runner).await;
    let t0 = Instant::now();

    for i in 0..30u64 {
        at(t0, secs(2 * i)).await;
        watch.emit(
            a.path(),
            ChangeEvent::file(ChangeKind::Modified, a.path().join(format!("a{i}.txt"))),
        );
        at(t0, secs(2 * i + 1)).await;
        watch.emit(
            b.path(),
            ChangeEvent::file(ChangeKind::Modified, b.path().join(format!("b{i}.txt"))),
        );
    }

    at(t0, secs(300)).await;
    assert_eq!(runner.max_in_flight(), 1);
    assert!(!runner.runs_from(a.path()).is_empty());
    assert!(!runner.runs_from(b.path()).is_empty());
    assert!(forward.mapping().state().is_settled().await);
    assert!(inverse.mapping().state().is_settled().await);

    forward.shutdown().await;
    inverse.shutdown().await;
}
