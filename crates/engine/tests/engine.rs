mod common;

use annexstat_core::{AnnexCommand, Presence, Replicas, Sufficiency};
use annexstat_engine::{Engine, EngineConfig};
use annexstat_store::{SledStore, StatusStore};
use annexstat_watcher::ChangeSignal;
use common::{p, FakeVcs};
use std::sync::Arc;
use std::time::Duration;

struct Running {
    engine: Arc<Engine>,
    store: Arc<SledStore>,
    vcs: Arc<FakeVcs>,
}

impl Running {
    async fn start(vcs: FakeVcs) -> Self {
        let store = Arc::new(SledStore::temporary().unwrap());
        let vcs = Arc::new(vcs);
        let config = EngineConfig {
            tick_millis: 50,
            ..EngineConfig::default()
        };

        let engine = Engine::new(store.clone(), vcs.clone(), config).unwrap();
        let delta = engine.set_trees([vcs.tree()].into_iter().collect()).unwrap();
        assert_eq!(delta.added.len(), 1);
        engine.start();

        Self { engine, store, vcs }
    }

    fn presence(&self, path: &str) -> Option<Presence> {
        self.store
            .status(self.vcs.id, &p(path))
            .unwrap()
            .and_then(|s| s.presence)
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}

/// Poll `check` every 20ms for up to 10s
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn library() -> FakeVcs {
    let vcs = FakeVcs::new()
        .with_file("music/a.flac", Presence::Present, 2, Sufficiency::Sufficient)
        .with_file("music/b.flac", Presence::Present, 2, Sufficiency::Sufficient)
        .with_file("video/c.mkv", Presence::Absent, 1, Sufficiency::Insufficient);
    vcs.commit_primary(&["music/a.flac", "music/b.flac", "video/c.mkv"]);
    vcs
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_tree_is_scanned_and_gets_a_cursor() {
    let run = Running::start(library()).await;
    let tree = run.vcs.id;

    eventually("cursor", || run.store.cursor(tree).unwrap() == Some(run.vcs.head())).await;
    eventually("root", || run.presence(".") == Some(Presence::PartiallyPresent)).await;

    let root = run.store.status(tree, &p(".")).unwrap().unwrap();
    assert_eq!(root.replicas, Some(Replicas::new(1, Sufficiency::Insufficient)));
    assert_eq!(run.presence("music"), Some(Presence::Present));
    assert!(!run.engine.scanner().busy(tree));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_change_signal_updates_status() {
    let run = Running::start(library()).await;
    let tree = run.vcs.id;
    eventually("cursor", || run.store.cursor(tree).unwrap().is_some()).await;
    eventually("scan acknowledged", || !run.engine.scanner().busy(tree)).await;

    run.vcs.set_file("video/c.mkv", Presence::Present, 1, Sufficiency::Insufficient);
    run.vcs.commit_primary(&["video/c.mkv"]);
    run.engine.signal_sender().send(ChangeSignal { tree }).await.unwrap();

    eventually("file refresh", || run.presence("video/c.mkv") == Some(Presence::Present)).await;
    // The next tick carries the change up to the root
    eventually("root", || run.presence(".") == Some(Presence::Present)).await;
    assert_eq!(run.store.cursor(tree).unwrap(), Some(run.vcs.head()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_status_miss_then_hit() {
    let run = Running::start(library()).await;
    let tree = run.vcs.id;
    let path = p("music/a.flac");

    // Asked for before the scan reaches it, or answered from the store
    if run.engine.request_status(tree, &path).is_none() {
        eventually("requested status", || run.engine.request_status(tree, &path).is_some()).await;
    }
    let status = run.engine.request_status(tree, &path).unwrap();
    assert_eq!(status.presence, Some(Presence::Present));

    assert!(run.engine.request_status(annexstat_core::TreeId::random(), &path).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_command_runs_and_refreshes_path() {
    let run = Running::start(library()).await;
    let tree = run.vcs.id;
    eventually("cursor", || run.store.cursor(tree).unwrap().is_some()).await;

    let request = run
        .engine
        .submit_command(tree, p("video/c.mkv"), AnnexCommand::Get)
        .unwrap();
    assert_eq!(request.command, AnnexCommand::Get);

    eventually("command executed", || !run.vcs.commands().is_empty()).await;
    assert_eq!(run.vcs.commands(), vec![(p("video/c.mkv"), AnnexCommand::Get)]);
    eventually("refresh after command", || run.presence("video/c.mkv") == Some(Presence::Present)).await;

    assert!(run
        .engine
        .submit_command(annexstat_core::TreeId::random(), p("x"), AnnexCommand::Drop)
        .is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removing_tree_clears_its_state() {
    let run = Running::start(library()).await;
    let tree = run.vcs.id;
    eventually("root", || run.presence(".") == Some(Presence::PartiallyPresent)).await;
    eventually("quiet", || !run.engine.scanner().busy(tree) && run.engine.scheduler().is_idle()).await;

    let delta = run.engine.set_trees(Default::default()).unwrap();
    assert_eq!(delta.removed.len(), 1);
    assert!(run.engine.trees().is_empty());
    assert!(run.engine.tree(tree).is_none());

    assert!(run.store.cursor(tree).unwrap().is_none());
    assert_eq!(run.store.status_count(tree), 0);
    assert!(run.engine.request_status(tree, &p("music/a.flac")).is_none());

    let stats = run.engine.stats();
    assert_eq!(stats.trees, 0);
    assert_eq!(stats.scanning, 0);
}

#[tokio::test]
async fn test_tree_for_path_prefers_deepest_root() {
    let run = Running::start(library()).await;
    let found = run.engine.tree_for_path(std::path::Path::new("/repo/music/a.flac"));
    assert_eq!(found.map(|t| t.id), Some(run.vcs.id));
    assert!(run.engine.tree_for_path(std::path::Path::new("/elsewhere/a.flac")).is_none());
}
