mod common;

use annexstat_core::{badge_for, now_ms, Badge, PathFacts, PathStatus, Presence, Replicas, Sufficiency};
use annexstat_engine::Priority;
use annexstat_store::StatusStore;
use common::{p, FakeFile, FakeVcs, Harness};
use std::time::Duration;

fn store_file(h: &Harness, path: &str, presence: Presence, copies: u32, sufficiency: Sufficiency) {
    let status = PathStatus::from_facts(
        p(path),
        PathFacts::tracked_file(presence, Replicas::new(copies, sufficiency), FakeFile::key(&p(path))),
        now_ms(),
    );
    h.ctx.write_status(h.tree.id, status).unwrap();
}

#[tokio::test]
async fn test_root_of_mixed_tree() {
    let vcs = FakeVcs::new()
        .with_file("a.txt", Presence::Present, 2, Sufficiency::Sufficient)
        .with_file("b.txt", Presence::Absent, 0, Sufficiency::Insufficient);
    let h = Harness::new(vcs);
    h.start();

    h.scheduler.submit(h.tree.id, p("a.txt"), Priority::High, Duration::ZERO);
    h.scheduler.submit(h.tree.id, p("b.txt"), Priority::High, Duration::ZERO);
    h.settle().await;

    h.aggregate_until_quiet(3);

    let root = h.status(".").unwrap();
    assert!(root.is_dir);
    assert!(!root.needs_refresh);
    assert_eq!(root.presence, Some(Presence::PartiallyPresent));
    assert_eq!(root.replicas, Some(Replicas::new(0, Sufficiency::Insufficient)));
    assert_eq!(badge_for(&root), Badge::ZeroCopies);
}

#[test]
fn test_root_converges_within_depth_passes() {
    let vcs = FakeVcs::new()
        .with_file("a/b/c/d/leaf.txt", Presence::Present, 3, Sufficiency::Sufficient)
        .with_file("a/side.txt", Presence::Present, 3, Sufficiency::Sufficient);
    let h = Harness::new(vcs);

    store_file(&h, "a/b/c/d/leaf.txt", Presence::Present, 3, Sufficiency::Sufficient);
    store_file(&h, "a/side.txt", Presence::Present, 3, Sufficiency::Sufficient);
    h.aggregate_until_quiet(10);
    assert_eq!(h.status(".").unwrap().presence, Some(Presence::Present));

    // A leaf changes; only its parent is flagged
    store_file(&h, "a/b/c/d/leaf.txt", Presence::Absent, 1, Sufficiency::Insufficient);
    h.ctx.invalidate_parent(h.tree.id, &p("a/b/c/d/leaf.txt")).unwrap();

    let depth = p("a/b/c/d/leaf.txt").depth();
    let mut passes = 0;
    while h.status(".").unwrap().presence != Some(Presence::PartiallyPresent) {
        passes += 1;
        assert!(passes <= depth, "root not converged after {} passes", depth);
        h.aggregator.reconcile(h.tree.id).unwrap();
    }

    let root = h.status(".").unwrap();
    assert_eq!(root.replicas, Some(Replicas::new(1, Sufficiency::Insufficient)));
    assert_eq!(h.status("a/b").unwrap().presence, Some(Presence::Absent));
}

#[test]
fn test_untracked_children_do_not_block() {
    let vcs = FakeVcs::new().with_file("dir/a.txt", Presence::Absent, 2, Sufficiency::Sufficient);
    vcs.add_untracked("dir/notes.txt");
    let h = Harness::new(vcs);

    store_file(&h, "dir/a.txt", Presence::Absent, 2, Sufficiency::Sufficient);
    h.ctx
        .write_status(h.tree.id, PathStatus::from_facts(p("dir/notes.txt"), PathFacts::untracked(false), now_ms()))
        .unwrap();

    h.aggregate_until_quiet(5);
    let dir = h.status("dir").unwrap();
    assert_eq!(dir.presence, Some(Presence::Absent));
    assert_eq!(dir.replicas, Some(Replicas::new(2, Sufficiency::Sufficient)));
}

#[test]
fn test_directory_without_tracked_content_is_empty() {
    let vcs = FakeVcs::new().with_file("a.txt", Presence::Present, 1, Sufficiency::Sufficient);
    vcs.add_untracked("scratch/tmp.txt");
    vcs.add_empty_dir("hollow");
    let h = Harness::new(vcs);

    store_file(&h, "a.txt", Presence::Present, 1, Sufficiency::Sufficient);
    h.ctx
        .write_status(h.tree.id, PathStatus::from_facts(p("scratch/tmp.txt"), PathFacts::untracked(false), now_ms()))
        .unwrap();
    h.store
        .invalidate_dir(h.tree.id, &p("hollow"))
        .unwrap();

    h.aggregate_until_quiet(5);

    let scratch = h.status("scratch").unwrap();
    assert!(scratch.is_empty_dir());
    assert_eq!(badge_for(&scratch), Badge::EmptyFolder);
    assert!(h.status("hollow").unwrap().is_empty_dir());

    // Empty folders do not drag the root's presence or copies down
    let root = h.status(".").unwrap();
    assert_eq!(root.presence, Some(Presence::Present));
    assert_eq!(root.replicas, Some(Replicas::new(1, Sufficiency::Sufficient)));
}

#[test]
fn test_missing_children_are_requested() {
    let vcs = FakeVcs::new()
        .with_file("dir/a.txt", Presence::Present, 1, Sufficiency::Sufficient)
        .with_file("dir/b.txt", Presence::Present, 1, Sufficiency::Sufficient)
        .with_file("dir/sub/c.txt", Presence::Present, 1, Sufficiency::Sufficient);
    let h = Harness::new(vcs);
    // Lanes not started: submitted requests stay queued

    store_file(&h, "dir/a.txt", Presence::Present, 1, Sufficiency::Sufficient);

    let report = h.aggregator.reconcile(h.tree.id).unwrap();
    assert!(report.incomplete >= 1);
    assert!(h.status("dir").unwrap().needs_refresh);
    assert_eq!(h.scheduler.queued(Priority::High), 1);
    assert_eq!(h.scheduler.queued(Priority::Low), 1);
}

#[test]
fn test_stale_children_are_ignored() {
    let vcs = FakeVcs::new().with_file("dir/kept.txt", Presence::Present, 2, Sufficiency::Sufficient);
    let h = Harness::new(vcs);

    store_file(&h, "dir/kept.txt", Presence::Present, 2, Sufficiency::Sufficient);
    // Stored, but gone from the working tree
    store_file(&h, "dir/deleted.txt", Presence::Absent, 0, Sufficiency::Insufficient);

    h.aggregate_until_quiet(5);
    let dir = h.status("dir").unwrap();
    assert_eq!(dir.presence, Some(Presence::Present));
    assert_eq!(dir.replicas, Some(Replicas::new(2, Sufficiency::Sufficient)));
}

#[test]
fn test_pass_halts_for_removed_tree() {
    let vcs = FakeVcs::new().with_file("dir/a.txt", Presence::Present, 1, Sufficiency::Sufficient);
    let h = Harness::new(vcs);
    store_file(&h, "dir/a.txt", Presence::Present, 1, Sufficiency::Sufficient);

    h.ctx.registry.reconcile(Default::default()).unwrap();
    let report = h.aggregator.reconcile(h.tree.id).unwrap();
    assert!(report.halted);
    assert_eq!(report.processed, 0);
}

#[test]
fn test_invalidation_during_pass_is_not_lost() {
    let vcs = FakeVcs::new().with_file("a.txt", Presence::Present, 2, Sufficiency::Sufficient);
    let h = Harness::new(vcs);
    let tree = h.tree.id;

    store_file(&h, "a.txt", Presence::Present, 2, Sufficiency::Sufficient);
    h.aggregate_until_quiet(5);
    assert_eq!(h.status(".").unwrap().presence, Some(Presence::Present));

    // While the pass reads a.txt, a refresh lands and flags the root again
    h.store.invalidate_dir(tree, &p(".")).unwrap();
    h.store.on_next_read("a.txt", move |store| {
        let dropped = PathStatus::from_facts(
            p("a.txt"),
            PathFacts::tracked_file(
                Presence::Absent,
                Replicas::new(1, Sufficiency::Insufficient),
                FakeFile::key(&p("a.txt")),
            ),
            now_ms(),
        );
        store.put_status(tree, &dropped).unwrap();
        store.invalidate_dir(tree, &p(".")).unwrap();
    });

    let report = h.aggregator.reconcile(tree).unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(report.incomplete, 1);
    let root = h.status(".").unwrap();
    assert!(root.needs_refresh);

    h.aggregate_until_quiet(5);
    let root = h.status(".").unwrap();
    assert!(!root.needs_refresh);
    assert_eq!(root.presence, Some(Presence::Absent));
    assert_eq!(root.replicas, Some(Replicas::new(1, Sufficiency::Insufficient)));
}

#[tokio::test]
async fn test_unresolved_file_is_refreshed_again() {
    let vcs = FakeVcs::new()
        .with_file("dir/a.txt", Presence::Present, 2, Sufficiency::Sufficient)
        .with_file("dir/b.txt", Presence::Present, 3, Sufficiency::Sufficient);
    let h = Harness::new(vcs);

    store_file(&h, "dir/a.txt", Presence::Present, 2, Sufficiency::Sufficient);
    // Tracked, but the copy count could not be read
    let mut unreadable = PathStatus::from_facts(
        p("dir/b.txt"),
        PathFacts::tracked_file(
            Presence::Present,
            Replicas::new(3, Sufficiency::Sufficient),
            FakeFile::key(&p("dir/b.txt")),
        ),
        now_ms(),
    );
    unreadable.replicas = None;
    h.ctx.write_status(h.tree.id, unreadable).unwrap();
    h.store.invalidate_dir(h.tree.id, &p("dir")).unwrap();

    let report = h.aggregator.reconcile(h.tree.id).unwrap();
    assert!(report.incomplete >= 1);
    assert_eq!(h.scheduler.queued(Priority::Low), 1);

    h.start();
    h.settle().await;
    h.aggregate_until_quiet(5);

    assert_eq!(h.status("dir/b.txt").unwrap().replicas, Some(Replicas::new(3, Sufficiency::Sufficient)));
    let dir = h.status("dir").unwrap();
    assert_eq!(dir.presence, Some(Presence::Present));
    assert_eq!(dir.replicas, Some(Replicas::new(2, Sufficiency::Sufficient)));
}
