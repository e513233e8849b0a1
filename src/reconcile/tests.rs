use super::*;
use crate::error::TfError;
use crate::pending::MemoryStateStore;
use crate::status::ChangeType;
use crate::tf::TfOutput;
use crate::tf::fake::FakeTf;
use std::sync::mpsc;

const STAT: &[&str] = &["stat", "/format:detailed"];

fn record(path: &str, change_type: ChangeType) -> ChangeRecord {
    ChangeRecord {
        server_path: format!("$/{}", path.replace('\\', "/")),
        local_path: PathBuf::from(path),
        change_type,
        workspace: "ws".to_string(),
        changeset: None,
        source_path: None,
    }
}

fn pending_with(paths: &[&str]) -> Mutex<PendingChanges> {
    let mut pending = PendingChanges::load(Box::new(MemoryStateStore::new())).unwrap();
    pending.include_list(paths).unwrap();
    Mutex::new(pending)
}

/// detailed status output with one edit per local path
fn stat_output(paths: &[&str]) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(&format!(
            "$/srv/{};C1\r\n  Change     : edit\r\n  Workspace  : ws\r\n  Local item : [ws] {}\r\n\r\n",
            path.rsplit(['\\', '/']).next().unwrap_or(path),
            path
        ));
    }
    out
}

fn view(roots: &[&str], policy: RefreshPolicy) -> MappingView {
    let roots: Vec<PathBuf> = roots.iter().map(PathBuf::from).collect();
    MappingView::new("ws", roots.clone(), roots, policy)
}

fn local_paths(records: &[ChangeRecord]) -> Vec<String> {
    records.iter().map(ChangeRecord::path_text).collect()
}

#[test]
fn test_partition_is_complete_and_disjoint() {
    let records = vec![
        record(r"C:\p\a.txt", ChangeType::Edit),
        record(r"C:\p\b.txt", ChangeType::Add),
        record(r"C:\p\c.txt", ChangeType::Delete),
        record(r"C:\p\d.txt", ChangeType::Edit),
    ];
    let pending = pending_with(&[r"C:\p\b.txt", r"C:\p\d.txt", r"C:\p\stale.txt"]);

    let view = partition(&records, &pending.lock().unwrap());

    assert_eq!(local_paths(&view.included), [r"C:\p\b.txt", r"C:\p\d.txt"]);
    assert_eq!(local_paths(&view.excluded), [r"C:\p\a.txt", r"C:\p\c.txt"]);
    assert_eq!(view.len(), records.len());
    for included in &view.included {
        assert!(!view.excluded.contains(included));
    }
}

#[test]
fn test_partition_is_idempotent_and_leaves_inputs_alone() {
    let records = vec![
        record(r"C:\p\a.txt", ChangeType::Edit),
        record(r"C:\p\b.txt", ChangeType::Add),
    ];
    let pending = pending_with(&[r"C:\p\a.txt"]);
    let snapshot = records.clone();

    let first = partition(&records, &pending.lock().unwrap());
    let second = partition(&records, &pending.lock().unwrap());

    assert_eq!(first, second);
    assert_eq!(records, snapshot);
    assert_eq!(pending.lock().unwrap().included_changes(), [r"C:\p\a.txt"]);
}

#[test]
fn test_partition_ignores_change_type() {
    let records = vec![
        record(r"C:\p\a.txt", ChangeType::Delete),
        record(r"C:\p\b.txt", ChangeType::Other("branch".into())),
    ];
    let pending = pending_with(&[r"C:\p\a.txt", r"C:\p\b.txt"]);
    let view = partition(&records, &pending.lock().unwrap());
    assert_eq!(view.included.len(), 2);
    assert!(view.excluded.is_empty());
}

#[test]
fn test_refresh_single_root() {
    let tf = FakeTf::new();
    tf.respond(STAT, Some(r"C:\p"), &stat_output(&[r"C:\p\a.txt", r"C:\p\b.txt"]));
    let pending = pending_with(&[r"C:\p\b.txt"]);
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);

    let outcome = view.refresh(&tf, &pending).unwrap();

    let RefreshOutcome::Completed(report) = outcome else {
        panic!("refresh should complete");
    };
    assert_eq!((report.included, report.excluded, report.passes), (1, 1, 1));
    assert_eq!(local_paths(&view.view().included), [r"C:\p\b.txt"]);
    assert_eq!(local_paths(&view.view().excluded), [r"C:\p\a.txt"]);
    assert_eq!(tf.calls()[0].1.as_deref(), Some(Path::new(r"C:\p")));
}

#[test]
fn test_refresh_with_no_items_match_is_empty() {
    let tf = FakeTf::new();
    tf.fail(STAT, None, "No items match C:\\p\r\n");
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);

    view.refresh(&tf, &pending_with(&[])).unwrap();

    assert!(view.view().is_empty());
}

#[test]
fn test_multiple_roots_are_concatenated_in_root_order() {
    let tf = FakeTf::new();
    tf.respond(STAT, Some(r"C:\one"), &stat_output(&[r"C:\one\a.txt"]));
    tf.respond(STAT, Some(r"C:\two"), &stat_output(&[r"C:\two\b.txt", r"C:\two\c.txt"]));
    let view = view(&[r"C:\one", r"C:\two"], RefreshPolicy::Drop);

    view.refresh(&tf, &pending_with(&[])).unwrap();

    assert_eq!(
        local_paths(&view.view().excluded),
        [r"C:\one\a.txt", r"C:\two\b.txt", r"C:\two\c.txt"]
    );
    assert_eq!(tf.calls().len(), 2);
}

#[test]
fn test_overlapping_roots_keep_first_mapping() {
    // both roots report the file under the nested mapping
    let shared = stat_output(&[r"C:\p\sub\a.txt"]);
    let tf = FakeTf::new();
    tf.respond(STAT, Some(r"C:\p"), &shared);
    tf.respond(STAT, Some(r"C:\p\sub"), &shared);
    let view = view(&[r"C:\p", r"C:\p\sub"], RefreshPolicy::Drop);

    let RefreshOutcome::Completed(report) = view.refresh(&tf, &pending_with(&[])).unwrap() else {
        panic!("refresh should complete");
    };

    assert_eq!(view.view().excluded.len(), 1);
    assert_eq!(report.duplicates, 1);
}

#[test]
fn test_failed_refresh_keeps_last_known_good_view() {
    let tf = FakeTf::new();
    tf.respond(STAT, None, &stat_output(&[r"C:\p\a.txt"]));
    let pending = pending_with(&[]);
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);
    view.refresh(&tf, &pending).unwrap();

    tf.fail(STAT, None, "TF400324: server unavailable");
    let err = view.refresh(&tf, &pending).unwrap_err();

    assert!(format!("{err:#}").contains("TF400324"));
    assert_eq!(local_paths(&view.view().excluded), [r"C:\p\a.txt"]);

    // the guard is released after a failure
    tf.respond(STAT, None, &stat_output(&[r"C:\p\b.txt"]));
    view.refresh(&tf, &pending).unwrap();
    assert_eq!(local_paths(&view.view().excluded), [r"C:\p\b.txt"]);
}

#[test]
fn test_one_failing_root_fails_the_pass() {
    let tf = FakeTf::new();
    tf.respond(STAT, Some(r"C:\one"), &stat_output(&[r"C:\one\a.txt"]));
    tf.fail(STAT, Some(r"C:\two"), "TF10122: path is not mapped");
    let view = view(&[r"C:\one", r"C:\two"], RefreshPolicy::Drop);

    assert!(view.refresh(&tf, &pending_with(&[])).is_err());
    assert!(view.view().is_empty(), "no partial view is published");
}

#[test]
fn test_repartition_follows_selection_without_querying() {
    let tf = FakeTf::new();
    tf.respond(STAT, None, &stat_output(&[r"C:\p\a.txt", r"C:\p\b.txt"]));
    let pending = pending_with(&[]);
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);
    view.refresh(&tf, &pending).unwrap();

    pending.lock().unwrap().include_file(r"C:\p\a.txt").unwrap();
    view.repartition(&pending.lock().unwrap());

    assert_eq!(local_paths(&view.view().included), [r"C:\p\a.txt"]);
    assert_eq!(tf.calls().len(), 1);
}

#[test]
fn test_covers() {
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);
    assert!(view.covers(Path::new(r"C:\p\a.txt")));
    assert!(!view.covers(Path::new(r"C:\p2\a.txt")));
}

/// runner whose first call blocks until released, to hold a pass in flight
struct HeldTf {
    inner: FakeTf,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<Option<mpsc::Receiver<()>>>,
}

impl HeldTf {
    fn new(inner: FakeTf) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let held = Self {
            inner,
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(Some(release_rx)),
        };
        (held, entered_rx, release_tx)
    }
}

impl TfRunner for HeldTf {
    fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<TfOutput, TfError> {
        if let Some(entered) = self.entered.lock().unwrap().take() {
            entered.send(()).unwrap();
            let release = self.release.lock().unwrap().take().unwrap();
            release.recv().unwrap();
        }
        self.inner.run(args, cwd)
    }
}

/// start a refresh on another thread, issue a second one while it is held, then release
fn overlapping_refresh(policy: RefreshPolicy) -> (RefreshOutcome, RefreshOutcome, usize) {
    let fake = FakeTf::new();
    fake.respond(STAT, None, &stat_output(&[r"C:\p\a.txt"]));
    let (tf, entered, release) = HeldTf::new(fake);
    let pending = pending_with(&[]);
    let view = view(&[r"C:\p"], policy);

    let (first, second) = thread::scope(|scope| {
        let running = scope.spawn(|| view.refresh(&tf, &pending).unwrap());
        entered.recv().unwrap();

        let second = view.refresh(&tf, &pending).unwrap();
        release.send(()).unwrap();

        (running.join().unwrap(), second)
    });
    (first, second, tf.inner.calls().len())
}

#[test]
fn test_overlapping_refresh_is_dropped() {
    let (first, second, calls) = overlapping_refresh(RefreshPolicy::Drop);

    assert_eq!(second, RefreshOutcome::Skipped);
    let RefreshOutcome::Completed(report) = first else {
        panic!("first refresh should complete");
    };
    assert_eq!(report.passes, 1);
    assert_eq!(calls, 1, "the dropped request never reaches tf");
}

#[test]
fn test_overlapping_refresh_runs_one_trailing_pass() {
    let (first, second, calls) = overlapping_refresh(RefreshPolicy::Trailing);

    assert_eq!(second, RefreshOutcome::Skipped);
    let RefreshOutcome::Completed(report) = first else {
        panic!("first refresh should complete");
    };
    assert_eq!(report.passes, 2);
    assert_eq!(calls, 2);
}

#[test]
fn test_request_queued_after_release_is_resumed() {
    let view = view(&[r"C:\p"], RefreshPolicy::Trailing);
    view.rerun.store(true, Ordering::Release);

    assert!(view.resume_queued());
    assert!(!view.begin(), "the resumed pass holds the flag");
}

#[test]
fn test_queued_request_is_left_to_the_pass_that_claimed_the_flag() {
    let view = view(&[r"C:\p"], RefreshPolicy::Trailing);
    assert!(view.begin());
    view.rerun.store(true, Ordering::Release);

    assert!(!view.resume_queued());
}

#[test]
fn test_drop_policy_never_resumes() {
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);
    view.rerun.store(true, Ordering::Release);

    assert!(!view.resume_queued());
    assert!(view.begin());
}

#[test]
fn test_trailing_refresh_releases_the_flag() {
    let tf = FakeTf::new();
    tf.respond(STAT, None, &stat_output(&[r"C:\p\a.txt"]));
    let view = view(&[r"C:\p"], RefreshPolicy::Trailing);

    view.refresh(&tf, &pending_with(&[])).unwrap();

    assert!(!view.rerun.load(Ordering::Acquire));
    assert!(view.begin());
}

/// runner that changes the selection while the status query is running
struct SelectingTf<'a> {
    inner: FakeTf,
    pending: &'a Mutex<PendingChanges>,
    path: &'static str,
}

impl TfRunner for SelectingTf<'_> {
    fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<TfOutput, TfError> {
        self.pending.lock().unwrap().include_file(self.path).unwrap();
        self.inner.run(args, cwd)
    }
}

#[test]
fn test_selection_changed_during_query_is_published() {
    let inner = FakeTf::new();
    inner.respond(STAT, None, &stat_output(&[r"C:\p\a.txt", r"C:\p\b.txt"]));
    let pending = pending_with(&[]);
    let tf = SelectingTf {
        inner,
        pending: &pending,
        path: r"C:\p\b.txt",
    };
    let view = view(&[r"C:\p"], RefreshPolicy::Drop);

    view.refresh(&tf, &pending).unwrap();

    assert_eq!(local_paths(&view.view().included), [r"C:\p\b.txt"]);
    assert_eq!(local_paths(&view.view().excluded), [r"C:\p\a.txt"]);
}
