use crate::debug;
use crate::paths;
use crate::pending::PendingChanges;
use crate::status::{ChangeRecord, ParseStats, StatusReport, parse_status};
use crate::tf::TfRunner;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// what happens to a refresh requested while another is running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPolicy {
    /// ignore it; the running pass stands
    #[default]
    Drop,
    /// run one more pass once the current one finishes
    Trailing,
}

/// changes split by membership in the pending-change set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciledView {
    pub included: Vec<ChangeRecord>,
    pub excluded: Vec<ChangeRecord>,
}

impl ReconciledView {
    pub fn len(&self) -> usize {
        self.included.len() + self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }
}

/// split `records` into included and excluded, keeping relative order
///
/// reads both inputs only, so the same inputs always give the same view
pub fn partition(records: &[ChangeRecord], pending: &PendingChanges) -> ReconciledView {
    let (included, excluded): (Vec<_>, Vec<_>) = records
        .iter()
        .cloned()
        .partition(|record| pending.included(&record.path_text()));
    ReconciledView { included, excluded }
}

/// concatenate per-root reports, keeping the first record seen for each local path
fn merge_reports(reports: Vec<StatusReport>) -> (Vec<ChangeRecord>, ParseStats, usize) {
    let mut records = Vec::new();
    let mut stats = ParseStats::default();
    let mut seen = HashSet::new();
    let mut duplicates = 0;

    for report in reports {
        stats.merge(&report.stats);
        for record in report.records {
            if seen.insert(paths::comparison_key(&record.local_path)) {
                records.push(record);
            } else {
                duplicates += 1;
            }
        }
    }
    (records, stats, duplicates)
}

fn status_args() -> Vec<String> {
    vec!["stat".to_string(), "/format:detailed".to_string()]
}

/// run the detailed status report for one root
pub fn query_root(runner: &dyn TfRunner, root: &Path, known_roots: &[PathBuf]) -> Result<StatusReport> {
    let output = runner
        .run_checked(&status_args(), Some(root))
        .with_context(|| format!("status query failed for {}", root.display()))?;
    if output.no_items_match() {
        return Ok(StatusReport::default());
    }
    Ok(parse_status(&output.stdout, root, known_roots))
}

/// summary of one completed refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub included: usize,
    pub excluded: usize,
    /// records reported under more than one root and kept once
    pub duplicates: usize,
    /// passes run, more than one when trailing requests were served
    pub passes: usize,
    pub stats: ParseStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// another pass was already running
    Skipped,
}

#[derive(Debug, Default)]
struct ViewState {
    records: Vec<ChangeRecord>,
    view: ReconciledView,
}

/// clears the in-flight flag when a pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// pending changes of one backend workspace across its mapped roots
pub struct MappingView {
    workspace: String,
    roots: Vec<PathBuf>,
    known_roots: Vec<PathBuf>,
    policy: RefreshPolicy,
    in_flight: AtomicBool,
    rerun: AtomicBool,
    state: Mutex<ViewState>,
}

impl MappingView {
    /// `known_roots` are every root in the session, used to tell in-workspace items apart
    pub fn new(
        workspace: impl Into<String>,
        roots: Vec<PathBuf>,
        known_roots: Vec<PathBuf>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            roots,
            known_roots,
            policy,
            in_flight: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            state: Mutex::new(ViewState::default()),
        }
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// true if `path` lies under one of this view's roots
    pub fn covers(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| paths::is_under(path, root))
    }

    fn lock_state(&self) -> MutexGuard<'_, ViewState> {
        // the state is replaced whole, so a poisoned lock still holds a consistent view
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// last completed view
    pub fn view(&self) -> ReconciledView {
        self.lock_state().view.clone()
    }

    /// records behind the last completed view
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.lock_state().records.clone()
    }

    /// query every root and merge the results
    ///
    /// several roots are queried in parallel and all are awaited before merging;
    /// the first failure, in root order, is returned
    pub fn query(&self, runner: &dyn TfRunner) -> Result<(Vec<ChangeRecord>, ParseStats, usize)> {
        let results: Vec<Result<StatusReport>> = match self.roots.as_slice() {
            [] => Vec::new(),
            [root] => vec![query_root(runner, root, &self.known_roots)],
            roots => thread::scope(|scope| {
                let handles: Vec<_> = roots
                    .iter()
                    .map(|root| scope.spawn(move || query_root(runner, root, &self.known_roots)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(anyhow!("status query thread panicked")))
                    })
                    .collect()
            }),
        };

        let reports = results.into_iter().collect::<Result<Vec<_>>>()?;
        Ok(merge_reports(reports))
    }

    /// requery the backend and rebuild the view
    ///
    /// only one pass runs at a time; a request arriving meanwhile is dropped or,
    /// under [`RefreshPolicy::Trailing`], served by one more pass. on failure
    /// the previous view is kept and the error returned
    pub fn refresh(
        &self,
        runner: &dyn TfRunner,
        pending: &Mutex<PendingChanges>,
    ) -> Result<RefreshOutcome> {
        if !self.begin() {
            if self.policy == RefreshPolicy::Trailing {
                self.rerun.store(true, Ordering::Release);
                debug!("refresh of {} queued behind the running pass", self.workspace);
            } else {
                debug!("refresh of {} dropped, a pass is running", self.workspace);
            }
            return Ok(RefreshOutcome::Skipped);
        }

        let mut passes = 0;
        loop {
            let mut report = {
                let _in_flight = InFlight(&self.in_flight);
                loop {
                    self.rerun.store(false, Ordering::Release);
                    passes += 1;
                    let report = self.pass(runner, pending)?;
                    if !self.rerun.swap(false, Ordering::AcqRel) {
                        break report;
                    }
                }
            };
            // a request queued between the last check and the release above
            if !self.resume_queued() {
                report.passes = passes;
                return Ok(RefreshOutcome::Completed(report));
            }
        }
    }

    /// claim the in-flight flag
    fn begin(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// after releasing the flag, claim it again if a trailing request is waiting
    ///
    /// if another caller claimed it first, that caller's pass serves the request
    fn resume_queued(&self) -> bool {
        self.policy == RefreshPolicy::Trailing && self.rerun.load(Ordering::Acquire) && self.begin()
    }

    /// query, partition and publish
    ///
    /// the view is published while the pending lock is held, so a selection
    /// change cannot land between partitioning and publishing
    fn pass(&self, runner: &dyn TfRunner, pending: &Mutex<PendingChanges>) -> Result<RefreshReport> {
        let (records, stats, duplicates) = self.query(runner)?;
        let pending = pending
            .lock()
            .map_err(|_| anyhow!("pending changes lock poisoned"))?;
        let view = partition(&records, &pending);
        debug!(
            "{}: {} included, {} excluded, {} lines skipped, {} records dropped",
            self.workspace,
            view.included.len(),
            view.excluded.len(),
            stats.skipped_lines,
            stats.dropped_records
        );

        let report = RefreshReport {
            included: view.included.len(),
            excluded: view.excluded.len(),
            duplicates,
            passes: 1,
            stats,
        };
        *self.lock_state() = ViewState { records, view };
        drop(pending);
        Ok(report)
    }

    /// rebuild the view from the last records after a local selection change
    pub fn repartition(&self, pending: &PendingChanges) {
        let mut state = self.lock_state();
        state.view = partition(&state.records, pending);
    }
}

#[cfg(test)]
mod tests;
