use crate::labels::InfoReport;
use crate::mappings::{self, MappingTree, WorkspaceInfo};
use crate::paths;
use crate::pending::{PendingChanges, StateChange, StateStore};
use crate::reconcile::{MappingView, RefreshOutcome, RefreshPolicy};
use crate::status::ChangeRecord;
use crate::tf::TfRunner;
use crate::{debug, warning};
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// everything opened for one set of roots: the runner, the shared
/// pending-change set, and one view per backend workspace
///
/// built once by the caller and closed explicitly; nothing here is global
pub struct Session {
    runner: Arc<dyn TfRunner>,
    pending: Mutex<PendingChanges>,
    workspaces: Vec<WorkspaceInfo>,
    views: Vec<MappingView>,
}

impl Session {
    /// discover the workspaces mapping `open_roots` and open a view for each
    ///
    /// `open_store` gets the discovered mapping roots, or `open_roots` when
    /// nothing is mapped, so every folder under the same mappings shares one selection
    pub fn open(
        runner: Arc<dyn TfRunner>,
        open_roots: &[PathBuf],
        open_store: impl FnOnce(&[PathBuf]) -> Result<Box<dyn StateStore>>,
        policy: RefreshPolicy,
    ) -> Result<Self> {
        let workspaces = mappings::discover(runner.as_ref(), open_roots)
            .context("failed to discover workspace mappings")?;
        let store = if workspaces.is_empty() {
            warning!("no workspace maps any of the opened folders");
            open_store(open_roots)?
        } else {
            let mapped: Vec<PathBuf> = workspaces.iter().flat_map(WorkspaceInfo::roots).collect();
            open_store(&mapped)?
        };
        Self::with_workspaces(runner, workspaces, store, policy)
    }

    /// open views for already known `workspaces`
    pub fn with_workspaces(
        runner: Arc<dyn TfRunner>,
        workspaces: Vec<WorkspaceInfo>,
        store: Box<dyn StateStore>,
        policy: RefreshPolicy,
    ) -> Result<Self> {
        let pending = PendingChanges::load(store)?;
        debug!("{} change(s) included from earlier runs", pending.len());
        let known_roots: Vec<PathBuf> = workspaces.iter().flat_map(WorkspaceInfo::roots).collect();
        let views = workspaces
            .iter()
            .map(|workspace| {
                debug!(
                    "opening {} with {} mapping(s)",
                    workspace.name,
                    workspace.mappings.len()
                );
                MappingView::new(
                    workspace.name.clone(),
                    workspace.roots(),
                    known_roots.clone(),
                    policy,
                )
            })
            .collect();

        Ok(Self {
            runner,
            pending: Mutex::new(pending),
            workspaces,
            views,
        })
    }

    pub fn runner(&self) -> &dyn TfRunner {
        self.runner.as_ref()
    }

    pub fn views(&self) -> &[MappingView] {
        &self.views
    }

    pub fn mapping_tree(&self) -> MappingTree {
        MappingTree::from_workspaces(&self.workspaces)
    }

    /// the view whose roots contain `path`
    pub fn view_for(&self, path: &Path) -> Option<&MappingView> {
        self.views.iter().find(|view| view.covers(path))
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, PendingChanges>> {
        self.pending
            .lock()
            .map_err(|_| anyhow!("pending changes lock poisoned"))
    }

    /// paths currently marked for check-in, including any no view reports
    pub fn included_changes(&self) -> Result<Vec<String>> {
        Ok(self.lock_pending()?.included_changes())
    }

    /// changes shown as included across all views
    ///
    /// selected paths the backend no longer reports are left out
    pub fn included_records(&self) -> Vec<ChangeRecord> {
        self.views.iter().flat_map(|view| view.view().included).collect()
    }

    /// refresh every view
    ///
    /// a failing view keeps its previous contents; the others still refresh
    /// and the first failure is returned afterwards
    pub fn refresh_all(&self) -> Result<Vec<RefreshOutcome>> {
        let mut outcomes = Vec::with_capacity(self.views.len());
        let mut first_error = None;

        for view in &self.views {
            match view.refresh(self.runner.as_ref(), &self.pending) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let e = e.context(format!("failed to refresh workspace {}", view.workspace()));
                    if first_error.is_some() {
                        warning!("{:#}", e);
                    } else {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// rebuild every view from its last records against the current selection
    fn repartition(&self, pending: &PendingChanges) {
        for view in &self.views {
            view.repartition(pending);
        }
    }

    /// apply a selection change and, if it changed anything, repartition every view
    fn update(
        &self,
        change: impl FnOnce(&mut PendingChanges) -> Result<StateChange>,
    ) -> Result<StateChange> {
        let mut pending = self.lock_pending()?;
        let result = change(&mut pending)?;
        if result == StateChange::Modified {
            self.repartition(&pending);
        }
        Ok(result)
    }

    pub fn include_file(&self, path: &str) -> Result<StateChange> {
        self.update(|pending| pending.include_file(path))
    }

    pub fn exclude_file(&self, path: &str) -> Result<StateChange> {
        self.update(|pending| pending.exclude_file(path))
    }

    pub fn include<I, S>(&self, paths: I) -> Result<StateChange>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update(|pending| pending.include_list(paths))
    }

    pub fn exclude<I, S>(&self, paths: I) -> Result<StateChange>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.update(|pending| pending.exclude_list(paths))
    }

    /// include every change currently shown in any view
    pub fn include_all(&self) -> Result<StateChange> {
        let paths: Vec<String> = self
            .views
            .iter()
            .flat_map(MappingView::records)
            .map(|record| record.path_text())
            .collect();
        self.include(paths)
    }

    /// clear the whole selection
    pub fn exclude_all(&self) -> Result<StateChange> {
        self.update(PendingChanges::exclude_all)
    }

    /// whether the backend tracks `path`; "No items match" means it does not
    pub fn is_versioned(&self, path: &Path) -> Result<bool> {
        let output = self
            .runner
            .run_checked(&["info".to_string(), path.to_string_lossy().into_owned()], None)
            .with_context(|| format!("failed to query {}", path.display()))?;
        if output.no_items_match() {
            return Ok(false);
        }
        Ok(InfoReport::parse(&output.stdout).is_versioned())
    }

    /// true if `path` lies under a mapped root of this session
    pub fn is_mapped(&self, path: &Path) -> bool {
        self.workspaces
            .iter()
            .flat_map(|workspace| &workspace.mappings)
            .any(|mapping| paths::is_same_or_under(path, &mapping.local_path))
    }

    /// release the views and return the final selection
    pub fn close(self) -> Vec<String> {
        let Self {
            views, pending, ..
        } = self;
        debug!("closing session with {} view(s)", views.len());
        drop(views);
        pending
            .into_inner()
            .map_or_else(|poisoned| poisoned.into_inner().included_changes(), |p| p.included_changes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::WorkspaceMapping;
    use crate::pending::MemoryStateStore;
    use crate::tf::fake::FakeTf;

    const STAT: &[&str] = &["stat", "/format:detailed"];

    fn workspace(name: &str, roots: &[&str]) -> WorkspaceInfo {
        WorkspaceInfo {
            name: name.to_string(),
            collection: Some("http://tfs:8080/tfs/DefaultCollection".to_string()),
            mappings: roots
                .iter()
                .map(|root| WorkspaceMapping {
                    server_path: "$/proj".to_string(),
                    local_path: PathBuf::from(root),
                    workspace: name.to_string(),
                    collection: "http://tfs:8080/tfs/DefaultCollection".to_string(),
                })
                .collect(),
            ..WorkspaceInfo::default()
        }
    }

    fn edit(workspace: &str, path: &str) -> String {
        format!(
            "$/proj/file;C7\r\n  User       : Ian\r\n  Date       : 01 January 2020 10:00:00\r\n  Lock       : none\r\n  Change     : edit\r\n  Workspace  : {workspace}\r\n  Local item : [{workspace}] {path}\r\n\r\n"
        )
    }

    fn session(tf: &Arc<FakeTf>, workspaces: Vec<WorkspaceInfo>, store: MemoryStateStore) -> Session {
        let runner: Arc<dyn TfRunner> = tf.clone();
        Session::with_workspaces(runner, workspaces, Box::new(store), RefreshPolicy::Drop).unwrap()
    }

    #[test]
    fn test_one_view_per_workspace() {
        let tf = Arc::new(FakeTf::new());
        let session = session(
            &tf,
            vec![workspace("A", &[r"C:\a"]), workspace("B", &[r"C:\b1", r"C:\b2"])],
            MemoryStateStore::new(),
        );

        assert_eq!(session.views().len(), 2);
        assert_eq!(session.views()[1].roots().len(), 2);
        assert_eq!(
            session.view_for(Path::new(r"c:/B2/x.txt")).map(MappingView::workspace),
            Some("B")
        );
        assert!(session.view_for(Path::new(r"C:\c\x.txt")).is_none());
        assert_eq!(session.mapping_tree().collections[0].workspaces.len(), 2);
    }

    #[test]
    fn test_refresh_and_select() {
        let tf = Arc::new(FakeTf::new());
        tf.respond(STAT, Some(r"C:\a"), &edit("A", r"C:\a\one.txt"));
        tf.respond(STAT, Some(r"C:\b"), &edit("B", r"C:\b\two.txt"));
        let store = MemoryStateStore::new();
        let session = session(
            &tf,
            vec![workspace("A", &[r"C:\a"]), workspace("B", &[r"C:\b"])],
            store.clone(),
        );

        session.refresh_all().unwrap();
        assert_eq!(session.include([r"C:\b\two.txt"]).unwrap(), StateChange::Modified);

        let b = session.views()[1].view();
        assert_eq!(b.included.len(), 1);
        assert!(b.excluded.is_empty());
        assert_eq!(session.views()[0].view().excluded.len(), 1);
        assert!(store.get("tfsdata").unwrap().contains(r"C:\\b\\two.txt"));

        assert_eq!(session.include_all().unwrap(), StateChange::Modified);
        assert!(session.views().iter().all(|v| v.view().excluded.is_empty()));

        session.exclude_all().unwrap();
        assert!(session.views().iter().all(|v| v.view().included.is_empty()));
        assert!(session.close().is_empty());
    }

    #[test]
    fn test_selection_survives_reopen() {
        let store = MemoryStateStore::new();
        let tf = Arc::new(FakeTf::new());
        let first = session(&tf, vec![workspace("A", &[r"C:\a"])], store.clone());
        first.include([r"C:\a\one.txt"]).unwrap();
        first.close();

        let second = session(&tf, vec![workspace("A", &[r"C:\a"])], store);
        assert_eq!(second.included_changes().unwrap(), [r"C:\a\one.txt"]);
    }

    #[test]
    fn test_failing_view_does_not_stop_the_others() {
        let tf = Arc::new(FakeTf::new());
        tf.fail(STAT, Some(r"C:\a"), "TF30063: You are not authorized");
        tf.respond(STAT, Some(r"C:\b"), &edit("B", r"C:\b\two.txt"));
        let session = session(
            &tf,
            vec![workspace("A", &[r"C:\a"]), workspace("B", &[r"C:\b"])],
            MemoryStateStore::new(),
        );

        let err = session.refresh_all().unwrap_err();

        assert!(format!("{err:#}").contains("workspace A"));
        assert_eq!(session.views()[1].view().excluded.len(), 1);
    }

    #[test]
    fn test_is_versioned() {
        let tf = Arc::new(FakeTf::new());
        tf.respond(
            &["info", r"C:\a\one.txt"],
            None,
            "Local information:\r\n  Local path : C:\\a\\one.txt\r\n  Server path: $/proj/one.txt\r\n  Changeset  : 7\r\n",
        );
        tf.fail(&["info", r"C:\a\new.txt"], None, "No items match C:\\a\\new.txt\r\n");
        let session = session(&tf, vec![workspace("A", &[r"C:\a"])], MemoryStateStore::new());

        assert!(session.is_versioned(Path::new(r"C:\a\one.txt")).unwrap());
        assert!(!session.is_versioned(Path::new(r"C:\a\new.txt")).unwrap());
        assert!(session.is_mapped(Path::new(r"C:\a\new.txt")));
        assert!(!session.is_mapped(Path::new(r"C:\z")));
    }

    #[test]
    fn test_open_discovers_relevant_workspaces() {
        let tf = Arc::new(FakeTf::new());
        tf.respond(&["vc", "workspaces"], None, "");
        tf.respond(
            &["vc", "workfold"],
            Some(r"C:\a\sub"),
            "===============================================================================\r\n\
             Workspace : A (Ian)\r\n\
             Collection: http://tfs:8080/tfs/DefaultCollection\r\n\
             $/proj: C:\\a\r\n",
        );
        let runner: Arc<dyn TfRunner> = tf.clone();
        let mut store_roots = Vec::new();

        let session = Session::open(
            runner,
            &[PathBuf::from(r"C:\a\sub")],
            |roots| {
                store_roots = roots.to_vec();
                Ok(Box::new(MemoryStateStore::new()))
            },
            RefreshPolicy::Drop,
        )
        .unwrap();

        assert_eq!(session.views().len(), 1);
        assert_eq!(session.views()[0].workspace(), "A");
        assert_eq!(store_roots, [PathBuf::from(r"C:\a")], "keyed by the mapping, not the folder");
    }

    #[test]
    fn test_open_without_mappings_keys_store_by_open_roots() {
        let tf = Arc::new(FakeTf::new());
        tf.respond(&["vc", "workspaces"], None, "");
        tf.respond(&["vc", "workfold"], None, "");
        let runner: Arc<dyn TfRunner> = tf.clone();
        let mut store_roots = Vec::new();

        let session = Session::open(
            runner,
            &[PathBuf::from(r"C:\loose")],
            |roots| {
                store_roots = roots.to_vec();
                Ok(Box::new(MemoryStateStore::new()))
            },
            RefreshPolicy::Drop,
        )
        .unwrap();

        assert!(session.views().is_empty());
        assert_eq!(store_roots, [PathBuf::from(r"C:\loose")]);
    }
}
