use crate::constants::{STATE_DIR_NAME, STATE_KEY, TOOL_DIR_NAME};
use crate::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// whether an include/exclude call changed the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Unmodified,
    Modified,
}

/// keyed blob storage scoped to one session
pub trait StateStore: Send {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&mut self, key: &str, value: &str) -> Result<()>;
}

/// state kept in a JSON object file, one file per session root
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// store for a session over the mapped `roots`, under `state_dir` or the user data directory
    ///
    /// the file name depends on the set of roots only, not on their order or case
    pub fn for_session(roots: &[PathBuf], state_dir: Option<&Path>) -> Result<Self> {
        let dir = match state_dir {
            Some(dir) => dir.to_path_buf(),
            None => dirs::data_dir()
                .context("no user data directory available")?
                .join(TOOL_DIR_NAME)
                .join(STATE_DIR_NAME),
        };
        Ok(Self::new(dir.join(format!("{}.json", session_file_stem(roots)))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse state file {}", self.path.display()))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.get(key).map(Value::to_string))
    }

    fn save(&mut self, key: &str, value: &str) -> Result<()> {
        let mut all = self.read_all()?;
        let value: Value =
            serde_json::from_str(value).context("state value is not valid JSON")?;
        all.insert(key.to_string(), value);

        let dir = self
            .path
            .parent()
            .context("state file has no parent directory")?;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create state directory {}", dir.display()))?;

        // write to a sibling temp file and rename over the old state
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .context("failed to create temporary state file")?;
        let text = serde_json::to_string_pretty(&Value::Object(all))?;
        temp.write_all(text.as_bytes())
            .context("failed to write temporary state file")?;
        temp.persist(&self.path)
            .with_context(|| format!("failed to write state file {}", self.path.display()))?;
        Ok(())
    }
}

/// file name for a set of session roots
fn session_file_stem(roots: &[PathBuf]) -> String {
    let mut stems: Vec<String> = roots.iter().map(|root| root_stem(root)).collect();
    stems.sort();
    stems.dedup();
    if stems.is_empty() {
        return "root".to_string();
    }
    stems.join("+")
}

/// a root's comparison key with anything unusual replaced
fn root_stem(root: &Path) -> String {
    let stem: String = paths::comparison_key(root)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "root".to_string()
    } else {
        stem.to_string()
    }
}

/// persisted shape of the pending-change set
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingData {
    #[serde(default)]
    pending_changes: Vec<String>,
}

/// local paths the user has marked for the next check-in
///
/// kept sorted and duplicate-free; every mutation is written through to the
/// backing [`StateStore`] before returning
pub struct PendingChanges {
    data: PendingData,
    store: Box<dyn StateStore>,
}

impl PendingChanges {
    /// load the set from `store`; missing state gives an empty set
    pub fn load(store: Box<dyn StateStore>) -> Result<Self> {
        let mut data = match store.load(STATE_KEY)? {
            Some(raw) => serde_json::from_str::<PendingData>(&raw)
                .context("failed to parse stored pending changes")?,
            None => PendingData::default(),
        };
        data.pending_changes.sort();
        data.pending_changes.dedup();
        Ok(Self { data, store })
    }

    pub fn included(&self, path: &str) -> bool {
        self.data.pending_changes.iter().any(|p| p == path)
    }

    pub fn include_file(&mut self, path: &str) -> Result<StateChange> {
        if self.included(path) {
            return Ok(StateChange::Unmodified);
        }
        self.data.pending_changes.push(path.to_string());
        self.data.pending_changes.sort();
        self.write()?;
        Ok(StateChange::Modified)
    }

    pub fn exclude_file(&mut self, path: &str) -> Result<StateChange> {
        if !self.included(path) {
            return Ok(StateChange::Unmodified);
        }
        self.data.pending_changes.retain(|p| p != path);
        self.write()?;
        Ok(StateChange::Modified)
    }

    /// add every path not already present, writing once at the end
    pub fn include_list<I, S>(&mut self, paths: I) -> Result<StateChange>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut change = StateChange::Unmodified;
        for path in paths {
            let path = path.as_ref();
            if !self.included(path) {
                self.data.pending_changes.push(path.to_string());
                change = StateChange::Modified;
            }
        }
        if change == StateChange::Modified {
            self.data.pending_changes.sort();
            self.write()?;
        }
        Ok(change)
    }

    /// remove every listed path that is present, writing once at the end
    pub fn exclude_list<I, S>(&mut self, paths: I) -> Result<StateChange>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.data.pending_changes.len();
        let remove: Vec<S> = paths.into_iter().collect();
        self.data
            .pending_changes
            .retain(|p| !remove.iter().any(|r| r.as_ref() == p));
        if self.data.pending_changes.len() == before {
            return Ok(StateChange::Unmodified);
        }
        self.write()?;
        Ok(StateChange::Modified)
    }

    pub fn exclude_all(&mut self) -> Result<StateChange> {
        let change = if self.is_empty() {
            StateChange::Unmodified
        } else {
            StateChange::Modified
        };
        self.data.pending_changes.clear();
        self.write()?;
        Ok(change)
    }

    /// copy of the current set
    pub fn included_changes(&self) -> Vec<String> {
        self.data.pending_changes.clone()
    }

    pub fn len(&self) -> usize {
        self.data.pending_changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.pending_changes.is_empty()
    }

    fn write(&mut self) -> Result<()> {
        let text = serde_json::to_string(&self.data)?;
        self.store
            .save(STATE_KEY, &text)
            .context("failed to persist pending changes")
    }
}

#[cfg(test)]
pub(crate) use memory::MemoryStateStore;
