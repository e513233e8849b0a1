use crate::paths;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// kind of pending change reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Delete,
    Edit,
    Rename,
    RenameEdit,
    /// anything else, kept verbatim (e.g. "branch", "merge, edit")
    Other(String),
}

impl ChangeType {
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "add" => Self::Add,
            "delete" => Self::Delete,
            "edit" => Self::Edit,
            "rename" => Self::Rename,
            "rename, edit" | "edit, rename" => Self::RenameEdit,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Edit => "edit",
            Self::Rename => "rename",
            Self::RenameEdit => "rename, edit",
            Self::Other(text) => text,
        }
    }

    pub fn is_rename(&self) -> bool {
        matches!(self, Self::Rename | Self::RenameEdit)
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ChangeType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// single-character marker for a change type
pub fn status_char(change_type: &ChangeType) -> char {
    match change_type {
        ChangeType::Add => 'A',
        ChangeType::Delete => 'D',
        ChangeType::Edit => 'M',
        ChangeType::Rename | ChangeType::RenameEdit => 'R',
        ChangeType::Other(_) => '?',
    }
}

/// one pending change to a versioned file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// server path without the `;changeset` suffix
    pub server_path: String,
    pub local_path: PathBuf,
    pub change_type: ChangeType,
    pub workspace: String,
    /// `None` for items added but never checked in
    pub changeset: Option<String>,
    /// previous path, set for renames
    pub source_path: Option<String>,
}

impl ChangeRecord {
    /// local path as the text the pending-change store is keyed by
    pub fn path_text(&self) -> String {
        self.local_path.to_string_lossy().into_owned()
    }

    /// hover text: the change type, plus the source for renames
    pub fn tooltip(&self) -> String {
        match &self.source_path {
            Some(source) if self.change_type.is_rename() => {
                format!("{} from {}", self.change_type, source)
            }
            _ => self.change_type.to_string(),
        }
    }
}

/// counters for lines and records the parser did not turn into output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseStats {
    pub lines: usize,
    /// non-blank lines matching no recognised pattern
    pub skipped_lines: usize,
    /// records never resolved inside the workspace
    pub dropped_records: usize,
    /// records resolved, but outside the queried root
    pub filtered_records: usize,
}

impl ParseStats {
    pub fn merge(&mut self, other: &ParseStats) {
        self.lines += other.lines;
        self.skipped_lines += other.skipped_lines;
        self.dropped_records += other.dropped_records;
        self.filtered_records += other.filtered_records;
    }
}

/// records parsed from one status report, in report order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub records: Vec<ChangeRecord>,
    pub stats: ParseStats,
}

/// record under construction between a `$` line and the next one
#[derive(Debug, Default)]
struct Draft {
    server_path: String,
    changeset: Option<String>,
    local_path: Option<PathBuf>,
    change_type: Option<ChangeType>,
    workspace: Option<String>,
    source_path: Option<String>,
    in_workspace: bool,
}

impl Draft {
    fn start(line: &str) -> Self {
        let (server_path, changeset) = match line.split_once(';') {
            Some((server_path, changeset)) => {
                let changeset = changeset.trim();
                (
                    server_path.trim(),
                    (!changeset.is_empty()).then(|| changeset.to_string()),
                )
            }
            None => (line, None),
        };
        Self {
            server_path: server_path.to_string(),
            changeset,
            ..Self::default()
        }
    }

    fn finish(self) -> Option<ChangeRecord> {
        if !self.in_workspace {
            return None;
        }
        let local_path = self.local_path?;
        Some(ChangeRecord {
            server_path: self.server_path,
            local_path,
            change_type: self
                .change_type
                .unwrap_or_else(|| ChangeType::Other(String::new())),
            workspace: self.workspace.unwrap_or_default(),
            changeset: self.changeset,
            source_path: self.source_path,
        })
    }
}

/// path out of a `Local item` value such as `[ws] C:\proj\a.txt`
fn local_item_path(value: &str) -> Option<PathBuf> {
    let rest = value.trim().strip_prefix('[')?;
    let close = rest.find(']')?;
    let path = rest[close + 1..].trim();
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

fn push_finished(draft: Draft, records: &mut Vec<ChangeRecord>, stats: &mut ParseStats) {
    match draft.finish() {
        Some(record) => records.push(record),
        None => stats.dropped_records += 1,
    }
}

/// parse a `tf stat /format:detailed` report for the mapping rooted at `root`
///
/// `known_roots` are the other mapping roots of the session; a drive-rooted
/// local path outside all of them (and outside `root`) marks its record as
/// not in the workspace. the result is limited to records below `root`
pub fn parse_status(output: &str, root: &Path, known_roots: &[PathBuf]) -> StatusReport {
    let mut records = Vec::new();
    let mut stats = ParseStats::default();
    let mut current: Option<Draft> = None;

    let in_workspace = |path: &Path| {
        let under_known = paths::is_same_or_under(path, root)
            || known_roots
                .iter()
                .any(|known| paths::is_same_or_under(path, known));
        under_known || !paths::is_drive_rooted(path)
    };

    for raw in output.lines() {
        stats.lines += 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('$') {
            if let Some(done) = current.take() {
                push_finished(done, &mut records, &mut stats);
            }
            current = Some(Draft::start(line));
            continue;
        }

        let (Some(draft), Some((label, value))) = (current.as_mut(), line.split_once(':')) else {
            stats.skipped_lines += 1;
            continue;
        };

        match label.trim() {
            "Source item" => draft.source_path = Some(value.trim().to_string()),
            "Local item" => match local_item_path(value) {
                Some(path) => {
                    draft.in_workspace = in_workspace(&path);
                    draft.local_path = Some(path);
                }
                None => stats.skipped_lines += 1,
            },
            "Change" => draft.change_type = Some(ChangeType::parse(value)),
            "Workspace" => draft.workspace = Some(value.trim().to_string()),
            _ => stats.skipped_lines += 1,
        }
    }

    if let Some(done) = current.take() {
        push_finished(done, &mut records, &mut stats);
    }

    let before = records.len();
    records.retain(|record| paths::is_under(&record.local_path, root));
    stats.filtered_records = before - records.len();

    StatusReport { records, stats }
}
