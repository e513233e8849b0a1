use crate::error::TfError;
use crate::labels::{InfoReport, parse_labels};
use crate::mappings;
use crate::pending::StateChange;
use crate::session::Session;
use crate::status::ChangeRecord;
use crate::{debug, warning};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

/// what a command acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionTarget {
    /// a path named by the caller
    Explicit(PathBuf),
    /// whatever file the host has active
    ActiveDocument,
}

impl ActionTarget {
    /// an explicit path if given, the active document otherwise
    pub fn from_arg(path: Option<PathBuf>) -> Self {
        path.map_or(Self::ActiveDocument, Self::Explicit)
    }

    pub fn resolve(&self, active: Option<&Path>) -> Result<PathBuf, TfError> {
        match self {
            Self::Explicit(path) => Ok(path.clone()),
            Self::ActiveDocument => active.map(Path::to_path_buf).ok_or(TfError::NoTarget),
        }
    }
}

/// single-item backend operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Checkout,
    Delete,
    Undo,
    Get,
}

impl Operation {
    fn verb(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Checkout => "checkout",
            Self::Delete => "delete",
            Self::Undo => "undo",
            Self::Get => "get",
        }
    }

    /// `tf` arguments for running this operation on `path`
    pub fn args(self, path: &Path) -> Vec<String> {
        vec![
            self.verb().to_string(),
            path.to_string_lossy().into_owned(),
            "/recursive".to_string(),
        ]
    }

    /// message shown after the operation succeeded
    pub fn done_message(self, path: &Path) -> String {
        let path = path.display();
        match self {
            Self::Add => format!("{path} added to version control"),
            Self::Checkout => format!("{path} checked out for editing"),
            Self::Delete => format!("{path} deleted from version control"),
            Self::Undo => format!("{path} changes undone"),
            Self::Get => format!("{path} updated to the latest version"),
        }
    }
}

/// runs user intents against a session, refreshing it after each change
pub struct Dispatcher<'a> {
    session: &'a Session,
    active: Option<PathBuf>,
}

impl<'a> Dispatcher<'a> {
    /// `active` is the host's active document, used when no path is given
    pub fn new(session: &'a Session, active: Option<PathBuf>) -> Self {
        Self { session, active }
    }

    pub fn resolve(&self, target: &ActionTarget) -> Result<PathBuf, TfError> {
        target.resolve(self.active.as_deref())
    }

    /// refresh after a successful change; the change itself stands if this fails
    fn refresh(&self) {
        if let Err(e) = self.session.refresh_all() {
            warning!("{:#}", e);
        }
    }

    /// run `operation` on the target, then refresh
    pub fn run(&self, operation: Operation, target: &ActionTarget) -> Result<PathBuf> {
        let path = self.resolve(target)?;
        self.session
            .runner()
            .run_checked(&operation.args(&path), None)
            .with_context(|| format!("{} failed for {}", operation.verb(), path.display()))?;
        self.refresh();
        Ok(path)
    }

    /// check in the included changes the views show, then drop them from the selection
    ///
    /// selected paths with no pending change are neither submitted nor cleared.
    /// returns the paths that were checked in
    pub fn checkin(&self, comment: &str) -> Result<Vec<String>> {
        let comment = comment.trim();
        if comment.is_empty() {
            bail!("a check-in comment is required");
        }
        let included: Vec<String> = self
            .session
            .included_records()
            .iter()
            .map(ChangeRecord::path_text)
            .collect();
        if included.is_empty() {
            bail!("no changes are included");
        }

        let mut args = vec![
            "checkin".to_string(),
            format!("/comment:{comment}"),
            "/noprompt".to_string(),
        ];
        args.extend(included.iter().cloned());
        self.session
            .runner()
            .run_checked(&args, None)
            .context("check-in failed")?;

        debug!("checked in {} change(s)", included.len());
        self.session.exclude(&included)?;
        self.refresh();
        Ok(included)
    }

    /// server version of the target, as text
    pub fn view(&self, target: &ActionTarget) -> Result<String> {
        let path = self.resolve(target)?;
        let output = self
            .session
            .runner()
            .run_checked(
                &[
                    "vc".to_string(),
                    "view".to_string(),
                    path.to_string_lossy().into_owned(),
                    "/console".to_string(),
                ],
                None,
            )
            .with_context(|| format!("failed to fetch server version of {}", path.display()))?;
        if output.no_items_match() {
            bail!("{} is not under version control", path.display());
        }
        Ok(output.stdout)
    }

    pub fn info(&self, target: &ActionTarget) -> Result<InfoReport> {
        let path = self.resolve(target)?;
        let output = self
            .session
            .runner()
            .run_checked(&["info".to_string(), path.to_string_lossy().into_owned()], None)
            .with_context(|| format!("failed to read info for {}", path.display()))?;
        // "No items match" may arrive on stderr; the label parser turns it into a local-path-only report
        let text = if output.stdout.trim().is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        let labels = parse_labels(text);
        if labels.is_empty() {
            bail!("no information reported for {}", path.display());
        }
        Ok(InfoReport::from_labels(&labels))
    }

    /// address of the target in the collection's web version-control browser
    pub fn web_url(&self, target: &ActionTarget) -> Result<String> {
        let path = self.resolve(target)?;
        let info = self.info(target)?;
        let Some(server_path) = info.local_information.and_then(|local| local.server_path) else {
            bail!("{} is not under version control", path.display());
        };
        let collection = mappings::workfold_of(self.session.runner(), &path)?
            .and_then(|workspace| workspace.collection)
            .with_context(|| format!("no collection found for {}", path.display()))?;
        Ok(version_control_url(&collection, &server_path))
    }

    pub fn is_versioned(&self, target: &ActionTarget) -> Result<bool> {
        let path = self.resolve(target)?;
        self.session.is_versioned(&path)
    }

    /// mark the targets for check-in; the active document if none are given
    pub fn include(&self, targets: &[ActionTarget]) -> Result<StateChange> {
        match self.resolve_all(targets)?.as_slice() {
            [path] => self.session.include_file(path),
            paths => self.session.include(paths),
        }
    }

    pub fn exclude(&self, targets: &[ActionTarget]) -> Result<StateChange> {
        match self.resolve_all(targets)?.as_slice() {
            [path] => self.session.exclude_file(path),
            paths => self.session.exclude(paths),
        }
    }

    fn resolve_all(&self, targets: &[ActionTarget]) -> Result<Vec<String>> {
        let targets: Vec<ActionTarget> = if targets.is_empty() {
            vec![ActionTarget::ActiveDocument]
        } else {
            targets.to_vec()
        };
        targets
            .iter()
            .map(|target| Ok(self.resolve(target)?.to_string_lossy().into_owned()))
            .collect()
    }
}

/// `<collection>/_versionControl#path=<server path>`
pub fn version_control_url(collection: &str, server_path: &str) -> String {
    format!(
        "{}/_versionControl#path={}",
        collection.trim_end_matches('/'),
        encode_component(server_path)
    )
}

/// percent-encode all but the characters a query-string value may carry as is
fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(char::from(byte)),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
