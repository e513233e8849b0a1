use crate::labels::label_to_key;
use crate::paths;
use crate::tf::TfRunner;
use crate::{debug, warning};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// a server folder bound to a local directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMapping {
    pub server_path: String,
    pub local_path: PathBuf,
    pub workspace: String,
    pub collection: String,
}

/// one backend workspace and its working folders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub name: String,
    pub owner: Option<String>,
    pub computer: Option<String>,
    pub comment: Option<String>,
    pub collection: Option<String>,
    pub permissions: Option<String>,
    pub location: Option<String>,
    pub file_time: Option<String>,
    pub mappings: Vec<WorkspaceMapping>,
}

impl WorkspaceInfo {
    /// `Workspace : NAME` or, in workfold output, `Workspace : NAME (Owner)`
    fn from_header(value: &str) -> Self {
        let value = value.trim();
        let (name, owner) = match value.strip_suffix(')').and_then(|v| v.rsplit_once(" (")) {
            Some((name, owner)) => (name.trim(), Some(owner.trim().to_string())),
            None => (value, None),
        };
        Self {
            name: name.to_string(),
            owner,
            ..Self::default()
        }
    }

    /// stamp workspace name and collection onto every mapping
    fn finish(mut self) -> Self {
        let collection = self.collection.clone().unwrap_or_default();
        for mapping in &mut self.mappings {
            mapping.workspace = self.name.clone();
            mapping.collection = collection.clone();
        }
        self
    }

    /// local roots of all working folders
    pub fn roots(&self) -> Vec<PathBuf> {
        self.mappings.iter().map(|m| m.local_path.clone()).collect()
    }
}

/// optional value: blank text becomes `None`
fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// collection urls from the brief `tf vc workspaces` report, first-seen order
pub fn parse_collections(output: &str) -> Vec<String> {
    let mut collections: Vec<String> = Vec::new();
    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        if label_to_key(label.trim()) != "collection" {
            continue;
        }
        if let Some(url) = non_blank(value)
            && !collections.contains(&url)
        {
            collections.push(url);
        }
    }
    collections
}

/// parse flat workspace blocks from `tf vc workspaces /format:detailed` or `tf vc workfold`
///
/// each `Workspace` line opens a block; other labels fill its fields and
/// `$/server: local` lines add working folders. rule lines may be glued to the
/// start of the next label, depending on terminal width
pub fn parse_workspaces(output: &str) -> Vec<WorkspaceInfo> {
    let mut workspaces = Vec::new();
    let mut current: Option<WorkspaceInfo> = None;

    for raw in output.lines() {
        let line = raw.trim().trim_start_matches('=').trim();
        if line.is_empty() || line.starts_with("(cloaked)") {
            continue;
        }

        if line.starts_with('$') {
            let Some(workspace) = current.as_mut() else {
                continue;
            };
            if let Some((server, local)) = line.split_once(':')
                && let Some(local) = non_blank(local)
            {
                workspace.mappings.push(WorkspaceMapping {
                    server_path: server.trim().to_string(),
                    local_path: PathBuf::from(local),
                    workspace: String::new(),
                    collection: String::new(),
                });
            }
            continue;
        }

        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let key = label_to_key(label.trim());
        if key == "workspace" {
            if let Some(done) = current.take() {
                workspaces.push(done.finish());
            }
            current = Some(WorkspaceInfo::from_header(value));
            continue;
        }
        let Some(workspace) = current.as_mut() else {
            continue;
        };
        let field = match key.as_str() {
            "owner" => &mut workspace.owner,
            "computer" => &mut workspace.computer,
            "comment" => &mut workspace.comment,
            "collection" => &mut workspace.collection,
            "permissions" => &mut workspace.permissions,
            "location" => &mut workspace.location,
            "fileTime" => &mut workspace.file_time,
            _ => continue,
        };
        *field = non_blank(value);
    }

    if let Some(done) = current.take() {
        workspaces.push(done.finish());
    }
    workspaces
}

/// true if the mapping at `local` overlaps an open root in either direction
pub fn is_relevant(local: &Path, open_roots: &[PathBuf]) -> bool {
    open_roots
        .iter()
        .any(|root| paths::is_same_or_under(local, root) || paths::is_same_or_under(root, local))
}

/// keep only mappings relevant to `open_roots`, dropping workspaces left empty
pub fn retain_relevant(workspaces: Vec<WorkspaceInfo>, open_roots: &[PathBuf]) -> Vec<WorkspaceInfo> {
    workspaces
        .into_iter()
        .filter_map(|mut workspace| {
            workspace
                .mappings
                .retain(|m| is_relevant(&m.local_path, open_roots));
            (!workspace.mappings.is_empty()).then_some(workspace)
        })
        .collect()
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| (*a).to_string()).collect()
}

/// collections this machine is registered against
pub fn collections(runner: &dyn TfRunner) -> Result<Vec<String>> {
    let output = runner
        .run_checked(&args(&["vc", "workspaces"]), None)
        .context("failed to list collections")?;
    Ok(parse_collections(&output.stdout))
}

/// every workspace of `collection`, with all of its working folders
pub fn collection_workspaces(runner: &dyn TfRunner, collection: &str) -> Result<Vec<WorkspaceInfo>> {
    let output = runner
        .run_checked(
            &[
                "vc".to_string(),
                "workspaces".to_string(),
                "/format:detailed".to_string(),
                format!("/collection:{collection}"),
            ],
            None,
        )
        .with_context(|| format!("failed to list workspaces of {collection}"))?;
    Ok(parse_workspaces(&output.stdout))
}

/// the workspace mapping the directory `root`
pub fn workfold(runner: &dyn TfRunner, root: &Path) -> Result<Vec<WorkspaceInfo>> {
    let output = runner
        .run_checked(&args(&["vc", "workfold"]), Some(root))
        .with_context(|| format!("failed to read working folders for {}", root.display()))?;
    Ok(parse_workspaces(&output.stdout))
}

/// the workspace whose working folders contain `path`
pub fn workfold_of(runner: &dyn TfRunner, path: &Path) -> Result<Option<WorkspaceInfo>> {
    let output = runner
        .run_checked(
            &[
                "vc".to_string(),
                "workfold".to_string(),
                path.to_string_lossy().into_owned(),
            ],
            None,
        )
        .with_context(|| format!("failed to read working folder of {}", path.display()))?;
    Ok(parse_workspaces(&output.stdout).into_iter().next())
}

/// discover workspaces with mappings relevant to `open_roots`
///
/// walks every registered collection; when none are registered, falls back to
/// asking `tf vc workfold` in each open root
pub fn discover(runner: &dyn TfRunner, open_roots: &[PathBuf]) -> Result<Vec<WorkspaceInfo>> {
    let collections = collections(runner)?;
    let mut workspaces = Vec::new();

    if collections.is_empty() {
        debug!("no collections registered, reading working folders per root");
        for root in open_roots {
            match workfold(runner, root) {
                Ok(found) => workspaces.extend(found),
                Err(e) => warning!("{:#}", e),
            }
        }
    } else {
        for collection in &collections {
            workspaces.extend(collection_workspaces(runner, collection)?);
        }
    }

    Ok(retain_relevant(workspaces, open_roots))
}

/// workspaces grouped under their collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionNode {
    pub url: String,
    pub workspaces: Vec<WorkspaceInfo>,
}

/// collection → workspace → mapping hierarchy for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappingTree {
    pub collections: Vec<CollectionNode>,
}

impl MappingTree {
    /// group by collection in first-seen order; workspaces without a collection are left out
    pub fn from_workspaces(workspaces: &[WorkspaceInfo]) -> Self {
        let mut collections: Vec<CollectionNode> = Vec::new();
        for workspace in workspaces {
            let Some(url) = workspace.collection.as_deref() else {
                continue;
            };
            match collections.iter_mut().find(|c| c.url == url) {
                Some(node) => node.workspaces.push(workspace.clone()),
                None => collections.push(CollectionNode {
                    url: url.to_string(),
                    workspaces: vec![workspace.clone()],
                }),
            }
        }
        Self { collections }
    }
}
