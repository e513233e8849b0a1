use std::path::{Component, Path, PathBuf};

/// comparison key for a local path: forward slashes, lowercase, no trailing separator
///
/// the backend reports windows paths regardless of the host, so comparisons are
/// done on text rather than on `Path` components
pub fn comparison_key(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/").to_lowercase();
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() && text.starts_with('/') {
        return "/".to_string();
    }
    trimmed.to_string()
}

/// true if `path` lies strictly below `root`
///
/// the root gets a trailing separator before the prefix test so `C:\proj2`
/// is not under `C:\proj`
pub fn is_under(path: &Path, root: &Path) -> bool {
    let path = comparison_key(path);
    let root = comparison_key(root);
    let root = if root.ends_with('/') {
        root
    } else {
        format!("{root}/")
    };
    path.starts_with(&root)
}

/// true if `path` is `root` itself or lies below it
pub fn is_same_or_under(path: &Path, root: &Path) -> bool {
    comparison_key(path) == comparison_key(root) || is_under(path, root)
}

/// drop `.` and resolve `..` lexically, without touching the filesystem
///
/// `..` above the root is discarded
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// true for text that starts with a drive letter, e.g. `C:` or `d:\src`
pub fn is_drive_rooted(path: &Path) -> bool {
    let text = path.to_string_lossy();
    let mut chars = text.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}
