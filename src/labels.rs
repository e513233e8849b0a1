use serde::Serialize;
use std::collections::BTreeMap;

const NO_ITEMS_MATCH: &str = "No items match";

/// a parsed label value: either the text after the colon or a nested block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LabelValue {
    Text(String),
    Group(LabelMap),
}

/// nested mapping produced from an indented `label: value` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LabelMap(BTreeMap<String, LabelValue>);

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: LabelValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&LabelValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(LabelValue::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn group(&self, key: &str) -> Option<&LabelMap> {
        match self.get(key) {
            Some(LabelValue::Group(group)) => Some(group),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// walk `path` from this map, turning any scalar on the way into a group
    fn group_at_mut(&mut self, path: &[String]) -> &mut LabelMap {
        let mut current = self;
        for key in path {
            let entry = current
                .0
                .entry(key.clone())
                .or_insert_with(|| LabelValue::Group(LabelMap::new()));
            if let LabelValue::Text(_) = entry {
                *entry = LabelValue::Group(LabelMap::new());
            }
            current = match entry {
                LabelValue::Group(next) => next,
                LabelValue::Text(_) => unreachable!("scalar replaced by a group above"),
            };
        }
        current
    }
}

/// converts something like "Local path" to "localPath"
pub fn label_to_key(label: &str) -> String {
    let key: String = label
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect();

    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// the path named by a "No items match <path>" response, if that is what `input` is
pub fn no_items_match(input: &str) -> Option<&str> {
    let rest = input.trim_start().strip_prefix(NO_ITEMS_MATCH)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let path = rest.lines().find(|line| !line.trim().is_empty())?.trim();
    Some(path)
}

/// one stack frame: the indentation that opened it and the key path of its map
struct Frame {
    indent: usize,
    path: Vec<String>,
}

struct LabelLine {
    indent: usize,
    key: String,
    value: String,
}

/// split one report line into indentation, key and value
///
/// blank lines, `===` rules and lines without a colon yield `None`
fn parse_line(line: &str) -> Option<LabelLine> {
    let body = line.trim_start();
    let trimmed = body.trim_end();
    if trimmed.is_empty() || is_rule(trimmed) {
        return None;
    }
    let (label, value) = body.split_once(':')?;
    let value = value.strip_prefix(' ').unwrap_or(value).trim_end();
    Some(LabelLine {
        indent: line.len() - body.len(),
        key: label_to_key(label.trim()),
        value: value.to_string(),
    })
}

/// a separator line made of three or more `=`
pub(crate) fn is_rule(line: &str) -> bool {
    line.len() >= 3 && line.chars().all(|c| c == '=')
}

/// parse an indentation-nested `label: value` report into a [`LabelMap`]
///
/// a line indented deeper than the current frame turns the previous key into a
/// nested map (renamed with an `Items` suffix if it already held a value); a
/// shallower line pops frames back to its own level. the last line does not
/// need a terminator, and both CRLF and LF endings are accepted
pub fn parse_labels(input: &str) -> LabelMap {
    if let Some(path) = no_items_match(input) {
        let mut local = LabelMap::new();
        local.insert("localPath", LabelValue::Text(path.to_string()));
        let mut root = LabelMap::new();
        root.insert("localInformation", LabelValue::Group(local));
        return root;
    }

    let mut root = LabelMap::new();
    let mut frames = vec![Frame {
        indent: 0,
        path: Vec::new(),
    }];
    let mut prev_key: Option<String> = None;

    for line in input.lines() {
        let Some(parsed) = parse_line(line) else {
            continue;
        };
        let top_indent = frames.last().map_or(0, |frame| frame.indent);

        if parsed.indent > top_indent {
            let parent_path = frames.last().map(|f| f.path.clone()).unwrap_or_default();
            let path = match prev_key.take() {
                Some(prev) => {
                    let parent = root.group_at_mut(&parent_path);
                    let group_key = if parent.text(&prev).is_some_and(|v| !v.is_empty()) {
                        format!("{prev}Items")
                    } else {
                        prev
                    };
                    parent.insert(group_key.clone(), LabelValue::Group(LabelMap::new()));
                    let mut path = parent_path;
                    path.push(group_key);
                    path
                }
                // nothing to nest under: same map, but siblings at this indent stay siblings
                None => parent_path,
            };
            frames.push(Frame {
                indent: parsed.indent,
                path,
            });
        } else if parsed.indent < top_indent {
            // never pop the root frame, even for an indent no frame opened
            while frames.len() > 1 && frames.last().is_some_and(|f| f.indent > parsed.indent) {
                frames.pop();
            }
        }

        let path = frames.last().map(|f| f.path.clone()).unwrap_or_default();
        root.group_at_mut(&path)
            .insert(parsed.key.clone(), LabelValue::Text(parsed.value));
        prev_key = Some(parsed.key);
    }

    root
}

/// `Local information` block of a `tf info` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalInformation {
    pub local_path: Option<String>,
    pub server_path: Option<String>,
    pub changeset: Option<String>,
    pub change: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
}

/// `Server information` block of a `tf info` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInformation {
    pub server_path: Option<String>,
    pub changeset: Option<String>,
    pub deletion_id: Option<String>,
    pub lock: Option<String>,
    pub lock_owner: Option<String>,
    pub last_modified: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub file_type: Option<String>,
    pub size: Option<String>,
}

/// typed view of a `tf info` report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoReport {
    pub local_information: Option<LocalInformation>,
    pub server_information: Option<ServerInformation>,
}

impl InfoReport {
    pub fn parse(input: &str) -> Self {
        Self::from_labels(&parse_labels(input))
    }

    pub fn from_labels(labels: &LabelMap) -> Self {
        let owned = |group: &LabelMap, key: &str| group.text(key).map(str::to_string);

        let local_information = labels.group("localInformation").map(|g| LocalInformation {
            local_path: owned(g, "localPath"),
            server_path: owned(g, "serverPath"),
            changeset: owned(g, "changeset"),
            change: owned(g, "change"),
            item_type: owned(g, "type"),
        });
        let server_information = labels.group("serverInformation").map(|g| ServerInformation {
            server_path: owned(g, "serverPath"),
            changeset: owned(g, "changeset"),
            deletion_id: owned(g, "deletionId"),
            lock: owned(g, "lock"),
            lock_owner: owned(g, "lockOwner"),
            last_modified: owned(g, "lastModified"),
            item_type: owned(g, "type"),
            file_type: owned(g, "fileType"),
            size: owned(g, "size"),
        });

        Self {
            local_information,
            server_information,
        }
    }

    /// true when the backend knows a server path for the item
    pub fn is_versioned(&self) -> bool {
        self.local_information
            .as_ref()
            .is_some_and(|local| local.server_path.is_some())
    }
}
