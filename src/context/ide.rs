//! Editor context payloads: a full snapshot or the delta since the last send.

use serde::{Deserialize, Serialize};

/// Zero-based cursor position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorPosition {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

/// What the editor looked like at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IdeContextSnapshot {
    #[serde(default)]
    pub active_file: Option<ActiveFile>,
    #[serde(default)]
    pub other_open_files: Vec<String>,
}

impl IdeContextSnapshot {
    fn open_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::with_capacity(self.other_open_files.len() + 1);
        if let Some(active) = &self.active_file {
            paths.push(active.path.as_str());
        }
        for path in &self.other_open_files {
            if !paths.contains(&path.as_str()) {
                paths.push(path.as_str());
            }
        }
        paths
    }
}

/// Supplies the current editor state.
pub trait IdeContextSource: Send + Sync {
    fn snapshot(&self) -> Option<IdeContextSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeContextMode {
    Full,
    Delta,
}

/// Serialized editor context ready to append as a user entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeContextPayload {
    pub mode: IdeContextMode,
    pub text: String,
}

const FULL_PREAMBLE: &str =
    "Here is the user's editor context as a JSON object. This is for your information only.";
const DELTA_PREAMBLE: &str = "Here is a summary of changes in the user's editor context, in JSON format. This is for your information only.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FullContext<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    active_file: Option<&'a ActiveFile>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    other_open_files: &'a [String],
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct ContextChanges<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files_opened: Vec<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files_closed: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_file_changed: Option<ActiveFileChange<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor_moved: Option<CursorMoved<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selection_changed: Option<SelectionChanged<'a>>,
}

impl ContextChanges<'_> {
    fn is_empty(&self) -> bool {
        self.files_opened.is_empty()
            && self.files_closed.is_empty()
            && self.active_file_changed.is_none()
            && self.cursor_moved.is_none()
            && self.selection_changed.is_none()
    }
}

/// `path` is null when the editor no longer has an active file.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveFileChange<'a> {
    path: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<CursorPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected_text: Option<&'a str>,
}

#[derive(Serialize)]
struct CursorMoved<'a> {
    path: &'a str,
    cursor: Option<CursorPosition>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SelectionChanged<'a> {
    path: &'a str,
    selected_text: &'a str,
}

/// Full payload: active file plus other open files, or nothing if both are absent.
pub fn full_context(current: &IdeContextSnapshot) -> Option<String> {
    if current.active_file.is_none() && current.other_open_files.is_empty() {
        return None;
    }
    let data = FullContext {
        active_file: current.active_file.as_ref(),
        other_open_files: &current.other_open_files,
    };
    Some(fence(FULL_PREAMBLE, &data))
}

/// Delta payload describing what changed since `previous`, or nothing if unchanged.
pub fn delta_context(previous: &IdeContextSnapshot, current: &IdeContextSnapshot) -> Option<String> {
    let before = previous.open_paths();
    let after = current.open_paths();

    let mut changes = ContextChanges {
        files_opened: after
            .iter()
            .filter(|path| !before.contains(path))
            .copied()
            .collect(),
        files_closed: before
            .iter()
            .filter(|path| !after.contains(path))
            .copied()
            .collect(),
        ..ContextChanges::default()
    };

    match (&previous.active_file, &current.active_file) {
        (None, None) => {}
        (Some(_), None) => {
            changes.active_file_changed = Some(ActiveFileChange {
                path: None,
                cursor: None,
                selected_text: None,
            });
        }
        (None, Some(now)) => changes.active_file_changed = Some(active_change(now)),
        (Some(then), Some(now)) if then.path != now.path => {
            changes.active_file_changed = Some(active_change(now));
        }
        (Some(then), Some(now)) => {
            if then.cursor != now.cursor {
                changes.cursor_moved = Some(CursorMoved {
                    path: &now.path,
                    cursor: now.cursor,
                });
            }
            if then.selected_text != now.selected_text {
                changes.selection_changed = Some(SelectionChanged {
                    path: &now.path,
                    selected_text: now.selected_text.as_deref().unwrap_or(""),
                });
            }
        }
    }

    if changes.is_empty() {
        return None;
    }
    Some(fence(DELTA_PREAMBLE, &changes))
}

/// Full mode when forced or nothing was delivered before; delta otherwise.
pub fn compute_payload(
    previous: Option<&IdeContextSnapshot>,
    current: &IdeContextSnapshot,
    force_full: bool,
) -> Option<IdeContextPayload> {
    match previous {
        Some(previous) if !force_full => {
            delta_context(previous, current).map(|text| IdeContextPayload {
                mode: IdeContextMode::Delta,
                text,
            })
        }
        _ => full_context(current).map(|text| IdeContextPayload {
            mode: IdeContextMode::Full,
            text,
        }),
    }
}

fn active_change(file: &ActiveFile) -> ActiveFileChange<'_> {
    ActiveFileChange {
        path: Some(&file.path),
        cursor: file.cursor,
        selected_text: file.selected_text.as_deref(),
    }
}

fn fence<T: Serialize>(preamble: &str, data: &T) -> String {
    // Only plain structs of strings and integers reach this point.
    let json = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
    format!("{preamble}\n```json\n{json}\n```")
}
