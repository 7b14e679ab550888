use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Click text is truncated to this many characters at capture time.
pub const CLICK_TEXT_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Click,
    TreeNode,
    PageVisit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Click => "click",
            EventKind::TreeNode => "treeNode",
            EventKind::PageVisit => "pageVisit",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single captured interaction. Immutable once enqueued.
///
/// Serialized flat, the way the records land in the store:
/// `{ "type": "click", "timestamp": "...", "page": "/", ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl TelemetryEvent {
    pub fn new(timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self { timestamp, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn page(&self) -> &str {
        match &self.payload {
            EventPayload::Click(c) => &c.page,
            EventPayload::TreeNode(t) => &t.page,
            EventPayload::PageVisit(v) => &v.page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    Click(ClickPayload),
    TreeNode(TreeNodeEdit),
    PageVisit(PageVisit),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Click(_) => EventKind::Click,
            EventPayload::TreeNode(_) => EventKind::TreeNode,
            EventPayload::PageVisit(_) => EventKind::PageVisit,
        }
    }
}

/// What was clicked, and where. Cell fields are only present for puzzle grid
/// cells and are kept as the raw strings the UI attached to the element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickPayload {
    pub element: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub class_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_row: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_col: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puzzle_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_type: Option<String>,
}

impl ClickPayload {
    pub fn new(element: impl Into<String>, page: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            page: page.into(),
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.chars().take(CLICK_TEXT_MAX_CHARS).collect());
        self
    }

    pub fn with_cell(
        mut self,
        puzzle_number: Option<&str>,
        row: usize,
        col: usize,
        cell_type: impl Into<String>,
    ) -> Self {
        self.puzzle_number = puzzle_number.map(str::to_string);
        self.cell_row = Some(row.to_string());
        self.cell_col = Some(col.to_string());
        self.cell_type = Some(cell_type.into());
        self
    }
}

/// An edit to a free-text node in the tree-building exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNodeEdit {
    pub page: String,
    pub node_id: String,
    pub value: String,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    "edit".to_string()
}

impl TreeNodeEdit {
    pub fn new(page: impl Into<String>, node_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            node_id: node_id.into(),
            value: value.into(),
            action: default_action(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }
}

/// Dwell time on one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub page: String,
    pub duration_ms: u64,
}
