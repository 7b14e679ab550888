use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::telemetry::event::{ClickPayload, EventPayload, TelemetryEvent};

/// Lookup tables used to turn raw click data into readable descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vocabulary {
    pub page_names: BTreeMap<String, String>,
    pub element_ids: BTreeMap<String, String>,
    pub class_names: BTreeMap<String, String>,
    pub button_texts: BTreeMap<String, String>,
    /// Classes checked first, in order, when an element carries several.
    pub priority_classes: Vec<String>,
    pub node_names: BTreeMap<String, String>,
}

fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            page_names: table(&[
                ("/", "Initial Greeting / Home Page"),
                ("/character", "Character Selection"),
                ("/first_scenario/talk", "First Scenario Conversation"),
                ("/first_scenario/memory", "First Scenario Memory Extraction"),
                ("/first_scenario/result", "First Scenario Consequences"),
                ("/first_puzzle", "First Puzzle"),
                ("/puzzle/first", "First Puzzle"),
                ("/first_puzzle_explain", "First Puzzle Explanation"),
                ("/second_puzzle", "Second Puzzle"),
                ("/puzzle/second", "Second Puzzle"),
                ("/second_puzzle_explain", "Second Puzzle Explanation"),
                ("/second_scenario/talk", "Second Scenario Conversation"),
                ("/second_scenario/memory", "Second Scenario Memory Extraction"),
                ("/second_scenario/puzzle", "Second Scenario Puzzle"),
                ("/second_scenario/result", "Second Scenario Consequences"),
                ("/final", "Final Message"),
            ]),
            element_ids: table(&[
                ("boy-option", "Boy Character Option"),
                ("girl-option", "Girl Character Option"),
                ("voice-toggle", "Voice Toggle Button"),
            ]),
            class_names: table(&[
                ("continue-button", "Continue Button"),
                ("back-button", "Back Button"),
                ("character-option", "Character Selection Option"),
                ("puzzle-cell", "Puzzle Grid Cell"),
                ("node-input", "Tree Building Node Input"),
                ("dialog-box", "Dialog Box"),
                ("thought-bubble", "Thought Bubble"),
                ("large-thought-bubble", "Large Thought Bubble"),
                ("memory-container", "Memory Container"),
                ("voice-toggle-button", "Voice Toggle Button"),
                ("voice-hint", "Voice Hint Message"),
                ("robot-image", "Robot Image"),
                ("character-image", "Character Image"),
                ("app-title", "App Title"),
                ("screen-counter", "Screen Counter"),
                ("progress-indicator", "Progress Indicator"),
            ]),
            button_texts: table(&[
                ("Let's go!", "Start/Continue Action"),
                ("Continue", "Continue to Next Screen"),
                ("Back", "Go Back to Previous Screen"),
                ("Next", "Proceed to Next Step"),
                ("Submit", "Submit Response"),
                ("Start", "Begin Activity"),
                ("Finish", "Complete Activity"),
            ]),
            priority_classes: [
                "continue-button",
                "back-button",
                "character-option",
                "puzzle-cell",
                "node-input",
                "voice-toggle-button",
                "large-thought-bubble",
                "thought-bubble",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            node_names: table(&[
                ("left-cloud", "Left Cloud Input (Second Scenario)"),
                ("right-cloud", "Right Cloud Input (Second Scenario)"),
                ("final-deduction", "Final Deduction Input (First Scenario)"),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedClick {
    pub page: String,
    pub element: String,
    pub full_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberedClick {
    pub event_number: usize,
    pub timestamp: String,
    #[serde(flatten)]
    pub click: TranslatedClick,
    pub raw_data: ClickPayload,
}

/// Longest button text echoed into a description.
const MAX_ECHOED_TEXT: usize = 30;

impl Vocabulary {
    pub fn page_name(&self, page: &str) -> String {
        self.page_names
            .get(page)
            .cloned()
            .unwrap_or_else(|| format!("Unknown Page ({})", page))
    }

    pub fn node_name<'a>(&'a self, node_id: &'a str) -> &'a str {
        self.node_names.get(node_id).map(String::as_str).unwrap_or(node_id)
    }

    fn primary_class<'a>(&self, class_name: &'a str) -> Option<&'a str> {
        let classes: Vec<&str> = class_name.split_whitespace().collect();
        for wanted in &self.priority_classes {
            if let Some(c) = classes.iter().find(|c| **c == wanted.as_str()) {
                return Some(c);
            }
        }
        classes.first().copied()
    }

    pub fn translate_click(&self, click: &ClickPayload) -> TranslatedClick {
        let page = self.page_name(&click.page);
        let element = self.describe_element(click);
        TranslatedClick {
            full_description: format!("Clicked {} on {}", element, page),
            page,
            element,
        }
    }

    fn describe_element(&self, click: &ClickPayload) -> String {
        let mut description = self.element_description(click).unwrap_or_else(|| {
            match click.element.as_str() {
                "BUTTON" => "Button".to_string(),
                "INPUT" => "Input Field".to_string(),
                "IMG" => "Image".to_string(),
                "" => "Unknown".to_string(),
                other => capitalize(other),
            }
        });

        let text = click.text.as_deref().map(str::trim).unwrap_or("");
        if let Some(action) = self.button_texts.get(text) {
            description.push_str(&format!(" ({})", action));
        } else if !text.is_empty() && text.chars().count() <= MAX_ECHOED_TEXT {
            description.push_str(&format!(" - \"{}\"", text));
        }
        description
    }

    fn element_description(&self, click: &ClickPayload) -> Option<String> {
        if click.cell_type.as_deref() == Some("puzzle-cell") {
            let row = click.cell_row.as_deref().and_then(|r| r.parse::<usize>().ok());
            let col = click.cell_col.as_deref().and_then(|c| c.parse::<usize>().ok());
            if let (Some(row), Some(col)) = (row, col) {
                // Stored zero-based, shown one-based.
                return Some(match click.puzzle_number.as_deref() {
                    Some(n) if !n.is_empty() => {
                        format!("Puzzle {} Cell (Row {}, Col {})", n, row + 1, col + 1)
                    }
                    _ => format!("Puzzle Cell (Row {}, Col {})", row + 1, col + 1),
                });
            }
        }

        if let Some(name) = self.element_ids.get(&click.id) {
            return Some(name.clone());
        }

        self.primary_class(&click.class_name)
            .and_then(|c| self.class_names.get(c))
            .cloned()
    }

    /// Numbers the click events in order; other kinds are skipped.
    pub fn translate_clicks(&self, events: &[TelemetryEvent]) -> Vec<NumberedClick> {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Click(c) => Some((e, c)),
                _ => None,
            })
            .enumerate()
            .map(|(i, (event, click))| NumberedClick {
                event_number: i + 1,
                timestamp: event.timestamp.to_rfc3339(),
                click: self.translate_click(click),
                raw_data: click.clone(),
            })
            .collect()
    }
}

fn capitalize(tag: &str) -> String {
    let mut chars = tag.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}
