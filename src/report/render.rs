use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::translate::{NumberedClick, Vocabulary};
use crate::store::SessionExport;
use crate::telemetry::event::{EventPayload, TelemetryEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
    Text,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Text => "txt",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            "txt" | "text" => Ok(ReportFormat::Text),
            other => Err(format!("unknown report format: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInputEntry {
    pub timestamp: String,
    pub node_id: String,
    pub field: String,
    pub page: String,
    pub value: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DwellEntry {
    pub timestamp: String,
    pub page: String,
    pub page_name: String,
    pub duration_ms: u64,
}

/// Human-readable summary of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub participant_id: String,
    pub start_time: String,
    pub end_time: String,
    pub total_clicks: usize,
    pub total_inputs: usize,
    pub total_page_visits: usize,
    pub clicks: Vec<NumberedClick>,
    pub inputs: Vec<TextInputEntry>,
    pub page_visits: Vec<DwellEntry>,
}

impl SessionReport {
    pub fn build(export: &SessionExport, vocab: &Vocabulary) -> Self {
        let inputs: Vec<TextInputEntry> = export
            .tree_nodes
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::TreeNode(t) => Some(TextInputEntry {
                    timestamp: e.timestamp.to_rfc3339(),
                    field: vocab.node_name(&t.node_id).to_string(),
                    node_id: t.node_id.clone(),
                    page: t.page.clone(),
                    value: t.value.clone(),
                    action: t.action.clone(),
                }),
                _ => None,
            })
            .collect();

        let page_visits: Vec<DwellEntry> = export
            .page_visits
            .iter()
            .filter_map(|e: &TelemetryEvent| match &e.payload {
                EventPayload::PageVisit(v) => Some(DwellEntry {
                    timestamp: e.timestamp.to_rfc3339(),
                    page_name: vocab.page_name(&v.page),
                    page: v.page.clone(),
                    duration_ms: v.duration_ms,
                }),
                _ => None,
            })
            .collect();

        let clicks = vocab.translate_clicks(&export.clicks);
        let session = &export.session;

        Self {
            session_id: export.session_id.to_string(),
            participant_id: session
                .participant_id
                .clone()
                .unwrap_or_else(|| "Anonymous".to_string()),
            start_time: session
                .start_time
                .as_datetime()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "Unknown".to_string()),
            end_time: session
                .end_time
                .and_then(|t| t.as_datetime())
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "Ongoing".to_string()),
            total_clicks: clicks.len(),
            total_inputs: inputs.len(),
            total_page_visits: page_visits.len(),
            clicks,
            inputs,
            page_visits,
        }
    }

    pub fn has_data(&self) -> bool {
        self.total_clicks + self.total_inputs + self.total_page_visits > 0
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, serde_json::Error> {
        match format {
            ReportFormat::Json => self.to_json(),
            ReportFormat::Csv => Ok(self.to_csv()),
            ReportFormat::Text => Ok(self.to_text()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Click sequence as CSV, header first.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Event #,Timestamp,Page,Element Clicked,Description\n");
        for click in &self.clicks {
            let row = [
                click.event_number.to_string(),
                click.timestamp.clone(),
                click.click.page.clone(),
                click.click.element.clone(),
                click.click.full_description.clone(),
            ];
            let cells: Vec<String> = row.iter().map(|c| csv_field(c)).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

/// The plain-text report.
impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heavy = "=".repeat(80);
        let light = "-".repeat(80);

        writeln!(f, "{}", heavy)?;
        writeln!(f, "USER INTERACTION REPORT")?;
        writeln!(f, "{}\n", heavy)?;

        writeln!(f, "Session ID: {}", self.session_id)?;
        writeln!(f, "Participant: {}", self.participant_id)?;
        writeln!(f, "Start Time: {}", self.start_time)?;
        writeln!(f, "End Time: {}", self.end_time)?;
        writeln!(f, "Total Clicks: {}", self.total_clicks)?;
        writeln!(f, "Total Text Inputs: {}", self.total_inputs)?;
        writeln!(f, "Total Page Visits: {}\n", self.total_page_visits)?;

        if !self.inputs.is_empty() {
            writeln!(f, "{}\nTEXT INPUT RESPONSES\n{}\n", light, light)?;
            for (i, input) in self.inputs.iter().enumerate() {
                writeln!(f, "{}. [{}]", i + 1, input.timestamp)?;
                writeln!(f, "   Field: {}", input.field)?;
                writeln!(f, "   Page: {}", if input.page.is_empty() { "Unknown" } else { &input.page })?;
                writeln!(f, "   Response: \"{}\"\n", input.value)?;
            }
        }

        if !self.page_visits.is_empty() {
            writeln!(f, "{}\nTIME ON PAGE\n{}\n", light, light)?;
            for visit in &self.page_visits {
                writeln!(
                    f,
                    "   {} ({}): {:.1}s",
                    visit.page_name,
                    visit.page,
                    visit.duration_ms as f64 / 1000.0
                )?;
            }
            writeln!(f)?;
        }

        writeln!(f, "{}\nCLICK SEQUENCE\n{}\n", light, light)?;
        for click in &self.clicks {
            writeln!(f, "{}. [{}]", click.event_number, click.timestamp)?;
            writeln!(f, "   {}\n", click.click.full_description)?;
        }
        Ok(())
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
