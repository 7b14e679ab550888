use chrono::{DateTime, TimeZone, Utc};
use session_telemetry::report::{ReportFormat, SessionReport, Vocabulary};
use session_telemetry::store::SessionExport;
use session_telemetry::telemetry::event::{ClickPayload, EventPayload, PageVisit, TelemetryEvent, TreeNodeEdit};
use session_telemetry::telemetry::session::{HostMetadata, ServerTime, SessionRecord};
use session_telemetry::SessionId;

fn at(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, secs).unwrap()
}

fn click(secs: u32, payload: ClickPayload) -> TelemetryEvent {
    TelemetryEvent::new(at(secs), EventPayload::Click(payload))
}

fn export() -> SessionExport {
    let mut session = SessionRecord::open(None, HostMetadata::default());
    session.start_time = ServerTime::At(at(0));

    SessionExport {
        session_id: SessionId::from("lx1-abc123"),
        session,
        clicks: vec![
            click(1, ClickPayload::new("BUTTON", "/").with_class("continue-button primary").with_text("Continue")),
            click(2, ClickPayload::new("DIV", "/first_puzzle").with_cell(Some("1"), 0, 2, "puzzle-cell")),
            click(3, ClickPayload::new("SPAN", "/nowhere").with_text("a, \"quoted\" label")),
        ],
        tree_nodes: vec![TelemetryEvent::new(
            at(4),
            EventPayload::TreeNode(TreeNodeEdit::new("/second_scenario/puzzle", "left-cloud", "the robot lied")),
        )],
        page_visits: vec![TelemetryEvent::new(
            at(5),
            EventPayload::PageVisit(PageVisit {
                page: "/first_puzzle".to_string(),
                duration_ms: 12_500,
            }),
        )],
        skipped_lines: 0,
    }
}

#[test]
fn test_click_descriptions() {
    let vocab = Vocabulary::default();
    let clicks = vocab.translate_clicks(&export().clicks);

    assert_eq!(clicks.len(), 3);
    assert_eq!(clicks[0].event_number, 1);
    assert_eq!(
        clicks[0].click.full_description,
        "Clicked Continue Button (Continue to Next Screen) on Initial Greeting / Home Page"
    );
    assert_eq!(
        clicks[1].click.full_description,
        "Clicked Puzzle 1 Cell (Row 1, Col 3) on First Puzzle",
        "Cell coordinates shown one-based"
    );
    assert_eq!(clicks[2].click.page, "Unknown Page (/nowhere)");
    assert_eq!(clicks[2].click.element, "Span - \"a, \"quoted\" label\"");
}

#[test]
fn test_long_text_not_echoed() {
    let vocab = Vocabulary::default();
    let long = ClickPayload::new("BUTTON", "/final").with_text("this label is far too long to repeat back");
    let translated = vocab.translate_click(&long);
    assert_eq!(translated.element, "Button");
    assert_eq!(translated.page, "Final Message");
}

#[test]
fn test_element_id_beats_class() {
    let vocab = Vocabulary::default();
    let payload = ClickPayload::new("DIV", "/character")
        .with_id("girl-option")
        .with_class("character-option");
    assert_eq!(vocab.translate_click(&payload).element, "Girl Character Option");
}

#[test]
fn test_report_summary() {
    let report = SessionReport::build(&export(), &Vocabulary::default());

    assert_eq!(report.participant_id, "Anonymous");
    assert_eq!(report.end_time, "Ongoing");
    assert_eq!(report.start_time, at(0).to_rfc3339());
    assert_eq!(report.total_clicks, 3);
    assert_eq!(report.total_inputs, 1);
    assert_eq!(report.inputs[0].field, "Left Cloud Input (Second Scenario)");
    assert_eq!(report.page_visits[0].page_name, "First Puzzle");
    assert!(report.has_data());
}

#[test]
fn test_csv_escapes_fields() {
    let csv = SessionReport::build(&export(), &Vocabulary::default()).to_csv();
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(lines[0], "Event #,Timestamp,Page,Element Clicked,Description");
    assert_eq!(lines.len(), 4);
    assert!(
        lines[3].contains("\"Span - \"\"a, \"\"quoted\"\" label\"\"\""),
        "Commas and quotes must be escaped: {}",
        lines[3]
    );
}

#[test]
fn test_text_report_sections() {
    let report = SessionReport::build(&export(), &Vocabulary::default());
    let text = report.to_text();
    assert_eq!(text, format!("{}", report), "Text format is the Display output");

    assert!(text.starts_with(&"=".repeat(80)));
    assert!(text.contains("USER INTERACTION REPORT"));
    assert!(text.contains("Session ID: lx1-abc123"));
    assert!(text.contains("TEXT INPUT RESPONSES"));
    assert!(text.contains("   Response: \"the robot lied\""));
    assert!(text.contains("First Puzzle (/first_puzzle): 12.5s"));
    assert!(text.contains("CLICK SEQUENCE"));
    assert!(text.contains("3. ["));
}

#[test]
fn test_json_report_uses_camel_case() {
    let json = SessionReport::build(&export(), &Vocabulary::default()).to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["sessionId"], "lx1-abc123");
    assert_eq!(value["totalClicks"], 3);
    assert_eq!(value["clicks"][1]["fullDescription"], "Clicked Puzzle 1 Cell (Row 1, Col 3) on First Puzzle");
    assert_eq!(value["clicks"][1]["rawData"]["cellCol"], "2");
}

#[test]
fn test_report_format_parsing() {
    assert_eq!("json".parse::<ReportFormat>(), Ok(ReportFormat::Json));
    assert_eq!("TXT".parse::<ReportFormat>(), Ok(ReportFormat::Text));
    assert_eq!(ReportFormat::Csv.extension(), "csv");
    assert!("pdf".parse::<ReportFormat>().is_err());
}
