//! Turns persisted session records into reports a non-programmer can read.
//! Pure and stateless; works on a [`SessionExport`](crate::store::SessionExport).

pub mod render;
pub mod translate;

pub use render::{DwellEntry, ReportFormat, SessionReport, TextInputEntry};
pub use translate::{NumberedClick, TranslatedClick, Vocabulary};
