//! Offline telemetry flattening
//!
//! Batch path over a capture archive: one JSON container per line, each
//! holding the raw request/response of an archived exchange. Request bodies
//! are decoded with the same content decoder as the live path, and every
//! decoded telemetry record is projected into one flat row for analysis.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::content::{self, DecodedContent};
use crate::error::Result;

pub mod report;

/// Placeholder for nested fields absent from a record.
pub const NOT_AVAILABLE: &str = "N/A";

/// Archive read when `convert` is given no path.
pub const DEFAULT_ARCHIVE_FILE: &str = "captures.jsonl";

/// The converter always writes here.
pub const OUTPUT_FILE: &str = "telemetry.csv";

/// One flattened telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryRow {
    pub user: String,
    pub event_name: String,
    pub language_id: String,
    pub ext_name: String,
    pub ext_version: String,
    pub vscode_version: String,
    pub os: String,
    pub platform_version: String,
}

/// Typed accessor over one decoded telemetry record.
///
/// Every getter resolves a fixed nested path under `data.baseData` and
/// falls back to [`NOT_AVAILABLE`] when any step of the path is absent or
/// not a string.
pub struct EventRecord<'a> {
    value: &'a Value,
}

impl<'a> EventRecord<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    fn base_data(&self) -> Option<&'a Value> {
        self.value.get("data")?.get("baseData")
    }

    pub fn name(&self) -> &'a str {
        self.base_data()
            .and_then(|base| base.get("name"))
            .and_then(Value::as_str)
            .unwrap_or(NOT_AVAILABLE)
    }

    pub fn property(&self, key: &str) -> &'a str {
        self.base_data()
            .and_then(|base| base.get("properties"))
            .and_then(|properties| properties.get(key))
            .and_then(Value::as_str)
            .unwrap_or(NOT_AVAILABLE)
    }
}

impl TelemetryRow {
    pub fn from_record(user: &str, record: &Value) -> Self {
        let record = EventRecord::new(record);
        Self {
            user: user.to_string(),
            event_name: record.name().to_string(),
            language_id: record.property("languageId").to_string(),
            ext_name: record.property("common_extname").to_string(),
            ext_version: record.property("common_extversion").to_string(),
            vscode_version: record.property("common_vscodeversion").to_string(),
            os: record.property("common_os").to_string(),
            platform_version: record.property("common_platformversion").to_string(),
        }
    }
}

/// Flatten every archived exchange into telemetry rows, preserving input
/// order.
///
/// A malformed container line or a supported-but-malformed body skips that
/// exchange with a logged warning; exchanges with an unknown or missing
/// content type are skipped silently. Only an I/O failure on the reader
/// aborts the run.
pub fn flatten_archive<R: BufRead>(reader: R) -> Result<Vec<TelemetryRow>> {
    let mut rows = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let container: Value = match serde_json::from_str(&line) {
            Ok(container) => container,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping malformed archive line");
                continue;
            }
        };

        let Some(request) = container.get("request") else {
            warn!(line = line_no, "archive line has no request, skipping");
            continue;
        };

        // The archive's header map is case-sensitive JSON; the header shows
        // up under either spelling depending on the recording client.
        let declared_type = request
            .get("headers")
            .and_then(|headers| {
                headers
                    .get("Content-Type")
                    .or_else(|| headers.get("content-type"))
            })
            .and_then(Value::as_str);
        let Some(declared_type) = declared_type else {
            continue;
        };

        let Some(content) = request.get("content").and_then(Value::as_str) else {
            warn!(line = line_no, "archive line has no request content, skipping");
            continue;
        };

        let records = match content::decode(content.as_bytes(), Some(declared_type)) {
            Ok(DecodedContent::Records(records)) => records,
            Ok(DecodedContent::Unsupported) => continue,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping exchange with malformed body");
                continue;
            }
        };

        let user = container
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or(NOT_AVAILABLE);
        for record in &records {
            rows.push(TelemetryRow::from_record(user, record));
        }
    }

    Ok(rows)
}

/// Run the converter: read `archive`, write the tabular report to `output`.
pub fn run(archive: &Path, output: &Path) -> Result<()> {
    let reader = BufReader::new(File::open(archive)?);
    let rows = flatten_archive(reader)?;
    info!(
        rows = rows.len(),
        archive = %archive.display(),
        "flattened telemetry records"
    );

    let mut writer = BufWriter::new(File::create(output)?);
    report::write_csv(&mut writer, &rows)?;
    info!(output = %output.display(), "wrote telemetry report");
    Ok(())
}
