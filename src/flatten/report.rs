//! Tabular report emission

use std::borrow::Cow;
use std::io::{self, Write};

use super::TelemetryRow;

/// Fixed column header of the telemetry report.
pub const CSV_HEADER: &str = "user,eventName,languageId,common_extname,common_extversion,common_vscodeversion,common_os,common_platformversion";

/// Write the header plus one line per row.
pub fn write_csv<W: Write>(out: &mut W, rows: &[TelemetryRow]) -> io::Result<()> {
    writeln!(out, "{CSV_HEADER}")?;
    for row in rows {
        let fields = [
            &row.user,
            &row.event_name,
            &row.language_id,
            &row.ext_name,
            &row.ext_version,
            &row.vscode_version,
            &row.os,
            &row.platform_version,
        ];
        let line: Vec<Cow<'_, str>> = fields.iter().map(|field| escape(field)).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    out.flush()
}

/// Quote a field when it contains a delimiter, quote, or line break;
/// embedded quotes double per RFC 4180.
fn escape(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}
