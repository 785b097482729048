//! Purpose: Serialize a `StoreSnapshot` to JSON, JSON Lines, CSV, or an HTML table.
//! Exports: `export`, `export_to_path`, `default_export_file_name`, `ExportFormat`,
//!          `ExportOptions`, `ErrorPolicy`, `ExportResult`, `RecordFailure`.
//! Role: Read-only consumer of snapshots; never touches the live store.
//! Invariants: Records are emitted in ascending id order; output carries no clock values,
//!             so exporting one snapshot twice yields identical bytes.
//! Invariants: `Skip` only drops whole records; the rest of the output is unaffected.
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::error::{Error, ErrorKind};
use crate::core::files::write_atomic;
use crate::core::record::Record;
use crate::core::snapshot::StoreSnapshot;

const TABLE_RESERVED: [&str; 2] = ["id", "version"];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Jsonl,
    Csv,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
            ExportFormat::Html => "html",
        }
    }

    /// Tabular formats hold one scalar per cell.
    fn is_tabular(self) -> bool {
        matches!(self, ExportFormat::Csv | ExportFormat::Html)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop at the first record that cannot be serialized.
    Abort,
    /// Leave failing records out and report them alongside the output.
    Skip,
}

#[derive(Clone, Copy, Debug)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub errors: ErrorPolicy,
}

impl ExportOptions {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            errors: ErrorPolicy::Abort,
        }
    }

    pub fn with_errors(mut self, errors: ErrorPolicy) -> Self {
        self.errors = errors;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RecordFailure {
    pub id: String,
    pub version: u64,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct ExportResult {
    pub format: ExportFormat,
    pub snapshot_seq: u64,
    pub exported: usize,
    pub failures: Vec<RecordFailure>,
    pub bytes: Vec<u8>,
}

pub fn export(snapshot: &StoreSnapshot, options: ExportOptions) -> Result<ExportResult, Error> {
    let mut failures = Vec::new();
    let mut accepted = Vec::with_capacity(snapshot.len());
    for record in snapshot.iter() {
        match check_record(record, options.format) {
            Ok(()) => accepted.push(record),
            Err(message) => {
                let failure = RecordFailure {
                    id: record.id().to_string(),
                    version: record.version(),
                    message,
                };
                match options.errors {
                    ErrorPolicy::Abort => return Err(abort_error(snapshot, options.format, failure)),
                    ErrorPolicy::Skip => failures.push(failure),
                }
            }
        }
    }

    let bytes = match options.format {
        ExportFormat::Json => render_json(snapshot, &accepted)?,
        ExportFormat::Jsonl => render_jsonl(&accepted)?,
        ExportFormat::Csv => render_csv(&accepted),
        ExportFormat::Html => render_html(snapshot, &accepted),
    };
    debug!(
        format = ?options.format,
        seq = snapshot.seq(),
        exported = accepted.len(),
        skipped = failures.len(),
        "snapshot exported"
    );
    Ok(ExportResult {
        format: options.format,
        snapshot_seq: snapshot.seq(),
        exported: accepted.len(),
        failures,
        bytes,
    })
}

/// Exports and writes the output atomically; a failed export leaves `path` untouched.
pub fn export_to_path(
    snapshot: &StoreSnapshot,
    options: ExportOptions,
    path: impl AsRef<Path>,
) -> Result<ExportResult, Error> {
    let result = export(snapshot, options)?;
    write_atomic(path.as_ref(), &result.bytes)?;
    Ok(result)
}

pub fn default_export_file_name(store: &str, seq: u64, format: ExportFormat) -> String {
    format!("export_{store}_{seq}.{}", format.extension())
}

fn abort_error(snapshot: &StoreSnapshot, format: ExportFormat, failure: RecordFailure) -> Error {
    Error::new(ErrorKind::Export)
        .with_message(format!(
            "record cannot be exported as {}: {}",
            format.extension(),
            failure.message
        ))
        .with_id(failure.id)
        .with_seq(snapshot.seq())
        .with_hint("Use the skip error policy to export the remaining records.")
}

fn check_record(record: &Record, format: ExportFormat) -> Result<(), String> {
    if !format.is_tabular() {
        return Ok(());
    }
    for (name, value) in record.data() {
        if TABLE_RESERVED.contains(&name.as_str()) {
            return Err(format!(
                "field `{name}` collides with a reserved {} column",
                format.extension()
            ));
        }
        if matches!(value, Value::Array(_) | Value::Object(_)) {
            return Err(format!("field `{name}` holds a nested value"));
        }
    }
    Ok(())
}

fn render_json(snapshot: &StoreSnapshot, records: &[&Arc<Record>]) -> Result<Vec<u8>, Error> {
    let document = json!({
        "snapshot": {
            "seq": snapshot.seq(),
            "records": records.len(),
        },
        "records": records.iter().map(|record| record.to_json()).collect::<Vec<_>>(),
    });
    let mut bytes = serde_json::to_vec_pretty(&document).map_err(encode_error)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn render_jsonl(records: &[&Arc<Record>]) -> Result<Vec<u8>, Error> {
    let mut bytes = Vec::new();
    for record in records {
        serde_json::to_writer(&mut bytes, &record.to_json()).map_err(encode_error)?;
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Header and rows of plain cell text shared by the tabular formats.
struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn build(records: &[&Arc<Record>]) -> Self {
        let columns = records
            .iter()
            .flat_map(|record| record.data().keys())
            .collect::<BTreeSet<_>>();
        let header = TABLE_RESERVED
            .iter()
            .map(|name| name.to_string())
            .chain(columns.iter().map(|name| name.to_string()))
            .collect();
        let rows = records
            .iter()
            .map(|record| {
                let mut row = vec![record.id().to_string(), record.version().to_string()];
                row.extend(columns.iter().map(|name| cell_text(record.data(), name)));
                row
            })
            .collect();
        Self { header, rows }
    }
}

fn cell_text(data: &Map<String, Value>, name: &str) -> String {
    match data.get(name) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(value)) => value.clone(),
        Some(Value::Bool(value)) => value.to_string(),
        Some(Value::Number(value)) => value.to_string(),
        // Rejected by `check_record` before rendering.
        Some(Value::Array(_) | Value::Object(_)) => String::new(),
    }
}

fn render_csv(records: &[&Arc<Record>]) -> Vec<u8> {
    let table = Table::build(records);
    let mut out = String::new();
    push_csv_row(&mut out, &table.header);
    for row in &table.rows {
        push_csv_row(&mut out, row);
    }
    out.into_bytes()
}

fn csv_field(value: &str) -> String {
    let needs_quotes = value.contains([',', '"', '\n', '\r'])
        || value.starts_with(' ')
        || value.ends_with(' ');
    if !needs_quotes {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn push_csv_row(out: &mut String, row: &[String]) {
    let fields = row.iter().map(|cell| csv_field(cell)).collect::<Vec<_>>();
    out.push_str(&fields.join(","));
    out.push_str("\r\n");
}

fn render_html(snapshot: &StoreSnapshot, records: &[&Arc<Record>]) -> Vec<u8> {
    let table = Table::build(records);
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!(
        "<title>recstore export (seq {})</title>\n</head>\n<body>\n",
        snapshot.seq()
    ));
    out.push_str("<table>\n<thead>\n");
    push_html_row(&mut out, "th", &table.header);
    out.push_str("</thead>\n<tbody>\n");
    for row in &table.rows {
        push_html_row(&mut out, "td", row);
    }
    out.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    out.into_bytes()
}

fn push_html_row(out: &mut String, tag: &str, cells: &[String]) {
    out.push_str("<tr>");
    for cell in cells {
        out.push_str(&format!("<{tag}>{}</{tag}>", html_escape(cell)));
    }
    out.push_str("</tr>\n");
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn encode_error(err: serde_json::Error) -> Error {
    Error::new(ErrorKind::Export)
        .with_message("failed to encode export")
        .with_source(err)
}
