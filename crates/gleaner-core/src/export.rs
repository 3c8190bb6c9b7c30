//! Dataset export: JSON, CSV, SQL inserts and vector-store placeholders.
//!
//! Input is a single record or an array of records as JSON. Non-object
//! entries are wrapped as `{"value": ...}` so every row has named columns.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::AppError;
use crate::models::compute_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Sql,
    Vector,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Sql => "sql",
            ExportFormat::Vector => "vector",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "sql" => Ok(ExportFormat::Sql),
            "vector" | "vector-placeholder" => Ok(ExportFormat::Vector),
            other => Err(AppError::ValidationError(format!(
                "Unknown export format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportOptions {
    /// Indent JSON and vector output.
    pub pretty: bool,
    /// Target table for SQL output.
    pub table_name: String,
    /// Placeholder embedding length for vector output.
    pub embedding_dimensions: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            pretty: true,
            table_name: "scraped_data".to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Serialize `data` (a record or an array of records) into `format`.
pub fn export_dataset(
    data: &Value,
    format: ExportFormat,
    options: &ExportOptions,
) -> Result<String, AppError> {
    match format {
        ExportFormat::Json => to_json(data, options.pretty),
        ExportFormat::Csv => to_csv(&rows(data)),
        ExportFormat::Sql => Ok(to_sql(&rows(data), &options.table_name)),
        ExportFormat::Vector => to_vector(&rows(data), options),
    }
}

fn to_json(value: &Value, pretty: bool) -> Result<String, AppError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(out)
}

fn rows(data: &Value) -> Vec<Map<String, Value>> {
    let items: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        })
        .collect()
}

/// Sorted union of keys across all rows.
fn columns(rows: &[Map<String, Value>]) -> Vec<String> {
    rows.iter()
        .flat_map(|row| row.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Flatten a value into cell text. `None` means no value.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}

/// Quote `text` as a CSV field, doubling embedded quotes.
fn csv_quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// CSV cell for a value. Strings, arrays and objects are quoted; numbers and
/// booleans are written bare; null and missing values are empty.
fn csv_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        Some(v) => csv_quoted(&cell_text(v).unwrap_or_default()),
    }
}

fn to_csv(rows: &[Map<String, Value>]) -> Result<String, AppError> {
    let columns = columns(rows);
    // Cells arrive pre-quoted by JSON type.
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());

    let csv_err = |e: csv::Error| AppError::ExportError(format!("CSV write failed: {e}"));

    if !columns.is_empty() {
        let header: Vec<String> = columns.iter().map(|c| csv_quoted(c)).collect();
        writer.write_record(&header).map_err(csv_err)?;
    }
    for row in rows {
        let cells: Vec<String> = columns.iter().map(|col| csv_cell(row.get(col))).collect();
        writer.write_record(&cells).map_err(csv_err)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::ExportError(format!("CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| AppError::ExportError(format!("CSV not UTF-8: {e}")))
}

/// Lowercase and replace anything outside `[a-z0-9_]` with `_`.
fn sanitize_identifier(raw: &str) -> String {
    let mut ident: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if ident.is_empty() {
        ident.push_str("field");
    }
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

fn sql_literal(value: Option<&Value>) -> String {
    match value.and_then(cell_text) {
        None => "NULL".to_string(),
        Some(text) => format!("'{}'", text.replace('\'', "''")),
    }
}

fn to_sql(rows: &[Map<String, Value>], table_name: &str) -> String {
    let table = sanitize_identifier(table_name);
    let keys = columns(rows);

    // id and created_at are reserved for the generated columns.
    let mut taken: HashSet<String> = HashSet::from(["id".to_string(), "created_at".to_string()]);
    let mapped: Vec<(String, String)> = keys
        .into_iter()
        .map(|key| {
            let base = sanitize_identifier(&key);
            let mut column = base.clone();
            let mut n = 2;
            while !taken.insert(column.clone()) {
                column = format!("{base}_{n}");
                n += 1;
            }
            (key, column)
        })
        .collect();

    let mut out = format!("CREATE TABLE IF NOT EXISTS {table} (\n  id SERIAL PRIMARY KEY,\n");
    for (_, column) in &mapped {
        out.push_str(&format!("  {column} TEXT,\n"));
    }
    out.push_str("  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP\n);\n");

    if mapped.is_empty() {
        return out;
    }

    let column_list = mapped
        .iter()
        .map(|(_, c)| c.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    for row in rows {
        let values = mapped
            .iter()
            .map(|(key, _)| sql_literal(row.get(key)))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&format!(
            "INSERT INTO {table} ({column_list}) VALUES ({values});\n"
        ));
    }
    out
}

/// Text used as the embedding source for a row.
fn vector_content(row: &Map<String, Value>) -> String {
    if let Some(Value::String(content)) = row.get("content") {
        return content.clone();
    }
    row.iter()
        .filter_map(|(key, value)| cell_text(value).map(|text| format!("{key}: {text}")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_vector(rows: &[Map<String, Value>], options: &ExportOptions) -> Result<String, AppError> {
    let entries: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let content = vector_content(row);
            let hash = compute_hash(&content);
            let mut metadata = row.clone();
            metadata.remove("content");
            serde_json::json!({
                "id": format!("{index}-{}", &hash[..16]),
                "content": content,
                "embedding": vec![0.0_f32; options.embedding_dimensions],
                "metadata": metadata,
            })
        })
        .collect();
    to_json(&Value::Array(entries), options.pretty)
}
