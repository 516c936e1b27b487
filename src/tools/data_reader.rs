//! `data_reader`: parse an uploaded file by extension.
//!
//! | Extension | Result |
//! |-----------|--------|
//! | `.csv` | [`FileData::Csv`] with inferred column dtypes |
//! | `.xlsx`, `.xls` | [`FileData::Excel`] from the first worksheet |
//! | `.json` | [`FileData::Json`] plus a structure summary |
//! | `.txt` | [`FileData::Text`] |
//! | anything else | text if it decodes as UTF-8, else [`FileData::Binary`] |
//!
//! Parse failures never surface as errors; they become [`FileData::Error`]
//! so the rest of the pipeline still sees which file failed and why.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;

use async_trait::async_trait;
use calamine::{Data, Reader};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::structure::json_structure;
use super::Tool;
use crate::error::Result;
use crate::AgentError;

/// Depth of the structure summary attached to JSON files.
const JSON_STRUCTURE_DEPTH: usize = 3;

/// A parsed file, tagged by `type` in its JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileData {
    Csv(Table),
    Excel(Table),
    Json {
        filename: String,
        data: Value,
        structure: Value,
    },
    Text {
        filename: String,
        content: String,
        length: usize,
        lines: usize,
    },
    Binary {
        filename: String,
        size: usize,
        error: String,
    },
    Error {
        filename: String,
        error: String,
    },
}

impl FileData {
    pub fn filename(&self) -> &str {
        match self {
            FileData::Csv(t) | FileData::Excel(t) => &t.filename,
            FileData::Json { filename, .. }
            | FileData::Text { filename, .. }
            | FileData::Binary { filename, .. }
            | FileData::Error { filename, .. } => filename,
        }
    }

    /// The `type` tag.
    pub fn file_type(&self) -> &'static str {
        match self {
            FileData::Csv(_) => "csv",
            FileData::Excel(_) => "excel",
            FileData::Json { .. } => "json",
            FileData::Text { .. } => "text",
            FileData::Binary { .. } => "binary",
            FileData::Error { .. } => "error",
        }
    }

    fn error(filename: &str, error: impl Into<String>) -> Self {
        FileData::Error {
            filename: filename.to_string(),
            error: error.into(),
        }
    }

    fn text(filename: &str, content: String) -> Self {
        FileData::Text {
            filename: filename.to_string(),
            length: content.chars().count(),
            lines: content.split('\n').count(),
            content,
        }
    }
}

/// Tabular file contents: one record per row plus column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub filename: String,
    /// Row records keyed by column name.
    pub data: Vec<Map<String, Value>>,
    pub columns: Vec<String>,
    /// `[rows, columns]`.
    pub shape: [usize; 2],
    /// Column name to dtype (`int64`, `float64`, `bool`, `datetime64[ns]`, `object`).
    pub dtypes: BTreeMap<String, String>,
}

/// A typed cell before column inference.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    DateTime(String),
}

impl Cell {
    fn from_csv(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Cell::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            return if f.is_finite() { Cell::Float(f) } else { Cell::Null };
        }
        match trimmed {
            "true" | "True" | "TRUE" => Cell::Bool(true),
            "false" | "False" | "FALSE" => Cell::Bool(false),
            _ => Cell::Text(raw.to_string()),
        }
    }

    fn from_sheet(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Null,
            Data::Int(i) => Cell::Int(*i),
            Data::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Cell::Int(*f as i64),
            Data::Float(f) => Cell::Float(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::String(s) => Cell::Text(s.clone()),
            Data::DateTime(_) | Data::DateTimeIso(_) => Cell::DateTime(data.to_string()),
            Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }
}

/// Column dtype from its cells, following pandas' inference rules.
fn infer_dtype(cells: &[&Cell]) -> &'static str {
    let present: Vec<&Cell> = cells.iter().copied().filter(|c| **c != Cell::Null).collect();
    let has_nulls = present.len() < cells.len();

    if present.is_empty() {
        return "float64";
    }
    if present.iter().all(|c| matches!(c, Cell::Int(_))) {
        return if has_nulls { "float64" } else { "int64" };
    }
    if present.iter().all(|c| matches!(c, Cell::Int(_) | Cell::Float(_))) {
        return "float64";
    }
    if !has_nulls && present.iter().all(|c| matches!(c, Cell::Bool(_))) {
        return "bool";
    }
    if present.iter().all(|c| matches!(c, Cell::DateTime(_))) {
        return "datetime64[ns]";
    }
    "object"
}

fn cell_value(cell: &Cell, dtype: &str) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Int(i) if dtype == "float64" => Value::from(*i as f64),
        Cell::Int(i) => Value::from(*i),
        Cell::Float(f) => Value::from(*f),
        Cell::Bool(b) => Value::Bool(*b),
        Cell::Text(s) | Cell::DateTime(s) => Value::String(s.clone()),
    }
}

/// Headers with blanks replaced by `Unnamed: <index>`.
fn column_names(headers: Vec<String>) -> Vec<String> {
    headers
        .into_iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.trim().to_string();
            if h.is_empty() {
                format!("Unnamed: {i}")
            } else {
                h
            }
        })
        .collect()
}

fn build_table(filename: &str, columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Table {
    let null = Cell::Null;
    let dtypes: Vec<&'static str> = (0..columns.len())
        .map(|col| {
            let cells: Vec<&Cell> = rows
                .iter()
                .map(|row| row.get(col).unwrap_or(&null))
                .collect();
            infer_dtype(&cells)
        })
        .collect();

    let data = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(col, name)| {
                    let cell = row.get(col).unwrap_or(&null);
                    (name.clone(), cell_value(cell, dtypes[col]))
                })
                .collect::<Map<String, Value>>()
        })
        .collect();

    Table {
        filename: filename.to_string(),
        data,
        shape: [rows.len(), columns.len()],
        dtypes: columns
            .iter()
            .cloned()
            .zip(dtypes.iter().map(|d| d.to_string()))
            .collect(),
        columns,
    }
}

fn read_csv(filename: &str, content: &[u8]) -> FileData {
    let text = match std::str::from_utf8(content) {
        Ok(t) => t.trim_start_matches('\u{feff}'),
        Err(e) => return FileData::error(filename, format!("CSV is not valid UTF-8: {e}")),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(h) => h.iter().map(str::to_string).collect(),
        Err(e) => return FileData::error(filename, format!("Failed to parse CSV: {e}")),
    };
    let columns = column_names(headers);

    let mut rows = Vec::new();
    for record in reader.records() {
        match record {
            Ok(r) => rows.push(r.iter().map(Cell::from_csv).collect()),
            Err(e) => return FileData::error(filename, format!("Failed to parse CSV: {e}")),
        }
    }

    FileData::Csv(build_table(filename, columns, rows))
}

fn read_excel(filename: &str, content: &[u8]) -> FileData {
    let mut workbook = match calamine::open_workbook_auto_from_rs(Cursor::new(content.to_vec())) {
        Ok(wb) => wb,
        Err(e) => return FileData::error(filename, format!("Failed to open workbook: {e}")),
    };

    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => return FileData::error(filename, format!("Failed to read worksheet: {e}")),
        None => return FileData::error(filename, "Workbook has no worksheets"),
    };

    let mut sheet_rows = range.rows();
    let columns = match sheet_rows.next() {
        Some(header) => column_names(header.iter().map(|c| c.to_string()).collect()),
        None => Vec::new(),
    };
    let rows = sheet_rows
        .map(|row| row.iter().map(Cell::from_sheet).collect())
        .collect();

    FileData::Excel(build_table(filename, columns, rows))
}

fn read_json(filename: &str, content: &[u8]) -> FileData {
    match serde_json::from_slice::<Value>(content) {
        Ok(data) => FileData::Json {
            filename: filename.to_string(),
            structure: json_structure(&data, JSON_STRUCTURE_DEPTH),
            data,
        },
        Err(e) => FileData::error(filename, format!("Invalid JSON: {e}")),
    }
}

/// Parse `content` according to the extension of `filename`.
///
/// # Example
///
/// ```
/// use llm_agent::tools::data_reader::{read_file, FileData};
///
/// match read_file("sales.csv", b"region,total\nnorth,10\nsouth,12\n") {
///     FileData::Csv(table) => {
///         assert_eq!(table.shape, [2, 2]);
///         assert_eq!(table.dtypes["total"], "int64");
///     }
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn read_file(filename: &str, content: &[u8]) -> FileData {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => read_csv(filename, content),
        "xlsx" | "xls" => read_excel(filename, content),
        "json" => read_json(filename, content),
        "txt" => match String::from_utf8(content.to_vec()) {
            Ok(text) => FileData::text(filename, text),
            Err(e) => FileData::error(filename, format!("Failed to decode text: {e}")),
        },
        _ => match String::from_utf8(content.to_vec()) {
            Ok(text) => FileData::text(filename, text),
            Err(_) => FileData::Binary {
                filename: filename.to_string(),
                size: content.len(),
                error: "Cannot decode as text".to_string(),
            },
        },
    }
}

/// The `data_reader` tool. Parameters: `filename` and `content` (a string
/// or an array of byte values).
#[derive(Debug, Clone, Copy, Default)]
pub struct DataReader;

impl DataReader {
    fn content_bytes(content: &Value) -> Result<Vec<u8>> {
        let invalid = || AgentError::ToolParameter {
            tool: "data_reader".to_string(),
            parameter: "content".to_string(),
        };
        match content {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            Value::Array(items) => items
                .iter()
                .map(|b| {
                    b.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(invalid)
                })
                .collect(),
            _ => Err(invalid()),
        }
    }
}

#[async_trait]
impl Tool for DataReader {
    fn name(&self) -> &str {
        "data_reader"
    }

    fn description(&self) -> &str {
        "Parse an uploaded CSV, Excel, JSON or text file into structured data"
    }

    fn required_params(&self) -> &[&'static str] {
        &["content"]
    }

    async fn invoke(&self, params: &Value) -> Result<Value> {
        let filename = params["filename"].as_str().unwrap_or_default();
        let content = Self::content_bytes(&params["content"])?;
        let file = read_file(filename, &content);
        tracing::debug!(filename, file_type = file.file_type(), "file read");
        Ok(serde_json::to_value(file)?)
    }
}
