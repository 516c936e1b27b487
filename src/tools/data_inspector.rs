//! `data_inspector`: summarize sourced data for the code-generation prompt.
//!
//! The summary is what the model sees instead of the raw data: shapes,
//! columns with a coarse category, samples and structure outlines.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::data_reader::{FileData, Table};
use super::structure::{data_summary, estimate_size, type_name};
use super::web_scraper::{HtmlPage, WebContent, WebPage};
use super::Tool;
use crate::error::Result;
use crate::AgentError;
use crate::source::{DataSourceType, SourcedData};

const SAMPLE_ROWS: usize = 5;
const TABLE_SAMPLE_ROWS: usize = 3;
const HEADING_COUNT: usize = 10;
const KEY_PARAGRAPHS: usize = 5;
const PREVIEW_CHARS: usize = 500;
const STAT_SAMPLES: usize = 10;

/// Coarse category of a column dtype.
///
/// ```
/// use llm_agent::tools::data_inspector::column_category;
///
/// assert_eq!(column_category("int64"), "numeric");
/// assert_eq!(column_category("datetime64[ns]"), "datetime");
/// assert_eq!(column_category("object"), "text");
/// ```
pub fn column_category(dtype: &str) -> &'static str {
    let dtype = dtype.to_lowercase();
    if ["int", "float", "number"].iter().any(|k| dtype.contains(k)) {
        "numeric"
    } else if ["datetime", "timestamp", "date"].iter().any(|k| dtype.contains(k)) {
        "datetime"
    } else if dtype.contains("bool") {
        "boolean"
    } else {
        "text"
    }
}

fn preview(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

fn table_metadata(file_type: &str, table: &Table) -> Map<String, Value> {
    let mut analysis = Map::new();
    let mut numeric = 0;
    let mut text = 0;
    for column in &table.columns {
        let dtype = table.dtypes.get(column).map_or("object", String::as_str);
        let category = column_category(dtype);
        match category {
            "numeric" => numeric += 1,
            "text" => text += 1,
            _ => {}
        }
        let mut entry = json!({"type": dtype, "category": category});
        if category == "numeric" {
            if let Ok(stats) = column_statistics(table, column) {
                entry["statistics"] = stats;
            }
        }
        analysis.insert(column.clone(), entry);
    }

    let dtypes: Map<String, Value> = table
        .columns
        .iter()
        .filter_map(|c| Some((c.clone(), json!(table.dtypes.get(c)?))))
        .collect();

    let meta = json!({
        "filename": table.filename,
        "file_type": file_type,
        "shape": table.shape,
        "columns": table.columns,
        "column_count": table.columns.len(),
        "row_count": table.shape[0],
        "column_analysis": analysis,
        "summary": {
            "numeric_columns": numeric,
            "text_columns": text,
            "total_columns": table.columns.len(),
        },
        "sample_data": table.data.iter().take(SAMPLE_ROWS).collect::<Vec<_>>(),
        "data_types": dtypes,
    });
    into_map(meta)
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Per-column statistics: counts, distinct values, numeric range and
/// centre, and up to ten distinct sample values in first-seen order.
///
/// A column with no usable values reports `{"error": ...}`; a column the
/// table does not have is an error.
///
/// ```
/// use llm_agent::tools::data_inspector::column_statistics;
/// use llm_agent::tools::data_reader::{read_file, FileData};
///
/// let FileData::Csv(table) = read_file("t.csv", b"n,k\n3,a\n1,b\n,c\n2,d\n") else { unreachable!() };
/// let stats = column_statistics(&table, "n").unwrap();
/// assert_eq!(stats["null_count"], 1);
/// assert_eq!(stats["median"], 2.0);
/// ```
pub fn column_statistics(table: &Table, column: &str) -> Result<Value> {
    if !table.columns.iter().any(|c| c == column) {
        return Err(AgentError::Other(format!(
            "Column '{column}' not found in {}",
            table.filename
        )));
    }

    let values: Vec<&Value> = table.data.iter().filter_map(|row| row.get(column)).collect();
    let present: Vec<&Value> = values
        .iter()
        .copied()
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
        .collect();
    if present.is_empty() {
        return Ok(json!({"error": "No valid values found in column"}));
    }

    let mut distinct: Vec<String> = Vec::new();
    for value in &present {
        let text = cell_text(value);
        if !distinct.contains(&text) {
            distinct.push(text);
        }
    }

    let mut stats = json!({
        "total_count": values.len(),
        "non_null_count": present.len(),
        "null_count": values.len() - present.len(),
        "unique_count": distinct.len(),
    });

    let mut numbers: Vec<f64> = present.iter().filter_map(|v| cell_number(v)).collect();
    if !numbers.is_empty() {
        numbers.sort_by(f64::total_cmp);
        let count = numbers.len();
        stats["numeric_count"] = json!(count);
        stats["min"] = json!(numbers[0]);
        stats["max"] = json!(numbers[count - 1]);
        stats["mean"] = json!(numbers.iter().sum::<f64>() / count as f64);
        stats["median"] = json!(numbers[count / 2]);
    }

    distinct.truncate(STAT_SAMPLES);
    stats["sample_values"] = json!(distinct);
    Ok(stats)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Metadata for one parsed file.
pub fn file_metadata(file: &FileData) -> Map<String, Value> {
    match file {
        FileData::Csv(table) | FileData::Excel(table) => table_metadata(file.file_type(), table),
        FileData::Json { filename, data, structure } => into_map(json!({
            "filename": filename,
            "file_type": "json",
            "json_structure": structure,
            "data_summary": data_summary(data),
            "estimated_size": estimate_size(data),
        })),
        FileData::Text { filename, content, length, lines } => into_map(json!({
            "filename": filename,
            "file_type": "text",
            "length": length,
            "line_count": lines,
            "word_count": content.split_whitespace().count(),
            "content_preview": preview(content, PREVIEW_CHARS),
        })),
        FileData::Binary { filename, error, .. } | FileData::Error { filename, error } => {
            into_map(json!({
                "filename": filename,
                "file_type": file.file_type(),
                "error": error,
            }))
        }
    }
}

fn html_metadata(page: &HtmlPage) -> Map<String, Value> {
    let s = &page.structure;
    let tables: Vec<Value> = s
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| {
            json!({
                "table_index": i,
                "headers": t.headers,
                "column_count": t.headers.len(),
                "row_count": t.row_count,
                "sample_data": t.rows.iter().take(TABLE_SAMPLE_ROWS).collect::<Vec<_>>(),
            })
        })
        .collect();

    into_map(json!({
        "content_type": "html",
        "title": page.title,
        "description": page.description,
        "word_count": page.word_count,
        "structure_summary": {
            "heading_count": s.headings.len(),
            "paragraph_count": s.paragraphs.len(),
            "table_count": s.tables.len(),
            "link_count": s.links.len(),
            "image_count": s.images.len(),
        },
        "tables": tables,
        "headings": s.headings.iter().take(HEADING_COUNT).map(|h| &h.text).collect::<Vec<_>>(),
        "key_content": s.paragraphs.iter().take(KEY_PARAGRAPHS).collect::<Vec<_>>(),
    }))
}

fn web_metadata(page: &WebPage, source_type: DataSourceType) -> Value {
    let content = match (&page.content, page.success) {
        (Some(content), true) => content,
        _ => {
            return json!({
                "success": false,
                "error": page.error.as_deref().unwrap_or("No content retrieved"),
                "source_type": source_type,
            })
        }
    };

    let mut meta = Map::new();
    meta.insert("success".into(), json!(true));
    meta.insert("source_type".into(), json!(source_type));
    meta.insert("url".into(), json!(page.url));

    let details = match content {
        WebContent::Html(html) => html_metadata(html),
        WebContent::Json { data, structure } => into_map(json!({
            "content_type": "json",
            "json_structure": structure,
            "data_summary": data_summary(data),
            "estimated_size": estimate_size(data),
        })),
        WebContent::Csv { headers, rows, total_rows } => into_map(json!({
            "content_type": "csv",
            "columns": headers,
            "column_count": headers.len(),
            "row_count": total_rows,
            "sample_data": rows.iter().take(SAMPLE_ROWS).collect::<Vec<_>>(),
        })),
        WebContent::Text { mime, text_content, word_count, line_count } => into_map(json!({
            "content_type": "text",
            "mime": mime,
            "word_count": word_count,
            "line_count": line_count,
            "content_preview": preview(text_content, PREVIEW_CHARS),
        })),
    };
    meta.extend(details);
    Value::Object(meta)
}

fn generic_metadata(value: &Value, source_type: &str) -> Value {
    json!({
        "success": true,
        "source_type": source_type,
        "data_type": type_name(value),
        "summary": data_summary(value),
    })
}

/// Metadata for data sourced as `source_type`.
///
/// # Example
///
/// ```
/// use llm_agent::source::{DataSourceType, SourcedData};
/// use llm_agent::tools::data_inspector::inspect;
/// use llm_agent::tools::data_reader::read_file;
///
/// let data = SourcedData::File(read_file("t.csv", b"a,b\n1,x\n"));
/// let meta = inspect(&data, DataSourceType::File);
/// assert_eq!(meta["column_analysis"]["a"]["category"], "numeric");
/// assert_eq!(meta["summary"]["text_columns"], 1);
/// ```
pub fn inspect(data: &SourcedData, source_type: DataSourceType) -> Value {
    match data {
        SourcedData::Web(page) => web_metadata(page, source_type),
        SourcedData::File(file) => {
            let mut meta = Map::new();
            meta.insert("success".into(), json!(true));
            meta.insert("source_type".into(), json!(source_type));
            meta.extend(file_metadata(file));
            Value::Object(meta)
        }
        SourcedData::Files(files) => json!({
            "success": true,
            "source_type": source_type,
            "file_count": files.len(),
            "files": files.iter().map(file_metadata).collect::<Vec<_>>(),
        }),
        SourcedData::TextOnly => {
            generic_metadata(&json!({"type": "text", "content": ""}), source_type.as_str())
        }
    }
}

/// The `data_inspector` tool. Parameters: `data` and an optional
/// `source_type`. Data that does not match its source type gets a generic
/// summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataInspector;

#[async_trait]
impl Tool for DataInspector {
    fn name(&self) -> &str {
        "data_inspector"
    }

    fn description(&self) -> &str {
        "Summarize sourced data: columns, types, samples and structure"
    }

    fn required_params(&self) -> &[&'static str] {
        &["data"]
    }

    async fn invoke(&self, params: &Value) -> Result<Value> {
        let data = &params["data"];
        let label = params
            .get("source_type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");

        let typed = DataSourceType::parse(label)
            .and_then(|ty| SourcedData::from_parts(ty, data.clone()).ok().map(|d| (ty, d)));

        Ok(match typed {
            Some((ty, sourced)) => inspect(&sourced, ty),
            None => {
                tracing::debug!(source_type = label, "inspecting untyped data");
                generic_metadata(data, label)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::data_reader::read_file;
    use crate::tools::web_scraper::parse_html;
    use url::Url;

    #[test]
    fn test_categories() {
        assert_eq!(column_category("float64"), "numeric");
        assert_eq!(column_category("bool"), "boolean");
        assert_eq!(column_category("Timestamp"), "datetime");
        assert_eq!(column_category("category"), "text");
    }

    #[test]
    fn test_single_csv_file_flattened() {
        let csv = "day,sales,open\n2024-01-01,10,true\n2024-01-02,12.5,false\n";
        let meta = inspect(&SourcedData::File(read_file("s.csv", csv.as_bytes())), DataSourceType::File);
        assert_eq!(meta["success"], true);
        assert_eq!(meta["source_type"], "file");
        assert_eq!(meta["filename"], "s.csv");
        assert_eq!(meta["file_type"], "csv");
        assert_eq!(meta["shape"], json!([2, 3]));
        assert_eq!(meta["column_count"], 3);
        assert_eq!(meta["column_analysis"]["sales"]["type"], "float64");
        assert_eq!(meta["column_analysis"]["sales"]["category"], "numeric");
        assert_eq!(meta["column_analysis"]["sales"]["statistics"]["max"], 12.5);
        assert_eq!(meta["column_analysis"]["open"]["category"], "boolean");
        assert!(meta["column_analysis"]["day"].get("statistics").is_none());
        let order = ["day", "sales", "open"];
        let keys = |v: &Value| v.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys(&meta["column_analysis"]), order);
        assert_eq!(keys(&meta["data_types"]), order);
        assert_eq!(keys(&meta["sample_data"][0]), order);
        assert_eq!(meta["summary"], json!({"numeric_columns": 1, "text_columns": 1, "total_columns": 3}));
        assert_eq!(meta["sample_data"].as_array().unwrap().len(), 2);
    }

    fn table(csv: &str) -> Table {
        match read_file("t.csv", csv.as_bytes()) {
            FileData::Csv(table) => table,
            other => panic!("expected csv, got {other:?}"),
        }
    }

    #[test]
    fn test_numeric_column_statistics() {
        let t = table("price,k\n4,a\n1.5,b\n,c\n10,d\n4,e\n");
        let stats = column_statistics(&t, "price").unwrap();
        assert_eq!(stats["total_count"], 5);
        assert_eq!(stats["non_null_count"], 4);
        assert_eq!(stats["null_count"], 1);
        assert_eq!(stats["unique_count"], 3);
        assert_eq!(stats["numeric_count"], 4);
        assert_eq!(stats["min"], 1.5);
        assert_eq!(stats["max"], 10.0);
        assert_eq!(stats["mean"], 4.875);
        assert_eq!(stats["median"], 4.0);
        assert_eq!(stats["sample_values"], json!(["4.0", "1.5", "10.0"]));
    }

    #[test]
    fn test_text_column_statistics() {
        let t = table("city,n\nOslo,1\nRome,2\nOslo,3\n,4\n");
        let stats = column_statistics(&t, "city").unwrap();
        assert_eq!(stats["total_count"], 4);
        assert_eq!(stats["null_count"], 1);
        assert_eq!(stats["unique_count"], 2);
        assert_eq!(stats["sample_values"], json!(["Oslo", "Rome"]));
        assert!(stats.get("numeric_count").is_none());
        assert!(stats.get("mean").is_none());
    }

    #[test]
    fn test_column_statistics_edge_columns() {
        let t = table("a,b\n1,\n2,\n");
        assert_eq!(
            column_statistics(&t, "b").unwrap(),
            json!({"error": "No valid values found in column"})
        );
        let err = column_statistics(&t, "missing").unwrap_err();
        assert!(err.to_string().contains("Column 'missing' not found in t.csv"));
    }

    #[test]
    fn test_multiple_files_listed() {
        let data = SourcedData::Files(vec![
            read_file("a.txt", b"hello world\nbye"),
            read_file("b.bin", &[0xff, 0xfe]),
        ]);
        let meta = inspect(&data, DataSourceType::File);
        assert_eq!(meta["file_count"], 2);
        assert_eq!(meta["files"][0]["word_count"], 3);
        assert_eq!(meta["files"][0]["line_count"], 2);
        assert_eq!(meta["files"][1]["file_type"], "binary");
        assert_eq!(meta["files"][1]["error"], "Cannot decode as text");
    }

    #[test]
    fn test_json_file_metadata() {
        let meta = file_metadata(&read_file("d.json", br#"[{"a": 1}, {"a": 2}]"#));
        assert_eq!(meta["json_structure"]["type"], "list");
        assert_eq!(meta["data_summary"]["length"], 2);
        assert_eq!(meta["estimated_size"], "17 bytes");
    }

    #[test]
    fn test_web_html_metadata() {
        let html = "<html><head><title>T</title></head><body><h1>Head</h1><p>Para</p>\
                    <table><tr><th>a</th><th>b</th></tr><tr><td>1</td><td>2</td></tr></table></body></html>";
        let page = parse_html(html, &Url::parse("https://x.org").unwrap());
        let data = SourcedData::Web(WebPage::fetched("https://x.org", WebContent::Html(page)));
        let meta = inspect(&data, DataSourceType::UrlInText);
        assert_eq!(meta["source_type"], "url_in_text");
        assert_eq!(meta["content_type"], "html");
        assert_eq!(meta["title"], "T");
        assert_eq!(meta["structure_summary"]["table_count"], 1);
        assert_eq!(meta["tables"][0]["column_count"], 2);
        assert_eq!(meta["tables"][0]["sample_data"], json!([["1", "2"]]));
        assert_eq!(meta["headings"], json!(["Head"]));
        assert_eq!(meta["key_content"], json!(["Para"]));
    }

    #[test]
    fn test_web_failure_metadata() {
        let data = SourcedData::Web(WebPage::failed("http://x", "Request failed: refused"));
        let meta = inspect(&data, DataSourceType::Url);
        assert_eq!(
            meta,
            json!({"success": false, "error": "Request failed: refused", "source_type": "url"})
        );
    }

    #[tokio::test]
    async fn test_tool_generic_fallback() {
        let meta = DataInspector
            .invoke(&json!({"data": "some words here"}))
            .await
            .unwrap();
        assert_eq!(meta["source_type"], "unknown");
        assert_eq!(meta["data_type"], "str");
        assert_eq!(meta["summary"]["word_count"], 3);

        let meta = DataInspector
            .invoke(&json!({"data": {"type": "text", "content": ""}, "source_type": "text_only"}))
            .await
            .unwrap();
        assert_eq!(meta["source_type"], "text_only");
        assert_eq!(meta["data_type"], "dict");
    }

    #[tokio::test]
    async fn test_tool_typed_file_data() {
        let file = serde_json::to_value(read_file("n.txt", b"abc")).unwrap();
        let meta = DataInspector
            .invoke(&json!({"data": file, "source_type": "file"}))
            .await
            .unwrap();
        assert_eq!(meta["file_type"], "text");
        assert_eq!(meta["length"], 3);
    }
}
