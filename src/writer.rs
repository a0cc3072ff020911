use crate::config::OutputFormat;
use crate::error::Result;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One output row: ordered (column, value) pairs.
pub type Row = Vec<(&'static str, Value)>;

/// Builds a [`Row`] with fixed column order.
#[macro_export]
macro_rules! row {
    ($($name:expr => $value:expr),+ $(,)?) => {
        vec![$(($name, ::serde_json::json!($value))),+]
    };
}

/// Write-one-record capability held by parsers through composition.
/// Implemented once per output encoding.
pub trait RecordWriter: Send {
    fn write_record(&mut self, row: &Row) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Fully quoted CSV, backslash escape, no header row. The downstream bulk
/// import registers these exact separator/quote/escape characters.
pub struct CsvRecordWriter {
    inner: csv::Writer<File>,
}

impl CsvRecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let inner = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Always)
            .escape(b'\\')
            .double_quote(false)
            .from_writer(File::create(path)?);
        Ok(Self { inner })
    }
}

impl RecordWriter for CsvRecordWriter {
    fn write_record(&mut self, row: &Row) -> Result<()> {
        self.inner
            .write_record(row.iter().map(|(_, value)| csv_field(value)))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Doubles literal backslashes before they reach the csv crate. The writer
/// emits the escape byte before quotes but leaves backslashes in field data
/// alone, while readers (and the bulk import) unescape every `\x`; without
/// the doubling the field does not round-trip.
pub fn escape_backslashes(field: &str) -> String {
    if field.contains('\\') {
        field.replace('\\', "\\\\")
    } else {
        field.to_string()
    }
}

fn csv_field(value: &Value) -> String {
    let rendered = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    escape_backslashes(&rendered)
}

/// One compact JSON object per line, UTF-8, no BOM.
pub struct JsonlRecordWriter {
    out: BufWriter<File>,
}

impl JsonlRecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl RecordWriter for JsonlRecordWriter {
    fn write_record(&mut self, row: &Row) -> Result<()> {
        let object: serde_json::Map<String, Value> = row
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        serde_json::to_writer(&mut self.out, &Value::Object(object))?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Opens a writer for `path`, creating parent directories as needed.
pub fn open_writer(format: OutputFormat, path: &Path) -> Result<Box<dyn RecordWriter>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(match format {
        OutputFormat::Csv => Box::new(CsvRecordWriter::create(path)?),
        OutputFormat::Jsonl => Box::new(JsonlRecordWriter::create(path)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_rows_are_fully_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work.csv");
        {
            let mut writer = open_writer(OutputFormat::Csv, &path).unwrap();
            writer
                .write_record(&row!["id" => 1, "title" => "War and Peace", "isbn" => Value::Null])
                .unwrap();
            writer.flush().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "\"1\",\"War and Peace\",\"\"\n");
    }

    #[test]
    fn csv_quotes_are_backslash_escaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.csv");
        {
            let mut writer = open_writer(OutputFormat::Csv, &path).unwrap();
            writer
                .write_record(&row!["title" => "\"Hamlet\""])
                .unwrap();
            writer.flush().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "\"\\\"Hamlet\\\"\"\n");
    }

    #[test]
    fn csv_backslashes_survive_a_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.csv");
        {
            let mut writer = open_writer(OutputFormat::Csv, &path).unwrap();
            writer
                .write_record(&row!["title" => "A history of C:\\ drives", "note" => "AC\\DC"])
                .unwrap();
            writer.flush().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "\"A history of C:\\\\ drives\",\"AC\\\\DC\"\n");
        // a reader configured with the same escape byte restores the fields
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .escape(Some(b'\\'))
            .double_quote(false)
            .from_path(&path)
            .unwrap();
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(record.get(0), Some("A history of C:\\ drives"));
        assert_eq!(record.get(1), Some("AC\\DC"));
    }

    #[test]
    fn jsonl_rows_keep_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("work.jsonl");
        {
            let mut writer = open_writer(OutputFormat::Jsonl, &path).unwrap();
            writer
                .write_record(&row!["work_id" => 7, "title" => "Dune", "pages" => 412])
                .unwrap();
            writer.flush().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"work_id\":7,\"title\":\"Dune\",\"pages\":412}\n");
        let parsed: Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["title"], json!("Dune"));
    }
}
