use super::{Sink, TableStats};
use crate::accumulator::{ListBatch, TableBatch};
use crate::compiler::TableSchema;
use crate::error::Result;
use crate::value::Value;
use csv::{QuoteStyle, Writer, WriterBuilder};
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::LazyLock;

static NUMERIC_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[+-]?(\d*\.\d+|\d+\.?)(e\d+)?$").expect("numeric pattern is valid")
});

/// Month/day[/year], `Mon[th] day[, year]` and year-month-day spellings a
/// spreadsheet would turn into a date.
static DATE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*(",
        r"(0?[1-9]|1[0-2])[-/\\](0?[1-9]|[12][0-9]|3[01])([-/\\]((19|2[0-9])?[0-9]{2}))?",
        r"|(jan(uary)?|feb(ruary)?|mar(ch)?|apr(il)?|may|june?|july?|aug(ust)?|sep(tember)?|oct(ober)?|(nov|dec)(ember)?)",
        r"\s+(0?[1-9]|[12][0-9]|3[01])([ ,]\s*((19|2[0-9])?[0-9]{2}))?",
        r"|(19|2[0-9])[0-9]{2}[-/\\](0?[1-9]|1[0-2])[-/\\](0?[1-9]|[12][0-9]|3[01])",
        r")\s*$"
    ))
    .expect("date pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuoteRule {
    /// Quote only fields containing the delimiter or a line break.
    #[default]
    SeparatorOnly,
    /// Also quote every text value and header. Numbers, booleans and
    /// timestamps stay bare.
    AllStrings,
}

/// Defaults follow the loader's stock `[CSV]` settings: no header row and
/// spreadsheet-safe text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvOptions {
    pub directory: PathBuf,
    pub headers: bool,
    pub delimiter: u8,
    pub quote: u8,
    pub quote_rule: QuoteRule,
    /// Write text a spreadsheet would reinterpret as `="text"`.
    pub excel_compatible: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            headers: false,
            delimiter: b',',
            quote: b'"',
            quote_rule: QuoteRule::SeparatorOnly,
            excel_compatible: true,
        }
    }
}

/// Writes one `<table>.csv` per table. A file is truncated the first time a
/// run writes to its table and appended to for every later list occurrence.
pub struct CsvSink {
    options: CsvOptions,
    destination: String,
    writers: HashMap<String, Writer<File>>,
    stats: BTreeMap<String, TableStats>,
}

impl CsvSink {
    pub fn new(options: CsvOptions) -> Self {
        Self {
            destination: options.directory.display().to_string(),
            options,
            writers: HashMap::new(),
            stats: BTreeMap::new(),
        }
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    fn write_table(&mut self, batch: &TableBatch<'_>) -> Result<()> {
        let name = batch.name();
        if !self.writers.contains_key(name) {
            let writer = open_writer(&self.options, batch.schema)?;
            self.writers.insert(name.to_string(), writer);
        }
        let Some(writer) = self.writers.get_mut(name) else {
            return Ok(());
        };

        for record in batch.records {
            writer.write_record(record.iter().map(|v| {
                let text = field_text(&self.options, v);
                quote_field(&self.options, text, matches!(v, Value::Text(_)))
            }))?;
        }
        self.stats.entry(name.to_string()).or_default().inserted += batch.records.len();
        Ok(())
    }
}

fn open_writer(options: &CsvOptions, schema: &TableSchema) -> Result<Writer<File>> {
    fs::create_dir_all(&options.directory)?;
    let path = options.directory.join(format!("{}.csv", schema.name));
    debug!("Writing {} to {}", schema.name, path.display());

    // fields arrive already quoted by `quote_field`
    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote_style(QuoteStyle::Never)
        .from_writer(File::create(&path)?);
    if options.headers {
        writer.write_record(
            schema
                .column_names()
                .map(|name| quote_field(options, name.to_string(), true)),
        )?;
    }
    Ok(writer)
}

/// Applies the quote rule to one cell's text. `is_text` marks string values,
/// which [`QuoteRule::AllStrings`] always quotes.
pub fn quote_field(options: &CsvOptions, text: String, is_text: bool) -> String {
    let needs_quotes = (is_text && options.quote_rule == QuoteRule::AllStrings)
        || text.as_bytes().contains(&options.delimiter)
        || text.contains(['\n', '\r']);
    if !needs_quotes {
        return text;
    }
    let quote = char::from(options.quote);
    let escaped = text.replace(quote, &format!("{quote}{quote}"));
    format!("{quote}{escaped}{quote}")
}

/// Text form of one cell. Timestamps drop a midnight time of day.
pub fn field_text(options: &CsvOptions, value: &Value) -> String {
    match value {
        Value::Text(text) if options.excel_compatible && needs_formula(text, options.delimiter) => {
            format!("=\"{}\"", text.replace('"', "\"\""))
        }
        other => other.to_string(),
    }
}

fn needs_formula(text: &str, delimiter: u8) -> bool {
    text.as_bytes().contains(&delimiter)
        || NUMERIC_TEXT.is_match(text)
        || DATE_TEXT.is_match(text)
        || text == "TRUE"
        || text == "FALSE"
}

impl Sink for CsvSink {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn write_batch(&mut self, batch: &ListBatch<'_>) -> Result<()> {
        for table in &batch.tables {
            self.write_table(table)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        info!("Wrote {} CSV files to {}", self.writers.len(), self.destination);
        Ok(())
    }

    fn stats(&self) -> &BTreeMap<String, TableStats> {
        &self.stats
    }
}
