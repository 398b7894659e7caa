//! Streaming reader for search-terms report files.
//!
//! The report is one large JSON object. Only a single designated array field
//! (by default `dataByDepartmentAndSearchTerm`) carries records; every other
//! field is skipped token by token without being buffered. Each array element
//! is decoded into a small struct holding just the known fields and handed to
//! the caller before the next element is read.
//!
//! Parsing stops as soon as the designated array closes, so anything after it
//! in the document is never read.

use super::{RecordSource, SourceStats};
use crate::{Error, Result};
use flate2::read::MultiGzDecoder;
use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use termfold_core::metrics::set_gauge;
use termfold_core::{DEFAULT_CLICK_SHARE_RANK, Record};

/// Field holding the record array in Amazon search-terms reports.
pub const DEFAULT_ARRAY_FIELD: &str = "dataByDepartmentAndSearchTerm";

/// Input compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Pick by file extension (`.gz`, `.zst`/`.zstd`).
    #[default]
    Auto,
    Plain,
    Gzip,
    Zstd,
}

impl Compression {
    /// Resolve [`Compression::Auto`] against `path`.
    pub fn resolve(self, path: &Path) -> Compression {
        if self != Compression::Auto {
            return self;
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::Plain,
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Compression::Auto),
            "none" | "plain" => Ok(Compression::Plain),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(format!(
                "unknown compression '{other}' (expected auto, none, gzip or zstd)"
            )),
        }
    }
}

/// Configuration for the report source.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Input report path.
    pub input: PathBuf,

    /// Name of the top-level field holding the record array.
    pub array_field: String,

    /// Input compression.
    pub compression: Compression,

    /// Progress reporting interval (records). Zero disables progress logs.
    pub progress_interval: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            array_field: DEFAULT_ARRAY_FIELD.to_string(),
            compression: Compression::Auto,
            progress_interval: 10_000,
        }
    }
}

/// Report file record source.
pub struct ReportSource {
    config: ReportConfig,
}

impl ReportSource {
    /// Create a new report source with the given configuration.
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    /// Open the input, wrapping it in the matching decompressor.
    fn open(&self) -> Result<Box<dyn Read>> {
        let path = &self.config.input;
        let file = File::open(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {}: {}", path.display(), e),
            ))
        })?;

        let reader: Box<dyn Read> = match self.config.compression.resolve(path) {
            Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(BufReader::new(file)))),
            Compression::Zstd => Box::new(BufReader::new(zstd::stream::read::Decoder::new(file)?)),
            Compression::Plain | Compression::Auto => Box::new(BufReader::new(file)),
        };

        Ok(reader)
    }
}

impl RecordSource for ReportSource {
    fn name(&self) -> &'static str {
        "report"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(Record) -> Result<()>,
    {
        let reader = self.open()?;
        let bytes = fs::metadata(&self.config.input)?.len();
        let interval = self.config.progress_interval;
        let start = Instant::now();
        let mut emitted: u64 = 0;

        tracing::info!(
            "Streaming '{}' from {} ({} bytes)",
            self.config.array_field,
            self.config.input.display(),
            bytes
        );

        let mut stats = parse_report(reader, &self.config.array_field, |record| {
            handler(record)?;
            emitted += 1;
            if interval > 0 && emitted.is_multiple_of(interval) {
                let rate = emitted as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!("Processed {} records ({:.0} records/sec)", emitted, rate);
                set_gauge("termfold_records_per_second", rate);
            }
            Ok(())
        })?;

        stats.bytes_read = Some(bytes);
        Ok(stats)
    }
}

/// Stream the records of `array_field` out of a JSON report.
///
/// Objects without a search term are dropped and counted. A malformed or
/// truncated document fails with [`Error::Parse`] unless the designated array
/// had already closed. A handler error aborts parsing and is returned as is.
pub fn parse_report<R, F>(reader: R, array_field: &str, mut handler: F) -> Result<SourceStats>
where
    R: Read,
    F: FnMut(Record) -> Result<()>,
{
    let mut state = ParseState {
        array_field,
        handler: &mut handler,
        stats: SourceStats::default(),
        handler_error: None,
        array_found: false,
        array_done: false,
    };

    let mut de = serde_json::Deserializer::from_reader(reader);
    let result = ReportSeed { state: &mut state }.deserialize(&mut de);

    if let Some(e) = state.handler_error.take() {
        return Err(e);
    }
    match result {
        Ok(()) => {}
        // Parsing returns early once the array closes; the rest is never inspected
        Err(_) if state.array_done => {}
        Err(e) => return Err(Error::Parse(e.to_string())),
    }

    if !state.array_found {
        tracing::warn!("Report has no '{}' field; no records read", array_field);
    }

    Ok(state.stats)
}

struct ParseState<'a, F> {
    array_field: &'a str,
    handler: &'a mut F,
    stats: SourceStats,
    handler_error: Option<Error>,
    array_found: bool,
    array_done: bool,
}

/// Walks the top-level report object.
struct ReportSeed<'s, 'a, F> {
    state: &'s mut ParseState<'a, F>,
}

impl<'de, F> DeserializeSeed<'de> for ReportSeed<'_, '_, F>
where
    F: FnMut(Record) -> Result<()>,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de, F> Visitor<'de> for ReportSeed<'_, '_, F>
where
    F: FnMut(Record) -> Result<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a report object")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        while let Some(key) = map.next_key::<String>()? {
            if key != self.state.array_field {
                map.next_value::<IgnoredAny>()?;
                continue;
            }

            self.state.array_found = true;
            map.next_value_seed(RecordArraySeed {
                state: &mut *self.state,
            })?;
            self.state.array_done = true;
            return Ok(());
        }
        Ok(())
    }
}

/// Walks the designated record array.
struct RecordArraySeed<'s, 'a, F> {
    state: &'s mut ParseState<'a, F>,
}

impl<'de, F> DeserializeSeed<'de> for RecordArraySeed<'_, '_, F>
where
    F: FnMut(Record) -> Result<()>,
{
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for RecordArraySeed<'_, '_, F>
where
    F: FnMut(Record) -> Result<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of report records")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(raw) = seq.next_element::<RawRecord>()? {
            self.state.stats.objects_seen += 1;

            let Some(record) = raw.into_record() else {
                self.state.stats.records_dropped += 1;
                continue;
            };

            if let Err(e) = (self.state.handler)(record) {
                self.state.handler_error = Some(e);
                return Err(de::Error::custom("record handler failed"));
            }
            self.state.stats.records_emitted += 1;
        }
        Ok(())
    }
}

/// One array element, holding only the fields the pipeline uses.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    #[serde(default)]
    department_name: Option<String>,
    #[serde(default)]
    search_term: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    search_frequency_rank: Option<u64>,
    #[serde(default)]
    clicked_asin: Option<String>,
    #[serde(default)]
    clicked_item_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    click_share_rank: Option<u32>,
    #[serde(default, deserialize_with = "lenient_number")]
    click_share: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    conversion_share: Option<f64>,
}

impl RawRecord {
    /// Fill defaults; `None` when the search term is missing or empty.
    fn into_record(self) -> Option<Record> {
        let search_term = self.search_term.filter(|t| !t.is_empty())?;
        Some(Record {
            department: self.department_name.unwrap_or_default(),
            search_term,
            search_frequency_rank: self.search_frequency_rank.unwrap_or(0),
            clicked_item_id: self.clicked_asin.unwrap_or_default(),
            item_title: self.clicked_item_name.unwrap_or_default(),
            click_share_rank: self.click_share_rank.unwrap_or(DEFAULT_CLICK_SHARE_RANK),
            click_share: self.click_share.unwrap_or(0.0),
            conversion_share: self.conversion_share.unwrap_or(0.0),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString<T> {
    Number(T),
    Text(String),
}

/// Accept a JSON number, a numeric string, or null.
fn lenient_number<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    match Option::<NumberOrString<T>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| de::Error::custom(format!("invalid number '{s}': {e}"))),
    }
}
