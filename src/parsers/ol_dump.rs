use crate::consolidate::PublisherRegistry;
use crate::error::{EtlError, Result};
use crate::identity::IdentityResolver;
use crate::isbn;
use crate::languages;
use crate::parsers::{parse_key, SkipPolicy};
use crate::staging::StagingStore;
use crate::textnorm::{self, CaseStyle};
use crate::writer::RecordWriter;
use crate::row;
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::Rng;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").unwrap());
static YEAR_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").unwrap());

/// One surrogate-key resolver per entity type, passed around together.
pub struct Resolvers {
    pub work: IdentityResolver,
    pub author: IdentityResolver,
    pub language: IdentityResolver,
}

impl Resolvers {
    pub fn new() -> Self {
        Self {
            work: IdentityResolver::new(),
            author: IdentityResolver::new(),
            language: IdentityResolver::new(),
        }
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        Self::new()
    }
}

/// Output writers for the rows the streaming pass emits directly.
/// Publishers and subjects are dictionary outputs of the post-pass
/// consolidation and have no writer here.
pub struct DumpWriters {
    pub work: Box<dyn RecordWriter>,
    pub author: Box<dyn RecordWriter>,
    pub language: Box<dyn RecordWriter>,
}

/// Streaming parser for the bibliographic dump: tab-separated lines with a
/// JSON payload in column 4, type-discriminated by the `type.key` URI.
///
/// Lines with no handler for their type are ignored; malformed lines and
/// records failing a hard precondition are dropped under the skip policy.
pub struct OlDumpParser {
    pub resolvers: Resolvers,
    pub publishers: PublisherRegistry,
    emitted_authors: HashSet<u64>,
    emitted_languages: HashSet<u64>,
    rng: StdRng,
    current_year: i64,
}

impl OlDumpParser {
    pub fn new(rng: StdRng) -> Self {
        Self {
            resolvers: Resolvers::new(),
            publishers: PublisherRegistry::new(),
            emitted_authors: HashSet::new(),
            emitted_languages: HashSet::new(),
            rng,
            current_year: Utc::now().year() as i64,
        }
    }

    pub fn process_file(
        &mut self,
        input: &Path,
        staging: &StagingStore,
        writers: &mut DumpWriters,
    ) -> Result<SkipPolicy> {
        info!(input = %input.display(), "reading bibliographic dump");
        let reader = BufReader::new(File::open(input)?);
        let mut policy = SkipPolicy::new("openlib-dump");
        for line in reader.lines() {
            let line = line?;
            match self.process_line(&line, staging, writers) {
                Ok(true) => policy.record_processed(),
                Ok(false) => {}
                Err(_) => policy.record_skipped(),
            }
        }
        writers.work.flush()?;
        writers.author.flush()?;
        writers.language.flush()?;
        policy.log_totals();
        Ok(policy)
    }

    /// Classifies one line and dispatches it to the handler for its type.
    /// `Ok(false)` means the type has no handler and the line was ignored.
    fn process_line(
        &mut self,
        line: &str,
        staging: &StagingStore,
        writers: &mut DumpWriters,
    ) -> Result<bool> {
        let payload = line
            .split('\t')
            .nth(4)
            .ok_or_else(|| EtlError::InvalidRecord("line has fewer than 5 columns".into()))?;
        let obj: Value = serde_json::from_str(payload)?;
        let type_name = obj
            .pointer("/type/key")
            .and_then(Value::as_str)
            .map(parse_key)
            .ok_or_else(|| EtlError::MissingField("type.key".into()))?;
        match type_name {
            "edition" => self.process_edition(&obj, staging, writers).map(|_| true),
            "work" => self.process_work(&obj, staging).map(|_| true),
            "author" => self.process_author(&obj, writers).map(|_| true),
            "language" => self.process_language(&obj, writers).map(|_| true),
            _ => Ok(false),
        }
    }

    /// Editions carry everything the consolidated work row needs: title,
    /// canonical ISBN, language, weight, pages and publish year. Title,
    /// language and ISBN are hard preconditions; failing any rejects the
    /// record.
    fn process_edition(
        &mut self,
        obj: &Value,
        staging: &StagingStore,
        writers: &mut DumpWriters,
    ) -> Result<()> {
        let work_key = obj
            .pointer("/works/0/key")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::MissingField("works".into()))?;
        let Some(work_id) = self.resolvers.work.resolve(parse_key(work_key)) else {
            return Ok(());
        };

        let title = compose_title(obj);
        if title.is_empty() {
            return Err(EtlError::MissingField("title".into()));
        }

        let mut candidates: Vec<String> = Vec::new();
        for field in ["isbn_13", "isbn_10"] {
            if let Some(values) = obj.get(field).and_then(Value::as_array) {
                candidates.extend(values.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
        let isbns = isbn::convert_all(&candidates);
        let canonical = isbns
            .first()
            .cloned()
            .ok_or_else(|| EtlError::MissingField("isbn".into()))?;

        let language = self.extract_language(obj, &title)?;
        let Some(language_id) = self.resolvers.language.resolve(&language) else {
            return Ok(());
        };

        if staging.has_canonical_isbn(work_id)? {
            // The work is already resolved through an earlier edition; keep
            // the extra ISBNs for the reverse lookup and emit nothing.
            for observed in &isbns {
                staging.add_isbn(work_id, observed, false)?;
            }
            return Ok(());
        }

        let pages = obj
            .get("number_of_pages")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let weight = match obj.get("weight").and_then(Value::as_str) {
            Some(raw) => parse_weight(raw).unwrap_or_else(|| estimate_weight(pages)),
            None => estimate_weight(pages),
        };
        let release_year = self.extract_year(
            obj.get("publish_date").and_then(Value::as_str).unwrap_or(""),
        );
        let publisher_id = obj
            .pointer("/publishers/0")
            .and_then(Value::as_str)
            .map(textnorm::normalize)
            .filter(|name| !name.is_empty())
            .and_then(|name| self.publishers.register(&name));
        let created = get_created(obj);

        staging.add_isbn(work_id, &canonical, true)?;
        for observed in isbns.iter().skip(1) {
            staging.add_isbn(work_id, observed, false)?;
        }

        writers.work.write_record(&row![
            "work_id" => work_id,
            "title" => title,
            "isbn" => canonical,
            "language_id" => language_id,
            "publisher_id" => publisher_id,
            "weight" => weight,
            "pages" => pages,
            "release_year" => release_year,
            "created_at" => created,
        ])?;
        Ok(())
    }

    /// Work records contribute associations only; the work row itself comes
    /// from its first resolvable edition.
    fn process_work(&mut self, obj: &Value, staging: &StagingStore) -> Result<()> {
        let key = obj
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::MissingField("key".into()))?;
        let Some(work_id) = self.resolvers.work.resolve(parse_key(key)) else {
            return Ok(());
        };
        if let Some(subjects) = obj.get("subjects").and_then(Value::as_array) {
            for subject in subjects.iter().filter_map(Value::as_str) {
                let cleaned = textnorm::normalize(subject);
                if !cleaned.is_empty() {
                    staging.add_subject(work_id, &cleaned)?;
                }
            }
        }
        if let Some(authors) = obj.get("authors").and_then(Value::as_array) {
            for author in authors {
                let Some(author_key) = author.pointer("/author/key").and_then(Value::as_str)
                else {
                    continue;
                };
                let Some(author_id) = self.resolvers.author.resolve(parse_key(author_key)) else {
                    continue;
                };
                staging.add_author(work_id, author_id)?;
            }
        }
        Ok(())
    }

    fn process_author(&mut self, obj: &Value, writers: &mut DumpWriters) -> Result<()> {
        let key = obj
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::MissingField("key".into()))?;
        let name = textnorm::normalize(obj.get("name").and_then(Value::as_str).unwrap_or(""));
        if name.is_empty() {
            return Err(EtlError::MissingField("name".into()));
        }
        let Some(author_id) = self.resolvers.author.resolve(parse_key(key)) else {
            return Ok(());
        };
        if !self.emitted_authors.insert(author_id) {
            return Ok(());
        }
        writers.author.write_record(&row![
            "author_id" => author_id,
            "name" => name,
            "created_at" => get_created(obj),
        ])?;
        Ok(())
    }

    fn process_language(&mut self, obj: &Value, writers: &mut DumpWriters) -> Result<()> {
        let key = obj
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::MissingField("key".into()))?;
        let code = languages::map_code(parse_key(key))
            .ok_or_else(|| EtlError::InvalidRecord("suppressed language code".into()))?;
        let Some(language_id) = self.resolvers.language.resolve(&code) else {
            return Ok(());
        };
        // Legacy codes folding onto an already-emitted canonical code must
        // not produce a near-duplicate row
        if !self.emitted_languages.insert(language_id) {
            return Ok(());
        }
        let name = textnorm::normalize(obj.get("name").and_then(Value::as_str).unwrap_or(""));
        writers.language.write_record(&row![
            "language_id" => language_id,
            "code" => code,
            "name" => name,
            "created_at" => get_created(obj),
        ])?;
        Ok(())
    }

    /// First declared language code, else best-effort detection from the
    /// title. Deprecated codes reject the record rather than emitting a
    /// duplicate language row.
    fn extract_language(&self, obj: &Value, title: &str) -> Result<String> {
        if let Some(declared) = obj.pointer("/languages/0/key").and_then(Value::as_str) {
            return languages::map_code(parse_key(declared))
                .ok_or_else(|| EtlError::InvalidRecord("suppressed language code".into()));
        }
        languages::detect_from_title(title)
            .ok_or_else(|| EtlError::MissingField("language".into()))
    }

    /// First 4-digit token no later than the current year; without one, a
    /// uniformly random year stands in (synthetic fallback, not real data).
    fn extract_year(&mut self, publish_date: &str) -> i64 {
        for capture in YEAR_TOKEN.captures_iter(publish_date) {
            if let Ok(year) = capture[1].parse::<i64>() {
                if year <= self.current_year {
                    return year;
                }
            }
        }
        self.rng.gen_range(1900..=2022)
    }
}

/// Title prefix, main title, subtitle and statement of responsibility,
/// joined and normalized to sentence case.
fn compose_title(obj: &Value) -> String {
    let get = |field: &str| obj.get(field).and_then(Value::as_str).unwrap_or("");
    let mut title = String::new();
    for part in [get("title_prefix"), get("title")] {
        if !part.is_empty() {
            if !title.is_empty() {
                title.push(' ');
            }
            title.push_str(part);
        }
    }
    let subtitle = get("subtitle");
    if !subtitle.is_empty() {
        title.push_str(": ");
        title.push_str(subtitle);
    }
    let by_statement = get("by_statement");
    if !by_statement.is_empty() {
        title.push_str(", ");
        title.push_str(by_statement);
    }
    textnorm::normalize_with_case(&title, CaseStyle::Sentence)
}

/// Weight in kilograms from a free-text field, by unit keyword sniffing.
fn parse_weight(raw: &str) -> Option<f64> {
    let lower = raw.to_lowercase();
    let value: f64 = NUMBER.captures(&lower)?[1].parse().ok()?;
    let kilograms = if lower.contains("kilo") || lower.contains("kg") {
        value
    } else if lower.contains("pound") || lower.contains("lb") {
        value * 0.453_592
    } else if lower.contains("ounce") || lower.contains("oz") {
        value * 0.028_349_5
    } else if lower.contains("gram") || lower.contains("g") {
        value / 1000.0
    } else {
        return None;
    };
    Some(round3(kilograms))
}

/// Grams-per-page model plus packaging constant; a calibration heuristic,
/// not measured data.
fn estimate_weight(pages: u64) -> f64 {
    round3(pages as f64 * 0.0025 + 20.0)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn get_created(obj: &Value) -> String {
    obj.pointer("/created/value")
        .and_then(Value::as_str)
        .or_else(|| obj.pointer("/last_modified/value").and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
}
