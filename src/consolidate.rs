use crate::config::OutputFormat;
use crate::error::{EtlError, Result};
use crate::identity::IdentityResolver;
use crate::staging::StagingStore;
use crate::textnorm;
use crate::writer::RecordWriter;
use crate::row;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const UNKNOWN_PUBLISHER: &str = "Unknown";

/// Column position of `publisher_id` in the work output (CSV rendering).
pub const WORK_PUBLISHER_CSV_INDEX: usize = 4;

/// Institutional suffixes, publishing-industry filler and multilingual
/// legal-entity words that carry no identity. Stripped before grouping.
static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    let words = [
        "inc", "incorporated", "ltd", "limited", "llc", "plc", "gmbh", "srl", "sa", "ag",
        "co", "company", "corp", "corporation", "companie", "cie",
        "press", "publishers", "publisher", "publishing", "publications", "publication",
        "books", "book", "group", "house", "editions", "edition", "editorial", "editores",
        "editeur", "editeurs", "verlag", "izdatelstvo", "vydavnytstvo",
        "the", "and", "of", "for", "et", "und", "i",
    ];
    Regex::new(&format!(r"\b(?:{})\b", words.join("|"))).unwrap()
});

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]").unwrap());

/// Raw publisher names registered during the streaming pass, in id order.
/// Names are the external key here; the dump has no publisher identifiers.
pub struct PublisherRegistry {
    resolver: IdentityResolver,
    names: Vec<String>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self {
            resolver: IdentityResolver::new(),
            names: Vec::new(),
        }
    }

    pub fn register(&mut self, raw_name: &str) -> Option<u64> {
        let id = self.resolver.resolve(raw_name)?;
        if id as usize > self.names.len() {
            self.names.push(raw_name.to_string());
        }
        Some(id)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for PublisherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// ASCII folding for the accented letters that actually show up in publisher
/// names; anything else passes through and is dropped by the non-word strip.
fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' => 'a',
            'ç' | 'ć' | 'č' => 'c',
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' => 'e',
            'ì' | 'í' | 'î' | 'ï' | 'ī' => 'i',
            'ñ' | 'ń' => 'n',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => 'o',
            'š' => 's',
            'ù' | 'ú' | 'û' | 'ü' | 'ū' => 'u',
            'ý' | 'ÿ' => 'y',
            'ž' | 'ź' | 'ż' => 'z',
            other => other,
        })
        .collect()
}

/// Grouping key: lowercase, diacritics folded, boilerplate and non-word
/// characters stripped. Names sharing a key are the same publisher.
pub fn grouping_key(raw_name: &str) -> String {
    let lowered = fold_diacritics(&raw_name.to_lowercase());
    let stripped = BOILERPLATE.replace_all(&lowered, " ");
    NON_WORD.replace_all(&stripped, "").into_owned()
}

pub struct PublisherConsolidation {
    /// old publisher id -> consolidated id
    pub mapping: HashMap<u64, u64>,
    pub unknown_id: u64,
    /// (consolidated id, canonical display name), in id order
    pub dictionary: Vec<(u64, String)>,
}

struct Group {
    members: Vec<u64>,
    representative: String,
}

/// Whole-vocabulary publisher merge. Deterministic: every container is either
/// ordered or iterated in first-registration order, so repeated runs over the
/// same names produce the same grouping.
pub fn consolidate_publishers(names: &[String]) -> PublisherConsolidation {
    // Pass 1: group by key, keeping the shortest raw name as representative
    let mut groups: Vec<Group> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut orphans: Vec<u64> = Vec::new();
    for (index, name) in names.iter().enumerate() {
        let old_id = index as u64 + 1;
        let key = grouping_key(name);
        if key.is_empty() {
            orphans.push(old_id);
            continue;
        }
        match by_key.get(&key) {
            Some(&group_index) => {
                let group = &mut groups[group_index];
                group.members.push(old_id);
                if name.len() < group.representative.len() {
                    group.representative = name.clone();
                }
            }
            None => {
                by_key.insert(key, groups.len());
                groups.push(Group {
                    members: vec![old_id],
                    representative: name.clone(),
                });
            }
        }
    }

    // Pass 2: merge groups whose titlecased representatives collide after
    // normalization; the earliest-registered group wins.
    let merged_into = merge_title_collisions(&mut groups);

    // Pass 3: fresh dense ids; the Unknown bucket always takes id 1
    let unknown_id = 1u64;
    let mut dictionary = vec![(unknown_id, UNKNOWN_PUBLISHER.to_string())];
    let mut mapping = HashMap::new();
    let mut next_id = 2u64;
    for (group_index, group) in groups.iter().enumerate() {
        if merged_into[group_index].is_some() || group.members.is_empty() {
            continue;
        }
        let new_id = next_id;
        next_id += 1;
        dictionary.push((new_id, group.representative.clone()));
        for &old_id in &group.members {
            mapping.insert(old_id, new_id);
        }
    }
    for old_id in orphans {
        mapping.insert(old_id, unknown_id);
    }

    PublisherConsolidation {
        mapping,
        unknown_id,
        dictionary,
    }
}

/// Folds groups whose representatives render identically once titlecased and
/// normalized, a safety net for names the grouping key cannot tell apart.
/// Returns, per group, the index it was merged into (insertion order is the
/// tie-break, so the earliest-registered group always wins).
fn merge_title_collisions(groups: &mut [Group]) -> Vec<Option<usize>> {
    let mut by_title: HashMap<String, usize> = HashMap::new();
    let mut merged_into: Vec<Option<usize>> = vec![None; groups.len()];
    for group_index in 0..groups.len() {
        let title = textnorm::title_case(&textnorm::normalize(&groups[group_index].representative));
        match by_title.get(&title) {
            Some(&target) => {
                let members = std::mem::take(&mut groups[group_index].members);
                groups[target].members.extend(members);
                merged_into[group_index] = Some(target);
            }
            None => {
                by_title.insert(title, group_index);
            }
        }
    }
    merged_into
}

/// Writes the consolidated publisher dictionary.
pub fn write_publisher_dictionary(
    consolidation: &PublisherConsolidation,
    writer: &mut dyn RecordWriter,
) -> Result<()> {
    for (publisher_id, name) in &consolidation.dictionary {
        writer.write_record(&row![
            "publisher_id" => publisher_id,
            "name" => name,
        ])?;
    }
    writer.flush()
}

/// Rewrites the already-written work file's `publisher_id` column through the
/// consolidation mapping. The original emission cannot wait for consolidation
/// (it needs the whole vocabulary), so this is a second file pass; the old
/// file is replaced atomically by rename.
pub fn rewrite_publisher_ids(
    work_path: &Path,
    format: OutputFormat,
    consolidation: &PublisherConsolidation,
) -> Result<()> {
    let tmp_path = work_path.with_extension("rewrite.tmp");
    let remap = |raw: Option<u64>| -> u64 {
        raw.and_then(|old| consolidation.mapping.get(&old).copied())
            .unwrap_or(consolidation.unknown_id)
    };

    match format {
        OutputFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .escape(Some(b'\\'))
                .double_quote(false)
                .from_path(work_path)?;
            let mut out = csv::WriterBuilder::new()
                .has_headers(false)
                .quote_style(csv::QuoteStyle::Always)
                .escape(b'\\')
                .double_quote(false)
                .from_path(&tmp_path)?;
            for record in reader.records() {
                let record = record?;
                let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
                if fields.len() <= WORK_PUBLISHER_CSV_INDEX {
                    return Err(EtlError::InvalidRecord(format!(
                        "work row with {} columns",
                        fields.len()
                    )));
                }
                let old = fields[WORK_PUBLISHER_CSV_INDEX].parse::<u64>().ok();
                fields[WORK_PUBLISHER_CSV_INDEX] = remap(old).to_string();
                // fields were unescaped on read; re-escape on the way out
                out.write_record(fields.iter().map(|f| crate::writer::escape_backslashes(f)))?;
            }
            out.flush()?;
        }
        OutputFormat::Jsonl => {
            let reader = BufReader::new(File::open(work_path)?);
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let mut obj: Value = serde_json::from_str(&line)?;
                let old = obj.get("publisher_id").and_then(Value::as_u64);
                obj["publisher_id"] = Value::from(remap(old));
                serde_json::to_writer(&mut out, &obj)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
    }
    std::fs::rename(&tmp_path, work_path)?;
    Ok(())
}

pub struct AuthorPruneStats {
    pub kept: usize,
    pub dropped: usize,
    pub merged: usize,
    pub associations: usize,
}

/// Post-pass author cleanup: re-reads the author output, merges rows whose
/// display names collide (first-registered id wins), drops authors with no
/// surviving association, and writes the final work-author association file.
pub fn prune_authors(
    author_path: &Path,
    format: OutputFormat,
    staging: &StagingStore,
    surviving_works: &HashSet<u64>,
    work_author_writer: &mut dyn RecordWriter,
) -> Result<AuthorPruneStats> {
    let rows = read_author_rows(author_path, format)?;

    // Name collisions remap to the first id registered with that name
    let mut canonical_by_name: HashMap<&str, u64> = HashMap::new();
    let mut remap: HashMap<u64, u64> = HashMap::new();
    let mut merged = 0usize;
    for (id, name, _) in &rows {
        match canonical_by_name.get(name.as_str()) {
            Some(&canonical) => {
                remap.insert(*id, canonical);
                merged += 1;
            }
            None => {
                canonical_by_name.insert(name, *id);
                remap.insert(*id, *id);
            }
        }
    }

    // Stream staged associations, keep those whose work survived and whose
    // author has a row, dedup after the merge remap
    let mut written: HashSet<(u64, u64)> = HashSet::new();
    let mut used_authors: HashSet<u64> = HashSet::new();
    staging.for_each_work_author(|work_id, author_id| {
        if !surviving_works.contains(&work_id) {
            return Ok(());
        }
        let Some(&author_id) = remap.get(&author_id) else {
            // Referenced by a work record but never seen in the author stream
            return Ok(());
        };
        if written.insert((work_id, author_id)) {
            used_authors.insert(author_id);
            work_author_writer.write_record(&row![
                "work_id" => work_id,
                "author_id" => author_id,
            ])?;
        }
        Ok(())
    })?;
    work_author_writer.flush()?;

    // Rewrite the author file keeping only canonical, referenced rows
    let tmp_path = author_path.with_extension("rewrite.tmp");
    let mut kept = 0usize;
    let mut dropped = 0usize;
    {
        let mut out = crate::writer::open_writer(format, &tmp_path)?;
        for (id, name, created) in &rows {
            if remap.get(id) == Some(id) && used_authors.contains(id) {
                out.write_record(&row![
                    "author_id" => id,
                    "name" => name,
                    "created_at" => created,
                ])?;
                kept += 1;
            } else {
                dropped += 1;
            }
        }
        out.flush()?;
    }
    std::fs::rename(&tmp_path, author_path)?;

    info!(kept, dropped, merged, "author pruning finished");
    Ok(AuthorPruneStats {
        kept,
        dropped,
        merged,
        associations: written.len(),
    })
}

fn read_author_rows(path: &Path, format: OutputFormat) -> Result<Vec<(u64, String, String)>> {
    let mut rows = Vec::new();
    match format {
        OutputFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .escape(Some(b'\\'))
                .double_quote(false)
                .from_path(path)?;
            for record in reader.records() {
                let record = record?;
                let id = record
                    .get(0)
                    .and_then(|f| f.parse::<u64>().ok())
                    .ok_or_else(|| EtlError::InvalidRecord("author row without id".into()))?;
                let name = record.get(1).unwrap_or_default().to_string();
                let created = record.get(2).unwrap_or_default().to_string();
                rows.push((id, name, created));
            }
        }
        OutputFormat::Jsonl => {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let obj: Value = serde_json::from_str(&line)?;
                let id = obj
                    .get("author_id")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| EtlError::InvalidRecord("author row without id".into()))?;
                let name = obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let created = obj
                    .get("created_at")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                rows.push((id, name, created));
            }
        }
    }
    Ok(rows)
}
