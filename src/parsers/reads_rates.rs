use crate::error::{EtlError, Result};
use crate::identity::IdentityResolver;
use crate::parsers::{parse_key, SkipPolicy};
use crate::users::UserManager;
use crate::writer::RecordWriter;
use crate::row;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Shelf states from the public reading-log dump. The label strings are
/// exact; anything else rejects the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingStatus {
    WantToRead,
    CurrentlyReading,
    AlreadyRead,
}

impl ReadingStatus {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Want to Read" => Some(Self::WantToRead),
            "Currently Reading" => Some(Self::CurrentlyReading),
            "Already Read" => Some(Self::AlreadyRead),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::WantToRead => "WANT_TO_READ",
            Self::CurrentlyReading => "CURRENTLY_READING",
            Self::AlreadyRead => "ALREADY_READ",
        }
    }
}

/// The ratings and reading-log dumps share one tab layout; only the value
/// column differs (a 1..5 score vs a shelf label).
#[derive(Debug, Clone, Copy)]
pub enum RrKind {
    Ratings,
    ReadingLog,
}

impl RrKind {
    fn stage(self) -> &'static str {
        match self {
            Self::Ratings => "ratings",
            Self::ReadingLog => "reading-log",
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            Self::Ratings => "rating_id",
            Self::ReadingLog => "listing_id",
        }
    }

    fn value_column(self) -> &'static str {
        match self {
            Self::Ratings => "rating",
            Self::ReadingLog => "type",
        }
    }

    fn parse_value(self, raw: &str) -> Option<Value> {
        match self {
            Self::Ratings => {
                let score: i64 = raw.trim().parse().ok()?;
                (1..=5).contains(&score).then(|| Value::from(score))
            }
            Self::ReadingLog => {
                ReadingStatus::from_label(raw).map(|status| Value::from(status.code()))
            }
        }
    }
}

/// Streams one ratings or reading-log dump. Each kept line draws a reader
/// from the synthetic pool and lands as one row keyed by a fresh dense id.
///
/// Lines reference works by dump key; works never seen in the bibliographic
/// pass, or seen but dropped there, are skipped.
pub fn process_file(
    kind: RrKind,
    input: &Path,
    work_ids: &IdentityResolver,
    valid_works: &HashSet<u64>,
    users: &mut UserManager,
    writer: &mut dyn RecordWriter,
    rng: &mut StdRng,
) -> Result<SkipPolicy> {
    info!(input = %input.display(), stage = kind.stage(), "reading engagement dump");
    let reader = BufReader::new(File::open(input)?);
    let mut policy = SkipPolicy::new(kind.stage());
    let mut next_id: u64 = 1;
    for line in reader.lines() {
        let line = line?;
        match process_line(kind, &line, work_ids, valid_works) {
            Ok((work_id, value, date)) => {
                let reader_id = match users.get_or_generate_reader() {
                    Some(id) => id,
                    None => {
                        policy.record_skipped();
                        continue;
                    }
                };
                writer.write_record(&row![
                    kind.id_column() => next_id,
                    "reader_id" => reader_id,
                    "work_id" => work_id,
                    kind.value_column() => value,
                    "created_at" => timestamp_for(&date, rng),
                ])?;
                next_id = next_id
                    .checked_add(1)
                    .ok_or_else(|| EtlError::InvalidRecord("id space exhausted".into()))?;
                policy.record_processed();
            }
            Err(_) => policy.record_skipped(),
        }
    }
    writer.flush()?;
    policy.log_totals();
    Ok(policy)
}

/// Lines come in a 3-column and a 4-column shape; the extra middle column is
/// an edition key we ignore, shifting value and date right by one.
fn process_line(
    kind: RrKind,
    line: &str,
    work_ids: &IdentityResolver,
    valid_works: &HashSet<u64>,
) -> Result<(u64, Value, String)> {
    let fields: Vec<&str> = line.split('\t').collect();
    let (work_key, raw_value, date) = match fields.len() {
        3 => (fields[0], fields[1], fields[2]),
        4 => (fields[0], fields[2], fields[3]),
        n => {
            return Err(EtlError::InvalidRecord(format!(
                "expected 3 or 4 columns, got {}",
                n
            )))
        }
    };
    let work_id = work_ids
        .get(parse_key(work_key))
        .ok_or_else(|| EtlError::InvalidRecord("unknown work key".into()))?;
    if !valid_works.contains(&work_id) {
        return Err(EtlError::InvalidRecord("work was dropped upstream".into()));
    }
    let value = kind
        .parse_value(raw_value)
        .ok_or_else(|| EtlError::InvalidRecord("unparseable value column".into()))?;
    Ok((work_id, value, date.trim().to_string()))
}

/// The dumps carry a date only; a uniform random time of day fills out the
/// timestamp.
fn timestamp_for(date: &str, rng: &mut StdRng) -> String {
    format!(
        "{}T{:02}:{:02}:{:02}",
        date,
        rng.gen_range(0..24),
        rng.gen_range(0..60),
        rng.gen_range(0..60)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::writer::open_writer;
    use rand::SeedableRng;
    use std::io::Write;

    fn resolver_with(keys: &[&str]) -> IdentityResolver {
        let mut resolver = IdentityResolver::new();
        for key in keys {
            resolver.resolve(key);
        }
        resolver
    }

    #[test]
    fn shelf_labels_map_to_codes() {
        assert_eq!(
            ReadingStatus::from_label("Want to Read"),
            Some(ReadingStatus::WantToRead)
        );
        assert_eq!(
            ReadingStatus::from_label("Currently Reading").map(ReadingStatus::code),
            Some("CURRENTLY_READING")
        );
        assert_eq!(
            ReadingStatus::from_label("Already Read").map(ReadingStatus::code),
            Some("ALREADY_READ")
        );
        assert_eq!(ReadingStatus::from_label("want to read"), None);
        assert_eq!(ReadingStatus::from_label(""), None);
    }

    #[test]
    fn ratings_outside_one_to_five_are_rejected() {
        assert_eq!(RrKind::Ratings.parse_value("3"), Some(Value::from(3)));
        assert_eq!(RrKind::Ratings.parse_value("0"), None);
        assert_eq!(RrKind::Ratings.parse_value("6"), None);
        assert_eq!(RrKind::Ratings.parse_value("five"), None);
    }

    #[test]
    fn both_column_shapes_are_accepted() {
        let work_ids = resolver_with(&["OL1W"]);
        let valid: HashSet<u64> = [1].into();
        let three =
            process_line(RrKind::Ratings, "/works/OL1W\t4\t2019-03-11", &work_ids, &valid)
                .unwrap();
        let four = process_line(
            RrKind::Ratings,
            "/works/OL1W\t/books/OL1M\t4\t2019-03-11",
            &work_ids,
            &valid,
        )
        .unwrap();
        assert_eq!(three.0, 1);
        assert_eq!(four.0, 1);
        assert_eq!(three.1, Value::from(4));
        assert_eq!(four.2, "2019-03-11");
    }

    #[test]
    fn unknown_and_dropped_works_are_skipped() {
        let work_ids = resolver_with(&["OL1W", "OL2W"]);
        let valid: HashSet<u64> = [1].into();
        assert!(
            process_line(RrKind::Ratings, "/works/OL999W\t4\t2019-03-11", &work_ids, &valid)
                .is_err()
        );
        // OL2W resolved to id 2 but did not survive the bibliographic pass
        assert!(
            process_line(RrKind::Ratings, "/works/OL2W\t4\t2019-03-11", &work_ids, &valid)
                .is_err()
        );
    }

    #[test]
    fn reading_log_file_lands_as_listing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("reading-log.txt");
        let output = dir.path().join("listing.jsonl");
        {
            let mut f = std::fs::File::create(&input).unwrap();
            writeln!(f, "/works/OL1W\t/books/OL1M\tWant to Read\t2020-01-05").unwrap();
            writeln!(f, "/works/OL1W\tAlready Read\t2020-02-05").unwrap();
            writeln!(f, "/works/OL1W\tOn Hold\t2020-03-05").unwrap();
        }
        let work_ids = resolver_with(&["OL1W"]);
        let valid: HashSet<u64> = [1].into();
        let mut users = UserManager::new(StdRng::seed_from_u64(1));
        let mut rng = StdRng::seed_from_u64(2);
        let policy = {
            let mut writer = open_writer(OutputFormat::Jsonl, &output).unwrap();
            process_file(
                RrKind::ReadingLog,
                &input,
                &work_ids,
                &valid,
                &mut users,
                writer.as_mut(),
                &mut rng,
            )
            .unwrap()
        };
        assert_eq!(policy.processed(), 2);
        assert_eq!(policy.skipped(), 1);
        let content = std::fs::read_to_string(&output).unwrap();
        let rows: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["listing_id"], 1);
        assert_eq!(rows[1]["listing_id"], 2);
        assert_eq!(rows[0]["type"], "WANT_TO_READ");
        assert_eq!(rows[1]["type"], "ALREADY_READ");
        assert!(rows[0]["created_at"]
            .as_str()
            .unwrap()
            .starts_with("2020-01-05T"));
    }
}
