use crate::error::{EtlError, Result};
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Disposable relational store for the intermediate many-to-many associations
/// collected during the streaming pass. Fresh per run; nothing in it survives
/// the process.
///
/// Association rows are set-deduplicated by unique indexes, and the frequency
/// and join queries run inside SQLite so tens of millions of rows never have
/// to live as in-process values at once.
pub struct StagingStore {
    conn: Connection,
}

impl StagingStore {
    /// Opens a fresh store at `path`, discarding any leftover file from a
    /// previous run.
    pub fn open(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=OFF;
            CREATE TABLE work_isbn (
                work_id   INTEGER NOT NULL,
                isbn      TEXT NOT NULL,
                canonical INTEGER NOT NULL DEFAULT 0,
                UNIQUE(work_id, isbn)
            );
            CREATE INDEX work_isbn_by_isbn ON work_isbn(isbn);
            CREATE TABLE work_subject (
                work_id INTEGER NOT NULL,
                subject TEXT NOT NULL,
                UNIQUE(work_id, subject)
            );
            CREATE TABLE work_author (
                work_id   INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                UNIQUE(work_id, author_id)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Reopens a store left behind by a previous bibliographic pass, for runs
    /// that only process the circulation side.
    pub fn open_existing(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EtlError::InvalidPath(path.to_path_buf()));
        }
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            r#"
            CREATE TABLE work_isbn (
                work_id   INTEGER NOT NULL,
                isbn      TEXT NOT NULL,
                canonical INTEGER NOT NULL DEFAULT 0,
                UNIQUE(work_id, isbn)
            );
            CREATE INDEX work_isbn_by_isbn ON work_isbn(isbn);
            CREATE TABLE work_subject (
                work_id INTEGER NOT NULL,
                subject TEXT NOT NULL,
                UNIQUE(work_id, subject)
            );
            CREATE TABLE work_author (
                work_id   INTEGER NOT NULL,
                author_id INTEGER NOT NULL,
                UNIQUE(work_id, author_id)
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Records an observed (work, isbn) pair. Duplicates are ignored.
    pub fn add_isbn(&self, work_id: u64, isbn: &str, canonical: bool) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO work_isbn (work_id, isbn, canonical) VALUES (?1, ?2, ?3)",
            params![work_id as i64, isbn, canonical as i64],
        )?;
        Ok(())
    }

    /// One-canonical-ISBN-per-work check: has this work already claimed one?
    pub fn has_canonical_isbn(&self, work_id: u64) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM work_isbn WHERE work_id = ?1 AND canonical = 1 LIMIT 1")?;
        let found = stmt.exists(params![work_id as i64])?;
        Ok(found)
    }

    pub fn add_subject(&self, work_id: u64, subject: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO work_subject (work_id, subject) VALUES (?1, ?2)",
            params![work_id as i64, subject],
        )?;
        Ok(())
    }

    pub fn add_author(&self, work_id: u64, author_id: u64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO work_author (work_id, author_id) VALUES (?1, ?2)",
            params![work_id as i64, author_id as i64],
        )?;
        Ok(())
    }

    /// Reverse lookup table (isbn -> work) for the circulation join. Every
    /// observed ISBN is included, not just the canonical ones.
    pub fn isbn_lookup(&self) -> Result<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare("SELECT isbn, work_id FROM work_isbn")?;
        let mut rows = stmt.query([])?;
        let mut lookup = HashMap::new();
        while let Some(row) = rows.next()? {
            let isbn: String = row.get(0)?;
            let work_id: i64 = row.get(1)?;
            lookup.entry(isbn).or_insert(work_id as u64);
        }
        Ok(lookup)
    }

    /// Works that ended the pass with a canonical ISBN; the output inclusion
    /// criterion for works and their associations.
    pub fn works_with_canonical_isbn(&self) -> Result<HashSet<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT work_id FROM work_isbn WHERE canonical = 1")?;
        let mut rows = stmt.query([])?;
        let mut works = HashSet::new();
        while let Some(row) = rows.next()? {
            let work_id: i64 = row.get(0)?;
            works.insert(work_id as u64);
        }
        Ok(works)
    }

    /// Global subject frequencies (group-by count), most frequent first.
    pub fn subject_frequencies(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT subject, COUNT(*) AS n FROM work_subject GROUP BY subject ORDER BY n DESC, subject",
        )?;
        let mut rows = stmt.query([])?;
        let mut freqs = Vec::new();
        while let Some(row) = rows.next()? {
            let subject: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            freqs.push((subject, n as u64));
        }
        Ok(freqs)
    }

    /// Streams every staged (work, subject) pair in a stable order without
    /// materializing the whole association table.
    pub fn for_each_work_subject<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, &str) -> Result<()>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT work_id, subject FROM work_subject ORDER BY work_id, subject")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let work_id: i64 = row.get(0)?;
            let subject: String = row.get(1)?;
            f(work_id as u64, &subject)?;
        }
        Ok(())
    }

    /// Streams every staged (work, author) pair in a stable order.
    pub fn for_each_work_author<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, u64) -> Result<()>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT work_id, author_id FROM work_author ORDER BY work_id, author_id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let work_id: i64 = row.get(0)?;
            let author_id: i64 = row.get(1)?;
            f(work_id as u64, author_id as u64)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn association_rows_are_set_deduplicated() {
        let store = StagingStore::open_in_memory().unwrap();
        store.add_subject(1, "History").unwrap();
        store.add_subject(1, "History").unwrap();
        store.add_subject(1, "Maps").unwrap();
        let freqs = store.subject_frequencies().unwrap();
        assert_eq!(
            freqs,
            vec![("History".to_string(), 1), ("Maps".to_string(), 1)]
        );
    }

    #[test]
    fn canonical_isbn_is_first_wins() {
        let store = StagingStore::open_in_memory().unwrap();
        assert!(!store.has_canonical_isbn(5).unwrap());
        store.add_isbn(5, "9780306406157", true).unwrap();
        assert!(store.has_canonical_isbn(5).unwrap());
        // later sightings stay in the lookup but are not canonical
        store.add_isbn(5, "9781554042951", false).unwrap();
        let lookup = store.isbn_lookup().unwrap();
        assert_eq!(lookup.get("9780306406157"), Some(&5));
        assert_eq!(lookup.get("9781554042951"), Some(&5));
        assert_eq!(
            store.works_with_canonical_isbn().unwrap(),
            HashSet::from([5])
        );
    }

    #[test]
    fn frequency_query_orders_by_count() {
        let store = StagingStore::open_in_memory().unwrap();
        for work in 1..=3 {
            store.add_subject(work, "Fiction").unwrap();
        }
        store.add_subject(1, "Cats").unwrap();
        let freqs = store.subject_frequencies().unwrap();
        assert_eq!(freqs[0], ("Fiction".to_string(), 3));
        assert_eq!(freqs[1], ("Cats".to_string(), 1));
    }

    #[test]
    fn streamed_iteration_visits_all_pairs_in_order() {
        let store = StagingStore::open_in_memory().unwrap();
        store.add_author(2, 20).unwrap();
        store.add_author(1, 10).unwrap();
        store.add_author(2, 10).unwrap();
        let mut seen = Vec::new();
        store
            .for_each_work_author(|w, a| {
                seen.push((w, a));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(1, 10), (2, 10), (2, 20)]);
    }
}
