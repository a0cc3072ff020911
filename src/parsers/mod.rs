pub mod checkouts;
pub mod ol_dump;
pub mod reads_rates;

use tracing::info;

/// Extracts the bare identifier from a URI-shaped dump key,
/// e.g. `/works/OL45883W` -> `OL45883W`.
pub fn parse_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// The named drop-and-continue policy for per-record data errors.
///
/// Dump noise is expected; malformed records are skipped at the smallest
/// possible scope and counted so the totals stay observable, but they never
/// abort a file pass.
pub struct SkipPolicy {
    stage: &'static str,
    processed: u64,
    skipped: u64,
}

impl SkipPolicy {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            processed: 0,
            skipped: 0,
        }
    }

    pub fn record_processed(&mut self) {
        self.processed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn log_totals(&self) {
        info!(
            stage = self.stage,
            processed = self.processed,
            skipped = self.skipped,
            "pass finished (on_record_error: skip)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_takes_the_last_path_segment() {
        assert_eq!(parse_key("/works/OL45883W"), "OL45883W");
        assert_eq!(parse_key("/languages/eng"), "eng");
        assert_eq!(parse_key("OL12A"), "OL12A");
        assert_eq!(parse_key(""), "");
    }
}
