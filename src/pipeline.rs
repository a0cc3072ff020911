use crate::config::Config;
use crate::consolidate::{self, consolidate_publishers};
use crate::error::{EtlError, Result};
use crate::identity::IdentityResolver;
use crate::parsers::checkouts::{CheckoutsParser, CirculationWriters};
use crate::parsers::ol_dump::{DumpWriters, OlDumpParser};
use crate::parsers::reads_rates::{self, RrKind};
use crate::staging::StagingStore;
use crate::subjects::{generalize_subjects, SubjectClassifier};
use crate::users::UserManager;
use crate::writer::open_writer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Input files for one run. Every field is optional; the bibliographic dump
/// must accompany the engagement dumps because they resolve work keys through
/// the same run's id map.
#[derive(Debug, Default, Clone)]
pub struct PipelineInputs {
    pub ol_dump: Option<PathBuf>,
    pub ratings: Option<PathBuf>,
    pub reading_log: Option<PathBuf>,
    pub checkouts: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub works: usize,
    pub authors: usize,
    pub publishers: usize,
    pub users: usize,
}

struct BibliographicOutcome {
    work_ids: IdentityResolver,
    surviving_works: HashSet<u64>,
    works: usize,
    authors: usize,
    publishers: usize,
}

/// Runs the configured stages in dependency order: bibliographic streaming
/// pass, publisher consolidation and subject generalization, author pruning,
/// engagement passes, circulation pass, user finalization.
pub async fn run(config: &Config, inputs: &PipelineInputs) -> Result<PipelineSummary> {
    validate_inputs(inputs)?;
    std::fs::create_dir_all(&config.output_dir)?;

    // A run with no bibliographic pass joins against the staging store a
    // previous run left behind.
    let staging = match &inputs.ol_dump {
        Some(_) => StagingStore::open(&config.staging_db_path())?,
        None => StagingStore::open_existing(&config.staging_db_path())?,
    };

    let mut users = UserManager::new(StdRng::seed_from_u64(config.seed));
    let mut summary = PipelineSummary::default();

    let mut outcome: Option<BibliographicOutcome> = None;
    if let Some(dump) = &inputs.ol_dump {
        let bib = bibliographic_stage(config, dump, &staging).await?;
        summary.works = bib.works;
        summary.authors = bib.authors;
        summary.publishers = bib.publishers;
        outcome = Some(bib);
    }

    for (kind, input, entity) in [
        (RrKind::Ratings, &inputs.ratings, "rating"),
        (RrKind::ReadingLog, &inputs.reading_log, "listing"),
    ] {
        let Some(path) = input else { continue };
        let bib = outcome
            .as_ref()
            .ok_or_else(|| EtlError::Config("engagement pass without a bibliographic pass".into()))?;
        let mut writer = open_writer(config.format, &config.entity_path(entity))?;
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(seed_offset(entity)));
        reads_rates::process_file(
            kind,
            path,
            &bib.work_ids,
            &bib.surviving_works,
            &mut users,
            writer.as_mut(),
            &mut rng,
        )?;
    }

    if let Some(path) = &inputs.checkouts {
        let started = Instant::now();
        let lookup = staging.isbn_lookup()?;
        info!(isbns = lookup.len(), "circulation stage started");
        let mut parser = CheckoutsParser::new(
            &lookup,
            StdRng::seed_from_u64(config.seed.wrapping_add(seed_offset("loan"))),
            config.loan_chunk_size,
        );
        let mut writers = CirculationWriters {
            item: open_writer(config.format, &config.entity_path("inventory_item"))?,
            loan: open_writer(config.format, &config.entity_path("loan"))?,
            loan_return: open_writer(config.format, &config.entity_path("loan_return"))?,
        };
        parser.process_file(path, &mut users, &mut writers)?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "circulation stage finished"
        );
    }

    {
        let mut user_writer = open_writer(config.format, &config.entity_path("library_user"))?;
        users.write_users(user_writer.as_mut())?;
        let mut pfp_writer = open_writer(config.format, &config.entity_path("profile_picture"))?;
        users.write_pfp(pfp_writer.as_mut())?;
    }
    summary.users = users.population();

    info!(
        works = summary.works,
        authors = summary.authors,
        publishers = summary.publishers,
        users = summary.users,
        "pipeline finished"
    );
    Ok(summary)
}

/// Streaming pass over the dump, then the whole-vocabulary post-passes. The
/// publisher dictionary write and work-file rewrite have no data dependency
/// on the subject pass, so they run on the blocking pool alongside it.
async fn bibliographic_stage(
    config: &Config,
    dump: &Path,
    staging: &StagingStore,
) -> Result<BibliographicOutcome> {
    let started = Instant::now();
    info!("bibliographic stage started");

    let mut parser = OlDumpParser::new(StdRng::seed_from_u64(
        config.seed.wrapping_add(seed_offset("work")),
    ));
    {
        let mut writers = DumpWriters {
            work: open_writer(config.format, &config.entity_path("work"))?,
            author: open_writer(config.format, &config.entity_path("author"))?,
            language: open_writer(config.format, &config.entity_path("language"))?,
        };
        parser.process_file(dump, staging, &mut writers)?;
    }

    let surviving_works = staging.works_with_canonical_isbn()?;
    let consolidation = consolidate_publishers(parser.publishers.names());
    let publishers = consolidation.dictionary.len();

    let format = config.format;
    let publisher_path = config.entity_path("publisher");
    let work_path = config.entity_path("work");
    let publisher_task = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut writer = open_writer(format, &publisher_path)?;
        consolidate::write_publisher_dictionary(&consolidation, writer.as_mut())?;
        consolidate::rewrite_publisher_ids(&work_path, format, &consolidation)
    });

    let mut classifier = SubjectClassifier::new();
    let mut subject_writer = open_writer(config.format, &config.entity_path("subject"))?;
    let mut work_subject_writer = open_writer(config.format, &config.entity_path("work_subject"))?;
    let mut subject_rng =
        StdRng::seed_from_u64(config.seed.wrapping_add(seed_offset("subject")));
    let subject_stats = generalize_subjects(
        staging,
        &surviving_works,
        &mut classifier,
        subject_writer.as_mut(),
        work_subject_writer.as_mut(),
        &mut subject_rng,
    )?;

    let mut work_author_writer = open_writer(config.format, &config.entity_path("work_author"))?;
    let prune = consolidate::prune_authors(
        &config.entity_path("author"),
        config.format,
        staging,
        &surviving_works,
        work_author_writer.as_mut(),
    )?;

    publisher_task
        .await
        .map_err(|e| EtlError::Worker(e.to_string()))??;

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        works = subject_stats.works_covered,
        authors = prune.kept,
        publishers,
        "bibliographic stage finished"
    );
    Ok(BibliographicOutcome {
        work_ids: parser.resolvers.work,
        surviving_works,
        works: subject_stats.works_covered,
        authors: prune.kept,
        publishers,
    })
}

fn validate_inputs(inputs: &PipelineInputs) -> Result<()> {
    let all = [
        &inputs.ol_dump,
        &inputs.ratings,
        &inputs.reading_log,
        &inputs.checkouts,
    ];
    if all.iter().all(|p| p.is_none()) {
        return Err(EtlError::Config("no input files given".into()));
    }
    for path in all.into_iter().flatten() {
        if !path.is_file() {
            return Err(EtlError::InvalidPath(path.clone()));
        }
    }
    if (inputs.ratings.is_some() || inputs.reading_log.is_some()) && inputs.ol_dump.is_none() {
        return Err(EtlError::Config(
            "ratings/reading-log passes need the bibliographic dump in the same run".into(),
        ));
    }
    Ok(())
}

/// Per-stage RNG stream separation; each stage draws from its own seed so
/// adding or removing one stage never perturbs another.
fn seed_offset(stage: &str) -> u64 {
    match stage {
        "work" => 1,
        "subject" => 2,
        "rating" => 3,
        "listing" => 4,
        "loan" => 5,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_are_rejected() {
        let err = validate_inputs(&PipelineInputs::default()).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn missing_files_fail_fast() {
        let inputs = PipelineInputs {
            ol_dump: Some(PathBuf::from("/nonexistent/dump.txt")),
            ..Default::default()
        };
        assert!(matches!(
            validate_inputs(&inputs).unwrap_err(),
            EtlError::InvalidPath(_)
        ));
    }

    #[test]
    fn engagement_passes_require_the_dump() {
        let dir = tempfile::tempdir().unwrap();
        let ratings = dir.path().join("ratings.txt");
        std::fs::write(&ratings, "").unwrap();
        let inputs = PipelineInputs {
            ratings: Some(ratings),
            ..Default::default()
        };
        assert!(matches!(
            validate_inputs(&inputs).unwrap_err(),
            EtlError::Config(_)
        ));
    }
}
