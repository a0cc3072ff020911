use crate::error::Result;
use crate::staging::StagingStore;
use crate::textnorm;
use crate::writer::RecordWriter;
use crate::row;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use tracing::info;

/// The catch-all bucket for subjects no theme claims.
pub const FALLBACK_THEME: &str = "Non-fiction";

/// Curated keyword lists, one per thematic bucket. The raw subject vocabulary
/// in the dump has a multi-million-entry long tail; every raw subject is
/// generalized to exactly one of these.
const THEME_KEYWORDS: &[(&str, &[&str])] = &[
    ("Fiction", &["fiction", "novel", "novels", "stories", "short stories", "literature", "literary"]),
    (FALLBACK_THEME, &["general", "miscellanea", "handbooks", "manuals", "essays", "reference"]),
    ("Science", &["science", "physics", "chemistry", "biology", "mathematics", "astronomy", "scientific", "evolution", "genetics"]),
    ("Technology", &["technology", "engineering", "computers", "computer science", "programming", "software", "electronics", "internet"]),
    ("History", &["history", "historical", "ancient", "medieval", "war", "revolution", "civilization", "archaeology"]),
    ("Biography", &["biography", "autobiography", "memoirs", "diaries", "correspondence", "personal narratives"]),
    ("Children", &["juvenile", "children", "picture books", "nursery rhymes", "fairy tales", "young adult"]),
    ("Fantasy", &["fantasy", "magic", "dragons", "mythology", "legends", "folklore", "supernatural"]),
    ("Science Fiction", &["science fiction", "time travel", "space", "aliens", "dystopia", "future"]),
    ("Mystery", &["mystery", "detective", "crime", "thriller", "suspense", "murder", "espionage"]),
    ("Romance", &["romance", "love", "relationships", "marriage", "courtship"]),
    ("Poetry", &["poetry", "poems", "verse", "poets", "sonnets"]),
    ("Drama", &["drama", "plays", "theater", "theatre", "comedies", "tragedies"]),
    ("Religion", &["religion", "christianity", "bible", "islam", "judaism", "buddhism", "theology", "spirituality", "church", "prayer"]),
    ("Philosophy", &["philosophy", "ethics", "logic", "metaphysics", "philosophers"]),
    ("Art", &["art", "painting", "sculpture", "photography", "architecture", "design", "drawing", "artists"]),
    ("Music", &["music", "songs", "composers", "opera", "jazz", "musicians", "instruments"]),
    ("Travel", &["travel", "voyages", "guidebooks", "description and travel", "geography", "maps", "exploration"]),
    ("Cooking", &["cooking", "cookery", "recipes", "food", "cookbooks", "baking", "wine"]),
    ("Health", &["health", "medicine", "medical", "fitness", "diseases", "nutrition", "nursing", "therapy"]),
    ("Business", &["business", "economics", "management", "finance", "marketing", "accounting", "investing", "industries"]),
    ("Education", &["education", "teaching", "study", "schools", "textbooks", "learning", "universities"]),
    ("Politics", &["politics", "political", "government", "democracy", "law", "policy", "international relations"]),
    ("Sports", &["sports", "athletics", "football", "baseball", "games", "recreation", "outdoor"]),
    ("Nature", &["nature", "animals", "plants", "environment", "ecology", "birds", "gardening", "natural history"]),
    ("Psychology", &["psychology", "psychological", "behavior", "mind", "emotions", "psychoanalysis", "self-help"]),
    ("Social Science", &["sociology", "anthropology", "culture", "society", "social", "ethnology", "gender"]),
];

const STOPWORDS: &[&str] = &[
    "the", "and", "of", "in", "a", "an", "for", "to", "on", "with", "etc", "from", "by",
];

struct Theme {
    name: &'static str,
    vector: HashMap<String, f32>,
}

/// Maps raw subject strings to a bounded theme vocabulary by cosine
/// similarity against per-theme keyword vectors.
///
/// The mapping is a pure function of the normalized text, so results are
/// memoized per distinct input string.
pub struct SubjectClassifier {
    themes: Vec<Theme>,
    fallback: usize,
    cache: HashMap<String, usize>,
}

impl SubjectClassifier {
    pub fn new() -> Self {
        // Bucket sets are masked into a u32 downstream
        assert!(THEME_KEYWORDS.len() <= 32);
        let themes: Vec<Theme> = THEME_KEYWORDS
            .iter()
            .map(|(name, keywords)| {
                let mut vector: HashMap<String, f32> = HashMap::new();
                for keyword in *keywords {
                    for token in tokenize(keyword) {
                        *vector.entry(token).or_insert(0.0) += 1.0;
                    }
                }
                Theme { name, vector }
            })
            .collect();
        let fallback = themes
            .iter()
            .position(|t| t.name == FALLBACK_THEME)
            .expect("fallback theme missing");
        Self {
            themes,
            fallback,
            cache: HashMap::new(),
        }
    }

    pub fn theme_count(&self) -> usize {
        self.themes.len()
    }

    pub fn theme_name(&self, index: usize) -> &'static str {
        self.themes[index].name
    }

    pub fn fallback_index(&self) -> usize {
        self.fallback
    }

    /// Returns the theme index for a raw subject string.
    pub fn classify(&mut self, raw: &str) -> usize {
        if let Some(&idx) = self.cache.get(raw) {
            return idx;
        }
        let normalized = textnorm::normalize(raw).to_lowercase();
        let mut vector: HashMap<String, f32> = HashMap::new();
        for token in tokenize(&normalized) {
            *vector.entry(token).or_insert(0.0) += 1.0;
        }
        let mut best = self.fallback;
        let mut best_score = 0.0f32;
        for (idx, theme) in self.themes.iter().enumerate() {
            let score = cosine(&vector, &theme.vector);
            if score > best_score {
                best_score = score;
                best = idx;
            }
        }
        self.cache.insert(raw.to_string(), best);
        best
    }
}

impl Default for SubjectClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| stem(&t.to_lowercase()))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Crude suffix stemming; enough to make "novels" meet "novel".
fn stem(token: &str) -> String {
    if let Some(base) = token.strip_suffix("ies") {
        if base.len() >= 2 {
            return format!("{}y", base);
        }
    }
    if let Some(base) = token.strip_suffix("es") {
        if base.len() >= 3 && base.ends_with('s') {
            return base.to_string();
        }
    }
    if let Some(base) = token.strip_suffix('s') {
        if base.len() >= 3 && !base.ends_with('s') {
            return base.to_string();
        }
    }
    token.to_string()
}

fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f32 = a
        .iter()
        .filter_map(|(token, weight)| b.get(token).map(|w| weight * w))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a: f32 = a.values().map(|w| w * w).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|w| w * w).sum::<f32>().sqrt();
    dot / (norm_a * norm_b)
}

pub struct SubjectStats {
    pub works_covered: usize,
    pub random_fallbacks: usize,
}

/// Second-pass subject generalization: streams the staged (work, subject)
/// associations, buckets every subject, guarantees at least one bucket per
/// surviving work, and writes the bounded subject dictionary plus the
/// rewritten associations.
pub fn generalize_subjects(
    staging: &StagingStore,
    surviving_works: &std::collections::HashSet<u64>,
    classifier: &mut SubjectClassifier,
    subject_writer: &mut dyn RecordWriter,
    work_subject_writer: &mut dyn RecordWriter,
    rng: &mut StdRng,
) -> Result<SubjectStats> {
    let mut masks: HashMap<u64, u32> = HashMap::new();
    staging.for_each_work_subject(|work_id, subject| {
        if !surviving_works.contains(&work_id) {
            return Ok(());
        }
        let idx = classifier.classify(subject);
        *masks.entry(work_id).or_insert(0) |= 1 << idx;
        Ok(())
    })?;

    // Every work leaves with at least one subject bucket
    let mut ordered_works: Vec<u64> = surviving_works.iter().copied().collect();
    ordered_works.sort_unstable();
    let mut random_fallbacks = 0usize;
    for &work_id in &ordered_works {
        masks.entry(work_id).or_insert_with(|| {
            random_fallbacks += 1;
            1 << rng.gen_range(0..classifier.theme_count())
        });
    }

    for idx in 0..classifier.theme_count() {
        subject_writer.write_record(&row![
            "subject_id" => idx as u64 + 1,
            "name" => classifier.theme_name(idx),
        ])?;
    }
    subject_writer.flush()?;

    let fallback_bit = 1u32 << classifier.fallback_index();
    for &work_id in &ordered_works {
        let mut mask = masks[&work_id];
        // Prefer a specific bucket over the catch-all when both are present
        if mask != fallback_bit {
            mask &= !fallback_bit;
        }
        for idx in 0..classifier.theme_count() {
            if mask & (1 << idx) != 0 {
                work_subject_writer.write_record(&row![
                    "work_id" => work_id,
                    "subject_id" => idx as u64 + 1,
                ])?;
            }
        }
    }
    work_subject_writer.flush()?;

    info!(
        works = ordered_works.len(),
        random_fallbacks, "subject generalization finished"
    );
    Ok(SubjectStats {
        works_covered: ordered_works.len(),
        random_fallbacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obvious_subjects_land_in_their_theme() {
        let mut classifier = SubjectClassifier::new();
        let cases = [
            ("Science fiction", "Science Fiction"),
            ("Detective and mystery stories", "Mystery"),
            ("French cooking", "Cooking"),
            ("History, ancient", "History"),
            ("Juvenile literature", "Children"),
        ];
        for (raw, expected) in cases {
            let idx = classifier.classify(raw);
            assert_eq!(classifier.theme_name(idx), expected, "for {:?}", raw);
        }
    }

    #[test]
    fn unmatched_subjects_fall_back() {
        let mut classifier = SubjectClassifier::new();
        let idx = classifier.classify("Zqxwv blorptag");
        assert_eq!(classifier.theme_name(idx), FALLBACK_THEME);
    }

    #[test]
    fn classification_is_memoized_and_stable() {
        let mut classifier = SubjectClassifier::new();
        let a = classifier.classify("Ship building -- history");
        let b = classifier.classify("Ship building -- history");
        assert_eq!(a, b);
        assert_eq!(classifier.cache.len(), 1);
    }

    #[test]
    fn subjectless_works_get_one_random_bucket_deterministically() {
        use crate::config::OutputFormat;
        use crate::writer::open_writer;
        use rand::SeedableRng;
        use std::collections::HashSet;

        // work 2 survives with no staged subject at all; it must still leave
        // with exactly one bucket, the same one on every run with this seed
        let mut fallback_buckets = Vec::new();
        for _ in 0..2 {
            let staging = StagingStore::open_in_memory().unwrap();
            staging.add_subject(1, "Science fiction").unwrap();
            let surviving: HashSet<u64> = [1, 2].into();
            let dir = tempfile::tempdir().unwrap();
            let subject_path = dir.path().join("subject.jsonl");
            let assoc_path = dir.path().join("work_subject.jsonl");
            let mut classifier = SubjectClassifier::new();
            let mut rng = StdRng::seed_from_u64(42);
            let stats = {
                let mut subject_writer = open_writer(OutputFormat::Jsonl, &subject_path).unwrap();
                let mut assoc_writer = open_writer(OutputFormat::Jsonl, &assoc_path).unwrap();
                generalize_subjects(
                    &staging,
                    &surviving,
                    &mut classifier,
                    subject_writer.as_mut(),
                    assoc_writer.as_mut(),
                    &mut rng,
                )
                .unwrap()
            };
            assert_eq!(stats.works_covered, 2);
            assert_eq!(stats.random_fallbacks, 1);

            let rows: Vec<serde_json::Value> = std::fs::read_to_string(&assoc_path)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect();
            let work2: Vec<u64> = rows
                .iter()
                .filter(|r| r["work_id"] == 2)
                .map(|r| r["subject_id"].as_u64().unwrap())
                .collect();
            assert_eq!(work2.len(), 1);
            let dictionary: Vec<u64> = std::fs::read_to_string(&subject_path)
                .unwrap()
                .lines()
                .map(|l| {
                    serde_json::from_str::<serde_json::Value>(l).unwrap()["subject_id"]
                        .as_u64()
                        .unwrap()
                })
                .collect();
            assert!(dictionary.contains(&work2[0]));
            fallback_buckets.push(work2[0]);
        }
        assert_eq!(fallback_buckets[0], fallback_buckets[1]);
    }

    #[test]
    fn stemming_folds_plurals() {
        assert_eq!(stem("novels"), "novel");
        assert_eq!(stem("stories"), "story");
        assert_eq!(stem("glasses"), "glass");
        assert_eq!(stem("gas"), "gas");
    }
}
