use crate::error::Result;
use crate::writer::RecordWriter;
use crate::row;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashSet;
use tracing::info;

const EMAIL_DOMAIN: &str = "knyhozbirnia.com";
const DEFAULT_PFP_URL: &str =
    "https://storage.cloud.google.com/data_warehousing_library_data/default-pfp.svg";

// Name pools for synthesized demographics. Static data, never mutated.
const MALE_FIRST_NAMES: &[&str] = &[
    "James", "John", "Robert", "Michael", "William", "David", "Richard", "Joseph", "Thomas",
    "Charles", "Daniel", "Matthew", "Anthony", "Mark", "Steven", "Andrew", "Paul", "Joshua",
    "Kenneth", "Kevin", "Brian", "George", "Timothy", "Ronald", "Jason", "Edward", "Ryan",
    "Jacob", "Nicholas", "Eric", "Jonathan", "Stephen", "Larry", "Justin", "Scott", "Brandon",
    "Benjamin", "Samuel", "Gregory", "Alexander",
];
const FEMALE_FIRST_NAMES: &[&str] = &[
    "Mary", "Patricia", "Jennifer", "Linda", "Elizabeth", "Barbara", "Susan", "Jessica",
    "Sarah", "Karen", "Lisa", "Nancy", "Betty", "Margaret", "Sandra", "Ashley", "Kimberly",
    "Emily", "Donna", "Michelle", "Carol", "Amanda", "Dorothy", "Melissa", "Deborah",
    "Stephanie", "Rebecca", "Sharon", "Laura", "Cynthia", "Kathleen", "Amy", "Angela",
    "Shirley", "Anna", "Brenda", "Pamela", "Emma", "Nicole", "Helen",
];
const NEUTRAL_FIRST_NAMES: &[&str] = &[
    "Alex", "Casey", "Jordan", "Taylor", "Morgan", "Riley", "Avery", "Quinn", "Rowan",
    "Skyler", "Charlie", "Dakota", "Emerson", "Finley", "Harper", "Kai", "Reese", "Sage",
    "Cameron", "Drew",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis",
    "Rodriguez", "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson",
    "Thomas", "Taylor", "Moore", "Jackson", "Martin", "Lee", "Perez", "Thompson", "White",
    "Harris", "Sanchez", "Clark", "Ramirez", "Lewis", "Robinson", "Walker", "Young",
    "Allen", "King", "Wright", "Scott", "Torres", "Nguyen", "Hill", "Flores", "Green",
    "Adams", "Nelson", "Baker", "Hall", "Rivera", "Campbell", "Mitchell", "Carter",
    "Roberts", "Gomez", "Phillips", "Evans", "Turner", "Diaz", "Parker", "Cruz",
    "Edwards", "Collins", "Reyes", "Stewart",
];

const BIRTH_START_YEAR: i32 = 1960;

/// Lazily grown pool of synthetic readers.
///
/// During parsing only ids exist; demographics are synthesized when the
/// population is finalized and written. New-reader probability shrinks with
/// the population (`20000 / (n * jitter)`), so the pool grows fast at first
/// and then plateaus.
pub struct UserManager {
    users: Vec<u64>,
    next_id: u64,
    emails: HashSet<String>,
    rng: StdRng,
}

impl UserManager {
    pub fn new(rng: StdRng) -> Self {
        Self {
            users: Vec::new(),
            next_id: 1,
            emails: HashSet::new(),
            rng,
        }
    }

    /// Either mints a fresh reader id or returns a uniformly random existing
    /// one. Returns `None` only on id exhaustion (caller skips the record).
    pub fn get_or_generate_reader(&mut self) -> Option<u64> {
        let n = self.users.len();
        let jitter = self.rng.gen_range(1..=500) as f64;
        if n == 0 || self.rng.gen::<f64>() < 20000.0 / (n as f64 * jitter) {
            let id = self.next_id;
            self.next_id = self.next_id.checked_add(1)?;
            self.users.push(id);
            return Some(id);
        }
        Some(self.users[self.rng.gen_range(0..n)])
    }

    pub fn population(&self) -> usize {
        self.users.len()
    }

    /// Fills demographics for every generated reader and writes the user
    /// table. Called once, after all parsers are done drawing readers.
    pub fn write_users(&mut self, writer: &mut dyn RecordWriter) -> Result<()> {
        info!(population = self.users.len(), "writing synthesized users");
        let now = Utc::now().naive_utc();
        let ids: Vec<u64> = self.users.clone();
        for user_id in ids {
            let (first_name, last_name, gender) = self.random_name();
            let email = self.unique_email(first_name, last_name);
            let birthday = self.random_birthday();
            writer.write_record(&row![
                "user_id" => user_id,
                "first_name" => first_name,
                "last_name" => last_name,
                "gender" => gender,
                "email" => email,
                "birthday" => birthday,
                "role" => "USER",
                "created_at" => now.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            ])?;
        }
        writer.flush()
    }

    /// Writes the single default profile picture row.
    pub fn write_pfp(&self, writer: &mut dyn RecordWriter) -> Result<()> {
        writer.write_record(&row![
            "user_id" => 1,
            "url" => DEFAULT_PFP_URL,
        ])?;
        writer.flush()
    }

    /// Weighted 4:4:1 male/female/non-binary draw; the output keeps only the
    /// first letter, matching the warehouse column.
    fn random_name(&mut self) -> (&'static str, &'static str, &'static str) {
        let (pool, gender) = match self.rng.gen_range(0..9) {
            0..=3 => (MALE_FIRST_NAMES, "m"),
            4..=7 => (FEMALE_FIRST_NAMES, "f"),
            _ => (NEUTRAL_FIRST_NAMES, "n"),
        };
        let first = pool[self.rng.gen_range(0..pool.len())];
        let last = LAST_NAMES[self.rng.gen_range(0..LAST_NAMES.len())];
        (first, last, gender)
    }

    fn unique_email(&mut self, first: &str, last: &str) -> String {
        let mut email = format!("{}_{}@{}", first, last, EMAIL_DOMAIN);
        let mut index = 0u32;
        while self.emails.contains(&email) {
            email = format!("{}_{}{}@{}", first, last, index, EMAIL_DOMAIN);
            index += 1;
        }
        self.emails.insert(email.clone());
        email
    }

    /// Mixture: 80% typical adult band, 10% older, 10% young, bounds relative
    /// to the current year (nobody under six).
    fn random_birthday(&mut self) -> String {
        let end_year = Utc::now().year() - 6;
        let band = self.rng.gen::<f64>();
        let year = if band < 0.8 {
            self.rng.gen_range(BIRTH_START_YEAR + 15..=end_year - 11)
        } else if band < 0.9 {
            self.rng.gen_range(BIRTH_START_YEAR..=BIRTH_START_YEAR + 14)
        } else {
            self.rng.gen_range(end_year - 10..=end_year)
        };
        let day_offset = self.rng.gen_range(1..=365);
        let birthday = NaiveDate::from_ymd_opt(year, 1, 1).unwrap() + Duration::days(day_offset);
        birthday.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use crate::writer::open_writer;
    use rand::SeedableRng;

    fn manager(seed: u64) -> UserManager {
        UserManager::new(StdRng::seed_from_u64(seed))
    }

    #[test]
    fn population_growth_is_sublinear() {
        let mut users = manager(1);
        const N: usize = 50_000;
        for _ in 0..N {
            users.get_or_generate_reader().unwrap();
        }
        let population = users.population();
        assert!(population > 0);
        assert!(
            population < N,
            "population {} should plateau below {}",
            population,
            N
        );
    }

    #[test]
    fn existing_readers_are_reused() {
        let mut users = manager(2);
        let mut draws = HashSet::new();
        for _ in 0..10_000 {
            draws.insert(users.get_or_generate_reader().unwrap());
        }
        // every drawn id is a generated one
        assert_eq!(draws.len(), users.population());
    }

    #[test]
    fn emails_are_deduplicated_with_suffixes() {
        let mut users = manager(3);
        let a = users.unique_email("Ada", "Lovelace");
        let b = users.unique_email("Ada", "Lovelace");
        let c = users.unique_email("Ada", "Lovelace");
        assert_eq!(a, "Ada_Lovelace@knyhozbirnia.com");
        assert_eq!(b, "Ada_Lovelace0@knyhozbirnia.com");
        assert_eq!(c, "Ada_Lovelace1@knyhozbirnia.com");
    }

    #[test]
    fn birthdays_stay_within_the_mixture_bands() {
        let mut users = manager(4);
        let end_year = Utc::now().year() - 6;
        for _ in 0..500 {
            let birthday = users.random_birthday();
            let year: i32 = birthday[..4].parse().unwrap();
            assert!((BIRTH_START_YEAR..=end_year + 1).contains(&year), "{}", birthday);
        }
    }

    #[test]
    fn finalized_users_have_all_demographic_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library_user.jsonl");
        let mut users = manager(5);
        for _ in 0..50 {
            users.get_or_generate_reader().unwrap();
        }
        {
            let mut writer = open_writer(OutputFormat::Jsonl, &path).unwrap();
            users.write_users(writer.as_mut()).unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), users.population());
        for line in lines {
            let obj: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(obj["user_id"].as_u64().unwrap() >= 1);
            assert!(["m", "f", "n"].contains(&obj["gender"].as_str().unwrap()));
            assert!(obj["email"].as_str().unwrap().ends_with(EMAIL_DOMAIN));
            assert_eq!(obj["role"], "USER");
        }
    }
}
