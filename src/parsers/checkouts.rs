use crate::error::{EtlError, Result};
use crate::isbn;
use crate::parsers::SkipPolicy;
use crate::users::UserManager;
use crate::writer::RecordWriter;
use crate::row;
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Inventory timestamps are drawn from this epoch forward.
const INVENTORY_EPOCH: (i32, u32, u32) = (2010, 1, 1);

/// Output writers for the three circulation-derived tables.
pub struct CirculationWriters {
    pub item: Box<dyn RecordWriter>,
    pub loan: Box<dyn RecordWriter>,
    pub loan_return: Box<dyn RecordWriter>,
}

/// One monthly circulation record joined to a resolved work.
struct CheckoutRecord {
    work_id: u64,
    year: i32,
    month: u32,
    checkouts: u32,
}

struct ItemSeed {
    qty: u32,
    material_type: String,
}

/// Two-phase parser for the public circulation export.
///
/// The streaming phase joins each monthly record to a resolved work through
/// the ISBN lookup and aggregates the copy count per work; the synthesis
/// phase then fabricates inventory items, one loan per checkout unit, and a
/// return per loan. Loans are flushed in fixed-size chunks to bound memory.
pub struct CheckoutsParser<'a> {
    isbn_lookup: &'a HashMap<String, u64>,
    rng: StdRng,
    loan_chunk_size: usize,
    // BTreeMap so the synthesis phase iterates works in a fixed order
    items: BTreeMap<u64, ItemSeed>,
    checkouts: Vec<CheckoutRecord>,
}

impl<'a> CheckoutsParser<'a> {
    pub fn new(
        isbn_lookup: &'a HashMap<String, u64>,
        rng: StdRng,
        loan_chunk_size: usize,
    ) -> Self {
        Self {
            isbn_lookup,
            rng,
            loan_chunk_size: loan_chunk_size.max(1),
            items: BTreeMap::new(),
            checkouts: Vec::new(),
        }
    }

    pub fn process_file(
        &mut self,
        input: &Path,
        users: &mut UserManager,
        writers: &mut CirculationWriters,
    ) -> Result<SkipPolicy> {
        info!(input = %input.display(), "reading circulation export");
        let reader = BufReader::new(File::open(input)?);
        let mut policy = SkipPolicy::new("circulation");
        for line in reader.lines() {
            let line = line?;
            match self.process_line(&line) {
                Ok(()) => policy.record_processed(),
                Err(_) => policy.record_skipped(),
            }
        }
        self.synthesize(users, writers)?;
        policy.log_totals();
        Ok(policy)
    }

    fn process_line(&mut self, line: &str) -> Result<()> {
        let cleaned = clean_line(line);
        let obj: Value = serde_json::from_str(&cleaned)?;
        let record = self.parse_record(&obj)?;
        let material_type = obj
            .get("materialtype")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::MissingField("materialtype".into()))?;

        // Only books scale the copy count with observed demand; everything
        // else gets a single copy.
        let seed = self
            .items
            .entry(record.work_id)
            .or_insert_with(|| ItemSeed {
                qty: 0,
                material_type: material_type.to_string(),
            });
        if material_type == "BOOK" {
            seed.qty = seed.qty.max(record.checkouts);
        } else {
            seed.qty = 1;
        }
        seed.material_type = material_type.to_string();

        self.checkouts.push(record);
        Ok(())
    }

    fn parse_record(&mut self, obj: &Value) -> Result<CheckoutRecord> {
        let year = field_as_i64(obj, "checkoutyear")? as i32;
        let month = field_as_i64(obj, "checkoutmonth")? as u32;
        if days_in_month(year, month).is_none() {
            return Err(EtlError::InvalidRecord("implausible checkout month".into()));
        }
        let checkouts = field_as_i64(obj, "checkouts")?;
        if checkouts < 1 {
            return Err(EtlError::InvalidRecord("no checkout units".into()));
        }

        let raw_isbns = obj
            .get("isbn")
            .and_then(Value::as_str)
            .ok_or_else(|| EtlError::MissingField("isbn".into()))?;
        let work_id = raw_isbns
            .split(',')
            .map(|token| token.trim_matches(|c| c == ' ' || c == '\''))
            .filter(|token| !token.is_empty())
            .filter_map(|token| isbn::to_isbn13(token))
            .find_map(|code| self.isbn_lookup.get(&code).copied())
            .ok_or_else(|| EtlError::InvalidRecord("no ISBN resolves to a work".into()))?;

        Ok(CheckoutRecord {
            work_id,
            year,
            month,
            checkouts: checkouts as u32,
        })
    }

    /// Fabricates the inventory pool, then replays every checkout unit as a
    /// loan/return pair over that pool.
    fn synthesize(
        &mut self,
        users: &mut UserManager,
        writers: &mut CirculationWriters,
    ) -> Result<()> {
        let epoch = NaiveDate::from_ymd_opt(INVENTORY_EPOCH.0, INVENTORY_EPOCH.1, INVENTORY_EPOCH.2)
            .ok_or_else(|| EtlError::InvalidRecord("bad inventory epoch".into()))?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| EtlError::InvalidRecord("bad inventory epoch".into()))?;
        let epoch_days = (Utc::now().naive_utc() - epoch).num_days().max(1);

        let mut item_pools: HashMap<u64, Vec<u64>> = HashMap::new();
        let mut next_item_id: u64 = 1;
        for (&work_id, seed) in &self.items {
            let qty = jitter_quantity(seed.qty, &mut self.rng);
            let mut ids = Vec::with_capacity(qty as usize);
            for _ in 0..qty {
                let added_at = epoch + Duration::days(self.rng.gen_range(0..=epoch_days));
                writers.item.write_record(&row![
                    "inventory_id" => next_item_id,
                    "work_id" => work_id,
                    "material_type" => seed.material_type.clone(),
                    "added_at" => added_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                ])?;
                ids.push(next_item_id);
                next_item_id = next_item_id
                    .checked_add(1)
                    .ok_or_else(|| EtlError::InvalidRecord("id space exhausted".into()))?;
            }
            item_pools.insert(work_id, ids);
        }
        writers.item.flush()?;
        info!(items = next_item_id - 1, works = self.items.len(), "inventory synthesized");

        let mut next_loan_id: u64 = 1;
        let mut pending = 0usize;
        for record in &self.checkouts {
            let Some(pool) = item_pools.get_mut(&record.work_id) else {
                continue;
            };
            if pool.is_empty() {
                continue;
            }
            pool.shuffle(&mut self.rng);
            for i in 0..record.checkouts {
                let Some(user_id) = users.get_or_generate_reader() else {
                    continue;
                };
                let loaned_at = match random_moment_in_month(record.year, record.month, &mut self.rng)
                {
                    Some(moment) => moment,
                    None => continue,
                };
                let return_date = loaned_at
                    + Duration::days(self.rng.gen_range(1..=14))
                    + Duration::hours(self.rng.gen_range(0..24))
                    + Duration::minutes(self.rng.gen_range(0..60));
                writers.loan.write_record(&row![
                    "loan_id" => next_loan_id,
                    "user_id" => user_id,
                    "inventory_id" => pool[i as usize % pool.len()],
                    "loaned_at" => loaned_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                ])?;
                writers.loan_return.write_record(&row![
                    "loan_id" => next_loan_id,
                    "return_date" => return_date.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
                ])?;
                next_loan_id = next_loan_id
                    .checked_add(1)
                    .ok_or_else(|| EtlError::InvalidRecord("id space exhausted".into()))?;
                pending += 1;
                if pending >= self.loan_chunk_size {
                    writers.loan.flush()?;
                    writers.loan_return.flush()?;
                    pending = 0;
                }
            }
        }
        writers.loan.flush()?;
        writers.loan_return.flush()?;
        info!(loans = next_loan_id - 1, "loans synthesized");
        Ok(())
    }
}

/// The export wraps batches in brackets and occasionally double-escapes
/// backslashes; strip both so each physical line parses as one JSON object.
fn clean_line(line: &str) -> String {
    line.replace('[', "")
        .replace(']', "")
        .replace(",{", "{")
        .replace("\\\\", "\\")
}

/// Numeric fields arrive either as JSON numbers or as quoted strings.
fn field_as_i64(obj: &Value, field: &str) -> Result<i64> {
    let value = obj
        .get(field)
        .ok_or_else(|| EtlError::MissingField(field.into()))?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| EtlError::InvalidRecord(format!("non-numeric {}", field)))
}

/// Copy counts wobble around the observed monthly maximum, more for popular
/// titles, never below one physical copy.
fn jitter_quantity(qty: u32, rng: &mut StdRng) -> u32 {
    let jittered = if qty > 5 {
        qty as i64 - rng.gen_range(-2i64..=2)
    } else if qty > 2 {
        qty as i64 - rng.gen_range(-1i64..=1)
    } else {
        qty as i64
    };
    jittered.max(1) as u32
}

fn days_in_month(year: i32, month: u32) -> Option<i64> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((next - first).num_days())
}

/// Uniform timestamp within the reported month, respecting its real length.
fn random_moment_in_month(year: i32, month: u32, rng: &mut StdRng) -> Option<NaiveDateTime> {
    let days = days_in_month(year, month)?;
    let day = rng.gen_range(1..=days) as u32;
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_micro_opt(
        rng.gen_range(0..24),
        rng.gen_range(0..60),
        rng.gen_range(0..60),
        rng.gen_range(0..1_000_000),
    )
}
