//! Learned source-name → category evidence.
//!
//! Every `(signature, category)` pair is a separate hypothesis with its own
//! weight. Conflicting evidence for the same source name is kept side by side
//! and never collapsed; the engine decides between hypotheses at lookup time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use rusqlite::{Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{get_connection, init_db};
use crate::error::{Result, WaccyError};
use crate::fmt::parse_amount;
use crate::normalize::{normalize_name, token_set};

const MAX_TOKENS: usize = 64;
/// Largest `occurrences` a reference entry may claim; larger values make the entry malformed.
pub const MAX_OCCURRENCES: u64 = 1_000_000;
const ENTRY_KEYS: &[&str] = &["entries", "line_items", "facts"];
const LABEL_KEYS: &[&str] = &["label", "name", "account"];
const CATEGORY_KEYS: &[&str] = &["category", "standard_account"];

/// Transaction-shape evidence accumulated for a hypothesis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternFeatures {
    pub positive_count: u64,
    pub negative_count: u64,
    pub observations: u64,
    pub tokens: BTreeSet<String>,
}

impl PatternFeatures {
    pub fn observe(&mut self, amount: Decimal, description: &str) {
        self.observe_times(amount, description, 1);
    }

    /// Record `times` identical observations at once.
    pub fn observe_times(&mut self, amount: Decimal, description: &str, times: u64) {
        self.observations = self.observations.saturating_add(times);
        if amount.is_sign_negative() && !amount.is_zero() {
            self.negative_count = self.negative_count.saturating_add(times);
        } else if !amount.is_zero() {
            self.positive_count = self.positive_count.saturating_add(times);
        }
        self.add_tokens(token_set(description));
    }

    pub fn merge(&mut self, other: &PatternFeatures) {
        self.positive_count = self.positive_count.saturating_add(other.positive_count);
        self.negative_count = self.negative_count.saturating_add(other.negative_count);
        self.observations = self.observations.saturating_add(other.observations);
        self.add_tokens(other.tokens.iter().cloned());
    }

    fn add_tokens(&mut self, tokens: impl IntoIterator<Item = String>) {
        for token in tokens {
            if self.tokens.len() >= MAX_TOKENS {
                break;
            }
            self.tokens.insert(token);
        }
    }

    /// Share of signed observations that were positive, if any were signed.
    pub fn positive_ratio(&self) -> Option<f64> {
        let signed = self.positive_count + self.negative_count;
        (signed > 0).then(|| self.positive_count as f64 / signed as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.observations == 0 && self.tokens.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub source_name: String,
    pub signature: String,
    pub category_id: String,
    pub features: PatternFeatures,
    /// How many pieces of evidence this pattern stands for; recording it adds this much weight.
    pub evidence: u64,
}

impl Pattern {
    pub fn new(source_name: &str, category_id: &str, features: PatternFeatures) -> Self {
        Self {
            source_name: source_name.to_string(),
            signature: normalize_name(source_name),
            category_id: category_id.to_string(),
            features,
            evidence: 1,
        }
    }

    pub fn with_evidence(mut self, evidence: u64) -> Self {
        self.evidence = evidence.max(1);
        self
    }
}

/// One competing category for a source name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypothesis {
    pub category_id: String,
    pub weight: u64,
    pub features: PatternFeatures,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceExtraction {
    pub patterns: Vec<Pattern>,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternRecord {
    pub pattern: Pattern,
    pub weight: u64,
}

pub struct PatternStore {
    conn: Mutex<Connection>,
}

impl PatternStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = get_connection(path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // A panic while holding the lock cannot leave a half-written row: every write is one SQLite transaction.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one piece of evidence; returns the hypothesis' new weight.
    pub fn record(
        &self,
        source_name: &str,
        category_id: &str,
        features: &PatternFeatures,
    ) -> Result<u64> {
        let pattern = Pattern::new(source_name, category_id, features.clone());
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let weight = record_in(&tx, &pattern)?;
        tx.commit()?;
        debug!(
            "Pattern '{}' -> {} now has weight {weight}",
            pattern.signature, pattern.category_id
        );
        Ok(weight)
    }

    /// Competing hypotheses for a source name, strongest first, ties broken by category id.
    pub fn lookup(&self, source_name: &str) -> Result<Vec<Hypothesis>> {
        let signature = normalize_name(source_name);
        if signature.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT category_id, weight, positive_count, negative_count, observations, tokens \
             FROM patterns WHERE signature = ?1 ORDER BY weight DESC, category_id ASC",
        )?;
        let rows = stmt
            .query_map([&signature], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut hypotheses = Vec::with_capacity(rows.len());
        for (category_id, weight, positive, negative, observations, tokens) in rows {
            hypotheses.push(Hypothesis {
                category_id,
                weight: weight as u64,
                features: features_from_row(positive, negative, observations, &tokens)?,
            });
        }
        Ok(hypotheses)
    }

    /// Pull patterns out of a reference document without touching the store.
    ///
    /// Entries are read from `entries`, `line_items` or `facts`, or from the
    /// document itself when it is an array. Each entry needs a label
    /// (`label`/`name`/`account`) and a category (`category`/`standard_account`);
    /// `amount`, `description` and `occurrences` are optional and any other
    /// field is ignored. Entries that fail these rules, or claim more than
    /// [`MAX_OCCURRENCES`], are counted as skipped. Duplicate entries are
    /// merged and their evidence adds up.
    pub fn extract_from(reference: &Value) -> ReferenceExtraction {
        let entries = match reference {
            Value::Array(items) => Some(items),
            Value::Object(map) => ENTRY_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_array)),
            _ => None,
        };
        let Some(entries) = entries else {
            return ReferenceExtraction {
                patterns: Vec::new(),
                skipped: 1,
            };
        };

        let mut merged: BTreeMap<(String, String), Pattern> = BTreeMap::new();
        let mut order: Vec<(String, String)> = Vec::new();
        let mut skipped = 0;
        for entry in entries {
            let Some(pattern) = pattern_from_entry(entry) else {
                skipped += 1;
                continue;
            };
            let key = (pattern.signature.clone(), pattern.category_id.clone());
            match merged.get_mut(&key) {
                Some(existing) => {
                    existing.features.merge(&pattern.features);
                    existing.evidence = existing.evidence.saturating_add(pattern.evidence);
                }
                None => {
                    order.push(key.clone());
                    merged.insert(key, pattern);
                }
            }
        }

        let patterns = order
            .into_iter()
            .filter_map(|key| merged.remove(&key))
            .collect();
        ReferenceExtraction { patterns, skipped }
    }

    /// Record `patterns` and mark `signature` as applied, all in one transaction.
    ///
    /// Returns `false` without writing anything when the signature was applied before.
    pub fn apply_reference(
        &self,
        signature: &str,
        patterns: &[Pattern],
        skipped: usize,
    ) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let already: Option<i64> = tx
            .query_row(
                "SELECT id FROM reference_imports WHERE signature = ?1",
                [signature],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(false);
        }
        for pattern in patterns {
            record_in(&tx, pattern)?;
        }
        tx.execute(
            "INSERT INTO reference_imports (signature, pattern_count, skipped) VALUES (?1, ?2, ?3)",
            rusqlite::params![signature, patterns.len() as i64, skipped as i64],
        )?;
        tx.commit()?;
        info!(
            "Applied reference {signature}: {} pattern(s), {skipped} skipped",
            patterns.len()
        );
        Ok(true)
    }

    pub fn is_applied(&self, signature: &str) -> Result<bool> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM reference_imports WHERE signature = ?1",
            [signature],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn applied_references(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT signature FROM reference_imports ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    /// Drop one hypothesis. Returns whether anything was removed.
    pub fn prune(&self, source_name: &str, category_id: &str) -> Result<bool> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM patterns WHERE signature = ?1 AND category_id = ?2",
            rusqlite::params![normalize_name(source_name), category_id],
        )?;
        Ok(removed > 0)
    }

    /// Drop every hypothesis lighter than `min_weight`. Returns the number removed.
    pub fn prune_below(&self, min_weight: u64) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM patterns WHERE weight < ?1",
            [i64::try_from(min_weight).unwrap_or(i64::MAX)],
        )?;
        if removed > 0 {
            info!("Pruned {removed} pattern(s) below weight {min_weight}");
        }
        Ok(removed)
    }

    pub fn all(&self) -> Result<Vec<PatternRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source_name, signature, category_id, weight, positive_count, negative_count, \
             observations, tokens FROM patterns ORDER BY signature, weight DESC, category_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (source_name, signature, category_id, weight, pos, neg, obs, tokens) in rows {
            records.push(PatternRecord {
                pattern: Pattern {
                    source_name,
                    signature,
                    category_id,
                    features: features_from_row(pos, neg, obs, &tokens)?,
                    evidence: weight as u64,
                },
                weight: weight as u64,
            });
        }
        Ok(records)
    }
}

fn features_from_row(
    positive: i64,
    negative: i64,
    observations: i64,
    tokens: &str,
) -> Result<PatternFeatures> {
    Ok(PatternFeatures {
        positive_count: positive as u64,
        negative_count: negative as u64,
        observations: observations as u64,
        tokens: serde_json::from_str(tokens)?,
    })
}

fn record_in(conn: &Connection, pattern: &Pattern) -> Result<u64> {
    if pattern.signature.is_empty() {
        return Err(WaccyError::Other(format!(
            "cannot record a pattern for blank source name {:?}",
            pattern.source_name
        )));
    }
    if pattern.category_id.trim().is_empty() {
        return Err(WaccyError::UnknownCategory(pattern.category_id.clone()));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT tokens FROM patterns WHERE signature = ?1 AND category_id = ?2",
            [&pattern.signature, &pattern.category_id],
            |row| row.get(0),
        )
        .optional()?;
    let mut features = match existing {
        Some(tokens) => PatternFeatures {
            tokens: serde_json::from_str(&tokens)?,
            ..PatternFeatures::default()
        },
        None => PatternFeatures::default(),
    };
    features.add_tokens(pattern.features.tokens.iter().cloned());
    let tokens = serde_json::to_string(&features.tokens)?;
    let evidence = i64::try_from(pattern.evidence.max(1)).unwrap_or(i64::MAX);

    conn.execute(
        "INSERT INTO patterns (signature, source_name, category_id, weight, positive_count, \
         negative_count, observations, tokens) VALUES (?1, ?2, ?3, ?8, ?4, ?5, ?6, ?7) \
         ON CONFLICT(signature, category_id) DO UPDATE SET \
         weight = weight + excluded.weight, \
         positive_count = positive_count + excluded.positive_count, \
         negative_count = negative_count + excluded.negative_count, \
         observations = observations + excluded.observations, \
         tokens = excluded.tokens, \
         last_seen = datetime('now')",
        rusqlite::params![
            pattern.signature,
            pattern.source_name,
            pattern.category_id,
            clamp_i64(pattern.features.positive_count),
            clamp_i64(pattern.features.negative_count),
            clamp_i64(pattern.features.observations),
            tokens,
            evidence,
        ],
    )?;

    let weight: i64 = conn.query_row(
        "SELECT weight FROM patterns WHERE signature = ?1 AND category_id = ?2",
        [&pattern.signature, &pattern.category_id],
        |row| row.get(0),
    )?;
    Ok(weight as u64)
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn first_str<'a>(entry: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn pattern_from_entry(entry: &Value) -> Option<Pattern> {
    let entry = entry.as_object()?;
    let label = first_str(entry, LABEL_KEYS)?;
    let category = first_str(entry, CATEGORY_KEYS)?;
    if normalize_name(label).is_empty() {
        return None;
    }

    let amount = match entry.get("amount") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.to_string().parse::<Decimal>().ok()?),
        Some(Value::String(s)) => Some(parse_amount(s)?),
        Some(_) => return None,
    };
    let description = match entry.get("description") {
        None | Some(Value::Null) => "",
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return None,
    };
    let occurrences = match entry.get("occurrences") {
        None | Some(Value::Null) => 1,
        Some(v) => v.as_u64().filter(|n| (1..=MAX_OCCURRENCES).contains(n))?,
    };

    let mut features = PatternFeatures::default();
    features.observe_times(amount.unwrap_or(Decimal::ZERO), description, occurrences);
    Some(Pattern::new(label, category, features).with_evidence(occurrences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features(amount: i64, description: &str) -> PatternFeatures {
        let mut f = PatternFeatures::default();
        f.observe(Decimal::new(amount, 0), description);
        f
    }

    #[test]
    fn test_record_reinforces_same_category() {
        let store = PatternStore::open_in_memory().unwrap();
        assert_eq!(store.record("Sales Revenue", "revenue.product_sales", &features(10, "widget")).unwrap(), 1);
        assert_eq!(store.record("SALES  revenue", "revenue.product_sales", &features(-5, "refund")).unwrap(), 2);

        let hyps = store.lookup("sales revenue").unwrap();
        assert_eq!(hyps.len(), 1);
        assert_eq!(hyps[0].weight, 2);
        assert_eq!(hyps[0].features.positive_count, 1);
        assert_eq!(hyps[0].features.negative_count, 1);
        assert_eq!(hyps[0].features.observations, 2);
        assert!(hyps[0].features.tokens.contains("widget"));
        assert!(hyps[0].features.tokens.contains("refund"));
    }

    #[test]
    fn test_conflicting_evidence_is_retained() {
        let store = PatternStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store.record("Sales", "revenue.service_revenue", &PatternFeatures::default()).unwrap();
        }
        for _ in 0..3 {
            store.record("Sales", "revenue.product_sales", &PatternFeatures::default()).unwrap();
        }
        store.record("Sales", "revenue.other_income", &PatternFeatures::default()).unwrap();

        let hyps = store.lookup("Sales").unwrap();
        let order: Vec<(&str, u64)> = hyps.iter().map(|h| (h.category_id.as_str(), h.weight)).collect();
        assert_eq!(
            order,
            vec![
                ("revenue.product_sales", 3),
                ("revenue.service_revenue", 3),
                ("revenue.other_income", 1),
            ]
        );
    }

    #[test]
    fn test_lookup_unknown_is_empty() {
        let store = PatternStore::open_in_memory().unwrap();
        assert!(store.lookup("Nothing Here").unwrap().is_empty());
        assert!(store.lookup("   ").unwrap().is_empty());
    }

    #[test]
    fn test_record_rejects_blank_name() {
        let store = PatternStore::open_in_memory().unwrap();
        assert!(store.record(" -- ", "expense.rent", &PatternFeatures::default()).is_err());
    }

    #[test]
    fn test_extract_tolerates_malformed_entries() {
        let reference = json!({
            "company": "Acme",
            "entries": [
                {"label": "Sales Revenue", "category": "revenue.product_sales", "amount": 1200.5},
                {"name": "Office Rent", "standard_account": "expense.rent", "amount": "(300.00)", "extra": true},
                {"label": "Broken"}
            ]
        });
        let extraction = PatternStore::extract_from(&reference);
        assert_eq!(extraction.patterns.len(), 2);
        assert_eq!(extraction.skipped, 1);
        assert_eq!(extraction.patterns[0].signature, "sales revenue");
        assert_eq!(extraction.patterns[1].features.negative_count, 1);
    }

    #[test]
    fn test_extract_merges_duplicates_and_reads_arrays() {
        let reference = json!([
            {"account": "Rent", "category": "expense.rent", "occurrences": 3},
            {"account": "RENT", "category": "expense.rent"},
            {"account": "Rent", "category": "expense.rent", "amount": {"bad": 1}},
            "not an object"
        ]);
        let extraction = PatternStore::extract_from(&reference);
        assert_eq!(extraction.patterns.len(), 1);
        assert_eq!(extraction.patterns[0].features.observations, 4);
        assert_eq!(extraction.skipped, 2);
    }

    #[test]
    fn test_extract_without_entries_counts_document() {
        let extraction = PatternStore::extract_from(&json!({"title": "nothing"}));
        assert!(extraction.patterns.is_empty());
        assert_eq!(extraction.skipped, 1);
    }

    #[test]
    fn test_apply_reference_is_idempotent() {
        let store = PatternStore::open_in_memory().unwrap();
        let patterns = vec![Pattern::new("Rent", "expense.rent", features(-100, "office"))];
        assert!(store.apply_reference("abc123", &patterns, 0).unwrap());
        assert!(!store.apply_reference("abc123", &patterns, 0).unwrap());
        assert_eq!(store.lookup("Rent").unwrap()[0].weight, 1);
        assert!(store.is_applied("abc123").unwrap());
        assert_eq!(store.applied_references().unwrap(), vec!["abc123".to_string()]);
    }

    #[test]
    fn test_prune() {
        let store = PatternStore::open_in_memory().unwrap();
        store.record("Sales", "revenue.product_sales", &PatternFeatures::default()).unwrap();
        store.record("Sales", "revenue.product_sales", &PatternFeatures::default()).unwrap();
        store.record("Sales", "revenue.other_income", &PatternFeatures::default()).unwrap();

        assert_eq!(store.prune_below(2).unwrap(), 1);
        assert!(store.prune("sales", "revenue.product_sales").unwrap());
        assert!(!store.prune("sales", "revenue.product_sales").unwrap());
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.db");
        {
            let store = PatternStore::open(&path).unwrap();
            store.record("Sales", "revenue.product_sales", &features(10, "widget sale")).unwrap();
            store.record("Sales", "revenue.product_sales", &features(20, "gadget")).unwrap();
            store.record("Sales", "revenue.service_revenue", &features(5, "")).unwrap();
        }
        let reopened = PatternStore::open(&path).unwrap();
        let records = reopened.all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].weight, 2);
        assert_eq!(records[0].pattern.category_id, "revenue.product_sales");
        assert_eq!(records[0].pattern.features.positive_count, 2);
        let tokens: Vec<&str> = records[0].pattern.features.tokens.iter().map(String::as_str).collect();
        assert_eq!(tokens, vec!["gadget", "sale", "widget"]);
        assert_eq!(records[1].weight, 1);
    }

    #[test]
    fn test_positive_ratio() {
        let mut f = PatternFeatures::default();
        assert_eq!(f.positive_ratio(), None);
        f.observe(Decimal::new(5, 0), "");
        f.observe(Decimal::new(-5, 0), "");
        f.observe(Decimal::new(7, 0), "");
        assert!((f.positive_ratio().unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert!(!f.is_empty());
    }

    #[test]
    fn test_extract_skips_oversized_occurrences() {
        let reference = json!({
            "entries": [
                {"label": "Net Sales", "category": "revenue", "occurrences": 9_000_000_000_000_000_000u64},
                {"label": "Rent", "category": "expense.rent", "amount": -10, "occurrences": MAX_OCCURRENCES}
            ]
        });
        let extraction = PatternStore::extract_from(&reference);
        assert_eq!(extraction.skipped, 1);
        assert_eq!(extraction.patterns.len(), 1);
        let rent = &extraction.patterns[0];
        assert_eq!(rent.evidence, MAX_OCCURRENCES);
        assert_eq!(rent.features.observations, MAX_OCCURRENCES);
        assert_eq!(rent.features.negative_count, MAX_OCCURRENCES);
    }

    #[test]
    fn test_merge_saturates() {
        let mut a = PatternFeatures {
            observations: u64::MAX - 1,
            positive_count: u64::MAX,
            ..PatternFeatures::default()
        };
        a.merge(&features(3, ""));
        assert_eq!(a.observations, u64::MAX);
        assert_eq!(a.positive_count, u64::MAX);
    }

    #[test]
    fn test_reference_evidence_adds_weight() {
        let store = PatternStore::open_in_memory().unwrap();
        let reference = json!({
            "entries": [
                {"label": "Net Sales", "category": "revenue.product_sales", "occurrences": 9},
                {"label": "Net Sales", "category": "revenue.service_revenue"},
                {"label": "NET SALES", "category": "revenue.service_revenue"}
            ]
        });
        let extraction = PatternStore::extract_from(&reference);
        assert_eq!(extraction.patterns.len(), 2);
        assert!(store.apply_reference("ref-1", &extraction.patterns, extraction.skipped).unwrap());

        let weights: Vec<(String, u64)> = store
            .lookup("Net Sales")
            .unwrap()
            .into_iter()
            .map(|h| (h.category_id, h.weight))
            .collect();
        assert_eq!(
            weights,
            vec![
                ("revenue.product_sales".to_string(), 9),
                ("revenue.service_revenue".to_string(), 2),
            ]
        );
    }

    #[test]
    fn test_concurrent_record_keeps_every_update() {
        let store = std::sync::Arc::new(PatternStore::open_in_memory().unwrap());
        let threads = 8;
        let per_thread = 25;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        store.record("Sales", "revenue.product_sales", &features(1, "")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let hyps = store.lookup("Sales").unwrap();
        assert_eq!(hyps.len(), 1);
        assert_eq!(hyps[0].weight, threads * per_thread);
        assert_eq!(hyps[0].features.positive_count, threads * per_thread);
    }

    #[test]
    fn test_prune_below_huge_threshold_removes_all() {
        let store = PatternStore::open_in_memory().unwrap();
        store.record("Sales", "revenue.product_sales", &PatternFeatures::default()).unwrap();
        store.record("Rent", "expense.rent", &PatternFeatures::default()).unwrap();
        assert_eq!(store.prune_below(u64::MAX).unwrap(), 2);
        assert!(store.all().unwrap().is_empty());
    }
}
