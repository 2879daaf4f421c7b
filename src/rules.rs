//! Static source → standard mapping table.
//!
//! Exact rules are keyed on the normalized source name and always win. The
//! remaining rules (`contains`, `starts_with`, `regex`) are tried in descending
//! priority; among equal priorities the rule loaded first wins. A rule scoped
//! to a source system only applies to that system, and beats an unscoped rule
//! for the same name.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaccyError};
use crate::normalize::normalize_name;
use crate::ontology::Ontology;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Exact,
    Contains,
    StartsWith,
    Regex,
}

impl std::str::FromStr for MatchType {
    type Err = WaccyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "starts_with" => Ok(Self::StartsWith),
            "regex" => Ok(Self::Regex),
            other => Err(WaccyError::Configuration(format!("unknown match type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub pattern: String,
    pub category_id: String,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

impl MappingRule {
    pub fn exact(pattern: &str, category_id: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            category_id: category_id.to_string(),
            match_type: MatchType::Exact,
            source_system: None,
            priority: 0,
        }
    }

    pub fn for_system(mut self, system: &str) -> Self {
        self.source_system = Some(system.to_string());
        self
    }

    pub fn matching(mut self, match_type: MatchType, priority: i64) -> Self {
        self.match_type = match_type;
        self.priority = priority;
        self
    }

    fn applies_to(&self, system: Option<&str>) -> bool {
        match (&self.source_system, system) {
            (None, _) => true,
            (Some(scope), Some(system)) => scope.eq_ignore_ascii_case(system),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug)]
struct PatternRule {
    rule: MappingRule,
    regex: Option<Regex>,
    needle: String,
}

impl PatternRule {
    fn matches(&self, normalized: &str, raw: &str) -> bool {
        match self.rule.match_type {
            MatchType::Contains => normalized.contains(&self.needle),
            MatchType::StartsWith => normalized.starts_with(&self.needle),
            MatchType::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(raw)),
            MatchType::Exact => normalized == self.needle,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    rules: Vec<MappingRule>,
}

#[derive(Debug, Deserialize)]
struct CsvRuleRow {
    pattern: Option<String>,
    #[serde(alias = "category")]
    category_id: Option<String>,
    match_type: Option<String>,
    source_system: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Default)]
pub struct MappingTable {
    exact: HashMap<String, Vec<MappingRule>>,
    patterns: Vec<PatternRule>,
}

impl MappingTable {
    pub fn new(rules: Vec<MappingRule>) -> Result<Self> {
        let mut table = Self::default();
        for rule in rules {
            table.insert(rule)?;
        }
        table.patterns.sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority));
        Ok(table)
    }

    fn insert(&mut self, rule: MappingRule) -> Result<()> {
        let needle = normalize_name(&rule.pattern);
        if rule.pattern.trim().is_empty() || rule.category_id.trim().is_empty() {
            return Err(WaccyError::Configuration(format!(
                "mapping rule needs a pattern and a category: {:?} -> {:?}",
                rule.pattern, rule.category_id
            )));
        }
        match rule.match_type {
            MatchType::Exact => {
                self.exact.entry(needle).or_default().push(rule);
            }
            MatchType::Regex => {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    WaccyError::Configuration(format!("invalid rule regex {:?}: {e}", rule.pattern))
                })?;
                self.patterns.push(PatternRule {
                    rule,
                    regex: Some(regex),
                    needle,
                });
            }
            MatchType::Contains | MatchType::StartsWith => {
                self.patterns.push(PatternRule {
                    rule,
                    regex: None,
                    needle,
                });
            }
        }
        Ok(())
    }

    /// Read rules from CSV with a header row: `pattern,category_id,match_type,source_system,priority`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut rules = Vec::new();
        for (i, row) in rdr.deserialize::<CsvRuleRow>().enumerate() {
            let row = row?;
            let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
            let (Some(pattern), Some(category_id)) =
                (non_empty(row.pattern), non_empty(row.category_id))
            else {
                return Err(WaccyError::Configuration(format!(
                    "mapping row {} is missing a pattern or category",
                    i + 1
                )));
            };
            let match_type = match non_empty(row.match_type) {
                Some(m) => m.parse()?,
                None => MatchType::Exact,
            };
            let priority = match non_empty(row.priority) {
                Some(p) => p.parse::<i64>().map_err(|_| {
                    WaccyError::Configuration(format!("mapping row {} has bad priority {p:?}", i + 1))
                })?,
                None => 0,
            };
            rules.push(MappingRule {
                pattern,
                category_id,
                match_type,
                source_system: non_empty(row.source_system),
                priority,
            });
        }
        Self::new(rules)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: RulesFile = serde_json::from_str(json)?;
        Self::new(file.rules)
    }

    /// Load a `.csv` or `.json` rules file.
    pub fn load(path: &Path) -> Result<Self> {
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            Self::from_csv_reader(std::fs::File::open(path)?)
        } else {
            Self::from_json_str(&std::fs::read_to_string(path)?)
        }
    }

    /// Every rule must point at a category the ontology knows.
    pub fn validate_against(&self, ontology: &Ontology) -> Result<()> {
        let all = self
            .exact
            .values()
            .flatten()
            .chain(self.patterns.iter().map(|p| &p.rule));
        for rule in all {
            if !ontology.contains(&rule.category_id) {
                return Err(WaccyError::Configuration(format!(
                    "mapping rule {:?} targets unknown category {}",
                    rule.pattern, rule.category_id
                )));
            }
        }
        Ok(())
    }

    pub fn lookup(&self, source_name: &str, source_system: Option<&str>) -> Option<&str> {
        let normalized = normalize_name(source_name);
        if normalized.is_empty() {
            return None;
        }

        if let Some(candidates) = self.exact.get(&normalized) {
            let scoped = candidates
                .iter()
                .find(|r| r.source_system.is_some() && r.applies_to(source_system));
            let unscoped = candidates.iter().find(|r| r.source_system.is_none());
            if let Some(rule) = scoped.or(unscoped) {
                return Some(&rule.category_id);
            }
        }

        let hit = self
            .patterns
            .iter()
            .filter(|p| p.rule.applies_to(source_system))
            .find(|p| p.matches(&normalized, source_name))?;
        debug!(
            "Rule {:?} ({:?}) matched '{source_name}'",
            hit.rule.pattern, hit.rule.match_type
        );
        Some(&hit.rule.category_id)
    }

    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
