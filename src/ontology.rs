//! The standard chart of accounts.
//!
//! An [`Ontology`] is built once from an [`OntologyConfig`] and never mutated
//! afterwards. Every parent reference is checked, cycles are rejected and each
//! category inherits the account type of its root, so a loaded ontology is
//! always a well-formed forest.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::db::STANDARD_CATEGORIES;
use crate::error::{Result, WaccyError};
use crate::models::{AccountCategory, AccountType};

/// One category as written in configuration. Children may omit `type`; they inherit it from their root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub account_type: Option<AccountType>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl CategorySpec {
    pub fn root(id: &str, name: &str, account_type: AccountType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            account_type: Some(account_type),
            parent_id: None,
            description: String::new(),
        }
    }

    pub fn child(id: &str, name: &str, parent_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            account_type: None,
            parent_id: Some(parent_id.to_string()),
            description: String::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyConfig {
    pub categories: Vec<CategorySpec>,
}

impl OntologyConfig {
    /// The built-in chart shipped with the crate.
    pub fn standard() -> Self {
        let categories = STANDARD_CATEGORIES
            .iter()
            .map(|(id, name, account_type, parent_id, description)| CategorySpec {
                id: id.to_string(),
                name: name.to_string(),
                account_type: Some(*account_type),
                parent_id: parent_id.map(str::to_string),
                description: description.to_string(),
            })
            .collect();
        Self { categories }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

#[derive(Debug, Clone)]
pub struct Ontology {
    categories: Vec<AccountCategory>,
    index: HashMap<String, usize>,
}

impl Ontology {
    pub fn initialize(config: &OntologyConfig) -> Result<Self> {
        let specs = &config.categories;
        let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.id.trim().is_empty() {
                return Err(WaccyError::Configuration(format!(
                    "category #{i} has an empty id"
                )));
            }
            if by_id.insert(spec.id.as_str(), i).is_some() {
                return Err(WaccyError::Configuration(format!(
                    "duplicate category id: {}",
                    spec.id
                )));
            }
        }

        let mut categories = Vec::with_capacity(specs.len());
        for spec in specs {
            let (root, level) = resolve_root(spec, specs, &by_id)?;
            let root_type = root.account_type.ok_or_else(|| {
                WaccyError::Configuration(format!("root category {} has no account type", root.id))
            })?;
            if let Some(declared) = spec.account_type {
                if declared != root_type {
                    return Err(WaccyError::Configuration(format!(
                        "category {} is declared {} but its root {} is {}",
                        spec.id, declared, root.id, root_type
                    )));
                }
            }
            categories.push(AccountCategory {
                id: spec.id.clone(),
                name: spec.name.clone(),
                account_type: root_type,
                parent_id: spec.parent_id.clone(),
                level,
                description: spec.description.clone(),
            });
        }

        let index = categories
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        info!("Loaded chart of accounts with {} categories", categories.len());
        Ok(Self { categories, index })
    }

    pub fn standard() -> Result<Self> {
        Self::initialize(&OntologyConfig::standard())
    }

    /// Re-seed from `config`. On error the current chart is left untouched.
    pub fn reload(&mut self, config: &OntologyConfig) -> Result<()> {
        let fresh = Self::initialize(config)?;
        debug!(
            "Replacing chart of {} categories with {}",
            self.categories.len(),
            fresh.categories.len()
        );
        *self = fresh;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&AccountCategory> {
        self.index.get(id).map(|&i| &self.categories[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All categories in configuration order, optionally restricted to one type.
    pub fn list(&self, filter: Option<AccountType>) -> Vec<&AccountCategory> {
        self.categories
            .iter()
            .filter(|c| filter.map_or(true, |t| c.account_type == t))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn children(&self, id: &str) -> Vec<&AccountCategory> {
        self.categories
            .iter()
            .filter(|c| c.parent_id.as_deref() == Some(id))
            .collect()
    }

    /// Ancestors of `id`, nearest parent first.
    pub fn ancestors(&self, id: &str) -> Vec<&AccountCategory> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|c| c.parent_id.as_deref());
        while let Some(parent_id) = current {
            let Some(parent) = self.get(parent_id) else {
                break;
            };
            out.push(parent);
            current = parent.parent_id.as_deref();
        }
        out
    }

    pub fn root_of(&self, id: &str) -> Option<&AccountCategory> {
        let category = self.get(id)?;
        Some(self.ancestors(id).last().copied().unwrap_or(category))
    }

    /// Display names from the category up to its root.
    pub fn path_names(&self, id: &str) -> Vec<&str> {
        let Some(category) = self.get(id) else {
            return Vec::new();
        };
        std::iter::once(category)
            .chain(self.ancestors(id))
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn to_config(&self) -> OntologyConfig {
        OntologyConfig {
            categories: self
                .categories
                .iter()
                .map(|c| CategorySpec {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    account_type: Some(c.account_type),
                    parent_id: c.parent_id.clone(),
                    description: c.description.clone(),
                })
                .collect(),
        }
    }
}

/// Walk the parent chain of `spec`, returning its root and its level (root = 1).
fn resolve_root<'a>(
    spec: &'a CategorySpec,
    specs: &'a [CategorySpec],
    by_id: &HashMap<&str, usize>,
) -> Result<(&'a CategorySpec, u32)> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut current = spec;
    let mut level = 1u32;
    seen.insert(current.id.as_str());

    while let Some(parent_id) = current.parent_id.as_deref() {
        let &parent_idx = by_id.get(parent_id).ok_or_else(|| {
            WaccyError::Configuration(format!(
                "category {} references missing parent {}",
                current.id, parent_id
            ))
        })?;
        let parent = &specs[parent_idx];
        if !seen.insert(parent.id.as_str()) {
            return Err(WaccyError::Configuration(format!(
                "cyclic parent chain through category {}",
                spec.id
            )));
        }
        current = parent;
        level += 1;
    }

    Ok((current, level))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> OntologyConfig {
        OntologyConfig {
            categories: vec![
                CategorySpec::root("revenue", "Revenue", AccountType::Revenue),
                CategorySpec::child("revenue.product_sales", "Product Sales", "revenue"),
                CategorySpec::child("revenue.services", "Service Revenue", "revenue"),
                CategorySpec::root("expense", "Expenses", AccountType::Expense),
                CategorySpec::child("expense.rent", "Rent", "expense").describe("Office rent"),
            ],
        }
    }

    fn config_err(config: &OntologyConfig) -> String {
        match Ontology::initialize(config) {
            Err(WaccyError::Configuration(msg)) => msg,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_initialize_inherits_type_and_level() {
        let ontology = Ontology::initialize(&small_config()).unwrap();
        let sales = ontology.get("revenue.product_sales").unwrap();
        assert_eq!(sales.account_type, AccountType::Revenue);
        assert_eq!(sales.level, 2);
        assert_eq!(ontology.get("revenue").unwrap().level, 1);
        assert!(ontology.get("nope").is_none());
    }

    #[test]
    fn test_list_preserves_config_order() {
        let ontology = Ontology::initialize(&small_config()).unwrap();
        let ids: Vec<&str> = ontology.list(None).iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["revenue", "revenue.product_sales", "revenue.services", "expense", "expense.rent"]
        );
        let revenue: Vec<&str> = ontology
            .list(Some(AccountType::Revenue))
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(revenue, vec!["revenue", "revenue.product_sales", "revenue.services"]);
        assert!(ontology.list(Some(AccountType::Equity)).is_empty());
        assert_eq!(ontology.list(None), ontology.list(None));
    }

    #[test]
    fn test_missing_parent_rejected() {
        let mut config = small_config();
        config.categories.push(CategorySpec::child("x", "X", "ghost"));
        assert!(config_err(&config).contains("missing parent"));
    }

    #[test]
    fn test_cycle_rejected() {
        let config = OntologyConfig {
            categories: vec![
                CategorySpec::child("a", "A", "b"),
                CategorySpec::child("b", "B", "c"),
                CategorySpec::child("c", "C", "a"),
            ],
        };
        assert!(config_err(&config).contains("cyclic"));

        let self_parent = OntologyConfig {
            categories: vec![CategorySpec::child("a", "A", "a")],
        };
        assert!(config_err(&self_parent).contains("cyclic"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut config = small_config();
        config
            .categories
            .push(CategorySpec::root("revenue", "Again", AccountType::Revenue));
        assert!(config_err(&config).contains("duplicate"));
    }

    #[test]
    fn test_type_conflict_rejected() {
        let mut config = small_config();
        let mut bad = CategorySpec::child("revenue.cogs", "COGS", "revenue");
        bad.account_type = Some(AccountType::Expense);
        config.categories.push(bad);
        assert!(config_err(&config).contains("declared expense"));
    }

    #[test]
    fn test_untyped_root_rejected() {
        let config = OntologyConfig {
            categories: vec![CategorySpec::child("a", "A", "b"), {
                let mut root = CategorySpec::root("b", "B", AccountType::Asset);
                root.account_type = None;
                root
            }],
        };
        assert!(config_err(&config).contains("no account type"));
    }

    #[test]
    fn test_reload_discards_prior_state() {
        let mut ontology = Ontology::initialize(&small_config()).unwrap();
        let replacement = OntologyConfig {
            categories: vec![CategorySpec::root("equity", "Equity", AccountType::Equity)],
        };
        ontology.reload(&replacement).unwrap();
        assert_eq!(ontology.len(), 1);
        assert!(ontology.get("revenue").is_none());
    }

    #[test]
    fn test_failed_reload_keeps_current_chart() {
        let mut ontology = Ontology::initialize(&small_config()).unwrap();
        let broken = OntologyConfig {
            categories: vec![CategorySpec::child("a", "A", "missing")],
        };
        assert!(ontology.reload(&broken).is_err());
        assert_eq!(ontology.len(), 5);
    }

    #[test]
    fn test_hierarchy_navigation() {
        let ontology = Ontology::standard().unwrap();
        let ancestors: Vec<&str> = ontology
            .ancestors("revenue.interest_income")
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ancestors, vec!["revenue.other_income", "revenue"]);
        assert_eq!(ontology.root_of("expense.rent").unwrap().id, "expense");
        assert_eq!(ontology.root_of("expense").unwrap().id, "expense");
        assert_eq!(
            ontology.path_names("revenue.product_sales"),
            vec!["Product Sales", "Revenue"]
        );
        assert!(ontology
            .children("asset.current")
            .iter()
            .any(|c| c.id == "asset.cash"));
    }

    #[test]
    fn test_standard_chart_is_a_forest() {
        let ontology = Ontology::standard().unwrap();
        for category in ontology.list(None) {
            if let Some(parent_id) = &category.parent_id {
                let parent = ontology.get(parent_id).expect("parent exists");
                assert!(category.level > parent.level);
                assert_eq!(category.account_type, parent.account_type);
            } else {
                assert_eq!(category.level, 1);
            }
        }
        for account_type in AccountType::ALL {
            assert!(!ontology.list(Some(account_type)).is_empty());
        }
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{"categories": [
            {"id": "asset", "name": "Assets", "type": "asset"},
            {"id": "asset.cash", "name": "Cash", "parent_id": "asset", "extra": 1}
        ]}"#;
        let config = OntologyConfig::from_json_str(json).unwrap();
        let ontology = Ontology::initialize(&config).unwrap();
        assert_eq!(ontology.get("asset.cash").unwrap().account_type, AccountType::Asset);
        assert_eq!(ontology.to_config().categories.len(), 2);
    }
}
