use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use log::debug;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use super::{config_str, Credentials, ExtractConfig, Extractor};
use crate::error::{Result, WaccyError};
use crate::fmt::{parse_date, parse_date_range};
use crate::models::{AccountRecord, ExtractedData, ExtractedTransaction};

/// Reads an SEC EDGAR "company facts" JSON document (XBRL frames per concept).
///
/// Config keys: `path` (required), `forms` (array such as `["10-K"]`, optional)
/// and `date_range` (optional). Only USD-denominated facts are extracted.
#[derive(Debug, Default)]
pub struct EdgarExtractor;

impl EdgarExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for EdgarExtractor {
    fn name(&self) -> &str {
        "SEC EDGAR"
    }

    fn data_source(&self) -> &str {
        "edgar"
    }

    // Public filings need no credentials.
    fn authenticate(&mut self, _credentials: &Credentials) -> Result<bool> {
        Ok(true)
    }

    fn extract(&self, config: &ExtractConfig) -> Result<ExtractedData> {
        let path = Path::new(config_str(config, "path")?);
        let forms: Option<HashSet<String>> = match config.get("forms") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_uppercase)
                    .collect(),
            ),
            Some(other) => {
                return Err(WaccyError::Configuration(format!(
                    "'forms' must be an array of form types, got {other}"
                )))
            }
        };
        let range = match config.get("date_range").and_then(Value::as_str) {
            Some(raw) => Some(parse_date_range(raw)?),
            None => None,
        };

        let content = std::fs::read_to_string(path)?;
        let document: Value = serde_json::from_str(&content)?;
        let mut parsed = parse_company_facts(&document, forms.as_ref())?;
        if let Some((start, end)) = range {
            parsed
                .transactions
                .retain(|t| t.date >= start && t.date <= end);
        }

        let mut data = ExtractedData::new(parsed.transactions)
            .with_metadata("source", self.data_source())
            .with_metadata("skipped_facts", parsed.skipped)
            .with_metadata("extracted_at", chrono::Utc::now().to_rfc3339());
        if let Some(cik) = document.get("cik") {
            data.metadata.insert("cik".to_string(), cik.clone());
        }
        if let Some(name) = document.get("entityName") {
            data.metadata.insert("entity_name".to_string(), name.clone());
        }
        data.accounts = parsed.accounts;
        Ok(data)
    }
}

#[derive(Debug, Default)]
pub struct ParsedFacts {
    pub transactions: Vec<ExtractedTransaction>,
    pub accounts: Vec<AccountRecord>,
    pub skipped: usize,
}

fn concepts(document: &Value) -> Result<Vec<(&str, &str, &Map<String, Value>)>> {
    let taxonomies = document
        .get("facts")
        .and_then(Value::as_object)
        .ok_or_else(|| WaccyError::Extraction("company facts document has no 'facts' object".to_string()))?;
    let mut out = Vec::new();
    for (taxonomy, concepts) in taxonomies {
        let Some(concepts) = concepts.as_object() else {
            continue;
        };
        for (concept, body) in concepts {
            if let Some(body) = body.as_object() {
                out.push((taxonomy.as_str(), concept.as_str(), body));
            }
        }
    }
    Ok(out)
}

fn concept_label<'a>(concept: &'a str, body: &'a Map<String, Value>) -> &'a str {
    body.get("label")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(concept)
}

fn fact_amount(fact: &Map<String, Value>) -> Option<Decimal> {
    match fact.get("val")? {
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Turn every USD fact into a transaction on the concept's label.
pub fn parse_company_facts(
    document: &Value,
    forms: Option<&HashSet<String>>,
) -> Result<ParsedFacts> {
    let mut parsed = ParsedFacts::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (taxonomy, concept, body) in concepts(document)? {
        let Some(usd) = body
            .get("units")
            .and_then(|u| u.get("USD"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        let label = concept_label(concept, body);
        let mut used = false;

        for fact in usd {
            let Some(fact) = fact.as_object() else {
                parsed.skipped += 1;
                continue;
            };
            let form = fact.get("form").and_then(Value::as_str).unwrap_or("");
            if let Some(forms) = forms {
                if !forms.contains(&form.to_uppercase()) {
                    continue;
                }
            }
            let date = fact.get("end").and_then(Value::as_str).and_then(parse_date);
            let (Some(date), Some(amount)) = (date, fact_amount(fact)) else {
                debug!("Skipping malformed {concept} fact");
                parsed.skipped += 1;
                continue;
            };
            let accn = fact.get("accn").and_then(Value::as_str).unwrap_or("unknown");
            let start = fact.get("start").and_then(Value::as_str).unwrap_or("");
            let source_id = format!("{accn}:{taxonomy}:{concept}:{start}:{date}");
            if !seen.insert(source_id.clone()) {
                continue;
            }

            let period = match (fact.get("fy").and_then(Value::as_i64), fact.get("fp").and_then(Value::as_str)) {
                (Some(fy), Some(fp)) => format!(" FY{fy} {fp}"),
                _ => String::new(),
            };
            parsed.transactions.push(ExtractedTransaction::new(
                date,
                label,
                amount,
                format!("{form}{period}").trim().to_string(),
                source_id,
            ));
            used = true;
        }

        if used {
            let mut record = AccountRecord::new(label)
                .with_attribute("concept", concept)
                .with_attribute("taxonomy", taxonomy);
            if let Some(description) = body.get("description").and_then(Value::as_str) {
                record = record.with_attribute("description", description);
            }
            parsed.accounts.push(record);
        }
    }
    Ok(parsed)
}

/// Build a reference document for pattern learning from a company-facts file.
///
/// `concept_map` maps XBRL concept names (e.g. `Revenues`) to standard category
/// ids. Each mapped concept yields one entry labelled with the filer's own
/// label and carrying the latest reported value.
pub fn reference_from_company_facts(
    document: &Value,
    concept_map: &BTreeMap<String, String>,
) -> Result<Value> {
    let mut entries = Vec::new();
    for (_, concept, body) in concepts(document)? {
        let Some(category) = concept_map.get(concept) else {
            continue;
        };
        let latest = body
            .get("units")
            .and_then(|u| u.get("USD"))
            .and_then(Value::as_array)
            .and_then(|facts| {
                facts
                    .iter()
                    .filter_map(|f| {
                        let f = f.as_object()?;
                        let end = f.get("end").and_then(Value::as_str).and_then(parse_date)?;
                        Some((end, fact_amount(f)?))
                    })
                    .max_by_key(|(end, _)| *end)
            })
            .map(|(_, amount)| amount);

        let mut entry = json!({
            "label": concept_label(concept, body),
            "category": category,
            "concept": concept,
        });
        if let (Some(amount), Some(obj)) = (latest, entry.as_object_mut()) {
            obj.insert("amount".to_string(), Value::String(amount.to_string()));
        }
        entries.push(entry);
    }
    Ok(json!({ "entries": entries }))
}
