use log::info;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{AccountCategory, ExtractedData};
use crate::normalize::normalize_name;
use crate::ontology::Ontology;
use crate::patterns::{PatternFeatures, PatternStore};

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAccount {
    pub source_account: String,
    pub transaction_count: usize,
    pub total_amount: Decimal,
    pub flag_reason: Option<String>,
}

/// Source accounts in `data` still waiting for a human decision, in order of first appearance.
pub fn get_pending_accounts(data: &ExtractedData) -> Vec<PendingAccount> {
    let mut pending: Vec<(String, PendingAccount)> = Vec::new();
    for txn in data.transactions.iter().filter(|t| t.is_unresolved()) {
        let label = txn.source_label();
        let key = normalize_name(label);
        match pending.iter_mut().find(|(k, _)| *k == key) {
            Some((_, account)) => {
                account.transaction_count += 1;
                account.total_amount += txn.amount;
            }
            None => pending.push((
                key,
                PendingAccount {
                    source_account: label.to_string(),
                    transaction_count: 1,
                    total_amount: txn.amount,
                    flag_reason: txn.flag_reason.clone(),
                },
            )),
        }
    }
    pending.into_iter().map(|(_, account)| account).collect()
}

/// Categories to offer a reviewer, grouped by type then name.
pub fn get_category_choices(ontology: &Ontology) -> Vec<&AccountCategory> {
    let mut choices = ontology.list(None);
    choices.sort_by(|a, b| {
        a.account_type
            .cmp(&b.account_type)
            .then_with(|| a.name.cmp(&b.name))
    });
    choices
}

/// Assign `category` to every unresolved transaction of `source_account`.
///
/// With a pattern store the decision is also recorded as evidence, so the
/// next batch can resolve the account without review. Returns the number of
/// transactions updated; the batch quality score is left for the caller to
/// recompute.
pub fn apply_review(
    data: &mut ExtractedData,
    source_account: &str,
    category: &AccountCategory,
    learn: Option<&PatternStore>,
) -> Result<usize> {
    let key = normalize_name(source_account);
    let mut features = PatternFeatures::default();
    let mut updated = 0;
    for txn in data
        .transactions
        .iter_mut()
        .filter(|t| t.is_unresolved() && normalize_name(t.source_label()) == key)
    {
        features.observe(txn.amount, &txn.description);
        txn.account_id = category.id.clone();
        txn.confidence = 1.0;
        txn.is_flagged = false;
        txn.flag_reason = None;
        updated += 1;
    }

    if updated > 0 {
        if let Some(store) = learn {
            store.record(source_account, &category.id, &features)?;
        }
        info!("Reviewed '{source_account}' as {}: {updated} transaction(s)", category.id);
    }
    Ok(updated)
}
