//! Batch mapping of extracted transactions onto the chart of accounts.
//!
//! Each distinct source account in a batch is classified once and the
//! decision is written back onto every transaction that references it.
//! Transactions are never reordered, and a failure on one account only
//! flags that account's transactions.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::engine::{ClassificationEngine, ClassificationRequest, MappingDecision, UnresolvedReason};
use crate::error::Result;
use crate::fmt::{format_percentage, money};
use crate::models::{ExtractedData, ExtractedTransaction, UNRESOLVED};
use crate::normalize::normalize_name;
use crate::patterns::PatternFeatures;
use crate::settings::Settings;
use crate::validation::{reconcile, ValidationSignal};

/// Shared flag for stopping a running batch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedAccount {
    pub source_account: String,
    pub transaction_count: usize,
    pub total_amount: Decimal,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingReport {
    pub resolved_accounts: usize,
    pub unresolved: Vec<UnresolvedAccount>,
    /// Accounts whose classification returned an error.
    pub failed_accounts: usize,
    /// Accounts never classified because the batch was cancelled.
    pub skipped_accounts: usize,
    pub incomplete: bool,
}

impl MappingReport {
    /// Write the unresolved accounts as CSV for manual review.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["source_account", "transactions", "total_amount", "reason"])?;
        for account in &self.unresolved {
            wtr.write_record([
                account.source_account.clone(),
                account.transaction_count.to_string(),
                account.total_amount.to_string(),
                account.reason.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedBatch {
    pub data: ExtractedData,
    pub report: MappingReport,
}

impl MappedBatch {
    pub fn is_incomplete(&self) -> bool {
        self.report.incomplete
    }

    pub fn summary(&self) -> String {
        let unresolved_total: Decimal = self.report.unresolved.iter().map(|u| u.total_amount).sum();
        let mut line = format!(
            "{} account(s) mapped, {} unresolved ({}), quality {}",
            self.report.resolved_accounts,
            self.report.unresolved.len(),
            money(unresolved_total),
            format_percentage(self.data.quality_score, 1),
        );
        if self.report.incomplete {
            line.push_str(" [incomplete]");
        }
        line
    }
}

/// Share of the batch that mapped cleanly, weighted by confidence.
///
/// `Σ confidence(resolved) / (resolved + unresolved × (1 + penalty))`; an empty batch scores 0.
pub fn batch_quality_score(transactions: &[ExtractedTransaction], unresolved_penalty: f64) -> f64 {
    if transactions.is_empty() {
        return 0.0;
    }
    let penalty = unresolved_penalty.max(0.0);
    let mut resolved = 0usize;
    let mut unresolved = 0usize;
    let mut confidence = 0.0;
    for txn in transactions {
        if txn.is_unresolved() {
            unresolved += 1;
        } else {
            resolved += 1;
            confidence += txn.confidence.clamp(0.0, 1.0);
        }
    }
    let denominator = resolved as f64 + unresolved as f64 * (1.0 + penalty);
    (confidence / denominator).clamp(0.0, 1.0)
}

struct AccountGroup {
    label: String,
    indices: Vec<usize>,
    features: PatternFeatures,
    total: Decimal,
}

pub struct DataMapper {
    engine: Arc<ClassificationEngine>,
    workers: usize,
    unresolved_penalty: f64,
    statement_balances: HashMap<String, Decimal>,
}

impl DataMapper {
    pub fn new(engine: Arc<ClassificationEngine>) -> Self {
        Self {
            engine,
            workers: 1,
            unresolved_penalty: 0.5,
            statement_balances: HashMap::new(),
        }
    }

    pub fn from_settings(engine: Arc<ClassificationEngine>, settings: &Settings) -> Self {
        Self::new(engine)
            .with_workers(settings.workers)
            .with_unresolved_penalty(settings.unresolved_penalty)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_unresolved_penalty(mut self, penalty: f64) -> Self {
        self.unresolved_penalty = penalty.max(0.0);
        self
    }

    /// Statement balances per source account, used to reconcile each account's total.
    pub fn with_statement_balances(mut self, balances: HashMap<String, Decimal>) -> Self {
        self.statement_balances = balances
            .into_iter()
            .map(|(name, balance)| (normalize_name(&name), balance))
            .collect();
        self
    }

    pub fn map_batch(&self, data: ExtractedData) -> MappedBatch {
        self.map_batch_with_cancel(data, &CancellationToken::new())
    }

    pub fn map_batch_with_cancel(
        &self,
        mut data: ExtractedData,
        cancel: &CancellationToken,
    ) -> MappedBatch {
        let (groups, missing) = group_accounts(&data.transactions);
        let source_system = data.source_system().map(str::to_string);

        let requests: Vec<ClassificationRequest> = groups
            .iter()
            .map(|g| {
                ClassificationRequest::new(&g.label)
                    .with_system(source_system.as_deref())
                    .with_features(g.features.clone())
                    .with_validation(self.validation_for(g))
            })
            .collect();

        let decisions = if self.workers > 1 && requests.len() > 1 {
            self.classify_parallel(&requests, cancel)
        } else {
            self.classify_sequential(&requests, cancel)
        };

        let mut report = MappingReport::default();
        for (group, outcome) in groups.iter().zip(decisions) {
            let decision = match outcome {
                Some(Ok(decision)) => decision,
                Some(Err(e)) => {
                    report.failed_accounts += 1;
                    MappingDecision::unresolved(UnresolvedReason::Error(e))
                }
                None => {
                    report.skipped_accounts += 1;
                    MappingDecision::unresolved(UnresolvedReason::Cancelled)
                }
            };
            match &decision {
                MappingDecision::Resolved {
                    category_id,
                    confidence,
                    ..
                } => {
                    report.resolved_accounts += 1;
                    for &i in &group.indices {
                        resolve(&mut data.transactions[i], category_id, *confidence);
                    }
                }
                MappingDecision::Unresolved { reason } => {
                    for &i in &group.indices {
                        leave_unresolved(&mut data.transactions[i], reason);
                    }
                    report.unresolved.push(UnresolvedAccount {
                        source_account: group.label.clone(),
                        transaction_count: group.indices.len(),
                        total_amount: group.total,
                        reason: reason.clone(),
                    });
                }
            }
        }

        if !missing.is_empty() {
            let reason = UnresolvedReason::MissingSourceAccount;
            let mut total = Decimal::ZERO;
            for &i in &missing {
                total += data.transactions[i].amount;
                leave_unresolved(&mut data.transactions[i], &reason);
            }
            report.unresolved.push(UnresolvedAccount {
                source_account: String::new(),
                transaction_count: missing.len(),
                total_amount: total,
                reason,
            });
        }

        report.incomplete = report.skipped_accounts > 0;
        data.quality_score = batch_quality_score(&data.transactions, self.unresolved_penalty);
        data.metadata.insert(
            "mapped_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        if report.incomplete {
            warn!(
                "Mapping cancelled with {} of {} account(s) unprocessed",
                report.skipped_accounts,
                groups.len()
            );
            data.metadata
                .insert("mapping_incomplete".to_string(), Value::Bool(true));
        }

        let batch = MappedBatch { data, report };
        info!("{}", batch.summary());
        batch
    }

    /// Recompute the quality score after transactions were edited by hand.
    pub fn rescore(&self, data: &mut ExtractedData) {
        data.quality_score = batch_quality_score(&data.transactions, self.unresolved_penalty);
    }

    fn validation_for(&self, group: &AccountGroup) -> ValidationSignal {
        match self.statement_balances.get(&normalize_name(&group.label)) {
            Some(statement) => reconcile(group.total, *statement).signal(),
            None => ValidationSignal::Unknown,
        }
    }

    fn classify_one(&self, request: &ClassificationRequest) -> std::result::Result<MappingDecision, String> {
        self.engine.classify(request).map_err(|e| {
            error!("Failed to classify '{}': {e}", request.source_name);
            e.to_string()
        })
    }

    fn classify_sequential(
        &self,
        requests: &[ClassificationRequest],
        cancel: &CancellationToken,
    ) -> Vec<Option<std::result::Result<MappingDecision, String>>> {
        let mut decisions = Vec::with_capacity(requests.len());
        for request in requests {
            if cancel.is_cancelled() {
                decisions.push(None);
            } else {
                decisions.push(Some(self.classify_one(request)));
            }
        }
        decisions
    }

    fn classify_parallel(
        &self,
        requests: &[ClassificationRequest],
        cancel: &CancellationToken,
    ) -> Vec<Option<std::result::Result<MappingDecision, String>>> {
        let (job_tx, job_rx) = unbounded::<usize>();
        let (result_tx, result_rx) = unbounded();
        for i in 0..requests.len() {
            let _ = job_tx.send(i);
        }
        drop(job_tx);

        let workers = self.workers.min(requests.len());
        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    while let Ok(i) = job_rx.recv() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let _ = result_tx.send((i, self.classify_one(&requests[i])));
                    }
                });
            }
        });
        drop(result_tx);

        let mut decisions: Vec<Option<_>> = (0..requests.len()).map(|_| None).collect();
        for (i, decision) in result_rx.iter() {
            decisions[i] = Some(decision);
        }
        decisions
    }
}

fn group_accounts(transactions: &[ExtractedTransaction]) -> (Vec<AccountGroup>, Vec<usize>) {
    let mut groups: Vec<AccountGroup> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut missing = Vec::new();

    for (i, txn) in transactions.iter().enumerate() {
        let label = txn.source_label();
        let key = normalize_name(label);
        if key.is_empty() {
            missing.push(i);
            continue;
        }
        let idx = *by_key.entry(key).or_insert_with(|| {
            groups.push(AccountGroup {
                label: label.trim().to_string(),
                indices: Vec::new(),
                features: PatternFeatures::default(),
                total: Decimal::ZERO,
            });
            groups.len() - 1
        });
        let group = &mut groups[idx];
        group.indices.push(i);
        group.features.observe(txn.amount, &txn.description);
        group.total += txn.amount;
    }
    (groups, missing)
}

fn keep_source_label(txn: &mut ExtractedTransaction) {
    if txn.source_account.is_none() {
        txn.source_account = Some(txn.account_id.clone());
    }
}

fn resolve(txn: &mut ExtractedTransaction, category_id: &str, confidence: f64) {
    keep_source_label(txn);
    txn.account_id = category_id.to_string();
    txn.confidence = confidence;
    txn.is_flagged = false;
    txn.flag_reason = None;
}

fn leave_unresolved(txn: &mut ExtractedTransaction, reason: &UnresolvedReason) {
    keep_source_label(txn);
    txn.account_id = UNRESOLVED.to_string();
    txn.confidence = 0.0;
    txn.flag(reason.to_string());
}
