use std::path::Path;

use rusqlite::Connection;

use crate::error::{Result, WaccyError};
use crate::models::AccountType;
use crate::ontology::{CategorySpec, Ontology, OntologyConfig};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS categories (
    position INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    category_type TEXT NOT NULL,
    parent_id TEXT,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY,
    signature TEXT NOT NULL,
    source_name TEXT NOT NULL,
    category_id TEXT NOT NULL,
    weight INTEGER NOT NULL DEFAULT 1,
    positive_count INTEGER NOT NULL DEFAULT 0,
    negative_count INTEGER NOT NULL DEFAULT 0,
    observations INTEGER NOT NULL DEFAULT 0,
    tokens TEXT NOT NULL DEFAULT '[]',
    first_seen TEXT DEFAULT (datetime('now')),
    last_seen TEXT DEFAULT (datetime('now')),
    UNIQUE (signature, category_id)
);

CREATE INDEX IF NOT EXISTS idx_patterns_signature ON patterns (signature);

CREATE TABLE IF NOT EXISTS reference_imports (
    id INTEGER PRIMARY KEY,
    signature TEXT NOT NULL UNIQUE,
    pattern_count INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    applied_at TEXT DEFAULT (datetime('now'))
);
";

// (id, name, type, parent_id, description)
pub const STANDARD_CATEGORIES: &[(&str, &str, AccountType, Option<&str>, &str)] = &[
    // Balance sheet
    ("asset", "Assets", AccountType::Asset, None, "Resources owned by the business"),
    ("asset.current", "Current Assets", AccountType::Asset, Some("asset"), "Assets expected to convert to cash within a year"),
    ("asset.cash", "Cash and Cash Equivalents", AccountType::Asset, Some("asset.current"), "Bank balances, petty cash, money market"),
    ("asset.accounts_receivable", "Accounts Receivable", AccountType::Asset, Some("asset.current"), "Amounts owed by customers"),
    ("asset.inventory", "Inventory", AccountType::Asset, Some("asset.current"), "Goods held for sale"),
    ("asset.prepaid_expenses", "Prepaid Expenses", AccountType::Asset, Some("asset.current"), "Expenses paid in advance"),
    ("asset.noncurrent", "Non-Current Assets", AccountType::Asset, Some("asset"), "Long-lived assets"),
    ("asset.property_equipment", "Property and Equipment", AccountType::Asset, Some("asset.noncurrent"), "Buildings, machinery, computers, vehicles"),
    ("asset.accumulated_depreciation", "Accumulated Depreciation", AccountType::Asset, Some("asset.noncurrent"), "Contra asset for depreciation to date"),
    ("asset.intangibles", "Intangible Assets", AccountType::Asset, Some("asset.noncurrent"), "Goodwill, software, trademarks"),
    ("liability", "Liabilities", AccountType::Liability, None, "Obligations owed to others"),
    ("liability.current", "Current Liabilities", AccountType::Liability, Some("liability"), "Obligations due within a year"),
    ("liability.accounts_payable", "Accounts Payable", AccountType::Liability, Some("liability.current"), "Amounts owed to suppliers"),
    ("liability.accrued_expenses", "Accrued Expenses", AccountType::Liability, Some("liability.current"), "Expenses incurred but not yet paid"),
    ("liability.deferred_revenue", "Deferred Revenue", AccountType::Liability, Some("liability.current"), "Payments received before delivery"),
    ("liability.short_term_debt", "Short-Term Debt", AccountType::Liability, Some("liability.current"), "Credit lines, current portion of loans"),
    ("liability.noncurrent", "Non-Current Liabilities", AccountType::Liability, Some("liability"), "Obligations due after a year"),
    ("liability.long_term_debt", "Long-Term Debt", AccountType::Liability, Some("liability.noncurrent"), "Term loans, notes, bonds"),
    ("equity", "Equity", AccountType::Equity, None, "Owners' residual interest"),
    ("equity.share_capital", "Share Capital", AccountType::Equity, Some("equity"), "Contributed capital, common stock"),
    ("equity.retained_earnings", "Retained Earnings", AccountType::Equity, Some("equity"), "Accumulated undistributed profit"),
    ("equity.distributions", "Owner Distributions", AccountType::Equity, Some("equity"), "Dividends, owner draws"),
    // Income statement
    ("revenue", "Revenue", AccountType::Revenue, None, "Income from operations and other sources"),
    ("revenue.product_sales", "Product Sales", AccountType::Revenue, Some("revenue"), "Sales of goods"),
    ("revenue.service_revenue", "Service Revenue", AccountType::Revenue, Some("revenue"), "Fees, retainers, subscriptions"),
    ("revenue.other_income", "Other Income", AccountType::Revenue, Some("revenue"), "Non-operating income"),
    ("revenue.interest_income", "Interest Income", AccountType::Revenue, Some("revenue.other_income"), "Bank and investment interest"),
    ("expense", "Expenses", AccountType::Expense, None, "Costs of running the business"),
    ("expense.cost_of_goods_sold", "Cost of Goods Sold", AccountType::Expense, Some("expense"), "Direct costs of goods and services sold"),
    ("expense.operating", "Operating Expenses", AccountType::Expense, Some("expense"), "Selling, general and administrative costs"),
    ("expense.salaries_wages", "Salaries and Wages", AccountType::Expense, Some("expense.operating"), "Payroll, bonuses, employer taxes"),
    ("expense.rent", "Rent Expense", AccountType::Expense, Some("expense.operating"), "Office and facility rent"),
    ("expense.utilities", "Utilities", AccountType::Expense, Some("expense.operating"), "Power, water, internet, phone"),
    ("expense.marketing", "Advertising and Marketing", AccountType::Expense, Some("expense.operating"), "Ads, sponsorships, campaigns"),
    ("expense.professional_fees", "Professional Fees", AccountType::Expense, Some("expense.operating"), "Legal, accounting, consulting"),
    ("expense.software", "Software and Subscriptions", AccountType::Expense, Some("expense.operating"), "SaaS tools, hosting, licenses"),
    ("expense.travel", "Travel and Meals", AccountType::Expense, Some("expense.operating"), "Flights, hotels, business meals"),
    ("expense.depreciation", "Depreciation and Amortization", AccountType::Expense, Some("expense"), "Periodic allocation of asset cost"),
    ("expense.interest", "Interest Expense", AccountType::Expense, Some("expense"), "Interest on debt"),
    ("expense.income_tax", "Income Tax Expense", AccountType::Expense, Some("expense"), "Current and deferred income taxes"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        insert_categories(conn, &OntologyConfig::standard().categories)?;
    }
    Ok(())
}

fn insert_categories(conn: &Connection, specs: &[CategorySpec]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO categories (position, id, name, category_type, parent_id, description) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, spec) in specs.iter().enumerate() {
        let category_type = spec.account_type.map(|t| t.as_str()).ok_or_else(|| {
            WaccyError::Configuration(format!("category {} has no account type", spec.id))
        })?;
        stmt.execute(rusqlite::params![
            position as i64,
            spec.id,
            spec.name,
            category_type,
            spec.parent_id,
            spec.description,
        ])?;
    }
    Ok(())
}

/// Replace the persisted chart with `ontology`. Prior rows are discarded entirely.
pub fn save_ontology(conn: &mut Connection, ontology: &Ontology) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM categories", [])?;
    insert_categories(&tx, &ontology.to_config().categories)?;
    tx.commit()?;
    Ok(())
}

/// Load the persisted chart, running the same validation as a fresh initialization.
pub fn load_ontology(conn: &Connection) -> Result<Ontology> {
    let mut stmt = conn.prepare(
        "SELECT id, name, category_type, parent_id, description FROM categories ORDER BY position",
    )?;
    let rows: Vec<(String, String, String, Option<String>, String)> = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut categories = Vec::with_capacity(rows.len());
    for (id, name, category_type, parent_id, description) in rows {
        categories.push(CategorySpec {
            id,
            name,
            account_type: Some(category_type.parse()?),
            parent_id,
            description,
        });
    }
    Ontology::initialize(&OntologyConfig { categories })
}
