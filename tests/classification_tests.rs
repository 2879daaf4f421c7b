use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;

use waccy::mapper::batch_quality_score;
use waccy::*;

fn revenue_chart() -> Arc<Ontology> {
    let config = OntologyConfig {
        categories: vec![
            CategorySpec::root("revenue", "Revenue", AccountType::Revenue),
            CategorySpec::child("revenue:product_sales", "Product Sales", "revenue"),
        ],
    };
    Arc::new(Ontology::initialize(&config).unwrap())
}

fn engine(ontology: Arc<Ontology>, store: Arc<PatternStore>, rules: Vec<MappingRule>) -> ClassificationEngine {
    ClassificationEngine::new(
        ontology,
        store,
        MappingTable::new(rules).unwrap(),
        EngineConfig::default(),
    )
    .unwrap()
}

fn record_times(store: &PatternStore, name: &str, category: &str, times: usize) {
    for _ in 0..times {
        store.record(name, category, &PatternFeatures::default()).unwrap();
    }
}

#[test]
fn sales_revenue_resolves_by_pattern_weight() {
    let store = Arc::new(PatternStore::open_in_memory().unwrap());
    record_times(&store, "Sales Revenue", "revenue:product_sales", 8);
    record_times(&store, "Sales Revenue", "revenue:service_revenue", 2);
    let engine = engine(revenue_chart(), Arc::clone(&store), Vec::new());

    let decision = engine.classify(&ClassificationRequest::new("Sales Revenue")).unwrap();
    let MappingDecision::Resolved {
        category_id,
        confidence,
        rationale,
        signals,
    } = decision.clone()
    else {
        panic!("expected a resolved decision, got {decision:?}");
    };
    assert_eq!(category_id, "revenue:product_sales");
    assert_eq!(rationale, Rationale::PatternMatch);
    assert_eq!(rationale.as_str(), "pattern match");
    assert!(confidence >= 0.7);
    assert!((signals.unwrap().pattern_share - 0.8).abs() < 1e-9);
}

#[test]
fn unknown_account_is_unresolved() {
    let store = Arc::new(PatternStore::open_in_memory().unwrap());
    let engine = engine(revenue_chart(), store, Vec::new());
    let decision = engine.classify(&ClassificationRequest::new("Xyzzy Holdings")).unwrap();
    assert!(!decision.is_resolved());
    assert_eq!(decision.confidence(), 0.0);
    assert_eq!(decision.category(), None);
}

#[test]
fn malformed_reference_entry_is_skipped() {
    let reference = json!({
        "entries": [
            {"label": "Net Sales", "category": "revenue:product_sales"},
            {"label": 42, "category": ["not", "a", "string"]},
            {"label": "Service Fees", "category": "revenue", "amount": "1,200.00"}
        ]
    });
    let extraction = PatternStore::extract_from(&reference);
    assert_eq!(extraction.patterns.len(), 2);
    assert_eq!(extraction.skipped, 1);
}

#[test]
fn learning_twice_matches_learning_once() {
    let reference = json!({
        "facts": [
            {"label": "Net Sales", "category": "revenue:product_sales", "amount": 900},
            {"label": "Net Sales", "category": "revenue:product_sales", "amount": 100},
            {"label": "Other", "category": "revenue"}
        ]
    });

    let once = Arc::new(PatternStore::open_in_memory().unwrap());
    engine(revenue_chart(), Arc::clone(&once), Vec::new())
        .learn_from_reference(&reference)
        .unwrap();

    let twice = Arc::new(PatternStore::open_in_memory().unwrap());
    let learner = engine(revenue_chart(), Arc::clone(&twice), Vec::new());
    learner.learn_from_reference(&reference).unwrap();
    let again = learner.learn_from_reference(&reference).unwrap();
    assert!(again.already_applied);

    assert_eq!(once.all().unwrap(), twice.all().unwrap());
}

#[test]
fn deterministic_lookup_ignores_pattern_store() {
    let store = Arc::new(PatternStore::open_in_memory().unwrap());
    record_times(&store, "Sales Revenue", "revenue", 50);
    let engine = engine(
        revenue_chart(),
        store,
        vec![MappingRule::exact("sales revenue", "revenue:product_sales")],
    );
    let decision = engine.classify(&ClassificationRequest::new("Sales Revenue")).unwrap();
    assert_eq!(decision.confidence(), 1.0);
    assert_eq!(decision.rationale(), Some(Rationale::Deterministic));
    assert_eq!(decision.category(), Some("revenue:product_sales"));
}

#[test]
fn ontology_from_config_is_a_forest() {
    let ontology = Ontology::standard().unwrap();
    for category in ontology.list(None) {
        let mut seen = vec![category.id.as_str()];
        let mut current = category;
        while let Some(parent_id) = &current.parent_id {
            let parent = ontology.get(parent_id).unwrap();
            assert!(!seen.contains(&parent.id.as_str()), "cycle through {}", parent.id);
            seen.push(parent.id.as_str());
            current = parent;
        }
    }
}

#[test]
fn map_batch_end_to_end() {
    let store = Arc::new(PatternStore::open_in_memory().unwrap());
    let engine = engine(revenue_chart(), Arc::clone(&store), Vec::new());
    engine
        .learn_from_reference(&json!([
            {"label": "Product Sales", "category": "revenue:product_sales", "occurrences": 5}
        ]))
        .unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let data = ExtractedData::new(vec![
        ExtractedTransaction::new(date, "Product Sales", Decimal::new(12000, 2), "Order 1", "a"),
        ExtractedTransaction::new(date, "Unknown Thing", Decimal::new(-500, 2), "", "b"),
        ExtractedTransaction::new(date, "product sales", Decimal::new(8000, 2), "Order 2", "c"),
    ])
    .with_metadata("source", "quickbooks");

    let mapped = DataMapper::new(Arc::new(engine)).with_workers(2).map_batch(data);
    let ids: Vec<&str> = mapped.data.transactions.iter().map(|t| t.source_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(mapped.data.transactions[0].account_id, "revenue:product_sales");
    assert!(mapped.data.transactions[1].is_unresolved());
    assert_eq!(
        mapped.data.quality_score,
        batch_quality_score(&mapped.data.transactions, 0.5)
    );
    assert!((0.0..=1.0).contains(&mapped.data.quality_score));

    let report = mapped.data.generate_quality_report();
    assert!(report.issues.iter().any(|i| i.contains("need review")));
}
