//! Behavior every `DataStore` must share, runnable against any provider.

use super::record;
use omnistore_core::db::{DataStore, DatabaseError};
use omnistore_core::models::{
    FieldDefinition, FieldType, FilterOperation, QueryFilter, QueryOptions, Record, Rollback,
    SchemaRegistry, TableSchema, TransactionOperation,
};
use serde_json::json;

pub const TABLE: &str = "contract_items";

pub fn contract_schema() -> TableSchema {
    TableSchema::new(TABLE, "Rows exercised by the provider contract suite")
        .field(FieldDefinition::new("name", FieldType::String).required())
        .field(FieldDefinition::new("score", FieldType::Integer))
        .field(FieldDefinition::new("tag", FieldType::String))
        .field(FieldDefinition::new("active", FieldType::Boolean).default_value(true))
}

pub fn contract_registry() -> SchemaRegistry {
    SchemaRegistry::new().with(contract_schema())
}

fn names_of(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

async fn matching(store: &dyn DataStore, filter: QueryFilter) -> Vec<String> {
    let label = format!("{} {}", filter.field, filter.operation);
    let result = store
        .find_records(TABLE, &[filter], &QueryOptions::new())
        .await
        .unwrap();
    assert!(result.success, "{label}: {}", result.error_message());
    let mut names = names_of(&result.data.unwrap());
    names.sort();
    names
}

async fn id_of(store: &dyn DataStore, name: &str) -> String {
    let found = store
        .find_one_record(TABLE, &[QueryFilter::eq("name", name)])
        .await
        .unwrap()
        .data
        .unwrap_or_else(|| panic!("{name} not found"));
    omnistore_core::models::record::record_id(&found).unwrap()
}

async fn reset(store: &dyn DataStore) {
    let existing = store
        .list_records(TABLE, &QueryOptions::new())
        .await
        .unwrap()
        .data
        .unwrap_or_default();
    let ids: Vec<String> = existing
        .iter()
        .filter_map(omnistore_core::models::record::record_id)
        .collect();
    store.batch_delete(TABLE, &ids).await.unwrap();
}

/// Run the shared scenarios. `atomic` providers must roll transactions
/// back natively.
pub async fn run_contract(store: &dyn DataStore, atomic: bool) {
    reset(store).await;

    let created = store
        .batch_create(
            TABLE,
            vec![
                record(json!({"name": "Alpha", "score": 10, "tag": "red"})),
                record(json!({"name": "Beta", "score": 20, "tag": ""})),
                record(json!({"name": "Gamma", "score": 30, "tag": null})),
                record(json!({"name": "Delta", "score": 40})),
            ],
        )
        .await
        .unwrap();
    assert!(created.success, "{}", created.error_message());
    assert_eq!(created.count, Some(4));

    // Filter algebra
    let cases: Vec<(QueryFilter, Vec<&str>)> = vec![
        (QueryFilter::eq("tag", "red"), vec!["Alpha"]),
        (QueryFilter::ne("tag", "red"), vec!["Beta", "Delta", "Gamma"]),
        (QueryFilter::new("score", FilterOperation::Gt, 20), vec!["Delta", "Gamma"]),
        (QueryFilter::new("score", FilterOperation::Gte, 20), vec!["Beta", "Delta", "Gamma"]),
        (QueryFilter::new("score", FilterOperation::Lt, 20), vec!["Alpha"]),
        (QueryFilter::new("score", FilterOperation::Lte, 20), vec!["Alpha", "Beta"]),
        (QueryFilter::is_in("name", json!(["Alpha", "Gamma"])), vec!["Alpha", "Gamma"]),
        (
            QueryFilter::new("tag", FilterOperation::NotIn, json!(["red"])),
            vec!["Beta", "Delta", "Gamma"],
        ),
        (QueryFilter::contains("name", "ELT"), vec!["Delta"]),
        (QueryFilter::new("name", FilterOperation::StartsWith, "ga"), vec!["Gamma"]),
        (QueryFilter::new("name", FilterOperation::EndsWith, "TA"), vec!["Beta", "Delta"]),
        (QueryFilter::is_null("tag"), vec!["Beta", "Delta", "Gamma"]),
        (QueryFilter::is_not_null("tag"), vec!["Alpha"]),
    ];
    for (filter, expected) in cases {
        let label = format!("{} {}", filter.field, filter.operation);
        assert_eq!(matching(store, filter).await, expected, "{label}");
    }

    // Pattern operators only apply to text fields
    let rejected = store
        .find_records(TABLE, &[QueryFilter::contains("score", "1")], &QueryOptions::new())
        .await
        .unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.metadata["error_kind"], json!("validation"));
    let rejected = store
        .count_records(TABLE, &[QueryFilter::new("active", FilterOperation::StartsWith, "t")])
        .await
        .unwrap();
    assert!(!rejected.success);

    // Counting, ordering and pagination
    let counted = store
        .count_records(TABLE, &[QueryFilter::new("score", FilterOperation::Gte, 20)])
        .await
        .unwrap();
    assert_eq!(counted.data, Some(3));

    let page = store
        .list_records(
            TABLE,
            &QueryOptions::new()
                .sorted_by("score", true)
                .with_limit(2)
                .with_offset(1),
        )
        .await
        .unwrap();
    assert_eq!(names_of(&page.data.unwrap()), vec!["Gamma", "Beta"]);

    // Single-record lifecycle
    let alpha_id = id_of(store, "Alpha").await;
    let fetched = store.get_record(TABLE, &alpha_id).await.unwrap().data.unwrap();
    assert_eq!(fetched["active"], json!(true));

    let updated = store
        .update_record(TABLE, &alpha_id, record(json!({"score": 11})))
        .await
        .unwrap()
        .data
        .unwrap();
    assert_eq!(updated["score"], json!(11));
    assert_eq!(updated["name"], json!("Alpha"));
    assert!(updated["updated_at"].as_str() >= fetched["updated_at"].as_str());

    let missing_id = uuid::Uuid::new_v4().to_string();
    let missing = store.get_record(TABLE, &missing_id).await.unwrap();
    assert!(!missing.success);
    assert_eq!(missing.metadata["error_kind"], json!("not_found"));
    assert_eq!(
        store.record_exists(TABLE, &alpha_id).await.unwrap().data,
        Some(true)
    );

    // Failed transaction
    let err = store
        .execute_transaction(vec![
            TransactionOperation::create(TABLE, record(json!({"name": "Epsilon", "score": 50}))),
            TransactionOperation::update(TABLE, missing_id.clone(), record(json!({"score": 1}))),
        ])
        .await
        .unwrap_err();
    let DatabaseError::Transaction(failure) = err else {
        panic!("expected a transaction error, got {err:?}");
    };
    assert_eq!(failure.failed_step, 1);
    if atomic {
        assert_eq!(failure.rollback, Rollback::Native);
    }
    assert!(matching(store, QueryFilter::eq("name", "Epsilon")).await.is_empty());

    // Successful transaction
    let delta_id = id_of(store, "Delta").await;
    let report = store
        .execute_transaction(vec![
            TransactionOperation::create(TABLE, record(json!({"name": "Zeta", "score": 60}))),
            TransactionOperation::delete(TABLE, delta_id),
        ])
        .await
        .unwrap()
        .data
        .unwrap();
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[1]["deleted"], json!(true));
    assert_eq!(
        matching(store, QueryFilter::new("score", FilterOperation::Gte, 0)).await,
        vec!["Alpha", "Beta", "Gamma", "Zeta"]
    );

    let zeta_id = id_of(store, "Zeta").await;
    assert_eq!(store.delete_record(TABLE, &zeta_id).await.unwrap().data, Some(true));
    assert_eq!(store.count_records(TABLE, &[]).await.unwrap().data, Some(3));
}
