use super::*;
use shared::domain::{AgentDecision, Persona};

fn outcome(name: &str, attribute: &str, decision: &str) -> AgentOutcome {
    AgentOutcome {
        persona: Persona {
            name: name.to_string(),
            description: None,
        },
        attribute: attribute.to_string(),
        result: AgentDecision {
            decision: decision.to_string(),
            rationale: format!("{name} rationale"),
        },
    }
}

#[tokio::test]
async fn blob_roundtrip_returns_latest_value() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    storage
        .set_blob(keys::SCENARIO, "flood warning")
        .await
        .expect("first write");
    storage
        .set_blob(keys::SCENARIO, "wildfire warning")
        .await
        .expect("second write");

    let value = storage.get_blob(keys::SCENARIO).await.expect("read");
    assert_eq!(value.as_deref(), Some("wildfire warning"));
}

#[tokio::test]
async fn missing_blob_reads_as_none() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let value = storage.get_blob(keys::AGENTS_ARRAY).await.expect("read");
    assert!(value.is_none());
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("temp root");
    let db_path = temp_root.path().join("nested").join("console.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn blob_updated_at_reflects_writes() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    let before = storage
        .blob_updated_at(keys::CONTEXT)
        .await
        .expect("read timestamp");
    assert!(before.is_none());

    storage
        .set_blob(keys::CONTEXT, "riverside town")
        .await
        .expect("write");
    let after = storage
        .blob_updated_at(keys::CONTEXT)
        .await
        .expect("read timestamp")
        .expect("timestamp exists");
    assert!(after <= Utc::now());
}

#[tokio::test]
async fn simulation_request_requires_both_config_gates() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    storage
        .save_scenario_config("flood", "riverside town", "Evacuate, Stay")
        .await
        .expect("scenario config");
    let incomplete = storage
        .load_simulation_request()
        .await
        .expect("load request");
    assert!(incomplete.is_none());

    storage
        .save_agent_config("residents", &["Male".to_string(), "Female".to_string()])
        .await
        .expect("agent config");
    let request = storage
        .load_simulation_request()
        .await
        .expect("load request")
        .expect("request ready");
    assert_eq!(request.scenario, "flood");
    assert_eq!(request.action_space, "Evacuate, Stay");
    assert_eq!(request.demographic_group, "residents");
    assert_eq!(request.attributes, vec!["Male", "Female"]);
}

#[tokio::test]
async fn empty_configuration_values_do_not_satisfy_the_gate() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    storage
        .save_scenario_config("flood", "  ", "Evacuate, Stay")
        .await
        .expect("scenario config");
    storage
        .save_agent_config("residents", &["Male".to_string()])
        .await
        .expect("agent config");

    let request = storage
        .load_simulation_request()
        .await
        .expect("load request");
    assert!(request.is_none());
}

#[tokio::test]
async fn attribute_order_survives_storage_roundtrip() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let attributes = vec![
        "Elderly".to_string(),
        "Male".to_string(),
        "Female".to_string(),
    ];

    storage
        .save_scenario_config("flood", "riverside town", "Evacuate, Stay")
        .await
        .expect("scenario config");
    storage
        .save_agent_config("residents", &attributes)
        .await
        .expect("agent config");

    let request = storage
        .load_simulation_request()
        .await
        .expect("load request")
        .expect("request ready");
    assert_eq!(request.attributes, attributes);
}

#[tokio::test]
async fn agent_outcomes_replace_the_whole_stored_sequence() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    storage
        .save_agent_outcomes(&[
            outcome("Ana", "Female", "Evacuate"),
            outcome("Bruno", "Male", "Stay"),
            outcome("Clara", "Female", "Evacuate"),
        ])
        .await
        .expect("first save");
    storage
        .save_agent_outcomes(&[outcome("Dinah", "Elderly", "Evacuate")])
        .await
        .expect("second save");

    let outcomes = storage
        .load_agent_outcomes()
        .await
        .expect("load outcomes")
        .expect("outcomes exist");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].persona.name, "Dinah");
    assert_eq!(outcomes[0].attribute, "Elderly");
}

#[tokio::test]
async fn agent_outcomes_keep_service_response_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let saved = vec![
        outcome("Ana", "Female", "Evacuate"),
        outcome("Bruno", "Male", "Stay"),
        outcome("Clara", "Female", "Evacuate"),
    ];

    storage
        .save_agent_outcomes(&saved)
        .await
        .expect("save outcomes");
    let loaded = storage
        .load_agent_outcomes()
        .await
        .expect("load outcomes")
        .expect("outcomes exist");
    assert_eq!(loaded, saved);
}
