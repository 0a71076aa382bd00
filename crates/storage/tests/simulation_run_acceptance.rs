use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sim_client::aggregate::aggregate_outcomes;
use sim_client::{HttpJobService, JobEvent, SimulationController};
use storage::Storage;
use tokio::sync::Mutex;
use tokio::time::timeout;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const WAIT_BUDGET: Duration = Duration::from_secs(5);

struct PersonaService {
    simulation_id: String,
    progress: Mutex<VecDeque<Value>>,
    agents: Value,
}

async fn handle_submit(State(state): State<Arc<PersonaService>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::ACCEPTED,
        Json(json!({ "simulationId": state.simulation_id.clone() })),
    )
}

async fn handle_progress(
    State(state): State<Arc<PersonaService>>,
    Path(_id): Path<String>,
) -> Json<Value> {
    let next = state.progress.lock().await.pop_front();
    Json(next.unwrap_or_else(|| json!({ "status": "completed" })))
}

async fn handle_results(
    State(state): State<Arc<PersonaService>>,
    Path(_id): Path<String>,
) -> Json<Value> {
    Json(json!({ "agents": state.agents.clone() }))
}

async fn spawn_persona_service(state: Arc<PersonaService>) -> String {
    let app = Router::new()
        .route("/generate_persona", post(handle_submit))
        .route("/simulation_progress/:id", get(handle_progress))
        .route("/simulation_results/:id", get(handle_results))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind persona service");
    let address = listener.local_addr().expect("persona service address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve persona service");
    });
    format!("http://{address}")
}

#[tokio::test]
async fn configured_run_flows_from_submission_to_aggregated_results() {
    let storage = Storage::new("sqlite::memory:").await.expect("create storage");

    // both configuration gates have to be satisfied before a run can start
    storage
        .save_scenario_config(
            "A wildfire is approaching the town",
            "Evacuation routes are congested",
            "Evacuate, Stay",
        )
        .await
        .expect("save scenario config");
    storage
        .save_agent_config("Gender", &["Male".to_string(), "Female".to_string()])
        .await
        .expect("save agent config");
    let request = storage
        .load_simulation_request()
        .await
        .expect("load request")
        .expect("configuration should be complete");
    assert_eq!(request.demographic_group, "Gender");

    let simulation_id = uuid::Uuid::new_v4().to_string();
    let state = Arc::new(PersonaService {
        simulation_id: simulation_id.clone(),
        progress: Mutex::new(VecDeque::from([
            json!({ "status": "running", "completed": 1, "total": 3 }),
            json!({ "status": "running", "completed": 3, "total": 3 }),
            json!({ "status": "completed" }),
        ])),
        agents: json!([
            {
                "persona": { "name": "Persona 1", "description": "Construction worker" },
                "attribute": "Male",
                "result": { "decision": "Evacuate", "rationale": "Lives near the fire line" }
            },
            {
                "persona": { "name": "Persona 2" },
                "attribute": "Male",
                "result": { "decision": "Stay", "rationale": "Wants to defend the property" }
            },
            {
                "persona": { "name": "Persona 3" },
                "attribute": "Female",
                "result": { "decision": "Evacuate", "rationale": "Has children at home" }
            }
        ]),
    });
    let base_url = spawn_persona_service(Arc::clone(&state)).await;

    let service = Arc::new(HttpJobService::new(base_url));
    let controller =
        SimulationController::with_poll_interval(service, Arc::new(storage.clone()), POLL_INTERVAL);
    let mut events = controller.subscribe_events();
    assert!(controller.start(request).await.expect("start run"));

    loop {
        let event = timeout(WAIT_BUDGET, events.recv())
            .await
            .expect("run should finish in time")
            .expect("event stream open");
        match event {
            JobEvent::Completed { agent_count } => {
                assert_eq!(agent_count, 3);
                break;
            }
            JobEvent::Failed { error } => panic!("run failed: {error}"),
            _ => {}
        }
    }
    assert!(controller.simulation_completed().await);

    let outcomes = storage
        .load_agent_outcomes()
        .await
        .expect("load outcomes")
        .expect("outcomes should be stored");
    assert_eq!(outcomes.len(), 3);
    assert_eq!(
        outcomes[0].persona.description.as_deref(),
        Some("Construction worker")
    );

    let aggregated = aggregate_outcomes(&outcomes);
    assert_eq!(aggregated.decision_catalog, vec!["Evacuate", "Stay"]);
    assert_eq!(aggregated.series.len(), 2);
    let male = &aggregated.series[0];
    assert_eq!(male.attribute, "Male");
    assert_eq!(male.shares[0].percent, 50.0);
    assert_eq!(male.shares[1].percent, 50.0);
    let female = &aggregated.series[1];
    assert_eq!(female.attribute, "Female");
    assert_eq!(female.shares.len(), 1);
    assert_eq!(female.shares[0].percent, 100.0);

    let updated_at = storage
        .blob_updated_at(storage::keys::AGENTS_ARRAY)
        .await
        .expect("timestamp query")
        .expect("results timestamp present");
    assert!(updated_at <= chrono::Utc::now());
}
