use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    default_pipeline, node_stats, Dag, ErrorResponse, Evaluation, Evaluator, PipelineSpec,
    RunInfo, RunLog, RunRequest, RunStatus, SimInfo, SimRequest, Simulation, StepResponse,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AppState, SharedSim};

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/pipelines/default", get(get_default_pipeline))
        .route("/api/v1/runs", post(create_run).get(list_runs))
        .route("/api/v1/runs/:id", get(get_run).delete(delete_run))
        .route("/api/v1/runs/:id/log", get(get_run_log))
        .route("/api/v1/sims", post(create_sim))
        .route("/api/v1/sims/:id", get(get_sim).delete(delete_sim))
        .route("/api/v1/sims/:id/step", post(step_sim))
        .route("/api/v1/sims/:id/reset", post(reset_sim))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: msg.into() }))
}

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, ApiError> {
    m.lock().map_err(|_| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("estado interno inconsistente ({what})"),
        )
    })
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn get_default_pipeline() -> Json<PipelineSpec> {
    Json(default_pipeline())
}

// Valida y corre un pipeline completo. Los errores del pipeline no son
// errores HTTP: quedan en el RunInfo con estado FAILED.
async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunInfo>, ApiError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let submitted_at = Utc::now();
    let name = req
        .name
        .clone()
        .or_else(|| req.pipeline.name.clone())
        .unwrap_or_else(|| run_id.clone());

    // la evaluación es síncrona, la sacamos del runtime
    let evaluator = Evaluator::new(state.config.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        let dag = match Dag::from_spec(req.pipeline) {
            Ok(dag) => dag,
            Err(e) => return (Vec::new(), Err(e)),
        };
        let order = dag.topological_order().unwrap_or_default();
        (order, evaluator.evaluate(&dag, req.inputs))
    })
    .await;

    let (order, result) = outcome.map_err(|e| {
        warn!("la evaluación del run {} terminó con panic: {:?}", run_id, e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "la evaluación terminó de forma inesperada",
        )
    })?;

    let info = match result {
        Ok(eval) => succeeded_run(run_id.clone(), name, order, eval, submitted_at),
        Err(e) => {
            info!("run {} falló: {}", run_id, e);
            RunInfo {
                id: run_id.clone(),
                name,
                status: RunStatus::Failed,
                error: Some(e.to_string()),
                order,
                trace: None,
                output: Vec::new(),
                metrics: None,
                node_stats: Vec::new(),
                submitted_at,
                finished_at: Utc::now(),
            }
        }
    };

    lock(&state.runs, "runs")?.insert(run_id, info.clone());
    Ok(Json(info))
}

fn succeeded_run(
    id: String,
    name: String,
    order: Vec<String>,
    eval: Evaluation,
    submitted_at: chrono::DateTime<Utc>,
) -> RunInfo {
    info!(
        "run {} terminado: {} pasos, {} registros de salida",
        id,
        eval.trace.len(),
        eval.final_output.len()
    );
    RunInfo {
        node_stats: node_stats(&eval.trace),
        id,
        name,
        status: RunStatus::Succeeded,
        error: None,
        order,
        output: eval.final_output,
        metrics: Some(eval.metrics),
        finished_at: eval.trace.finished_at(),
        trace: Some(eval.trace),
        submitted_at,
    }
}

async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunInfo>>, ApiError> {
    let runs = lock(&state.runs, "runs")?;
    let mut out: Vec<RunInfo> = runs.values().cloned().collect();
    out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    Ok(Json(out))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunInfo>, ApiError> {
    let runs = lock(&state.runs, "runs")?;
    runs.get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("run {id} no encontrado")))
}

async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match lock(&state.runs, "runs")?.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(api_error(StatusCode::NOT_FOUND, format!("run {id} no encontrado"))),
    }
}

async fn get_run_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunLog>, ApiError> {
    let runs = lock(&state.runs, "runs")?;
    let run = runs
        .get(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("run {id} no encontrado")))?;

    let mut lines = run
        .trace
        .as_ref()
        .map(|t| t.log_lines())
        .unwrap_or_default();
    if let Some(err) = &run.error {
        lines.push(format!("✗ {err}"));
    }

    Ok(Json(RunLog {
        run_id: run.id.clone(),
        lines,
    }))
}

/* ---------------- simulaciones paso a paso ---------------- */

async fn create_sim(
    State(state): State<AppState>,
    Json(req): Json<SimRequest>,
) -> Result<Json<SimInfo>, ApiError> {
    let sim = Dag::from_spec(req.pipeline)
        .and_then(|dag| Simulation::new(dag, req.inputs, state.config.clone()))
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let sim_id = uuid::Uuid::new_v4().to_string();
    let info = SimInfo::from_simulation(&sim_id, &sim);
    info!("simulación {} creada ({} pasos)", sim_id, info.order.len());

    lock(&state.sims, "sims")?.insert(sim_id, Arc::new(Mutex::new(sim)));
    Ok(Json(info))
}

/// Saca la simulación del mapa sin dejar el mapa bloqueado.
fn shared_sim(state: &AppState, id: &str) -> Result<SharedSim, ApiError> {
    lock(&state.sims, "sims")?
        .get(id)
        .cloned()
        .ok_or_else(|| sim_not_found(id))
}

async fn get_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SimInfo>, ApiError> {
    let shared = shared_sim(&state, &id)?;
    let sim = lock(&shared, "sim")?;
    Ok(Json(SimInfo::from_simulation(&id, &sim)))
}

// "Next stage": corre un solo nodo. El nodo puede leer archivos o mover
// muchos registros, así que corre fuera del runtime.
async fn step_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StepResponse>, ApiError> {
    let shared = shared_sim(&state, &id)?;

    let response = tokio::task::spawn_blocking(move || {
        let mut sim = lock(&shared, "sim")?;
        let entry = sim
            .step()
            .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?
            .cloned();

        Ok::<_, ApiError>(StepResponse {
            entry,
            sim: SimInfo::from_simulation(&id, &sim),
        })
    })
    .await
    .map_err(|e| {
        warn!("el paso de la simulación terminó con panic: {:?}", e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "el paso terminó de forma inesperada",
        )
    })??;

    Ok(Json(response))
}

async fn reset_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SimInfo>, ApiError> {
    let shared = shared_sim(&state, &id)?;
    let mut sim = lock(&shared, "sim")?;
    sim.reset();
    Ok(Json(SimInfo::from_simulation(&id, &sim)))
}

async fn delete_sim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match lock(&state.sims, "sims")?.remove(&id) {
        Some(_) => {
            info!("simulación {} cerrada", id);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(sim_not_found(&id)),
    }
}

fn sim_not_found(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("simulación {id} no encontrada"))
}
