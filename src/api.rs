use crate::engine::{Engine, StatusSnapshot};
use crate::events::{Event, EventFilter};
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Thin JSON surface over the engine's public operations. No logic
/// lives here; every handler is one engine call.
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/history", get(get_history))
        .route("/on", post(turn_on))
        .route("/off", post(turn_off))
        .route("/raindelay/on", post(raindelay_on))
        .route("/raindelay/off", post(raindelay_off))
        .route("/raindelay/extend", post(raindelay_extend))
        .route("/weather/on", post(weather_on))
        .route("/weather/off", post(weather_off))
        .route("/wateringindex/on", post(wateringindex_on))
        .route("/wateringindex/off", post(wateringindex_off))
        .route("/refresh", post(refresh))
        .route("/reload", post(reload))
        .route("/program/start", post(program_start))
        .route("/zone/on", post(zone_on))
        .route("/zones/off", post(zones_off))
        .with_state(engine)
}

#[derive(Serialize, Debug, Clone)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true, error: None })
    }

    fn err(message: impl ToString) -> Json<Self> {
        Json(Self { ok: false, error: Some(message.to_string()) })
    }
}

async fn get_status(State(engine): State<Arc<Engine>>) -> Json<StatusSnapshot> {
    Json(engine.status().await)
}

#[derive(Deserialize, Debug, Default)]
pub struct HistoryQuery {
    pub zone: Option<usize>,
    pub program: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

async fn get_history(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Event>> {
    let filter = EventFilter {
        action: None,
        zone: query.zone,
        program: query.program,
        since: query.since,
        until: query.until,
        limit: query.limit,
    };
    Json(engine.history(&filter))
}

async fn turn_on(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.set_on(true).await;
    ApiResponse::ok()
}

async fn turn_off(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.set_on(false).await;
    ApiResponse::ok()
}

async fn raindelay_on(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.set_raindelay(true).await;
    ApiResponse::ok()
}

async fn raindelay_off(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.set_raindelay(false).await;
    ApiResponse::ok()
}

async fn raindelay_extend(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.extend_raindelay().await;
    ApiResponse::ok()
}

async fn weather_on(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.enable_weather(true).await;
    ApiResponse::ok()
}

async fn weather_off(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.enable_weather(false).await;
    ApiResponse::ok()
}

async fn wateringindex_on(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.enable_wateringindex(true).await;
    ApiResponse::ok()
}

async fn wateringindex_off(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.enable_wateringindex(false).await;
    ApiResponse::ok()
}

async fn refresh(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.refresh_now().await;
    ApiResponse::ok()
}

async fn reload(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    let path = crate::config::locate_file(crate::config::CONFIG_FILE);
    match engine.reload_config(&path).await {
        Ok(()) => ApiResponse::ok(),
        Err(e) => ApiResponse::err(e),
    }
}

#[derive(Deserialize, Debug)]
pub struct ProgramStartRequest {
    pub id: String,
}

async fn program_start(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ProgramStartRequest>,
) -> Json<ApiResponse> {
    match engine.start_program_by_id(&req.id).await {
        Ok(()) => ApiResponse::ok(),
        Err(e) => ApiResponse::err(e),
    }
}

#[derive(Deserialize, Debug)]
pub struct ZoneOnRequest {
    pub zone: usize,
    pub seconds: i64,
}

async fn zone_on(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ZoneOnRequest>,
) -> Json<ApiResponse> {
    match engine.zone_on_manual(req.zone, req.seconds) {
        Ok(()) => ApiResponse::ok(),
        Err(e) => ApiResponse::err(e),
    }
}

async fn zones_off(State(engine): State<Arc<Engine>>) -> Json<ApiResponse> {
    engine.all_off();
    ApiResponse::ok()
}
