use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Weekday;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{ConstraintsConfig, ServerConfig};
use crate::data::{
    ClassDefinition, ClassId, Conflict, ConflictKind, EntryId, InstructorId, Level,
    OptimizationResult, RoomId, ScheduleConstraints, ScheduledClass, Severity, Utilization,
};
use crate::error::{GeneratorError, StoreError, ValidationError};
use crate::generator::{SaveOutcome, ScheduleGenerator, ScheduleSummary, Suggestion};
use crate::store::ScheduleStore;

#[derive(Clone)]
pub struct AppState {
    generator: Arc<ScheduleGenerator>,
    // one optimize-and-save at a time
    save_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(store: Arc<dyn ScheduleStore>, config: &ServerConfig) -> Self {
        Self {
            generator: Arc::new(ScheduleGenerator::new(store, config.studio)),
            save_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    PartialReplace(GeneratorError),
}

impl From<GeneratorError> for ApiError {
    fn from(e: GeneratorError) -> Self {
        match e {
            GeneratorError::Store(e) => ApiError::Store(e),
            GeneratorError::Validation(e) => ApiError::Validation(e),
            e @ GeneratorError::PartialReplace { .. } => ApiError::PartialReplace(e),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            ApiError::Store(StoreError::UnknownStudio(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR"),
            ApiError::PartialReplace(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PARTIAL_SAVE"),
        };
        if status.is_server_error() {
            error!("{}", self);
        }
        let body = ErrorBody {
            code: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// One scheduled class, flattened for clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledClassDto {
    pub class_id: ClassId,
    pub class_name: String,
    pub dance_style: String,
    pub level: Level,
    pub instructor_id: InstructorId,
    pub instructor_name: String,
    pub room_id: RoomId,
    pub room_name: String,
    pub day: Weekday,
    pub start: String,
    pub end: String,
}

impl From<&ScheduledClass> for ScheduledClassDto {
    fn from(s: &ScheduledClass) -> Self {
        Self {
            class_id: s.class.id,
            class_name: s.class.name.clone(),
            dance_style: s.class.dance_style.clone(),
            level: s.class.level,
            instructor_id: s.instructor.id,
            instructor_name: s.instructor.name.clone(),
            room_id: s.room.id,
            room_name: s.room.name.clone(),
            day: s.slot.day,
            start: s.slot.start.format("%H:%M").to_string(),
            end: s.slot.end.format("%H:%M").to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnscheduledDto {
    pub id: ClassId,
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDto {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub reason: String,
    pub affected_class_ids: Vec<ClassId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_resolution: Option<String>,
}

impl From<Conflict> for ConflictDto {
    fn from(c: Conflict) -> Self {
        Self {
            kind: c.kind,
            severity: c.severity,
            reason: c.description,
            affected_class_ids: c.affected_class_ids,
            suggested_resolution: c.suggested_resolution,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OptimizeResponse {
    pub success: bool,
    pub schedule: Vec<ScheduledClassDto>,
    pub unscheduled: Vec<UnscheduledDto>,
    pub conflicts: Vec<ConflictDto>,
    pub utilization: Utilization,
    pub score: f64,
}

impl From<OptimizationResult> for OptimizeResponse {
    fn from(result: OptimizationResult) -> Self {
        Self {
            success: result.success,
            schedule: result.schedule.iter().map(ScheduledClassDto::from).collect(),
            unscheduled: result
                .unscheduled
                .into_iter()
                .map(|u| UnscheduledDto {
                    id: u.class.id,
                    name: u.class.name,
                    reason: u.reason,
                })
                .collect(),
            conflicts: result.conflicts.into_iter().map(ConflictDto::from).collect(),
            utilization: result.utilization,
            score: result.score,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub success: bool,
    pub created: usize,
    pub entry_ids: Vec<EntryId>,
    pub removed: usize,
    pub unscheduled: usize,
    pub utilization: Utilization,
    pub score: f64,
}

impl From<SaveOutcome> for SaveResponse {
    fn from(outcome: SaveOutcome) -> Self {
        Self {
            success: outcome.success,
            created: outcome.created.len(),
            entry_ids: outcome.created,
            removed: outcome.removed,
            unscheduled: outcome.unscheduled,
            utilization: outcome.utilization,
            score: outcome.score,
        }
    }
}

/// A class someone is thinking of adding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestRequest {
    pub dance_style: String,
    pub level: Level,
    pub duration_minutes: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn optimize_handler(
    State(state): State<AppState>,
    Json(config): Json<ConstraintsConfig>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    let constraints = ScheduleConstraints::try_from(config)?;
    let result = state.generator.generate_optimized_schedule(&constraints)?;
    Ok(Json(result.into()))
}

async fn save_handler(
    State(state): State<AppState>,
    Json(config): Json<ConstraintsConfig>,
) -> Result<Json<SaveResponse>, ApiError> {
    let constraints = ScheduleConstraints::try_from(config)?;
    let _guard = state.save_lock.lock().await;
    let outcome = state.generator.optimize_and_replace(&constraints)?;
    info!(
        "Replaced timetable for studio {}: {} created, {} unscheduled, \
         instructors {:.1}% / rooms {:.1}% utilized",
        state.generator.studio(),
        outcome.created.len(),
        outcome.unscheduled,
        outcome.utilization.average_instructor(),
        outcome.utilization.average_room()
    );
    Ok(Json(outcome.into()))
}

async fn schedule_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ScheduleSummary>>, ApiError> {
    Ok(Json(state.generator.get_current_schedule()?))
}

async fn suggest_handler(
    State(state): State<AppState>,
    Json(request): Json<SuggestRequest>,
) -> Result<Json<Vec<Suggestion>>, ApiError> {
    let constraints = ScheduleConstraints::try_from(request.constraints)?;
    let candidate = ClassDefinition::new(
        0,
        "New class",
        request.dance_style,
        request.duration_minutes,
    )
    .with_level(request.level)
    .with_capacity(request.min_capacity, request.max_capacity)
    .with_features(request.required_features);
    let suggestions = state
        .generator
        .suggest_new_class_time(&candidate, &constraints)?;
    Ok(Json(suggestions))
}

async fn conflicts_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConflictDto>>, ApiError> {
    let conflicts = state.generator.detect_current_conflicts()?;
    Ok(Json(conflicts.into_iter().map(ConflictDto::from).collect()))
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/optimize", post(optimize_handler))
        .route("/optimize/save", post(save_handler))
        .route("/schedule", get(schedule_handler))
        .route("/suggest", post(suggest_handler))
        .route("/conflicts", get(conflicts_handler));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api)
        .with_state(state)
}

pub async fn run_server(config: ServerConfig, store: Arc<dyn ScheduleStore>) -> anyhow::Result<()> {
    let app = router(AppState::new(store, &config));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;

    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StudioData};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn seeded() -> Arc<MemoryStore> {
        let data: StudioData = serde_json::from_value(json!({
            "classes": [
                {"id": 1, "name": "Salsa", "danceStyle": "salsa", "level": "beginner",
                 "durationMinutes": 60, "minCapacity": 3, "maxCapacity": 20}
            ],
            "instructors": [
                {"id": 1, "name": "Ana", "specialties": ["salsa"],
                 "availability": [{"day": "Mon", "start": "09:00", "end": "17:00"}]}
            ],
            "rooms": [{"id": 1, "name": "Studio A", "capacity": 20}]
        }))
        .unwrap();
        let store = Arc::new(MemoryStore::new());
        store.insert_studio(1, data);
        store
    }

    fn app(store: Arc<MemoryStore>) -> Router {
        let config = ServerConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            studio: 1,
            seed_path: None,
        };
        router(AppState::new(store, &config))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_check() {
        let app = app(seeded());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn optimize_returns_flattened_schedule() {
        let app = app(seeded());
        let (status, body) = send(&app, "POST", "/v1/optimize", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let entry = &body["schedule"][0];
        assert_eq!(entry["className"], "Salsa");
        assert_eq!(entry["instructorName"], "Ana");
        assert_eq!(entry["roomName"], "Studio A");
        assert_eq!(entry["day"], "Mon");
        assert_eq!(entry["level"], "beginner");
    }

    #[tokio::test]
    async fn malformed_constraints_are_bad_requests() {
        let app = app(seeded());
        let (status, body) = send(
            &app,
            "POST",
            "/v1/optimize",
            Some(json!({"openingTime": "late", "closingTime": "22:00"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");

        let (status, _) = send(
            &app,
            "POST",
            "/v1/optimize",
            Some(json!({"openingTime": "22:00", "closingTime": "08:00"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn save_then_read_back() {
        let app = app(seeded());
        let (status, body) = send(&app, "POST", "/v1/optimize/save", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["created"], 1);
        assert_eq!(body["unscheduled"], 0);

        let (_, schedule) = send(&app, "GET", "/v1/schedule", None).await;
        assert_eq!(schedule.as_array().unwrap().len(), 1);
        assert_eq!(schedule[0]["className"], "Salsa");

        let (_, conflicts) = send(&app, "GET", "/v1/conflicts", None).await;
        assert_eq!(conflicts, json!([]));
    }

    #[tokio::test]
    async fn suggest_lists_free_times() {
        let app = app(seeded());
        let (status, body) = send(
            &app,
            "POST",
            "/v1/suggest",
            Some(json!({
                "danceStyle": "Salsa",
                "level": "intermediate",
                "durationMinutes": 60,
                "minCapacity": 5,
                "maxCapacity": 15
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let suggestions = body.as_array().unwrap();
        assert_eq!(suggestions.len(), 5);
        assert_eq!(suggestions[0]["start"], "09:00");
        assert_eq!(suggestions[0]["instructorName"], "Ana");
    }

    #[tokio::test]
    async fn store_outage_is_service_unavailable() {
        let store = seeded();
        let app = app(store.clone());
        store.set_offline(true);
        let (status, body) = send(&app, "GET", "/v1/schedule", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "STORE_UNAVAILABLE");
    }

    #[test]
    fn partial_replace_is_a_server_error() {
        let error = ApiError::from(GeneratorError::PartialReplace {
            removed: 3,
            created: vec![7],
            planned: 2,
            source: StoreError::Unavailable("disk full".into()),
        });
        assert!(matches!(error, ApiError::PartialReplace(_)));
        assert_eq!(
            error.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
