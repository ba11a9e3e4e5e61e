//! HTTP API surface.

pub mod attendance;
pub mod courses;
pub mod health;
pub mod recognize;
pub mod sessions;
pub mod students;

use crate::config::SessionConfig;
use crate::engine::RecognitionEngine;
use crate::error::AttendError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub engine: Arc<RecognitionEngine>,
    pub session_config: SessionConfig,
}

impl AppState {
    pub fn new(db: SqlitePool, engine: Arc<RecognitionEngine>, session_config: SessionConfig) -> Self {
        Self {
            db,
            engine,
            session_config,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/recognize", post(recognize::recognize_frame))
        .route(
            "/api/students",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/api/students/:id",
            get(students::get_student).delete(students::delete_student),
        )
        .route("/api/students/:id/enrollment", post(students::enroll_faces))
        .route(
            "/api/courses",
            get(courses::list_courses).post(courses::create_course),
        )
        .route("/api/courses/:id/enroll", post(courses::enroll_student))
        .route(
            "/api/courses/:id/enroll/:student_id",
            delete(courses::unenroll_student),
        )
        .route(
            "/api/timetable",
            get(courses::list_timetable).put(courses::upsert_slot),
        )
        .route("/api/timetable/:id", delete(courses::delete_slot))
        .route("/api/sessions", get(sessions::list_sessions))
        .route("/api/sessions/manual", post(sessions::create_manual))
        .route("/api/sessions/active", get(sessions::active_sessions))
        .route("/api/sessions/status", get(sessions::status_overview))
        .route("/api/sessions/:id", get(sessions::session_detail))
        .route("/api/sessions/:id/activate", put(sessions::activate))
        .route("/api/sessions/:id/end", put(sessions::end))
        .route("/api/sessions/:id/cancel", put(sessions::cancel))
        .route("/api/scheduler/tick", post(sessions::scheduler_tick))
        .route("/api/attendance", get(attendance::list_attendance))
        .route("/api/attendance/mark", post(attendance::mark_manual))
        .route("/api/attendance/:session_id/audit", get(attendance::audit_log))
        .route(
            "/api/attendance/:session_id/export",
            get(attendance::export_csv),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for AttendError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AttendError::NotFound { what, id } => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{} {} not found", what, id) }),
            ),
            AttendError::SessionConflict {
                session_id,
                status,
                starts_at,
                ends_at,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "Conflicting session exists",
                    "details": {
                        "sessionId": session_id,
                        "status": status,
                        "startsAt": starts_at,
                        "endsAt": ends_at,
                    }
                }),
            ),
            AttendError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            other => {
                tracing::error!("request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": other.to_string() }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
