use super::AppState;
use crate::db::attendance as attendance_db;
use crate::db::courses;
use crate::db::sessions::{self, NewSession, Session, SessionStatus};
use crate::error::{AttendError, Result};
use crate::scheduler;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    pub status: Option<String>,
    /// YYYY-MM-DD
    pub date: Option<String>,
}

/// GET /api/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<Session>>> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(AttendError::InvalidRequest)?;

    let date = filter
        .date
        .as_deref()
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                AttendError::InvalidRequest("Invalid date format. Use YYYY-MM-DD".into())
            })
        })
        .transpose()?;

    Ok(Json(sessions::list_sessions(&state.db, status, date).await?))
}

/// GET /api/sessions/:id
pub async fn session_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let session = sessions::get_session(&state.db, id).await?;
    let records = attendance_db::list_by_session(&state.db, id).await?;

    Ok(Json(json!({
        "session": session,
        "attendance": {
            "total_records": records.len(),
            "records": records,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub course_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub late_threshold_minutes: Option<i64>,
}

/// POST /api/sessions/manual
pub async fn create_manual(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    // Course must exist before a session can point at it.
    courses::get_course(&state.db, request.course_id).await?;

    let now = Utc::now();
    let session = sessions::create_session(
        &state.db,
        &NewSession {
            course_id: request.course_id,
            time_slot_id: None,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            late_threshold_minutes: request
                .late_threshold_minutes
                .unwrap_or(state.session_config.default_late_threshold_minutes),
            auto_created: false,
        },
        now,
    )
    .await?;

    if session.status == SessionStatus::Active {
        // A class is starting right now; begin from a clean slate.
        state.engine.clear_window();
        state.engine.reset_cooldowns();
    }

    let activated = session.status == SessionStatus::Active;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": if activated {
                "Session created and activated"
            } else {
                "Session created and scheduled"
            },
            "session": session,
        })),
    ))
}

/// PUT /api/sessions/:id/activate
pub async fn activate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let now = Utc::now();
    let applied = sessions::activate(&state.db, id, now).await?;
    let session = sessions::get_session(&state.db, id).await?;

    if applied {
        state.engine.clear_window();
        state.engine.reset_cooldowns();
    }

    let message = if applied {
        "Session activated"
    } else if session.status == SessionStatus::Active {
        "Session already active"
    } else {
        "Session not in an activatable state"
    };

    Ok(Json(json!({ "message": message, "session": session })))
}

/// PUT /api/sessions/:id/end
pub async fn end(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let now = Utc::now();
    let applied = sessions::end_manual(&state.db, id, now).await?;
    let session = sessions::get_session(&state.db, id).await?;

    if applied {
        state.engine.clear_window();
    }

    let message = if applied {
        "Session ended"
    } else {
        "Session already completed"
    };

    Ok(Json(json!({ "message": message, "session": session })))
}

/// PUT /api/sessions/:id/cancel
pub async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let now = Utc::now();
    let applied = sessions::cancel(&state.db, id, now).await?;
    let session = sessions::get_session(&state.db, id).await?;

    let message = if applied {
        "Session cancelled"
    } else {
        "Session already in a terminal state"
    };

    Ok(Json(json!({ "message": message, "session": session })))
}

/// GET /api/sessions/active
pub async fn active_sessions(State(state): State<AppState>) -> Result<Json<Value>> {
    let active = sessions::list_sessions(&state.db, Some(SessionStatus::Active), None).await?;

    Ok(Json(json!({
        "count": active.len(),
        "sessions": active,
    })))
}

/// GET /api/sessions/status
pub async fn status_overview(State(state): State<AppState>) -> Result<Json<Value>> {
    let now = Utc::now();
    let overview = sessions::status_overview(&state.db, now).await?;

    Ok(Json(json!({
        "active_session": overview.active,
        "next_scheduled": overview.next_scheduled,
        "last_completed": overview.last_completed,
        "status_counts": overview.counts,
        "timestamp": now,
    })))
}

/// POST /api/scheduler/tick
///
/// On-demand sweep, identical to what the background interval runs.
pub async fn scheduler_tick(State(state): State<AppState>) -> Result<Json<Value>> {
    let stats = scheduler::sweep_tick(&state.db, &state.session_config, Utc::now()).await;

    Ok(Json(json!({
        "sessions_created": stats.sessions_created,
        "sessions_activated": stats.sessions_activated,
        "sessions_completed": stats.sessions_completed,
        "absentee_sessions": stats.absentee_sessions,
        "students_marked_absent": stats.students_marked_absent,
    })))
}
