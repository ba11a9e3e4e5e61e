use super::AppState;
use crate::attendance as resolver;
use crate::db::attendance::{self, AttendanceRecord, AttendanceStatus, AuditEvent};
use crate::db::sessions;
use crate::error::{AttendError, Result};
use crate::export;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct AttendanceFilter {
    pub session_id: Option<i64>,
    /// YYYY-MM-DD
    pub date: Option<String>,
}

/// GET /api/attendance
pub async fn list_attendance(
    State(state): State<AppState>,
    Query(filter): Query<AttendanceFilter>,
) -> Result<Json<Vec<AttendanceRecord>>> {
    if let Some(session_id) = filter.session_id {
        return Ok(Json(attendance::list_by_session(&state.db, session_id).await?));
    }

    if let Some(raw) = filter.date.as_deref() {
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AttendError::InvalidRequest("Invalid date format. Use YYYY-MM-DD".into())
        })?;
        return Ok(Json(attendance::list_by_date(&state.db, date).await?));
    }

    Err(AttendError::InvalidRequest(
        "Provide session_id or date".into(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ManualMarkRequest {
    /// Defaults to the currently active session.
    pub session_id: Option<i64>,
    pub student_id: i64,
    pub status: Option<AttendanceStatus>,
    pub note: Option<String>,
}

/// POST /api/attendance/mark
pub async fn mark_manual(
    State(state): State<AppState>,
    Json(request): Json<ManualMarkRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let session = match request.session_id {
        Some(id) => sessions::get_session(&state.db, id).await?,
        None => sessions::find_active(&state.db)
            .await?
            .ok_or_else(|| AttendError::InvalidRequest("No active session".into()))?,
    };

    let (record, created) = resolver::mark_manual(
        &state.db,
        &session,
        request.student_id,
        request.status,
        request.note.as_deref(),
        Utc::now(),
    )
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(json!({
            "message": if created { "Attendance marked" } else { "Attendance already recorded" },
            "attendance": record,
        })),
    ))
}

/// GET /api/attendance/:session_id/audit
pub async fn audit_log(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<Json<Vec<AuditEvent>>> {
    sessions::get_session(&state.db, session_id).await?;
    Ok(Json(
        attendance::list_audit_by_session(&state.db, session_id).await?,
    ))
}

/// GET /api/attendance/:session_id/export
pub async fn export_csv(
    State(state): State<AppState>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse> {
    sessions::get_session(&state.db, session_id).await?;

    let mut buffer = Vec::new();
    export::write_session_csv(&state.db, session_id, &mut buffer).await?;

    let filename = format!("attachment; filename=\"session-{}-attendance.csv\"", session_id);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        buffer,
    ))
}
