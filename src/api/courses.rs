use super::AppState;
use crate::db::courses::{self, Course, TimeSlot};
use crate::db::students;
use crate::error::{AttendError, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

/// GET /api/courses
pub async fn list_courses(State(state): State<AppState>) -> Result<Json<Vec<Course>>> {
    Ok(Json(courses::list_courses(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub code: String,
    pub name: String,
    pub professor: Option<String>,
}

/// POST /api/courses
pub async fn create_course(
    State(state): State<AppState>,
    Json(request): Json<CreateCourseRequest>,
) -> Result<(StatusCode, Json<Course>)> {
    let course = courses::create_course(
        &state.db,
        &request.code,
        &request.name,
        request.professor.as_deref(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(course)))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_id: i64,
}

/// POST /api/courses/:id/enroll
pub async fn enroll_student(
    State(state): State<AppState>,
    Path(course_id): Path<i64>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<Value>> {
    courses::get_course(&state.db, course_id).await?;
    students::get_student(&state.db, request.student_id).await?;

    let added = courses::enroll_student(&state.db, course_id, request.student_id).await?;

    Ok(Json(json!({
        "message": if added { "Student enrolled" } else { "Student already enrolled" },
    })))
}

/// DELETE /api/courses/:id/enroll/:student_id
pub async fn unenroll_student(
    State(state): State<AppState>,
    Path((course_id, student_id)): Path<(i64, i64)>,
) -> Result<Json<Value>> {
    let removed = courses::unenroll_student(&state.db, course_id, student_id).await?;
    if !removed {
        return Err(AttendError::InvalidRequest(format!(
            "Student {} is not enrolled in course {}",
            student_id, course_id
        )));
    }

    Ok(Json(json!({ "message": "Student unenrolled" })))
}

/// GET /api/timetable
pub async fn list_timetable(State(state): State<AppState>) -> Result<Json<Vec<TimeSlot>>> {
    Ok(Json(courses::list_time_slots(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpsertSlotRequest {
    pub course_id: i64,
    pub weekday: String,
    pub slot_number: i64,
    /// HH:MM
    pub starts: String,
    /// HH:MM
    pub ends: String,
    pub late_threshold_minutes: Option<i64>,
}

/// PUT /api/timetable
pub async fn upsert_slot(
    State(state): State<AppState>,
    Json(request): Json<UpsertSlotRequest>,
) -> Result<Json<TimeSlot>> {
    courses::get_course(&state.db, request.course_id).await?;

    let weekday = request.weekday.to_uppercase();
    const WEEKDAYS: [&str; 7] = [
        "MONDAY",
        "TUESDAY",
        "WEDNESDAY",
        "THURSDAY",
        "FRIDAY",
        "SATURDAY",
        "SUNDAY",
    ];
    if !WEEKDAYS.contains(&weekday.as_str()) {
        return Err(AttendError::InvalidRequest(format!(
            "Invalid weekday: {}",
            request.weekday
        )));
    }

    for time in [&request.starts, &request.ends] {
        if chrono::NaiveTime::parse_from_str(time, "%H:%M").is_err() {
            return Err(AttendError::InvalidRequest(format!(
                "Invalid time '{}', expected HH:MM",
                time
            )));
        }
    }

    let slot = courses::upsert_time_slot(
        &state.db,
        request.course_id,
        &weekday,
        request.slot_number,
        &request.starts,
        &request.ends,
        request
            .late_threshold_minutes
            .unwrap_or(state.session_config.default_late_threshold_minutes),
    )
    .await?;

    Ok(Json(slot))
}

/// DELETE /api/timetable/:id
pub async fn delete_slot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let deleted = courses::delete_time_slot(&state.db, id).await?;
    if !deleted {
        return Err(AttendError::NotFound {
            what: "TimeSlot",
            id,
        });
    }

    Ok(Json(json!({ "message": "Time slot deleted" })))
}
