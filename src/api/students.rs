use super::recognize::decode_frame;
use super::AppState;
use crate::db::students::{self, NewStudent, Student};
use crate::engine::Selection;
use crate::error::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// GET /api/students
pub async fn list_students(State(state): State<AppState>) -> Result<Json<Vec<Student>>> {
    Ok(Json(students::list_students(&state.db).await?))
}

/// GET /api/students/:id
pub async fn get_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let student = students::get_student(&state.db, id).await?;
    let templates = students::embedding_count(&state.db, id).await?;

    Ok(Json(json!({
        "student": student,
        "templates": templates,
    })))
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub name: String,
    pub student_code: String,
    pub department: Option<String>,
    pub email: Option<String>,
}

/// POST /api/students
pub async fn create_student(
    State(state): State<AppState>,
    Json(request): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>)> {
    let student = students::create_student(
        &state.db,
        &NewStudent {
            name: request.name,
            student_code: request.student_code,
            department: request.department,
            email: request.email,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(student)))
}

/// DELETE /api/students/:id
pub async fn delete_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>> {
    let deleted = students::delete_student(&state.db, id).await?;
    if !deleted {
        return Err(crate::error::AttendError::NotFound {
            what: "Student",
            id,
        });
    }

    Ok(Json(json!({ "message": "Student deleted" })))
}

#[derive(Debug, Deserialize)]
pub struct EnrollFacesRequest {
    /// Base64-encoded frames from the capture UI, data-URI tolerant.
    pub frames: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrollFacesResponse {
    pub success: bool,
    pub total_frames: usize,
    pub valid_frames: usize,
    pub stored_templates: usize,
    pub message: String,
}

/// POST /api/students/:id/enrollment
///
/// Multi-frame biometric enrollment: screen the batch, keep the best
/// templates, replace whatever was stored before. A batch with too few
/// usable frames is rejected whole; a sparse gallery would quietly degrade
/// recognition for this student from then on.
pub async fn enroll_faces(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<EnrollFacesRequest>,
) -> Result<Json<EnrollFacesResponse>> {
    let student = students::get_student(&state.db, id).await?;

    let mut frames = Vec::with_capacity(request.frames.len());
    for encoded in &request.frames {
        // Undecodable frames are dropped, matching the capture UI's habit
        // of occasionally sending a truncated first frame.
        if let Ok(frame) = decode_frame(encoded) {
            frames.push(frame);
        }
    }

    if frames.is_empty() {
        return Ok(Json(EnrollFacesResponse {
            success: false,
            total_frames: request.frames.len(),
            valid_frames: 0,
            stored_templates: 0,
            message: "No valid frames could be decoded".to_string(),
        }));
    }

    let engine = state.engine.clone();
    let report = tokio::task::block_in_place(|| engine.select_enrollment(&frames))?;

    match report.outcome {
        Selection::TooFewFrames { valid, required } => Ok(Json(EnrollFacesResponse {
            success: false,
            total_frames: report.total_frames,
            valid_frames: report.valid_frames,
            stored_templates: 0,
            message: format!(
                "Not enough quality frames ({} < {} minimum)",
                valid, required
            ),
        })),
        Selection::Accepted(templates) => {
            let stored = students::replace_embeddings(&state.db, student.id, &templates).await?;
            tracing::info!(
                student_id = student.id,
                templates = stored,
                "enrollment templates stored"
            );

            Ok(Json(EnrollFacesResponse {
                success: true,
                total_frames: report.total_frames,
                valid_frames: report.valid_frames,
                stored_templates: stored,
                message: format!("Enrolled {} templates", stored),
            }))
        }
    }
}
