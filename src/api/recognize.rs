use super::AppState;
use crate::attendance::{self as resolver, AttendanceOutcome};
use crate::db::attendance::AttendanceStatus;
use crate::db::{sessions, students};
use crate::engine::{FrameOutcome, Progress};
use crate::error::{AttendError, Result};
use axum::extract::State;
use axum::Json;
use base64::Engine as _;
use chrono::Utc;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RecognizeRequest {
    /// Base64-encoded image, with or without a data-URI prefix.
    pub frame: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressBody {
    pub matched: u32,
    pub required: u32,
    pub window: u32,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub recognized: bool,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressBody>,
    pub alert: bool,
    pub message: String,
}

impl RecognizeResponse {
    fn miss(message: impl Into<String>) -> Self {
        Self {
            recognized: false,
            confirmed: false,
            student_id: None,
            name: None,
            similarity: None,
            status: None,
            progress: None,
            alert: false,
            message: message.into(),
        }
    }
}

impl From<Progress> for ProgressBody {
    fn from(progress: Progress) -> Self {
        Self {
            matched: progress.matched,
            required: progress.required,
            window: progress.window,
        }
    }
}

/// POST /api/recognize
///
/// One frame in, one structured outcome out. Recognition without an active
/// session is a no-op outcome, not an error; the client simply re-polls
/// with the next frame.
pub async fn recognize_frame(
    State(state): State<AppState>,
    Json(request): Json<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>> {
    let frame = decode_frame(&request.frame)?;

    let Some(session) = sessions::find_active(&state.db).await? else {
        return Ok(Json(RecognizeResponse::miss("No active session")));
    };

    // The full gallery, not just this course's: an enrolled-elsewhere face
    // must still be identifiable so the resolver can flag it as an intruder.
    let gallery = students::load_gallery(&state.db, None).await?;
    if gallery.is_empty() {
        return Ok(Json(RecognizeResponse::miss("No enrolled students")));
    }

    let now = Utc::now();
    let engine = state.engine.clone();
    let outcome = tokio::task::block_in_place(|| engine.observe_frame(&frame, &gallery, now))?;

    let response = match outcome {
        FrameOutcome::NoFace => RecognizeResponse::miss("No face detected"),
        FrameOutcome::MultipleFaces(count) => {
            RecognizeResponse::miss(format!("Multiple faces detected ({})", count))
        }
        FrameOutcome::NoMatch { best_similarity } => RecognizeResponse {
            similarity: Some(best_similarity),
            ..RecognizeResponse::miss("No match")
        },
        FrameOutcome::Pending {
            student_id,
            name,
            progress,
        } => RecognizeResponse {
            recognized: true,
            student_id: Some(student_id),
            name: Some(name),
            message: format!("Verifying... {}/{}", progress.matched, progress.required),
            progress: Some(progress.into()),
            ..RecognizeResponse::miss("")
        },
        FrameOutcome::Confirmed {
            student_id,
            name,
            similarity,
        } => {
            let outcome =
                resolver::record_confirmed(&state.db, &session, student_id, similarity, now)
                    .await?;
            let record = outcome.record();
            let (alert, message) = match &outcome {
                AttendanceOutcome::CheckedIn { .. } => (false, "Attendance recorded".to_string()),
                AttendanceOutcome::ReEntry { .. } => {
                    (false, "Re-entry logged for already-marked student".to_string())
                }
                AttendanceOutcome::Intruder { .. } => {
                    (true, "Unenrolled individual detected".to_string())
                }
            };

            RecognizeResponse {
                recognized: true,
                confirmed: true,
                student_id: Some(student_id),
                name: Some(name),
                similarity: Some(similarity),
                status: Some(record.status),
                progress: None,
                alert,
                message,
            }
        }
    };

    Ok(Json(response))
}

pub(crate) fn decode_frame(encoded: &str) -> Result<DynamicImage> {
    let payload = match encoded.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| AttendError::InvalidRequest(format!("Invalid base64 frame: {}", e)))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| AttendError::InvalidRequest(format!("Invalid image: {}", e)))?;

    Ok(image)
}
