pub mod extractor;
pub mod matcher;
pub mod onnx;
pub mod quality;
pub mod stabilizer;

pub use extractor::{DetectedFace, Embedding, FaceBox, FeatureExtractor, Landmarks};
pub use matcher::{best_match, cosine_similarity, GalleryEntry, MatchCandidate};
pub use onnx::OnnxExtractor;
pub use quality::{FrameCandidate, QualityGates, ScoredTemplate, Selection};
pub use stabilizer::{Progress, Stabilizer};

use crate::config::{EnrollmentConfig, QualityConfig, RecognitionConfig};
use crate::error::Result;
use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::sync::Mutex;

/// Outcome of feeding one frame through the recognition pipeline. All of
/// these are expected states the caller reacts to; only extractor failure
/// surfaces as an error.
#[derive(Debug, Clone)]
pub enum FrameOutcome {
    NoFace,
    /// Single-subject recognition refuses frames with several faces.
    MultipleFaces(usize),
    NoMatch {
        best_similarity: f32,
    },
    /// Matched this frame but not yet confirmed across the window.
    Pending {
        student_id: i64,
        name: String,
        progress: Progress,
    },
    Confirmed {
        student_id: i64,
        name: String,
        similarity: f32,
    },
}

#[derive(Debug)]
pub struct EnrollmentReport {
    pub total_frames: usize,
    pub valid_frames: usize,
    pub outcome: Selection,
}

/// The recognition pipeline: extractor, gallery matcher, and multi-frame
/// stabilizer behind one explicitly constructed component. The window and
/// cooldown state are process-local; both locks serialize concurrent
/// recognition requests so K-of-N counts never see lost updates.
pub struct RecognitionEngine {
    extractor: Mutex<Box<dyn FeatureExtractor>>,
    stabilizer: Mutex<Stabilizer>,
    gates: QualityGates,
    recognition: RecognitionConfig,
    enrollment: EnrollmentConfig,
}

impl RecognitionEngine {
    pub fn new(
        extractor: Box<dyn FeatureExtractor>,
        recognition: RecognitionConfig,
        quality: QualityConfig,
        enrollment: EnrollmentConfig,
    ) -> Self {
        let stabilizer = Stabilizer::new(
            recognition.k_required_matches,
            recognition.n_frame_window,
            recognition.cooldown_seconds,
        );
        Self {
            extractor: Mutex::new(extractor),
            stabilizer: Mutex::new(stabilizer),
            gates: QualityGates::new(quality),
            recognition,
            enrollment,
        }
    }

    /// Run one camera frame against the gallery and fold the result into
    /// the rolling window.
    pub fn observe_frame(
        &self,
        frame: &DynamicImage,
        gallery: &[GalleryEntry],
        now: DateTime<Utc>,
    ) -> Result<FrameOutcome> {
        let faces = {
            let mut extractor = lock(&self.extractor);
            extractor.detect_and_embed(frame)?
        };

        let face = match faces.as_slice() {
            [] => return Ok(FrameOutcome::NoFace),
            [face] => face,
            many => return Ok(FrameOutcome::MultipleFaces(many.len())),
        };

        let candidate = best_match(
            &face.embedding,
            gallery,
            self.recognition.similarity_threshold,
        );

        let mut stabilizer = lock(&self.stabilizer);
        match candidate {
            None => {
                // Record the miss so lingering votes for earlier candidates
                // roll out of the window.
                stabilizer.update(None, 0.0, now);
                let best_similarity = gallery
                    .iter()
                    .flat_map(|entry| entry.embeddings.iter())
                    .map(|stored| cosine_similarity(&face.embedding, stored))
                    .fold(0.0f32, f32::max);
                Ok(FrameOutcome::NoMatch { best_similarity })
            }
            Some(candidate) => {
                stabilizer.update(Some(candidate.student_id), candidate.similarity, now);

                if let Some((student_id, similarity)) = stabilizer.confirmed(now) {
                    stabilizer.mark_confirmed(student_id, now);
                    let name = gallery
                        .iter()
                        .find(|entry| entry.student_id == student_id)
                        .map(|entry| entry.name.clone())
                        .unwrap_or_else(|| candidate.name.clone());
                    return Ok(FrameOutcome::Confirmed {
                        student_id,
                        name,
                        similarity,
                    });
                }

                let progress = stabilizer.progress(candidate.student_id);
                Ok(FrameOutcome::Pending {
                    student_id: candidate.student_id,
                    name: candidate.name,
                    progress,
                })
            }
        }
    }

    /// Screen an enrollment batch and pick the best templates. Frames with
    /// zero or several faces are discarded; the rest run the quality gates.
    pub fn select_enrollment(&self, frames: &[DynamicImage]) -> Result<EnrollmentReport> {
        let mut candidates = Vec::new();

        for frame in frames {
            let faces = {
                let mut extractor = lock(&self.extractor);
                extractor.detect_and_embed(frame)?
            };

            // Enrollment requires exactly one face per frame.
            let [face] = faces.as_slice() else { continue };

            let crop = quality::crop_face_luma(frame, &face.bbox, 0.2);
            let sharpness = quality::laplacian_variance(&crop);
            let pose = face
                .landmarks
                .as_ref()
                .map(quality::estimate_head_pose);

            if let Some(rejection) = self
                .gates
                .check(&face.bbox, sharpness, face.landmarks.as_ref())
            {
                tracing::debug!("enrollment frame rejected: {}", rejection);
                continue;
            }

            candidates.push(FrameCandidate {
                embedding: face.embedding.clone(),
                det_score: face.det_score,
                sharpness,
                pose,
            });
        }

        let valid_frames = candidates.len();
        Ok(EnrollmentReport {
            total_frames: frames.len(),
            valid_frames,
            outcome: quality::select_templates(candidates, &self.enrollment),
        })
    }

    pub fn progress(&self, student_id: i64) -> Progress {
        lock(&self.stabilizer).progress(student_id)
    }

    /// Drop the observation window at a session boundary. Cooldowns are a
    /// separate reset.
    pub fn clear_window(&self) {
        lock(&self.stabilizer).clear_window();
    }

    /// Forget cooldowns when a fresh class starts.
    pub fn reset_cooldowns(&self) {
        lock(&self.stabilizer).reset_cooldowns();
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.recognition.similarity_threshold
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
