use super::extractor::{Embedding, FaceBox, Landmarks};
use crate::config::{EnrollmentConfig, QualityConfig};
use image::{DynamicImage, GrayImage};

/// Approximate head pose angles, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    TooSmall { width: u32, height: u32, min: u32 },
    Blurry { score: f32, threshold: f32 },
    BadAngle { pose: HeadPose },
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::TooSmall { width, height, min } => {
                write!(f, "Face too small ({}x{} < {}px)", width, height, min)
            }
            GateRejection::Blurry { score, threshold } => {
                write!(f, "Image too blurry (score: {:.1} < {:.1})", score, threshold)
            }
            GateRejection::BadAngle { pose } => {
                write!(
                    f,
                    "Bad angle (yaw: {:.1}, pitch: {:.1}, roll: {:.1})",
                    pose.yaw, pose.pitch, pose.roll
                )
            }
        }
    }
}

/// Pre-enrollment screening: face size, sharpness, head pose.
#[derive(Debug, Clone)]
pub struct QualityGates {
    config: QualityConfig,
}

impl QualityGates {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Returns `None` when the frame passes every gate.
    pub fn check(
        &self,
        bbox: &FaceBox,
        sharpness: f32,
        landmarks: Option<&Landmarks>,
    ) -> Option<GateRejection> {
        let width = bbox.width() as u32;
        let height = bbox.height() as u32;
        if width < self.config.min_face_size || height < self.config.min_face_size {
            return Some(GateRejection::TooSmall {
                width,
                height,
                min: self.config.min_face_size,
            });
        }

        if sharpness < self.config.sharpness_threshold {
            return Some(GateRejection::Blurry {
                score: sharpness,
                threshold: self.config.sharpness_threshold,
            });
        }

        if let Some(landmarks) = landmarks {
            let pose = estimate_head_pose(landmarks);
            if pose.yaw.abs() > self.config.yaw_max_degrees
                || pose.pitch.abs() > self.config.pitch_max_degrees
                || pose.roll.abs() > self.config.roll_max_degrees
            {
                return Some(GateRejection::BadAngle { pose });
            }
        }

        None
    }
}

/// Approximate head pose from 5-point landmarks. Roll comes from the eye
/// line, yaw from the nose offset against the eye distance, pitch from the
/// eye-to-mouth distance against its expected frontal ratio.
pub fn estimate_head_pose(landmarks: &Landmarks) -> HeadPose {
    let left_eye = landmarks[0];
    let right_eye = landmarks[1];
    let nose = landmarks[2];
    let left_mouth = landmarks[3];
    let right_mouth = landmarks[4];

    let eye_center = midpoint(left_eye, right_eye);
    let mouth_center = midpoint(left_mouth, right_mouth);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let roll = eye_dy.atan2(eye_dx).to_degrees();

    let eye_distance = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();
    let nose_offset = nose.0 - eye_center.0;
    let yaw = nose_offset / (eye_distance + 1e-6) * 30.0;

    let eye_mouth_dist = distance(mouth_center, eye_center);
    let expected_dist = eye_distance * 1.1;
    let pitch = (eye_mouth_dist - expected_dist) / (expected_dist + 1e-6) * 20.0;

    HeadPose { yaw, pitch, roll }
}

fn midpoint(a: (f32, f32), b: (f32, f32)) -> (f32, f32) {
    ((a.0 + b.0) / 2.0, (a.1 + b.1) / 2.0)
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Crop the face region (with some margin) out of the frame as grayscale.
pub fn crop_face_luma(frame: &DynamicImage, bbox: &FaceBox, padding: f32) -> GrayImage {
    let pad_w = bbox.width() * padding;
    let pad_h = bbox.height() * padding;

    let x = (bbox.x1 - pad_w).max(0.0) as u32;
    let y = (bbox.y1 - pad_h).max(0.0) as u32;
    let x2 = ((bbox.x2 + pad_w) as u32).min(frame.width());
    let y2 = ((bbox.y2 + pad_h) as u32).min(frame.height());
    let width = x2.saturating_sub(x).max(1);
    let height = y2.saturating_sub(y).max(1);

    frame.crop_imm(x, y, width, height).to_luma8()
}

/// Sharpness as the variance of a 4-neighbor Laplacian over the crop.
/// Higher means sharper; typical in-focus faces score well above 100.
pub fn laplacian_variance(gray: &GrayImage) -> f32 {
    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width < 3 || height < 3 {
        return 0.0;
    }

    let pixels = gray.as_raw();
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let count = ((width - 2) * (height - 2)) as f64;

    for y in 1..height - 1 {
        let row = y * width;
        for x in 1..width - 1 {
            let center = pixels[row + x] as f64;
            let response = pixels[row + x - 1] as f64
                + pixels[row + x + 1] as f64
                + pixels[row - width + x] as f64
                + pixels[row + width + x] as f64
                - 4.0 * center;
            sum += response;
            sum_sq += response * response;
        }
    }

    let mean = sum / count;
    ((sum_sq / count) - mean * mean) as f32
}

/// One frame that survived detection, carrying everything the composite
/// score needs.
#[derive(Debug, Clone)]
pub struct FrameCandidate {
    pub embedding: Embedding,
    pub det_score: f32,
    pub sharpness: f32,
    pub pose: Option<HeadPose>,
}

#[derive(Debug, Clone)]
pub struct ScoredTemplate {
    pub embedding: Embedding,
    pub quality: f32,
}

/// Weighted blend of detection confidence, normalized sharpness, and pose
/// centrality. Frames without landmarks score the neutral pose component.
pub fn composite_score(candidate: &FrameCandidate) -> f32 {
    let sharpness_component = (candidate.sharpness / 200.0).min(1.0);
    let pose_component = match candidate.pose {
        Some(pose) => 1.0 - pose.yaw.abs() / 30.0,
        None => 0.5,
    };

    candidate.det_score * 0.5 + sharpness_component * 0.3 + pose_component * 0.2
}

/// Outcome of ranking an enrollment batch.
#[derive(Debug)]
pub enum Selection {
    /// The best `max_templates` frames, sorted by descending quality.
    Accepted(Vec<ScoredTemplate>),
    /// Too few frames passed the gates; the batch is rejected outright
    /// rather than silently accepted with a sparse gallery.
    TooFewFrames { valid: usize, required: usize },
}

pub fn select_templates(
    candidates: Vec<FrameCandidate>,
    enrollment: &EnrollmentConfig,
) -> Selection {
    if candidates.len() < enrollment.min_frames {
        return Selection::TooFewFrames {
            valid: candidates.len(),
            required: enrollment.min_frames,
        };
    }

    let mut scored: Vec<ScoredTemplate> = candidates
        .into_iter()
        .map(|candidate| ScoredTemplate {
            quality: composite_score(&candidate),
            embedding: candidate.embedding,
        })
        .collect();

    scored.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(enrollment.max_templates);

    Selection::Accepted(scored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn frontal_landmarks() -> Landmarks {
        [
            (40.0, 50.0),  // left eye
            (80.0, 50.0),  // right eye
            (60.0, 70.0),  // nose, centered
            (45.0, 94.0),  // left mouth
            (75.0, 94.0),  // right mouth
        ]
    }

    fn bbox(size: f32) -> FaceBox {
        FaceBox {
            x1: 0.0,
            y1: 0.0,
            x2: size,
            y2: size,
            confidence: 0.9,
        }
    }

    fn candidate(det: f32, sharpness: f32, yaw: f32) -> FrameCandidate {
        FrameCandidate {
            embedding: vec![0.0; 8],
            det_score: det,
            sharpness,
            pose: Some(HeadPose {
                yaw,
                pitch: 0.0,
                roll: 0.0,
            }),
        }
    }

    #[test]
    fn frontal_face_passes_all_gates() {
        let gates = QualityGates::new(QualityConfig::default());
        let landmarks = frontal_landmarks();
        assert_eq!(gates.check(&bbox(120.0), 150.0, Some(&landmarks)), None);
    }

    #[test]
    fn small_face_is_rejected_before_blur() {
        let gates = QualityGates::new(QualityConfig::default());
        match gates.check(&bbox(40.0), 10.0, None) {
            Some(GateRejection::TooSmall { min, .. }) => assert_eq!(min, 80),
            other => panic!("expected TooSmall, got {:?}", other),
        }
    }

    #[test]
    fn blurry_face_is_rejected() {
        let gates = QualityGates::new(QualityConfig::default());
        match gates.check(&bbox(120.0), 50.0, None) {
            Some(GateRejection::Blurry { threshold, .. }) => assert_eq!(threshold, 100.0),
            other => panic!("expected Blurry, got {:?}", other),
        }
    }

    #[test]
    fn turned_head_is_rejected() {
        let gates = QualityGates::new(QualityConfig::default());
        let mut landmarks = frontal_landmarks();
        // Push the nose far toward the right eye: strong yaw.
        landmarks[2].0 = 100.0;
        match gates.check(&bbox(120.0), 150.0, Some(&landmarks)) {
            Some(GateRejection::BadAngle { pose }) => assert!(pose.yaw.abs() > 25.0),
            other => panic!("expected BadAngle, got {:?}", other),
        }
    }

    #[test]
    fn frontal_pose_is_near_zero() {
        let pose = estimate_head_pose(&frontal_landmarks());
        assert!(pose.yaw.abs() < 5.0);
        assert!(pose.roll.abs() < 1.0);
    }

    #[test]
    fn tilted_eye_line_reads_as_roll() {
        let mut landmarks = frontal_landmarks();
        landmarks[1].1 = 90.0; // right eye far below the left
        let pose = estimate_head_pose(&landmarks);
        assert!(pose.roll > 30.0);
    }

    #[test]
    fn flat_image_has_zero_sharpness() {
        let gray = GrayImage::from_pixel(32, 32, Luma([128]));
        assert_eq!(laplacian_variance(&gray), 0.0);
    }

    #[test]
    fn checkerboard_is_sharper_than_gradient() {
        let checker = GrayImage::from_fn(32, 32, |x, y| {
            Luma([if (x + y) % 2 == 0 { 255 } else { 0 }])
        });
        let gradient = GrayImage::from_fn(32, 32, |x, _| Luma([(x * 8) as u8]));
        assert!(laplacian_variance(&checker) > laplacian_variance(&gradient));
    }

    #[test]
    fn selection_fails_below_minimum_batch() {
        let enrollment = EnrollmentConfig {
            min_frames: 5,
            max_templates: 15,
        };
        let candidates = vec![candidate(0.9, 150.0, 0.0); 4];
        match select_templates(candidates, &enrollment) {
            Selection::TooFewFrames { valid, required } => {
                assert_eq!(valid, 4);
                assert_eq!(required, 5);
            }
            Selection::Accepted(_) => panic!("4 frames must not enroll with min 5"),
        }
    }

    #[test]
    fn selection_keeps_best_frames_first() {
        let enrollment = EnrollmentConfig {
            min_frames: 2,
            max_templates: 2,
        };
        let candidates = vec![
            candidate(0.6, 100.0, 20.0),
            candidate(0.95, 190.0, 0.0),
            candidate(0.8, 150.0, 10.0),
        ];
        match select_templates(candidates, &enrollment) {
            Selection::Accepted(templates) => {
                assert_eq!(templates.len(), 2);
                assert!(templates[0].quality >= templates[1].quality);
                assert!((templates[0].quality - (0.95 * 0.5 + 0.95 * 0.3 + 1.0 * 0.2)).abs() < 1e-5);
            }
            Selection::TooFewFrames { .. } => panic!("3 frames must enroll with min 2"),
        }
    }

    #[test]
    fn missing_landmarks_score_the_neutral_pose_component() {
        let with_pose = candidate(0.8, 100.0, 0.0);
        let mut without_pose = candidate(0.8, 100.0, 0.0);
        without_pose.pose = None;
        assert!(composite_score(&with_pose) > composite_score(&without_pose));
    }
}
