use crate::error::Result;
use image::DynamicImage;

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

/// Five-point facial landmarks: left eye, right eye, nose, left mouth
/// corner, right mouth corner, in image coordinates.
pub type Landmarks = [(f32, f32); 5];

/// One detected face with its extracted template.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: FaceBox,
    pub landmarks: Option<Landmarks>,
    pub det_score: f32,
    pub embedding: Embedding,
}

/// Detection plus embedding extraction over a single frame.
///
/// An empty result means no face was found; more than one entry means the
/// frame contains multiple faces. Both are expected outcomes for callers,
/// not errors. An `Err` means the extractor itself failed and recognition
/// cannot proceed.
pub trait FeatureExtractor: Send {
    fn detect_and_embed(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedFace>>;
}
