use super::extractor::{DetectedFace, Embedding, FaceBox, FeatureExtractor};
use crate::config::ModelConfig;
use crate::error::{AttendError, Result};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::sync::Arc;

/// ONNX-Runtime-backed extractor: one detection session and one embedding
/// session. The detector model in use emits boxes without landmarks, so
/// `DetectedFace::landmarks` is `None` and pose gates score neutrally.
pub struct OnnxExtractor {
    detector: Session,
    embedder: Session,
    _environment: Arc<Environment>,
    config: ModelConfig,
}

impl OnnxExtractor {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let environment = Arc::new(
            Environment::builder()
                .with_name("faceattend")
                .build()
                .map_err(|e| AttendError::Model(format!("Failed to create environment: {}", e)))?,
        );

        let detector = Self::build_session(&environment, config, &config.detector_path)?;
        let embedder = Self::build_session(&environment, config, &config.embedder_path)?;

        Ok(Self {
            detector,
            embedder,
            _environment: environment,
            config: config.clone(),
        })
    }

    fn build_session(
        environment: &Arc<Environment>,
        config: &ModelConfig,
        model_path: &std::path::Path,
    ) -> Result<Session> {
        if !model_path.exists() {
            return Err(AttendError::Model(format!(
                "Model not found at: {:?}",
                model_path
            )));
        }

        let opt_level = match config.optimization_level {
            0 => GraphOptimizationLevel::Disable,
            1 => GraphOptimizationLevel::Level1,
            2 => GraphOptimizationLevel::Level2,
            _ => GraphOptimizationLevel::Level3,
        };

        let session = SessionBuilder::new(environment)?
            .with_optimization_level(opt_level)?
            .with_model_from_file(model_path)?;

        Ok(session)
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;

        let input_width = self.config.detector_input_width;
        let input_height = self.config.detector_input_height;

        let resized = if image.width() == input_width && image.height() == input_height {
            image.clone()
        } else {
            image.resize_exact(input_width, input_height, FilterType::Nearest)
        };

        let img_array = self.detector_input(&resized);
        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.detector.allocator(), &cow_array)?;
        let outputs = self.detector.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        // Scale coordinates back to original image dimensions.
        let scale_x = orig_width / input_width as f32;
        let scale_y = orig_height / input_height as f32;
        for face in &mut faces {
            face.x1 *= scale_x;
            face.x2 *= scale_x;
            face.y1 *= scale_y;
            face.y2 *= scale_y;
        }

        Ok(faces)
    }

    fn detector_input(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let pixels = gray.as_raw();

        let mut array = Array4::<f32>::zeros((1, 3, height, width));
        let norm_factor = 1.0 / 255.0;

        for y in 0..height {
            let row_offset = y * width;
            for x in 0..width {
                let pixel_value = pixels[row_offset + x] as f32 * norm_factor;
                array[[0, 0, y, x]] = pixel_value;
                array[[0, 1, y, x]] = pixel_value;
                array[[0, 2, y, x]] = pixel_value;
            }
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<FaceBox>> {
        let mut faces = Vec::new();
        let Some(output) = outputs.first() else {
            return Ok(faces);
        };

        let output = output.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let Some(output_array) = output.as_slice() else {
            return Ok(faces);
        };

        // Center-format output, either [1, preds, 5] or transposed [1, 5, preds].
        let (num_predictions, prediction_length, is_transposed) = if shape.len() >= 3 {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        } else if shape.len() == 2 {
            (shape[0], shape[1], false)
        } else {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Ok(faces);
        };

        let input_width = self.config.detector_input_width as f32;
        let input_height = self.config.detector_input_height as f32;

        for i in 0..num_predictions {
            let (x_center_raw, y_center_raw, width_raw, height_raw, confidence) = if is_transposed {
                let stride = num_predictions;
                (
                    output_array[i],
                    output_array[stride + i],
                    output_array[2 * stride + i],
                    output_array[3 * stride + i],
                    if prediction_length > 4 {
                        output_array[4 * stride + i]
                    } else {
                        0.0
                    },
                )
            } else {
                let base_idx = i * prediction_length;
                (
                    output_array[base_idx],
                    output_array[base_idx + 1],
                    output_array[base_idx + 2],
                    output_array[base_idx + 3],
                    if prediction_length > 4 {
                        output_array[base_idx + 4]
                    } else {
                        0.0
                    },
                )
            };

            // Some exports emit normalized coordinates, others pixel space.
            let scale_factor = if x_center_raw > 1.0
                || y_center_raw > 1.0
                || width_raw > 1.0
                || height_raw > 1.0
            {
                1.0
            } else {
                input_width
            };

            let x_center = x_center_raw * scale_factor;
            let y_center = y_center_raw * scale_factor;
            let width = width_raw * scale_factor;
            let height = height_raw * scale_factor;

            if confidence > 0.001 {
                let x1 = (x_center - width / 2.0).max(0.0);
                let y1 = (y_center - height / 2.0).max(0.0);
                let x2 = (x_center + width / 2.0).min(input_width);
                let y2 = (y_center + height / 2.0).min(input_height);

                if x2 > x1 && y2 > y1 && (x2 - x1) > 10.0 && (y2 - y1) > 10.0 {
                    faces.push(FaceBox {
                        x1,
                        y1,
                        x2,
                        y2,
                        confidence,
                    });
                }
            }
        }

        // NMS on everything first, then the real confidence cut, so near
        // duplicates cannot survive by straddling the threshold.
        faces = apply_nms(faces, 0.45);
        faces.retain(|face| face.confidence >= self.config.detection_confidence);
        faces.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        faces.truncate(5);

        Ok(faces)
    }

    fn embed(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let x = face.x1.max(0.0) as u32;
        let y = face.y1.max(0.0) as u32;
        let width = face.width().max(1.0) as u32;
        let height = face.height().max(1.0) as u32;
        let face_img = image.crop_imm(x, y, width, height);

        let size = self.config.embedder_input_size;
        let resized = face_img.resize_exact(size, size, FilterType::Triangle);
        let input_array = self.embedder_input(&resized);

        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.embedder.allocator(), &cow_array)?;
        let outputs = self.embedder.run(vec![input_tensor])?;

        let mut embedding = outputs[0]
            .try_extract::<f32>()?
            .view()
            .to_owned()
            .into_raw_vec();
        normalize(&mut embedding);
        Ok(embedding)
    }

    fn embedder_input(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let size = self.config.embedder_input_size as usize;
        let norm_val = self.config.embedder_normalization;
        let mut array = Array4::<f32>::zeros((1, 1, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = gray.get_pixel(x as u32, y as u32);
                array[[0, 0, y, x]] = (pixel[0] as f32 - norm_val) / norm_val;
            }
        }

        array
    }
}

impl FeatureExtractor for OnnxExtractor {
    fn detect_and_embed(&mut self, frame: &DynamicImage) -> Result<Vec<DetectedFace>> {
        let boxes = self.detect(frame)?;
        let mut faces = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let embedding = self.embed(frame, &bbox)?;
            faces.push(DetectedFace {
                det_score: bbox.confidence,
                landmarks: None,
                bbox,
                embedding,
            });
        }

        Ok(faces)
    }
}

fn normalize(embedding: &mut [f32]) {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in embedding.iter_mut() {
            *value /= norm;
        }
    }
}

fn apply_nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    if boxes.is_empty() {
        return boxes;
    }

    boxes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let mut keep = Vec::new();
    let mut indices: Vec<usize> = (0..boxes.len()).collect();

    while !indices.is_empty() {
        let i = indices[0];
        keep.push(boxes[i].clone());

        indices = indices[1..]
            .iter()
            .filter(|&&j| iou(&boxes[i], &boxes[j]) < iou_threshold)
            .copied()
            .collect();
    }

    keep
}

fn iou(box1: &FaceBox, box2: &FaceBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = box1.width() * box1.height();
    let area2 = box2.width() * box2.height();
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
