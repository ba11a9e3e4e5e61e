use crate::error::{AttendError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub models: ModelConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5760
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    pub detector_path: PathBuf,
    pub embedder_path: PathBuf,
    #[serde(default = "default_detector_input")]
    pub detector_input_width: u32,
    #[serde(default = "default_detector_input")]
    pub detector_input_height: u32,
    #[serde(default = "default_embedder_input")]
    pub embedder_input_size: u32,
    #[serde(default = "default_normalization")]
    pub embedder_normalization: f32,
    #[serde(default = "default_detection_confidence")]
    pub detection_confidence: f32,
    #[serde(default = "default_optimization_level")]
    pub optimization_level: u32,
}

fn default_detector_input() -> u32 {
    640
}
fn default_embedder_input() -> u32 {
    112
}
fn default_normalization() -> f32 {
    127.5
}
fn default_detection_confidence() -> f32 {
    0.7
}
fn default_optimization_level() -> u32 {
    3
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecognitionConfig {
    /// Minimum cosine similarity for a gallery match.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Matching observations required within the window before confirming.
    #[serde(default = "default_k_required")]
    pub k_required_matches: u32,
    /// Rolling observation window size.
    #[serde(default = "default_n_window")]
    pub n_frame_window: u32,
    /// Suppression period after a confirmation, per student.
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u32,
}

fn default_similarity_threshold() -> f32 {
    0.35
}
fn default_k_required() -> u32 {
    5
}
fn default_n_window() -> u32 {
    10
}
fn default_cooldown() -> u32 {
    120
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            k_required_matches: default_k_required(),
            n_frame_window: default_n_window(),
            cooldown_seconds: default_cooldown(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityConfig {
    /// Minimum face crop width/height in pixels.
    #[serde(default = "default_min_face_size")]
    pub min_face_size: u32,
    /// Laplacian variance below this rejects the frame as blurry.
    #[serde(default = "default_sharpness_threshold")]
    pub sharpness_threshold: f32,
    #[serde(default = "default_yaw_max")]
    pub yaw_max_degrees: f32,
    #[serde(default = "default_pitch_max")]
    pub pitch_max_degrees: f32,
    #[serde(default = "default_roll_max")]
    pub roll_max_degrees: f32,
}

fn default_min_face_size() -> u32 {
    80
}
fn default_sharpness_threshold() -> f32 {
    100.0
}
fn default_yaw_max() -> f32 {
    25.0
}
fn default_pitch_max() -> f32 {
    20.0
}
fn default_roll_max() -> f32 {
    30.0
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_face_size: default_min_face_size(),
            sharpness_threshold: default_sharpness_threshold(),
            yaw_max_degrees: default_yaw_max(),
            pitch_max_degrees: default_pitch_max(),
            roll_max_degrees: default_roll_max(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnrollmentConfig {
    /// Batch fails outright when fewer frames pass the quality gates.
    #[serde(default = "default_min_frames")]
    pub min_frames: usize,
    /// At most this many templates are stored per student.
    #[serde(default = "default_max_templates")]
    pub max_templates: usize,
}

fn default_min_frames() -> usize {
    5
}
fn default_max_templates() -> usize {
    15
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            min_frames: default_min_frames(),
            max_templates: default_max_templates(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Period of the background sweep.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Window after a slot's start during which the sweep auto-creates its session.
    #[serde(default = "default_creation_window")]
    pub creation_window_seconds: i64,
    #[serde(default = "default_late_threshold")]
    pub default_late_threshold_minutes: i64,
    /// Extra delay past the late threshold before absentees are marked.
    #[serde(default = "default_absentee_buffer")]
    pub absentee_buffer_minutes: i64,
}

fn default_sweep_interval() -> u64 {
    60
}
fn default_creation_window() -> i64 {
    120
}
fn default_late_threshold() -> i64 {
    5
}
fn default_absentee_buffer() -> i64 {
    5
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            creation_window_seconds: default_creation_window(),
            default_late_threshold_minutes: default_late_threshold(),
            absentee_buffer_minutes: default_absentee_buffer(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = directories::ProjectDirs::from("com", "faceattend", "FaceAttend")
            .ok_or_else(|| AttendError::Config("Failed to resolve project directories".into()))?;
        Ok(dirs.data_dir().join("faceattend.db"))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "configs/faceattend.toml";
        Self::load_from_path(std::path::Path::new(config_path))
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Err(AttendError::Config(format!(
                "Config file not found: {}. Please create it from the example.",
                path.display()
            )));
        }

        tracing::info!("Loading config from: {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| AttendError::Config(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recognition.similarity_threshold < 0.0 || self.recognition.similarity_threshold > 1.0
        {
            return Err(AttendError::Config(format!(
                "Similarity threshold must be between 0.0 and 1.0, got {}",
                self.recognition.similarity_threshold
            )));
        }
        if self.models.detection_confidence < 0.0 || self.models.detection_confidence > 1.0 {
            return Err(AttendError::Config(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.models.detection_confidence
            )));
        }
        if self.recognition.k_required_matches == 0 {
            return Err(AttendError::Config(
                "k_required_matches must be at least 1".into(),
            ));
        }
        if self.recognition.k_required_matches > self.recognition.n_frame_window {
            return Err(AttendError::Config(format!(
                "k_required_matches ({}) must not exceed n_frame_window ({})",
                self.recognition.k_required_matches, self.recognition.n_frame_window
            )));
        }
        if self.enrollment.min_frames == 0 {
            return Err(AttendError::Config("min_frames must be at least 1".into()));
        }
        if self.enrollment.min_frames > self.enrollment.max_templates {
            return Err(AttendError::Config(format!(
                "min_frames ({}) must not exceed max_templates ({})",
                self.enrollment.min_frames, self.enrollment.max_templates
            )));
        }
        if self.models.detector_input_width == 0 || self.models.detector_input_width > 4096 {
            return Err(AttendError::Config(format!(
                "Detector input width must be between 1 and 4096, got {}",
                self.models.detector_input_width
            )));
        }
        if self.models.detector_input_height == 0 || self.models.detector_input_height > 4096 {
            return Err(AttendError::Config(format!(
                "Detector input height must be between 1 and 4096, got {}",
                self.models.detector_input_height
            )));
        }
        if self.models.embedder_input_size == 0 || self.models.embedder_input_size > 1024 {
            return Err(AttendError::Config(format!(
                "Embedder input size must be between 1 and 1024, got {}",
                self.models.embedder_input_size
            )));
        }
        if self.session.default_late_threshold_minutes < 0 {
            return Err(AttendError::Config(
                "default_late_threshold_minutes must not be negative".into(),
            ));
        }
        if self.session.absentee_buffer_minutes < 0 {
            return Err(AttendError::Config(
                "absentee_buffer_minutes must not be negative".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig::default(),
            models: ModelConfig {
                detector_path: PathBuf::from("models/detector.onnx"),
                embedder_path: PathBuf::from("models/embedder.onnx"),
                detector_input_width: default_detector_input(),
                detector_input_height: default_detector_input(),
                embedder_input_size: default_embedder_input(),
                embedder_normalization: default_normalization(),
                detection_confidence: default_detection_confidence(),
                optimization_level: default_optimization_level(),
            },
            recognition: RecognitionConfig::default(),
            quality: QualityConfig::default(),
            enrollment: EnrollmentConfig::default(),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_k_greater_than_n() {
        let mut config = base_config();
        config.recognition.k_required_matches = 11;
        config.recognition.n_frame_window = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = base_config();
        config.recognition.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_str = r#"
            [models]
            detector_path = "models/detector.onnx"
            embedder_path = "models/embedder.onnx"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.recognition.k_required_matches, 5);
        assert_eq!(config.recognition.n_frame_window, 10);
        assert_eq!(config.recognition.cooldown_seconds, 120);
        assert_eq!(config.session.sweep_interval_seconds, 60);
        assert!(config.validate().is_ok());
    }
}
