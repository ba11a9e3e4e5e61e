pub mod api;
pub mod attendance;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod export;
pub mod scheduler;

pub use api::{build_router, AppState};
pub use config::Config;
pub use engine::{
    best_match, cosine_similarity, Embedding, FeatureExtractor, GalleryEntry, RecognitionEngine,
    Stabilizer,
};
pub use error::{AttendError, Result};
