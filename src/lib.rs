use serde::{Deserialize, Serialize};
use std::path::Path;

mod error;
pub use error::Error;

mod busy;
pub use busy::{Busy, BusyGuard};

mod camera;
pub use camera::{Camera, FrameSource};

mod embedder;
pub use embedder::{Embedder, Embedding, OnnxEmbedder, EMBEDDING_DIM};

mod knn;
pub use knn::{Classifier, Knn, Prediction, DEFAULT_NEIGHBORS};

mod gate;
pub use gate::{CueGate, Fire, GateState};

mod cue;
pub use cue::{Cue, PlayRequest};

mod trainer;
pub use trainer::Trainer;

mod detector;
pub use detector::{Detector, Verdict};

/// A single camera frame as tightly packed RGB24 bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: u64,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

/// A class name taught to the classifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub String);

impl Label {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Input passed to ffmpeg's `-i`, e.g. `/dev/video0`.
    pub input: String,
    /// Demuxer passed to ffmpeg's `-f`; `lavfi` allows synthetic sources.
    #[serde(default = "default_camera_format")]
    pub format: String,
    #[serde(default = "default_camera_dim")]
    pub width: usize,
    #[serde(default = "default_camera_dim")]
    pub height: usize,
    #[serde(default = "default_camera_fps")]
    pub fps: usize,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Captures per training batch.
    #[serde(default = "default_training_reps")]
    pub reps: usize,
    /// Pause between consecutive captures.
    #[serde(default = "default_training_pace_ms")]
    pub pace_ms: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            reps: default_training_reps(),
            pace_ms: default_training_pace_ms(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// The label that raises the alarm when detected.
    pub active_label: Label,
    /// Minimum confidence for the active label, inclusive.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Pause between loop iterations.
    #[serde(default = "default_detection_pace_ms")]
    pub pace_ms: u64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct CueConfig {
    /// WAV played when the alarm fires. A missing file falls back to a
    /// generated tone.
    #[serde(default)]
    pub path: Option<String>,
    /// External player binary, e.g. `aplay` or `afplay`.
    #[serde(default = "default_cue_player")]
    pub player: String,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            path: None,
            player: default_cue_player(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub labels: Vec<Label>,
    pub camera: CameraConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    pub detection: DetectionConfig,
    #[serde(default)]
    pub cue: CueConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("reading {}: {}", path.as_ref().display(), e)))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("parsing {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.labels.is_empty() {
            return Err(Error::Config("at least one label is required".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for label in &self.labels {
            if !seen.insert(label) {
                return Err(Error::Config(format!(
                    "duplicate label {:?}",
                    label.as_str()
                )));
            }
        }
        if !self.labels.contains(&self.detection.active_label) {
            return Err(Error::Config(format!(
                "active_label {:?} is not in the label list",
                self.detection.active_label.as_str()
            )));
        }
        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(Error::Config(format!(
                "threshold {} must be within 0..=1",
                self.detection.threshold
            )));
        }
        if self.training.reps == 0 {
            return Err(Error::Config("training reps must be at least 1".into()));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(Error::Config("camera dimensions must be non-zero".into()));
        }
        Ok(())
    }
}

fn default_camera_format() -> String {
    "v4l2".into()
}

fn default_camera_dim() -> usize {
    224
}

fn default_camera_fps() -> usize {
    10
}

fn default_training_reps() -> usize {
    50
}

fn default_training_pace_ms() -> u64 {
    100
}

fn default_threshold() -> f32 {
    0.6
}

fn default_detection_pace_ms() -> u64 {
    500
}

fn default_cue_player() -> String {
    "aplay".into()
}
