use thiserror::Error;

/// Errors surfaced by the capture, training and detection pipeline.
///
/// None of these are retried anywhere: setup errors are fatal before any
/// interaction starts, a training error aborts its batch, and a detection
/// error halts the loop until the operator restarts it.
#[derive(Debug, Error)]
pub enum Error {
    /// A collaborator could not be brought up: the camera produced no
    /// frames, the model was missing or malformed, the cue could not be
    /// prepared.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A frame grab failed while a batch or the detection loop was running.
    #[error("frame capture failed: {0}")]
    Capture(String),

    /// The embedding model rejected its input or failed to run.
    #[error("embedding model failed: {0}")]
    Model(anyhow::Error),

    /// The classifier was asked something it cannot answer, e.g. a
    /// prediction before any examples were stored.
    #[error("classifier error: {0}")]
    Classifier(String),

    /// A training batch or the detection loop already holds the pipeline.
    #[error("another training batch or detection loop is running")]
    Busy,

    /// The configuration could not be read or failed validation.
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
