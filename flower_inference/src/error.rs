use crate::model_service::ModelError;
use flower_proto::{ErrorKind, FrameError};
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to fetch model asset {path:?}: {source}")]
    Fetch { path: PathBuf, source: io::Error },
    #[error("failed to parse model: {0}")]
    Parse(ModelError),
    #[error("warm-up inference failed: {0}")]
    WarmUp(ModelError),
    #[error("model produces {actual} scores but the class table has {expected} labels")]
    ClassTableMismatch { expected: usize, actual: usize },
    #[error("model loading was interrupted: {0}")]
    Interrupted(String),
}

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("model is not loaded yet")]
    NotReady,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("model execution failed: {0}")]
    Execution(#[from] ModelError),
    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

impl From<FrameError> for PredictionError {
    fn from(err: FrameError) -> Self {
        PredictionError::InvalidFrame(err.to_string())
    }
}

impl PredictionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PredictionError::NotReady => ErrorKind::NotReady,
            _ => ErrorKind::Prediction,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("model load failed: {0}")]
    Load(#[from] LoadError),
    #[error("controller channel closed")]
    ChannelClosed,
    #[error("failed to start worker runtime: {0}")]
    Runtime(io::Error),
    #[error("worker thread panicked")]
    Panicked,
}
