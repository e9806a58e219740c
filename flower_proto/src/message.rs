use crate::{Frame, Prediction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The model asset could not be fetched, parsed or warmed up. Fatal for the worker.
    Load,
    /// A prediction arrived before the model was ready.
    NotReady,
    /// The model failed on a specific frame.
    Prediction,
}

/// Worker to controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Progress {
        frac: f32,
    },
    Ready,
    Result {
        id: u64,
        data: String,
        predictions: Vec<Prediction>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        kind: ErrorKind,
        message: String,
    },
}

/// Controller to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    Predict {
        id: u64,
        #[serde(rename = "imageData")]
        image_data: Frame,
    },
}
