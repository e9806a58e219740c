//! Messages exchanged between the capture controller and the inference worker.
mod frame;
mod message;
mod prediction;

pub use frame::{Frame, FrameError, CHANNELS};
pub use message::{ControllerMessage, ErrorKind, WorkerMessage};
pub use prediction::{Prediction, PredictionResult, TOP_K};
