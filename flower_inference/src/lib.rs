mod error;
mod loader;
mod model_service;
mod ort_service;
mod session;
mod worker;

pub mod classes;
pub mod config;
pub mod stdio;

pub use classes::{ClassTable, FLOWER_CLASSES};
pub use error::{LoadError, PredictionError, WorkerError};
pub use loader::fetch_asset;
pub use model_service::{ClassifierModel, ModelError, ModelLoader, ModelOutput};
pub use ort_service::{OrtLoader, OrtModel};
pub use session::{InferenceSession, InputSpec, ModelHandle, OutputActivation, TensorLayout};
pub use worker::{Worker, WorkerHandle, WorkerThread};
