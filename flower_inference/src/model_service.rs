use ndarray::ArrayView4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("{0}")]
    Other(String),
}

impl ModelError {
    pub fn runtime(err: impl std::fmt::Display) -> Self {
        ModelError::Runtime(err.to_string())
    }
}

/// Scores produced by one model run. Dropping the value releases whatever
/// buffers back it.
pub trait ModelOutput {
    fn scores(&self) -> &[f32];
}

impl ModelOutput for Vec<f32> {
    fn scores(&self) -> &[f32] {
        self
    }
}

/// A loaded classifier. Exclusively owned by one inference session.
pub trait ClassifierModel: Send + 'static {
    type Output: ModelOutput;

    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<Self::Output, ModelError>;
}

/// Turns serialized model bytes into a runnable classifier.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: ClassifierModel;

    fn load(&self, bytes: &[u8]) -> Result<Self::Model, ModelError>;
}
