use crate::{
    config::ModelConfig,
    model_service::{ClassifierModel, ModelError, ModelLoader},
};
use ndarray::ArrayView4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};

/// Builds ONNX Runtime sessions on the CPU execution provider.
#[derive(Debug, Clone)]
pub struct OrtLoader {
    intra_threads: usize,
}

impl OrtLoader {
    pub fn new(model_config: &ModelConfig) -> Self {
        Self {
            intra_threads: model_config.intra_threads.max(1),
        }
    }
}

impl ModelLoader for OrtLoader {
    type Model = OrtModel;

    fn load(&self, bytes: &[u8]) -> Result<OrtModel, ModelError> {
        let session = Session::builder()
            .map_err(ModelError::runtime)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ModelError::runtime)?
            .with_intra_threads(self.intra_threads)
            .map_err(ModelError::runtime)?
            .commit_from_memory(bytes)
            .map_err(ModelError::runtime)?;

        tracing::info!(
            intra_threads = self.intra_threads,
            "Created ONNX session from {} bytes",
            bytes.len()
        );

        Ok(OrtModel { session })
    }
}

pub struct OrtModel {
    session: Session,
}

impl ClassifierModel for OrtModel {
    type Output = Vec<f32>;

    fn run(&mut self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, ModelError> {
        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ModelError::Runtime(format!("failed to build tensor: {}", e)))?;

        // Session outputs hold native buffers; copy the scores out so they are
        // released when `outputs` goes out of scope.
        let outputs = self
            .session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Runtime(format!("inference failed: {}", e)))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Runtime(format!("failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}
