use crate::{
    classes::ClassTable,
    error::{LoadError, PredictionError},
    model_service::{ClassifierModel, ModelLoader, ModelOutput},
};
use flower_proto::{Frame, Prediction, PredictionResult, TOP_K};
use ndarray::Array4;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Memory order of the input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, height, width, 3]`
    #[default]
    Nhwc,
    /// `[1, 3, height, width]`
    Nchw,
}

/// How raw model scores become confidences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// The model already ends in a softmax.
    #[default]
    Probabilities,
    /// The model emits logits.
    Softmax,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSpec {
    pub size: u32,
    pub layout: TensorLayout,
    pub scale: f32,
}

impl InputSpec {
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let size = self.size as usize;
        match self.layout {
            TensorLayout::Nhwc => (1, size, size, 3),
            TensorLayout::Nchw => (1, 3, size, size),
        }
    }

    pub fn zeros(&self) -> Array4<f32> {
        Array4::zeros(self.shape())
    }

    /// Adds the batch dimension and casts samples to `f32`.
    pub fn tensor_from_frame(&self, frame: &Frame) -> Result<Array4<f32>, PredictionError> {
        if frame.width() != self.size || frame.height() != self.size {
            return Err(PredictionError::InvalidFrame(format!(
                "expected {0}x{0}, got {1}x{2}",
                self.size,
                frame.width(),
                frame.height()
            )));
        }

        let scale = self.scale;
        let tensor = match self.layout {
            TensorLayout::Nhwc => Array4::from_shape_fn(self.shape(), |(_, y, x, c)| {
                frame.pixel(x as u32, y as u32)[c] as f32 * scale
            }),
            TensorLayout::Nchw => Array4::from_shape_fn(self.shape(), |(_, c, y, x)| {
                frame.pixel(x as u32, y as u32)[c] as f32 * scale
            }),
        };
        Ok(tensor)
    }
}

/// A parsed and warmed-up model.
pub struct ModelHandle<M: ClassifierModel> {
    model: M,
}

impl<M: ClassifierModel> ModelHandle<M> {
    /// Parses `bytes` and runs one throwaway inference on an all-zero input of
    /// the real input shape, so one-time initialisation happens before the
    /// first user request.
    pub fn load<L>(
        loader: &L,
        bytes: &[u8],
        input: &InputSpec,
        classes: &ClassTable,
    ) -> Result<Self, LoadError>
    where
        L: ModelLoader<Model = M>,
    {
        let clock = std::time::Instant::now();
        let model = loader.load(bytes).map_err(LoadError::Parse)?;
        tracing::info!("Parsed model in {:?}", clock.elapsed());

        let mut handle = Self { model };
        handle.warm_up(input, classes)?;
        Ok(handle)
    }

    fn warm_up(&mut self, input: &InputSpec, classes: &ClassTable) -> Result<(), LoadError> {
        let clock = std::time::Instant::now();
        let zeros = input.zeros();
        let output = self.model.run(zeros.view()).map_err(LoadError::WarmUp)?;

        let actual = output.scores().len();
        if actual != classes.len() {
            return Err(LoadError::ClassTableMismatch {
                expected: classes.len(),
                actual,
            });
        }
        tracing::info!("Warm-up inference took {:?}", clock.elapsed());
        Ok(())
    }
}

/// Owns the model for one worker. Predictions go through `&mut self`, so at
/// most one runs at a time.
pub struct InferenceSession<M: ClassifierModel> {
    handle: Option<ModelHandle<M>>,
    classes: Arc<ClassTable>,
    input: InputSpec,
    activation: OutputActivation,
}

impl<M: ClassifierModel> InferenceSession<M> {
    pub fn new(classes: Arc<ClassTable>, input: InputSpec, activation: OutputActivation) -> Self {
        Self {
            handle: None,
            classes,
            input,
            activation,
        }
    }

    pub fn install(&mut self, handle: ModelHandle<M>) {
        self.handle = Some(handle);
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    /// Drops the model and every buffer it holds.
    pub fn dispose(&mut self) {
        self.handle = None;
    }

    #[instrument(skip(self, frame), fields(width = frame.width(), height = frame.height()))]
    pub fn predict(&mut self, frame: &Frame) -> Result<PredictionResult, PredictionError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(PredictionError::NotReady);
        };

        let input = self.input.tensor_from_frame(frame)?;
        let output = handle.model.run(input.view())?;
        drop(input);

        let ranked = rank(output.scores(), self.classes.len(), self.activation)?;
        drop(output);

        let predictions = ranked
            .into_iter()
            .map(|(class_index, confidence)| {
                let label = self
                    .classes
                    .get(class_index)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        PredictionError::InvalidOutput(format!("no label for class {}", class_index))
                    })?;
                Ok(Prediction {
                    class_index,
                    label,
                    confidence,
                })
            })
            .collect::<Result<Vec<_>, PredictionError>>()?;

        tracing::debug!(
            "Top prediction: {:?}",
            predictions.first().map(|p| (&p.label, p.confidence))
        );
        Ok(PredictionResult::new(predictions))
    }
}

/// The `TOP_K` highest scores with their class indices, highest first.
/// Ties keep the lower class index first.
fn rank(
    scores: &[f32],
    num_classes: usize,
    activation: OutputActivation,
) -> Result<Vec<(usize, f32)>, PredictionError> {
    if scores.len() != num_classes {
        return Err(PredictionError::InvalidOutput(format!(
            "expected {} scores, got {}",
            num_classes,
            scores.len()
        )));
    }
    if let Some(index) = scores.iter().position(|s| !s.is_finite()) {
        return Err(PredictionError::InvalidOutput(format!(
            "score for class {} is not finite",
            index
        )));
    }

    let confidences = match activation {
        OutputActivation::Probabilities => scores.to_vec(),
        OutputActivation::Softmax => softmax(scores),
    };

    let mut ranked = confidences
        .into_iter()
        .map(|c| c.clamp(0.0, 1.0))
        .enumerate()
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(TOP_K);
    Ok(ranked)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps = logits.iter().map(|l| (l - max).exp()).collect::<Vec<_>>();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
