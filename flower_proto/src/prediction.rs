use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of ranked classes returned per prediction.
pub const TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,
    pub confidence: f32,
}

/// Ranked labels, highest confidence first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predictions: Vec<Prediction>,
}

impl PredictionResult {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self { predictions }
    }

    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for prediction in &self.predictions {
            writeln!(
                f,
                "{} : {:.2}% ",
                prediction.label,
                prediction.confidence * 100.0
            )?;
        }
        Ok(())
    }
}
