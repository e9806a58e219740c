use crate::{
    camera::{CameraError, CaptureDevice},
    view::View,
};
use flower_proto::{ControllerMessage, ErrorKind, Frame, WorkerMessage};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// The worker is fetching and warming up the model.
    Loading { progress: f32 },
    Ready,
    /// One request is outstanding; triggers are ignored until it resolves.
    Predicting { request_id: u64, deadline: Instant },
    /// The model failed to load or the worker went away. Terminal.
    Unavailable { reason: String },
}

/// Owns the capture device and the per-session UI state.
pub struct Controller<C: CaptureDevice> {
    camera: C,
    input_size: u32,
    predict_timeout: Duration,
    phase: Phase,
    output: Option<String>,
    next_request_id: u64,
}

impl<C: CaptureDevice> Controller<C> {
    pub fn new(camera: C, input_size: u32, predict_timeout: Duration) -> Self {
        Self {
            camera,
            input_size,
            predict_timeout,
            phase: Phase::Loading { progress: 0.0 },
            output: None,
            next_request_id: 1,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Predicting { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn view(&self) -> View {
        View::new(&self.phase, self.output())
    }

    /// Grabs the current frame at the model's input resolution.
    pub fn capture(&mut self) -> Result<Frame, CameraError> {
        self.camera.get_frame(self.input_size, self.input_size)
    }

    /// Returns the request to send to the worker, or `None` when the model is
    /// not ready or a request is already in flight.
    pub fn request_prediction(&mut self) -> Result<Option<ControllerMessage>, CameraError> {
        if self.phase != Phase::Ready {
            tracing::debug!("Ignoring prediction trigger in phase {:?}", self.phase);
            return Ok(None);
        }

        let frame = match self.capture() {
            Ok(frame) => frame,
            Err(err) => {
                self.output = Some(format!("Capture failed: {}", err));
                return Err(err);
            }
        };

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.phase = Phase::Predicting {
            request_id,
            deadline: Instant::now() + self.predict_timeout,
        };
        tracing::debug!("Requesting prediction {}", request_id);

        Ok(Some(ControllerMessage::Predict {
            id: request_id,
            image_data: frame,
        }))
    }

    pub fn on_worker_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Progress { frac } => {
                if let Phase::Loading { progress } = &mut self.phase {
                    *progress = progress.max(frac.clamp(0.0, 1.0));
                }
            }
            WorkerMessage::Ready => {
                if matches!(self.phase, Phase::Loading { .. }) {
                    tracing::info!("Model ready");
                    self.phase = Phase::Ready;
                }
            }
            WorkerMessage::Result { id, data, .. } => {
                if self.is_pending(id) {
                    self.phase = Phase::Ready;
                    self.output = Some(data);
                } else {
                    tracing::debug!("Discarding stale result {}", id);
                }
            }
            WorkerMessage::Error {
                kind: ErrorKind::Load,
                message,
                ..
            } => {
                tracing::error!("Model failed to load: {}", message);
                self.phase = Phase::Unavailable { reason: message };
            }
            WorkerMessage::Error {
                id: Some(id),
                message,
                ..
            } if self.is_pending(id) => {
                tracing::warn!("Prediction {} failed: {}", id, message);
                self.phase = Phase::Ready;
                self.output = Some(format!("Prediction failed: {}", message));
            }
            WorkerMessage::Error { id, message, .. } => {
                tracing::debug!("Discarding error for request {:?}: {}", id, message);
            }
        }
    }

    /// The outstanding request passed its deadline. Its result, if it ever
    /// arrives, is discarded.
    pub fn on_timeout(&mut self) {
        if let Phase::Predicting { request_id, .. } = self.phase {
            tracing::warn!(
                "Prediction {} timed out after {:?}",
                request_id,
                self.predict_timeout
            );
            self.phase = Phase::Ready;
            self.output = Some("Prediction timed out".to_string());
        }
    }

    pub fn on_worker_exit(&mut self) {
        if !matches!(self.phase, Phase::Unavailable { .. }) {
            tracing::error!("Inference worker exited");
            self.phase = Phase::Unavailable {
                reason: "inference worker exited".to_string(),
            };
        }
    }

    fn is_pending(&self, id: u64) -> bool {
        matches!(self.phase, Phase::Predicting { request_id, .. } if request_id == id)
    }
}
