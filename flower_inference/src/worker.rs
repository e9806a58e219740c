use crate::{
    classes::ClassTable,
    config::ModelConfig,
    error::{LoadError, WorkerError},
    loader::fetch_asset,
    model_service::{ClassifierModel, ModelLoader},
    session::{InferenceSession, ModelHandle},
};
use flower_proto::{ControllerMessage, ErrorKind, WorkerMessage};
use std::{sync::Arc, thread, time::Instant};
use tokio::sync::mpsc;

/// Owns the model lifecycle and answers prediction requests in the order
/// they were submitted.
pub struct Worker<L: ModelLoader> {
    loader: Arc<L>,
    model: ModelConfig,
    classes: Arc<ClassTable>,
}

impl<L: ModelLoader> Worker<L> {
    pub fn new(loader: L, model: ModelConfig, classes: ClassTable) -> Self {
        Self {
            loader: Arc::new(loader),
            model,
            classes: Arc::new(classes),
        }
    }

    /// Loads the model while serving `inbox`, then answers every request in
    /// FIFO order until the controller closes the channel.
    ///
    /// Requests that arrive before the model is ready are answered with a
    /// `not_ready` error. A failed load is reported once and ends the worker.
    pub async fn run(
        self,
        mut inbox: mpsc::Receiver<ControllerMessage>,
        outbox: mpsc::Sender<WorkerMessage>,
    ) -> Result<(), WorkerError> {
        let mut session = InferenceSession::new(
            self.classes.clone(),
            self.model.input_spec(),
            self.model.activation,
        );

        let load = load_model(
            self.loader.clone(),
            self.model.clone(),
            self.classes.clone(),
            outbox.clone(),
        );
        tokio::pin!(load);
        let mut loading = true;

        loop {
            tokio::select! {
                biased;

                message = inbox.recv() => {
                    let Some(message) = message else {
                        tracing::info!("Controller closed the request channel, stopping worker");
                        session.dispose();
                        return Ok(());
                    };
                    let reply = handle_message(&mut session, message);
                    outbox
                        .send(reply)
                        .await
                        .map_err(|_| WorkerError::ChannelClosed)?;
                }

                loaded = &mut load, if loading => {
                    loading = false;
                    match loaded {
                        Ok(handle) => {
                            session.install(handle);
                            tracing::info!("Model loaded and warmed up");
                            outbox
                                .send(WorkerMessage::Ready)
                                .await
                                .map_err(|_| WorkerError::ChannelClosed)?;
                        }
                        Err(err) => {
                            tracing::error!("Failed to load model: {}", err);
                            let _ = outbox
                                .send(WorkerMessage::Error {
                                    id: None,
                                    kind: ErrorKind::Load,
                                    message: err.to_string(),
                                })
                                .await;
                            return Err(err.into());
                        }
                    }
                }
            }
        }
    }

    /// Runs the worker on its own thread with a single-threaded runtime.
    pub fn spawn(self, queue_capacity: usize) -> std::io::Result<WorkerHandle> {
        let capacity = queue_capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::channel(capacity);

        let thread = thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(WorkerError::Runtime)?;
                runtime.block_on(self.run(request_rx, reply_tx))
            })?;

        Ok(WorkerHandle {
            sender: request_tx,
            receiver: reply_rx,
            thread: WorkerThread(thread),
        })
    }
}

pub struct WorkerHandle {
    pub sender: mpsc::Sender<ControllerMessage>,
    pub receiver: mpsc::Receiver<WorkerMessage>,
    pub thread: WorkerThread,
}

pub struct WorkerThread(thread::JoinHandle<Result<(), WorkerError>>);

impl WorkerThread {
    /// Blocks until the worker thread exits.
    pub fn join(self) -> Result<(), WorkerError> {
        self.0.join().unwrap_or(Err(WorkerError::Panicked))
    }
}

async fn load_model<L: ModelLoader>(
    loader: Arc<L>,
    config: ModelConfig,
    classes: Arc<ClassTable>,
    outbox: mpsc::Sender<WorkerMessage>,
) -> Result<ModelHandle<L::Model>, LoadError> {
    let path = config.get_path();
    tracing::info!("Loading model from {:?}", path);

    let bytes = fetch_asset(&path, config.chunk_size, |frac| {
        let outbox = outbox.clone();
        async move {
            if outbox.send(WorkerMessage::Progress { frac }).await.is_err() {
                tracing::debug!("Dropped progress update, controller is gone");
            }
        }
    })
    .await?;

    let input = config.input_spec();
    tokio::task::spawn_blocking(move || ModelHandle::load(&*loader, &bytes, &input, &classes))
        .await
        .map_err(|e| LoadError::Interrupted(e.to_string()))?
}

fn handle_message<M: ClassifierModel>(
    session: &mut InferenceSession<M>,
    message: ControllerMessage,
) -> WorkerMessage {
    match message {
        ControllerMessage::Predict { id, image_data } => {
            let clock = Instant::now();
            match session.predict(&image_data) {
                Ok(result) => {
                    tracing::debug!("Prediction {} took {:?}", id, clock.elapsed());
                    WorkerMessage::Result {
                        id,
                        data: result.to_string(),
                        predictions: result.predictions,
                    }
                }
                Err(err) => {
                    tracing::warn!("Prediction {} failed: {}", id, err);
                    WorkerMessage::Error {
                        id: Some(id),
                        kind: err.kind(),
                        message: err.to_string(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::FLOWER_CLASSES;
    use crate::session::{tests::FakeLoader, OutputActivation, TensorLayout};
    use flower_proto::Frame;
    use std::{io::Write, path::Path};

    fn model_config(path: &Path) -> ModelConfig {
        ModelConfig {
            model_dir: path.parent().unwrap().to_path_buf(),
            onnx_file: path.file_name().unwrap().to_string_lossy().into_owned(),
            input_size: 8,
            layout: TensorLayout::Nhwc,
            scale: 1.0,
            activation: OutputActivation::Probabilities,
            chunk_size: 4,
            intra_threads: 1,
        }
    }

    fn model_asset() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();
        file
    }

    fn solid_frame(red: u8) -> Frame {
        let data = (0..8 * 8).flat_map(|_| [red, 0, 0]).collect();
        Frame::new(8, 8, data).unwrap()
    }

    async fn wait_until_ready(receiver: &mut mpsc::Receiver<WorkerMessage>) -> Vec<f32> {
        let mut progress = Vec::new();
        loop {
            match receiver.recv().await.expect("worker hung up before ready") {
                WorkerMessage::Progress { frac } => progress.push(frac),
                WorkerMessage::Ready => return progress,
                other => panic!("unexpected message while loading: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_progress_reaches_one_before_ready() {
        let asset = model_asset();
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(asset.path()),
            ClassTable::flowers(),
        );
        let (request_tx, request_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        let task = tokio::spawn(worker.run(request_rx, reply_tx));

        let progress = wait_until_ready(&mut reply_rx).await;

        assert_eq!(progress.len(), 3);
        assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(*progress.last().unwrap(), 1.0);

        drop(request_tx);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_predict_during_load_is_not_ready() {
        let asset = model_asset();
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(asset.path()),
            ClassTable::flowers(),
        );
        let (request_tx, request_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        request_tx
            .send(ControllerMessage::Predict {
                id: 1,
                image_data: Frame::zeros(8),
            })
            .await
            .unwrap();
        let task = tokio::spawn(worker.run(request_rx, reply_tx));

        let first = reply_rx.recv().await.unwrap();
        assert_eq!(
            first,
            WorkerMessage::Error {
                id: Some(1),
                kind: ErrorKind::NotReady,
                message: "model is not loaded yet".to_string(),
            }
        );
        wait_until_ready(&mut reply_rx).await;

        drop(request_tx);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_predictions_are_answered_in_order() {
        let asset = model_asset();
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(asset.path()),
            ClassTable::flowers(),
        );
        let (request_tx, request_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        let task = tokio::spawn(worker.run(request_rx, reply_tx));
        wait_until_ready(&mut reply_rx).await;

        for (id, red) in [(1, 5u8), (2, 7u8)] {
            request_tx
                .send(ControllerMessage::Predict {
                    id,
                    image_data: solid_frame(red),
                })
                .await
                .unwrap();
        }

        let mut answered = Vec::new();
        for _ in 0..2 {
            match reply_rx.recv().await.unwrap() {
                WorkerMessage::Result {
                    id, predictions, ..
                } => answered.push((id, predictions[0].class_index)),
                other => panic!("expected a result, got {:?}", other),
            }
        }
        assert_eq!(answered, vec![(1, 5), (2, 7)]);

        drop(request_tx);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_result_data_is_the_ranked_label_list() {
        let asset = model_asset();
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(asset.path()),
            ClassTable::flowers(),
        );
        let (request_tx, request_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        let _task = tokio::spawn(worker.run(request_rx, reply_tx));
        wait_until_ready(&mut reply_rx).await;

        request_tx
            .send(ControllerMessage::Predict {
                id: 9,
                image_data: solid_frame(5),
            })
            .await
            .unwrap();

        let WorkerMessage::Result { id, data, .. } = reply_rx.recv().await.unwrap() else {
            panic!("expected a result");
        };
        assert_eq!(id, 9);
        assert_eq!(data.lines().count(), 5);
        assert!(data.starts_with("tiger lily : 95.00% \n"));
    }

    #[tokio::test]
    async fn test_missing_asset_reports_load_error_and_stops() {
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(Path::new("/nonexistent/flowers.onnx")),
            ClassTable::flowers(),
        );
        let (_request_tx, request_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        let result = worker.run(request_rx, reply_tx).await;

        assert!(matches!(result, Err(WorkerError::Load(LoadError::Fetch { .. }))));
        assert!(matches!(
            reply_rx.recv().await,
            Some(WorkerMessage::Error {
                id: None,
                kind: ErrorKind::Load,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unparseable_asset_reports_load_error() {
        let asset = tempfile::NamedTempFile::new().unwrap();
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(asset.path()),
            ClassTable::flowers(),
        );
        let (_request_tx, request_rx) = mpsc::channel(8);
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        let result = worker.run(request_rx, reply_tx).await;

        assert!(matches!(result, Err(WorkerError::Load(LoadError::Parse(_)))));
    }

    #[tokio::test]
    async fn test_spawned_worker_runs_on_its_own_thread() {
        let asset = model_asset();
        let worker = Worker::new(
            FakeLoader::new(FLOWER_CLASSES.len()),
            model_config(asset.path()),
            ClassTable::flowers(),
        );
        let WorkerHandle {
            sender,
            mut receiver,
            thread,
        } = worker.spawn(4).unwrap();

        wait_until_ready(&mut receiver).await;
        sender
            .send(ControllerMessage::Predict {
                id: 1,
                image_data: solid_frame(5),
            })
            .await
            .unwrap();
        assert!(matches!(
            receiver.recv().await,
            Some(WorkerMessage::Result { id: 1, .. })
        ));

        drop(sender);
        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .unwrap();
        assert!(joined.is_ok());
    }
}
