use crate::{
    bridge::WorkerBridge,
    camera::{self, CaptureDevice},
    config::{Config, WorkerMode},
    controller::Controller,
    triggers::{line_triggers, Trigger},
    view::{Renderer, TerminalRenderer},
};
use flower_inference::{ClassTable, OrtLoader, Worker};
use futures::{Stream, StreamExt};
use tokio::{signal, time::Instant};

/// Drives one controller session: worker messages, user triggers and the
/// prediction deadline, rendering after every event.
pub struct ControllerLoop<C: CaptureDevice, R: Renderer> {
    controller: Controller<C>,
    renderer: R,
}

impl<C: CaptureDevice, R: Renderer> ControllerLoop<C, R> {
    pub fn new(controller: Controller<C>, renderer: R) -> Self {
        Self {
            controller,
            renderer,
        }
    }

    pub fn controller(&self) -> &Controller<C> {
        &self.controller
    }

    /// Runs until the trigger stream ends or yields `Quit`.
    pub async fn run<T>(&mut self, bridge: &mut WorkerBridge, mut triggers: T)
    where
        T: Stream<Item = Trigger> + Unpin,
    {
        self.renderer.render(&self.controller.view());
        let mut worker_alive = true;

        loop {
            let deadline = self.controller.deadline();

            tokio::select! {
                message = bridge.recv(), if worker_alive => match message {
                    Some(message) => self.controller.on_worker_message(message),
                    None => {
                        worker_alive = false;
                        self.controller.on_worker_exit();
                    }
                },

                trigger = triggers.next() => match trigger {
                    Some(Trigger::Predict) => self.predict(bridge).await,
                    Some(Trigger::Quit) | None => {
                        tracing::info!("Controller loop finished");
                        return;
                    }
                },

                _ = wait_for(deadline) => self.controller.on_timeout(),
            }

            self.renderer.render(&self.controller.view());
        }
    }

    async fn predict(&mut self, bridge: &WorkerBridge) {
        match self.controller.request_prediction() {
            Ok(Some(request)) => {
                if let Err(e) = bridge.send(request).await {
                    tracing::error!("Failed to send prediction request: {}", e);
                    self.controller.on_worker_exit();
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to capture frame: {}", e),
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn start_worker(config: &Config) -> anyhow::Result<WorkerBridge> {
    let bridge = match config.worker.mode {
        WorkerMode::InProcess => {
            let classes = match config.labels.get_path() {
                Some(path) => ClassTable::from_file(&path)?,
                None => ClassTable::flowers(),
            };
            let worker = Worker::new(OrtLoader::new(&config.model), config.model.clone(), classes);
            WorkerBridge::in_process(worker, config.worker.queue_capacity)?
        }
        WorkerMode::Subprocess => {
            WorkerBridge::subprocess(&config.worker.program, config.worker.queue_capacity)?
        }
    };
    Ok(bridge)
}

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let camera = match camera::open(&config.camera) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(e.into());
        }
    };

    let mut bridge = start_worker(&config)?;

    let controller = Controller::new(
        camera,
        config.model.input_size,
        config.controller.get_predict_timeout(),
    );
    let mut controller_loop =
        ControllerLoop::new(controller, TerminalRenderer::new(std::io::stdout()));
    let triggers = line_triggers(tokio::io::stdin());

    tokio::select! {
        _ = controller_loop.run(&mut bridge, triggers) => {},
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, starting graceful shutdown.");
        }
    }

    if let Err(e) = bridge.shutdown().await {
        tracing::warn!("Inference worker stopped with an error: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
