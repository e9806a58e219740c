use flower_inference::{ModelLoader, Worker, WorkerError, WorkerHandle, WorkerThread};
use flower_proto::{ControllerMessage, WorkerMessage};
use std::{io, path::Path, process::ExitStatus, process::Stdio, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::mpsc,
    task::JoinHandle,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("failed to start worker: {0}")]
    Spawn(#[from] io::Error),
    #[error("worker stdio is not piped")]
    MissingPipe,
    #[error("worker is gone")]
    Disconnected,
    #[error("worker failed: {0}")]
    Worker(#[from] WorkerError),
    #[error("worker process exited with {0}")]
    Exit(ExitStatus),
    #[error("worker task failed: {0}")]
    Join(String),
}

enum Backend {
    InProcess(WorkerThread),
    Subprocess {
        child: Child,
        writer: JoinHandle<()>,
        reader: JoinHandle<()>,
    },
    Detached,
}

/// The controller's end of the worker connection. Messages are ordered and
/// delivered at most once.
pub struct WorkerBridge {
    sender: Option<mpsc::Sender<ControllerMessage>>,
    receiver: mpsc::Receiver<WorkerMessage>,
    backend: Backend,
}

impl WorkerBridge {
    /// Runs `worker` on a dedicated thread of this process.
    pub fn in_process<L: ModelLoader>(
        worker: Worker<L>,
        queue_capacity: usize,
    ) -> Result<Self, BridgeError> {
        let WorkerHandle {
            sender,
            receiver,
            thread,
        } = worker.spawn(queue_capacity)?;
        tracing::info!("Started in-process inference worker");

        Ok(Self {
            sender: Some(sender),
            receiver,
            backend: Backend::InProcess(thread),
        })
    }

    /// Starts `program` and talks to it in JSON lines over its stdio. Must be
    /// called from within a Tokio runtime.
    pub fn subprocess(program: &Path, queue_capacity: usize) -> Result<Self, BridgeError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let stdin = child.stdin.take().ok_or(BridgeError::MissingPipe)?;
        let stdout = child.stdout.take().ok_or(BridgeError::MissingPipe)?;
        tracing::info!("Started inference worker process {:?}", program);

        let capacity = queue_capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::channel(capacity);

        Ok(Self {
            sender: Some(request_tx),
            receiver: reply_rx,
            backend: Backend::Subprocess {
                child,
                writer: tokio::spawn(write_requests(stdin, request_rx)),
                reader: tokio::spawn(read_replies(stdout, reply_tx)),
            },
        })
    }

    /// Wraps a pair of channels whose other ends are driven elsewhere.
    pub fn from_channels(
        sender: mpsc::Sender<ControllerMessage>,
        receiver: mpsc::Receiver<WorkerMessage>,
    ) -> Self {
        Self {
            sender: Some(sender),
            receiver,
            backend: Backend::Detached,
        }
    }

    pub async fn send(&self, message: ControllerMessage) -> Result<(), BridgeError> {
        let sender = self.sender.as_ref().ok_or(BridgeError::Disconnected)?;
        sender
            .send(message)
            .await
            .map_err(|_| BridgeError::Disconnected)
    }

    /// The next worker message, or `None` once the worker has gone away.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.receiver.recv().await
    }

    /// Closes the request channel and waits for the worker to exit.
    pub async fn shutdown(self) -> Result<(), BridgeError> {
        let WorkerBridge {
            sender,
            receiver,
            backend,
        } = self;
        drop(sender);
        drop(receiver);

        match backend {
            Backend::InProcess(thread) => {
                let joined = tokio::task::spawn_blocking(move || thread.join())
                    .await
                    .map_err(|e| BridgeError::Join(e.to_string()))?;
                match joined {
                    Ok(()) | Err(WorkerError::ChannelClosed) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Backend::Subprocess {
                mut child,
                writer,
                reader,
            } => {
                writer
                    .await
                    .map_err(|e| BridgeError::Join(e.to_string()))?;
                let status = match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        tracing::warn!("Worker process did not exit, killing it");
                        child.kill().await?;
                        child.wait().await?
                    }
                };
                reader.abort();
                if status.success() {
                    Ok(())
                } else {
                    Err(BridgeError::Exit(status))
                }
            }
            Backend::Detached => Ok(()),
        }
    }
}

async fn write_requests(mut stdin: ChildStdin, mut requests: mpsc::Receiver<ControllerMessage>) {
    while let Some(message) = requests.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to encode request: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::error!("Failed to write to worker: {}", e);
            return;
        }
    }
    if let Err(e) = stdin.shutdown().await {
        tracing::debug!("Closing worker stdin: {}", e);
    }
}

async fn read_replies(stdout: ChildStdout, replies: mpsc::Sender<WorkerMessage>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<WorkerMessage>(&line) {
                Ok(message) => {
                    if replies.send(message).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::warn!("Skipping malformed worker message: {}", e),
            },
            Ok(None) => {
                tracing::info!("Worker closed its output");
                return;
            }
            Err(e) => {
                tracing::error!("Failed to read from worker: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flower_proto::Frame;

    #[tokio::test]
    async fn test_channels_deliver_in_order() {
        let (request_tx, mut request_rx) = mpsc::channel(4);
        let (reply_tx, reply_rx) = mpsc::channel(4);
        let mut bridge = WorkerBridge::from_channels(request_tx, reply_rx);

        reply_tx
            .send(WorkerMessage::Progress { frac: 0.5 })
            .await
            .unwrap();
        reply_tx.send(WorkerMessage::Ready).await.unwrap();
        bridge
            .send(ControllerMessage::Predict {
                id: 1,
                image_data: Frame::zeros(2),
            })
            .await
            .unwrap();

        assert_eq!(
            bridge.recv().await,
            Some(WorkerMessage::Progress { frac: 0.5 })
        );
        assert_eq!(bridge.recv().await, Some(WorkerMessage::Ready));
        assert!(request_rx.recv().await.is_some());

        bridge.shutdown().await.unwrap();
        assert!(request_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_worker_exit_is_disconnected() {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (_reply_tx, reply_rx) = mpsc::channel(1);
        let bridge = WorkerBridge::from_channels(request_tx, reply_rx);
        drop(request_rx);

        let result = bridge
            .send(ControllerMessage::Predict {
                id: 1,
                image_data: Frame::zeros(2),
            })
            .await;

        assert!(matches!(result, Err(BridgeError::Disconnected)));
    }

    #[tokio::test]
    async fn test_missing_worker_program_fails_to_spawn() {
        let result = WorkerBridge::subprocess(Path::new("/nonexistent/flower_inference"), 4);
        assert!(matches!(result, Err(BridgeError::Spawn(_))));
    }
}
