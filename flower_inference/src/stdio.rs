use flower_proto::{ControllerMessage, ErrorKind, WorkerMessage};
use serde::Deserialize;
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

#[derive(Error, Debug)]
pub enum StdioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Bridges a worker to a JSON-lines transport: one `ControllerMessage` per
/// input line, one `WorkerMessage` per output line.
///
/// At most one decoded request waits for room in the worker's inbox, and
/// worker messages keep draining meanwhile. End of input closes the inbox;
/// the pump keeps writing until the worker drops its outbox.
pub async fn pump<R, W>(
    reader: R,
    mut writer: W,
    sender: mpsc::Sender<ControllerMessage>,
    mut receiver: mpsc::Receiver<WorkerMessage>,
) -> Result<(), StdioError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut sender = Some(sender);
    let mut pending: Option<ControllerMessage> = None;

    loop {
        tokio::select! {
            permit = reserve(sender.clone()), if pending.is_some() => match (permit, pending.take()) {
                (Some(permit), Some(message)) => {
                    permit.send(message);
                }
                _ => {
                    tracing::warn!("Worker stopped accepting requests");
                    sender = None;
                }
            },

            line = lines.next_line(), if sender.is_some() && pending.is_none() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<ControllerMessage>(&line) {
                        Ok(message) => pending = Some(message),
                        Err(err) => {
                            tracing::warn!("Skipping malformed request: {}", err);
                            if let Some(reply) = rejection(&line, &err) {
                                write_message(&mut writer, &reply).await?;
                            }
                        }
                    },
                    None => {
                        tracing::info!("Input closed");
                        sender = None;
                    }
                }
            }

            message = receiver.recv() => {
                let Some(message) = message else {
                    writer.flush().await?;
                    return Ok(());
                };
                write_message(&mut writer, &message).await?;
            }
        }
    }
}

async fn reserve(
    sender: Option<mpsc::Sender<ControllerMessage>>,
) -> Option<mpsc::OwnedPermit<ControllerMessage>> {
    sender?.reserve_owned().await.ok()
}

#[derive(Deserialize)]
struct RequestId {
    id: u64,
}

/// An undecodable request that still names its id is answered with an
/// error, so the caller is not left waiting for a result.
fn rejection(line: &str, err: &serde_json::Error) -> Option<WorkerMessage> {
    let RequestId { id } = serde_json::from_str(line).ok()?;
    Some(WorkerMessage::Error {
        id: Some(id),
        kind: ErrorKind::Prediction,
        message: format!("invalid request: {}", err),
    })
}

async fn write_message<W>(writer: &mut W, message: &WorkerMessage) -> Result<(), StdioError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_string(message)?;
    encoded.push('\n');
    writer.write_all(encoded.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
