use flower_inference::{config, stdio, ClassTable, OrtLoader, Worker, WorkerHandle};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs the inference worker as a subprocess: requests on stdin, messages on
/// stdout, logs on stderr.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration()?;
    let log_level = &format!("{},ort=warn", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let classes = match config.labels.get_path() {
        Some(path) => ClassTable::from_file(&path)?,
        None => ClassTable::flowers(),
    };
    let loader = OrtLoader::new(&config.model);
    let worker = Worker::new(loader, config.model.clone(), classes);

    let WorkerHandle {
        sender,
        receiver,
        thread,
    } = worker.spawn(config.worker.queue_capacity)?;

    stdio::pump(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        sender,
        receiver,
    )
    .await?;

    tokio::task::spawn_blocking(move || thread.join()).await??;
    tracing::info!("Worker finished");
    Ok(())
}
