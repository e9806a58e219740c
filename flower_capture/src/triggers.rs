use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_stream::{wrappers::LinesStream, Stream, StreamExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Predict,
    Quit,
}

/// Enter (or `p`) predicts, `q` quits; anything else is ignored.
pub fn parse_trigger(line: &str) -> Option<Trigger> {
    match line.trim().to_lowercase().as_str() {
        "" | "p" | "predict" => Some(Trigger::Predict),
        "q" | "quit" | "exit" => Some(Trigger::Quit),
        _ => None,
    }
}

/// One trigger per recognised input line. The stream ends with the input.
pub fn line_triggers<R>(input: R) -> impl Stream<Item = Trigger> + Unpin
where
    R: AsyncRead + Unpin,
{
    LinesStream::new(BufReader::new(input).lines()).filter_map(|line| match line {
        Ok(line) => parse_trigger(&line),
        Err(e) => {
            tracing::warn!("Failed to read input: {}", e);
            None
        }
    })
}
