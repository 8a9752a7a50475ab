use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// One line written by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub worker: String,
    pub stream: Stream,
    pub line: String,
}

impl core::fmt::Display for OutputLine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}] {}", self.worker, self.line)
    }
}

/// Fan-in of every worker's output.
pub type OutputStream = mpsc::UnboundedReceiver<OutputLine>;

/// Forward `reader` line by line until EOF.
pub(crate) fn forward<R>(worker: String, stream: Stream, reader: R, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let sent = tx.send(OutputLine {
                worker: worker.clone(),
                stream,
                line,
            });
            if sent.is_err() {
                break;
            }
        }
    });
}

/// Print every line prefixed with its worker name, stdout to stdout and
/// stderr to stderr, until all workers are gone.
pub async fn passthrough(mut output: OutputStream) {
    while let Some(line) = output.recv().await {
        match line.stream {
            Stream::Stdout => println!("{line}"),
            Stream::Stderr => eprintln!("{line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_tagged_with_the_worker_name() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        forward("w1".to_string(), Stream::Stderr, &b"first\nsecond\n"[..], tx);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.to_string(), "[w1] first");
        assert_eq!(first.stream, Stream::Stderr);
        assert_eq!(rx.recv().await.unwrap().line, "second");
        assert!(rx.recv().await.is_none());
    }
}
