use super::parser::Stream;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// One raw line read from the child.
#[derive(Debug, Clone)]
pub(crate) struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Forward lines from a child pipe until EOF. Invalid UTF-8 is replaced
/// rather than ending the stream.
pub(crate) fn spawn_reader<R>(
    stream: Stream,
    reader: R,
    tx: mpsc::UnboundedSender<OutputLine>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(?stream, error = %e, "pipeline output read failed");
                    break;
                }
            }
        }
    })
}
