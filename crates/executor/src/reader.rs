use encoding_rs::Encoding;
use futures::{Stream, StreamExt, stream::select};
use tokio::{
    io::AsyncRead,
    time::{Duration, Instant},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::ExecutorError;

/// Bounded read size per chunk as the pipes become ready.
const READ_CHUNK_BYTES: usize = 4096;

/// How long one readiness wait may block before the wall clock is re-checked.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Merge a child's stdout and stderr into one lazy stream of decoded text
/// chunks, enforcing the execution-wide timeout.
///
/// Chunks keep their per-pipe ordering and interleave as the pipes become
/// ready; a single task multiplexes both, so there is no reader thread per
/// pipe. Decoding is replacement-on-error: scanner output may embed arbitrary
/// bytes and must never fail the stream. Read errors are logged and skipped.
/// The stream ends when both pipes reach EOF, or yields
/// [`ExecutorError::Timeout`] once the deadline passes with no output ready.
pub fn output_chunks<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    encoding: &'static Encoding,
    started: Instant,
    timeout: Duration,
) -> impl Stream<Item = Result<String, ExecutorError>> + Send
where
    O: AsyncRead + Send + 'static,
    E: AsyncRead + Send + 'static,
{
    let stdout = byte_stream(stdout);
    let stderr = byte_stream(stderr);
    let mut merged = Box::pin(select(stdout, stderr));

    async_stream::stream! {
        loop {
            match tokio::time::timeout(POLL_INTERVAL, merged.next()).await {
                Ok(Some(Ok(chunk))) => {
                    let (text, _, had_errors) = encoding.decode(&chunk);
                    if had_errors {
                        debug!(bytes = chunk.len(), "replaced undecodable bytes in chunk");
                    }
                    yield Ok(text.into_owned());
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "stream read failed, skipping chunk");
                }
                // Both pipes at EOF: the process is done writing.
                Ok(None) => break,
                // Nothing ready within the poll tick; re-check the deadline.
                Err(_) => {
                    if started.elapsed() > timeout {
                        yield Err(ExecutorError::Timeout { limit: timeout });
                        break;
                    }
                }
            }
        }
    }
}

fn byte_stream<R>(pipe: Option<R>) -> impl Stream<Item = std::io::Result<bytes::Bytes>> + Send
where
    R: AsyncRead + Send + 'static,
{
    match pipe {
        Some(reader) => ReaderStream::with_capacity(reader, READ_CHUNK_BYTES).left_stream(),
        None => futures::stream::empty().right_stream(),
    }
}
