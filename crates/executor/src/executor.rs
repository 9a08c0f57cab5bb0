use std::sync::Arc;

use chrono::Utc;
use encoding_rs::Encoding;
use futures::{StreamExt, stream::BoxStream};
use serde_json::{Value, json};
use tokio::{
    io::AsyncReadExt,
    process::{ChildStderr, ChildStdout},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ExecutorConfig,
    error::ExecutorError,
    json_stream::JsonStreamExtractor,
    normalize::clean_line,
    process::{self, SENTINEL_RETURN_CODE},
    reader,
    record::{CommandStore, RecordId},
    request::ExecutionRequest,
};

/// Item yielded by streaming execution: a normalized text line, or a decoded
/// value when the command runs in JSON mode.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Text(String),
    Json(Value),
}

/// Result of a buffered execution.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedOutput {
    pub return_code: i64,
    pub output: String,
}

/// Coordinates spawn, multiplexed reading, normalization and persistence for
/// one command execution at a time.
///
/// Each `execute_*` call owns its process handle for the call's lifetime;
/// concurrent executions share nothing but the store.
pub struct CommandExecutor<S> {
    store: Arc<S>,
    config: ExecutorConfig,
}

impl<S: CommandStore + 'static> CommandExecutor<S> {
    pub fn new(store: Arc<S>, config: ExecutorConfig) -> Self {
        Self { store, config }
    }

    /// Run to completion and return the exit code with the combined output
    /// (stdout first, then stderr).
    ///
    /// The full text is persisted with a single append once both pipes are
    /// drained. Collection failures degrade to an empty output with the best
    /// known code; only spawn failures and timeouts surface as errors.
    pub async fn execute_buffered(
        &self,
        request: ExecutionRequest,
    ) -> Result<BufferedOutput, ExecutorError> {
        if request.dry_run.unwrap_or(self.config.dry_run) {
            debug!(command = %request.command, "dry run, skipping buffered execution");
            return Ok(BufferedOutput {
                return_code: 0,
                output: mock_output(&request),
            });
        }

        info!(command = %request.command, "starting buffered execution");
        let record = self.create_record(&request).await;

        let mut child = match process::spawn(&request) {
            Ok(child) => child,
            Err(e) => {
                record_failure(&*self.store, record, &e).await;
                return Err(e);
            }
        };

        let stdout = child.inner().stdout.take();
        let stderr = child.inner().stderr.take();

        let drained =
            tokio::time::timeout(request.timeout, drain(stdout, stderr, request.encoding)).await;

        match drained {
            Ok(Ok(output)) => {
                let return_code = process::wait_code(&mut child).await;
                if output.is_empty() {
                    debug!("no output to save");
                } else {
                    append_record(&*self.store, record, &output).await;
                }
                finalize_record(&*self.store, record, return_code).await;
                write_history(&request, return_code, &output);
                Ok(BufferedOutput { return_code, output })
            }
            Ok(Err(e)) => {
                error!(error = %e, "buffer collection failed");
                let return_code = process::wait_code(&mut child).await;
                set_error_record(&*self.store, record, &e.to_string()).await;
                finalize_record(&*self.store, record, return_code).await;
                Ok(BufferedOutput {
                    return_code,
                    output: String::new(),
                })
            }
            Err(_) => {
                warn!(timeout = ?request.timeout, "buffered execution timed out, terminating");
                process::terminate(&mut child).await;
                let return_code = process::wait_code(&mut child).await;
                finalize_record(&*self.store, record, return_code).await;
                Err(ExecutorError::Timeout {
                    limit: request.timeout,
                })
            }
        }
    }

    /// Run lazily, yielding each normalized line (or decoded JSON value) as
    /// it is read. Every item is appended to the command record before it is
    /// handed to the caller, so persisted state never lags what the caller
    /// has observed.
    ///
    /// Spawn failures surface immediately; a timeout terminates the process
    /// and ends the stream with one [`ExecutorError::Timeout`] item.
    pub async fn execute_streaming(
        &self,
        request: ExecutionRequest,
    ) -> Result<BoxStream<'static, Result<StreamItem, ExecutorError>>, ExecutorError> {
        if request.dry_run.unwrap_or(self.config.dry_run) {
            debug!(command = %request.command, "dry run, skipping streaming execution");
            let item = mock_stream_item(&request);
            return Ok(futures::stream::once(async move { Ok(item) }).boxed());
        }

        info!(command = %request.command, "starting streaming execution");
        let record = self.create_record(&request).await;
        let started = Instant::now();

        let mut child = match process::spawn(&request) {
            Ok(child) => child,
            Err(e) => {
                record_failure(&*self.store, record, &e).await;
                return Err(e);
            }
        };

        let stdout = child.inner().stdout.take();
        let stderr = child.inner().stderr.take();
        let chunks =
            reader::output_chunks(stdout, stderr, request.encoding, started, request.timeout);

        let store = Arc::clone(&self.store);
        let stream = async_stream::stream! {
            tokio::pin!(chunks);
            let mut extractor = JsonStreamExtractor::new();

            while let Some(next) = chunks.next().await {
                match next {
                    Ok(chunk) => {
                        let line = clean_line(&chunk, request.trunc_chars);
                        if request.json_mode {
                            if line.is_empty() {
                                continue;
                            }
                            for value in extractor.feed(&line) {
                                append_record(&*store, record, &format!("{value}\n")).await;
                                yield Ok(StreamItem::Json(value));
                            }
                        } else {
                            append_record(&*store, record, &format!("{line}\n")).await;
                            yield Ok(StreamItem::Text(line));
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "terminating streamed execution");
                        process::terminate(&mut child).await;
                        yield Err(e);
                        break;
                    }
                }
            }

            let return_code = process::wait_code(&mut child).await;
            finalize_record(&*store, record, return_code).await;
        };

        Ok(stream.boxed())
    }

    async fn create_record(&self, request: &ExecutionRequest) -> Option<RecordId> {
        match self
            .store
            .create_record(&request.command, Utc::now(), &request.context)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "failed to create command record, continuing without");
                None
            }
        }
    }
}

/// Buffered convenience wrapper, dry-run toggle taken from the environment.
pub async fn run_command<S: CommandStore + 'static>(
    store: Arc<S>,
    request: ExecutionRequest,
) -> Result<BufferedOutput, ExecutorError> {
    CommandExecutor::new(store, ExecutorConfig::from_env())
        .execute_buffered(request)
        .await
}

/// Streaming convenience wrapper, dry-run toggle taken from the environment.
pub async fn stream_command<S: CommandStore + 'static>(
    store: Arc<S>,
    request: ExecutionRequest,
) -> Result<BoxStream<'static, Result<StreamItem, ExecutorError>>, ExecutorError> {
    CommandExecutor::new(store, ExecutorConfig::from_env())
        .execute_streaming(request)
        .await
}

/// Read both pipes to EOF and combine them, stdout text first.
async fn drain(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    encoding: &'static Encoding,
) -> std::io::Result<String> {
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    let read_out = async {
        if let Some(mut pipe) = stdout {
            pipe.read_to_end(&mut out_buf).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let read_err = async {
        if let Some(mut pipe) = stderr {
            pipe.read_to_end(&mut err_buf).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    futures::try_join!(read_out, read_err)?;

    let mut text = encoding.decode(&out_buf).0.into_owned();
    text.push_str(&encoding.decode(&err_buf).0);
    Ok(text)
}

fn mock_output(request: &ExecutionRequest) -> String {
    let marker = format!("DRY RUN OUTPUT FOR: {}", request.command);
    if request.json_mode {
        json!({
            "command": request.command,
            "output": marker,
            "return_code": 0,
        })
        .to_string()
    } else {
        marker
    }
}

fn mock_stream_item(request: &ExecutionRequest) -> StreamItem {
    let marker = format!("DRY RUN OUTPUT FOR: {}", request.command);
    if request.json_mode {
        StreamItem::Json(json!({
            "command": request.command,
            "output": marker,
            "return_code": 0,
        }))
    } else {
        StreamItem::Text(marker)
    }
}

/// Best-effort append to the per-scan history file, in the platform's legacy
/// format.
fn write_history(request: &ExecutionRequest, return_code: i64, output: &str) {
    let Some(path) = &request.history_file else {
        return;
    };
    let entry = format!(
        "\n{}\n{}\n{}\n------------------\n",
        request.command, return_code, output
    );
    let written = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| {
            use std::io::Write;
            file.write_all(entry.as_bytes())
        });
    if let Err(e) = written {
        warn!(error = %e, path = %path.display(), "failed to write history file");
    }
}

async fn append_record<S: CommandStore + ?Sized>(store: &S, record: Option<RecordId>, text: &str) {
    let Some(id) = record else { return };
    if let Err(e) = store.append_output(id, text).await {
        warn!(error = %e, "failed to append command output");
    }
}

async fn set_error_record<S: CommandStore + ?Sized>(
    store: &S,
    record: Option<RecordId>,
    text: &str,
) {
    let Some(id) = record else { return };
    if let Err(e) = store.set_error_output(id, text).await {
        warn!(error = %e, "failed to record error output");
    }
}

/// Persist the final return code exactly once, falling back to the sentinel
/// when the store rejects the real one.
async fn finalize_record<S: CommandStore + ?Sized>(
    store: &S,
    record: Option<RecordId>,
    return_code: i64,
) {
    let Some(id) = record else { return };
    match store.set_return_code(id, return_code).await {
        Ok(()) => debug!(return_code, "saved return code"),
        Err(e) => {
            error!(error = %e, "failed to persist return code, falling back to sentinel");
            if let Err(e) = store.set_return_code(id, SENTINEL_RETURN_CODE).await {
                error!(error = %e, "failed to persist sentinel return code");
            }
        }
    }
}

/// Mark a spawn failure on the record and still reach finalization so the
/// status is never left unset.
async fn record_failure<S: CommandStore + ?Sized>(
    store: &S,
    record: Option<RecordId>,
    error: &ExecutorError,
) {
    set_error_record(store, record, &error.to_string()).await;
    finalize_record(store, record, SENTINEL_RETURN_CODE).await;
}
