//! Stdio Embedding Server
//!
//! Reads one JSON request per line, handles it to completion and writes one
//! JSON response per line, flushing after each. Requests are handled strictly
//! one at a time.

use std::future::Future;
use std::io::{BufRead, Read};
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::models::ModelRegistry;
use crate::protocol::{parse_line, Request, RequestError, Response, ResponseBody};

/// Raw lines buffered between the reader thread and the request loop
const LINE_QUEUE_DEPTH: usize = 16;

/// Raw input lines, newline included, as produced by `spawn_line_reader`
pub type LineReceiver = mpsc::Receiver<std::io::Result<Vec<u8>>>;

/// Read newline-terminated lines from `reader` on a dedicated thread.
///
/// A blocked read on that thread never holds up the runtime, so the loop can
/// return on interrupt while the reader is still waiting for input. The
/// receiver yields `None` once the input is exhausted.
pub fn spawn_line_reader<R: Read + Send + 'static>(reader: R) -> std::io::Result<LineReceiver> {
    let (tx, rx) = mpsc::channel(LINE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("line-reader".to_string())
        .spawn(move || {
            let mut reader = std::io::BufReader::new(reader);
            loop {
                let mut buf = Vec::new();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.blocking_send(Ok(buf)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        })?;

    Ok(rx)
}

pub struct EmbeddingServer {
    registry: ModelRegistry,
}

impl EmbeddingServer {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// Get the model cache
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Serve stdin/stdout until input ends or Ctrl-C arrives
    pub async fn serve_stdio(&mut self) -> std::io::Result<()> {
        let lines = spawn_line_reader(std::io::stdin())?;
        let stdout = tokio::io::stdout();
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        self.run(lines, stdout, interrupt).await
    }

    /// Process `lines` until the input is exhausted or `shutdown` completes.
    ///
    /// `shutdown` is only observed while waiting for input; a request that is
    /// already being handled runs to completion.
    pub async fn run<W, S>(&mut self, mut lines: LineReceiver, mut writer: W, shutdown: S) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupted, shutting down");
                    break;
                }
                next = lines.recv() => next,
            };

            let buf = match next {
                Some(line) => line?,
                None => {
                    debug!("Input closed");
                    break;
                }
            };

            let response = match std::str::from_utf8(&buf) {
                Ok(line) => self.handle_line(line).await,
                Err(e) => Some(Response::new(
                    ResponseBody::error(RequestError::InvalidJson(e.to_string()).to_string()),
                    None,
                )),
            };

            if let Some(response) = response {
                let mut line = response.to_line()?;
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle one input line. Blank lines produce no response.
    pub async fn handle_line(&mut self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let envelope = match parse_line(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Rejected line: {}", e);
                return Some(Response::new(ResponseBody::error(e.to_string()), None));
            }
        };

        let body = match envelope.request {
            Ok(request) => match AssertUnwindSafe(self.dispatch(request)).catch_unwind().await {
                Ok(body) => body,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Request handler panicked: {}", message);
                    ResponseBody::error(RequestError::Unexpected(message).to_string())
                }
            },
            Err(e) => {
                warn!("Rejected request: {}", e);
                ResponseBody::error(e.to_string())
            }
        };

        Some(Response::new(body, envelope.id))
    }

    async fn dispatch(&mut self, request: Request) -> ResponseBody {
        match request {
            Request::Info(info) => {
                if let Err(e) = self.registry.ensure_loaded(&info.model).await {
                    return load_failure(&info.model, e);
                }
                match self.registry.dimension_of(&info.model) {
                    Ok(dimension) => ResponseBody::Info {
                        model: info.model,
                        dimension,
                    },
                    Err(e) => ResponseBody::error(RequestError::Unexpected(e.to_string()).to_string()),
                }
            }
            Request::Embed(embed) => {
                if let Err(e) = self.registry.ensure_loaded(&embed.model).await {
                    return load_failure(&embed.model, e);
                }
                debug!("embed: model={} text_len={}", embed.model, embed.text.len());
                match self.registry.embed_one(&embed.model, &embed.text).await {
                    Ok(embedding) => ResponseBody::Embedding {
                        embedding,
                        model: embed.model,
                    },
                    Err(e) => {
                        warn!("Embedding failed for {}: {}", embed.model, e);
                        ResponseBody::error(format!("Failed to generate embedding: {}", e))
                    }
                }
            }
            Request::EmbedBatch(batch) => {
                if let Err(e) = self.registry.ensure_loaded(&batch.model).await {
                    return load_failure(&batch.model, e);
                }
                debug!("embed_batch: model={} texts={}", batch.model, batch.texts.len());
                match self.registry.embed_many(&batch.model, &batch.texts).await {
                    Ok(embeddings) => ResponseBody::Embeddings {
                        embeddings,
                        model: batch.model,
                    },
                    Err(e) => {
                        warn!("Batch embedding failed for {}: {}", batch.model, e);
                        ResponseBody::error(format!("Failed to generate batch embeddings: {}", e))
                    }
                }
            }
        }
    }
}

fn load_failure(model: &str, error: crate::EmbeddingError) -> ResponseBody {
    warn!("Failed to load model {}: {}", model, error);
    ResponseBody::error(format!("Failed to load model {}: {}", model, error))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "request handler panicked".to_string()
    }
}
