//! Container output streaming.
//!
//! A [`LogStreamer`] runs one task per attached container. The task opens
//! the engine's output stream, tells the coordinator it is attached, then
//! pushes every chunk into the sink as it arrives:
//!
//! ```text
//! coordinator                      streamer task
//!     │  attach() ───spawn───────────→ │ attach_container()
//!     │  (blocked on oneshot)          │
//!     │ ←────────── attached ───────── │
//!     │  start_container()             │ chunk → sink
//!     │  wait_container()              │ chunk → sink
//!     │  finish() ───join────────────→ │ stream closed
//! ```
//!
//! Starting the container only after the attach signal means no early
//! output is lost. There is no timeout: if the engine connection hangs the
//! task stays parked until the runtime shuts down.

pub mod sink;

pub use crate::engine::LogChunk;
pub use sink::{OutputSink, SinkFactory};

use std::sync::Arc;

use futures::StreamExt;
use marina_shared::errors::{MarinaError, MarinaResult};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{ContainerEngine, ContainerId};

/// Handle to a running output-forwarding task.
pub struct LogStreamer {
    container: ContainerId,
    cancel: CancellationToken,
    handle: JoinHandle<MarinaResult<()>>,
}

impl LogStreamer {
    /// Attach to `container` and start forwarding its output into `sink`.
    ///
    /// Returns only once the engine stream is open, so the caller may start
    /// the container right after. An attach failure is returned here.
    pub async fn attach(
        engine: Arc<dyn ContainerEngine>,
        container: &ContainerId,
        sink: Box<dyn OutputSink>,
    ) -> MarinaResult<Self> {
        let (attached_tx, attached_rx) = oneshot::channel::<MarinaResult<()>>();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(forward(
            engine,
            container.clone(),
            sink,
            cancel.clone(),
            attached_tx,
        ));

        match attached_rx.await {
            Ok(Ok(())) => {
                tracing::debug!(container_id = %container, "attached to container");
                Ok(Self {
                    container: container.clone(),
                    cancel,
                    handle,
                })
            }
            Ok(Err(e)) => {
                tracing::error!(container_id = %container, "failed to attach to container");
                let _ = handle.await;
                Err(e)
            }
            // task died before reporting, surface its own error if it has one
            Err(_) => match handle.await {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(MarinaError::Stream(format!(
                    "streamer for container {} exited before attaching",
                    container
                ))),
                Err(join) => Err(MarinaError::Stream(format!(
                    "streamer for container {} panicked: {}",
                    container, join
                ))),
            },
        }
    }

    /// Wait for the stream to close on its own (container exited) and
    /// re-raise any error the task hit while forwarding.
    pub async fn finish(self) -> MarinaResult<()> {
        self.join().await
    }

    /// Ask the task to stop forwarding, then join it.
    ///
    /// A streaming error that happened before the abort is still returned.
    pub async fn abort(self) -> MarinaResult<()> {
        tracing::debug!(container_id = %self.container, "stopping log streamer");
        self.cancel.cancel();
        self.join().await
    }

    async fn join(self) -> MarinaResult<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(MarinaError::Stream(format!(
                "streamer for container {} panicked: {}",
                self.container, e
            ))),
        }
    }
}

async fn forward(
    engine: Arc<dyn ContainerEngine>,
    container: ContainerId,
    mut sink: Box<dyn OutputSink>,
    cancel: CancellationToken,
    attached: oneshot::Sender<MarinaResult<()>>,
) -> MarinaResult<()> {
    tracing::debug!(container_id = %container, "attaching to container");
    let mut stream = match engine.attach_container(&container).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = attached.send(Err(e));
            return Ok(());
        }
    };
    if attached.send(Ok(())).is_err() {
        // coordinator is gone, nobody will read the output
        return Ok(());
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(container_id = %container, "log streamer cancelled");
                return Ok(());
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => sink.write_chunk(&chunk).await.map_err(|e| {
                tracing::error!(container_id = %container, "failed to forward container output");
                MarinaError::Stream(format!(
                    "failed to write output of container {}: {}",
                    container, e
                ))
            })?,
            Some(Err(e)) => {
                tracing::error!(
                    container_id = %container,
                    "failure while reading from attached container"
                );
                return Err(MarinaError::Stream(e.to_string()));
            }
            None => break,
        }
    }

    sink.flush().await.map_err(|e| {
        MarinaError::Stream(format!(
            "failed to flush output of container {}: {}",
            container, e
        ))
    })?;
    tracing::debug!(container_id = %container, "container output stream closed");
    Ok(())
}
