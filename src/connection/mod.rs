use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::LbError;

const SWITCH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub type BoxedSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
pub type BoxedStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// One client-facing Connection: a downstream socket that lives for the whole
/// Connection lifetime, and at most one upstream socket that is replaced on
/// every `switch`.
pub struct Connection {
    identity: String,
    shard: Mutex<String>,
    downstream_sink: tokio::sync::Mutex<BoxedSink>,
    downstream_stream: Mutex<Option<BoxedStream>>,
    upstream_sink: RwLock<Option<BoxedSink>>,
    upstream_cancel: Mutex<CancellationToken>,
    ack: Mutex<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
    /// Triggered exactly once, by `close()`. Distinct from `upstream_cancel`,
    /// which is replaced on every switch — this one is terminal.
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(
        identity: String,
        initial_shard: String,
        downstream_sink: BoxedSink,
        downstream_stream: BoxedStream,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            identity,
            shard: Mutex::new(initial_shard),
            downstream_sink: tokio::sync::Mutex::new(downstream_sink),
            downstream_stream: Mutex::new(Some(downstream_stream)),
            upstream_sink: RwLock::new(None),
            upstream_cancel: Mutex::new(CancellationToken::new()),
            ack: Mutex::new((tx, rx)),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn current_shard(&self) -> String {
        self.shard.lock().expect("shard lock poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Awaits the terminal close signal — used by a controller-side reaper
    /// task to know when to remove this Connection's table entry.
    pub async fn closed_notify(&self) {
        self.shutdown.cancelled().await
    }

    /// Dials the initial upstream and spawns both pumps. Returns only after
    /// the dial completes.
    pub async fn start(self: &std::sync::Arc<Self>) -> Result<(), LbError> {
        let shard = self.current_shard();
        let (sink, stream) = dial_upstream(&shard, &self.identity).await?;
        *self.upstream_sink.write().await = Some(sink);

        let cancel = self.upstream_cancel.lock().expect("cancel lock poisoned").clone();
        let ack_tx = self.ack.lock().expect("ack lock poisoned").0.clone();
        self.spawn_upstream_to_downstream_pump(stream, cancel, ack_tx);

        let downstream_stream = self
            .downstream_stream
            .lock()
            .expect("downstream stream lock poisoned")
            .take()
            .expect("start() called more than once");
        self.spawn_downstream_to_upstream_pump(downstream_stream);

        Ok(())
    }

    /// Atomically migrates the upstream half to `new_shard`. The downstream
    /// pump is untouched.
    pub async fn switch(self: &std::sync::Arc<Self>, new_shard: String) -> Result<(), LbError> {
        // (1) trigger cancellation of the current upstream lifecycle.
        let old_cancel = {
            let guard = self.upstream_cancel.lock().expect("cancel lock poisoned");
            guard.clone()
        };
        old_cancel.cancel();

        // (2) swap the shard field.
        *self.shard.lock().expect("shard lock poisoned") = new_shard.clone();

        // (3) wait (bounded) for the outgoing pump's acknowledgement.
        {
            let mut ack = self.ack.lock().expect("ack lock poisoned");
            match tokio::time::timeout(SWITCH_ACK_TIMEOUT, ack.1.recv()).await {
                Ok(_) => debug!(identity = %self.identity, "switch: received cancellation ack"),
                Err(_) => {
                    warn!(identity = %self.identity, "switch: ack timeout, proceeding anyway");
                    metrics::counter!("ws_lb_switch_ack_timeouts_total").increment(1);
                }
            }
        }

        // (4) fresh cancellation token and acknowledgement channel for the new lifecycle.
        let fresh_cancel = CancellationToken::new();
        *self.upstream_cancel.lock().expect("cancel lock poisoned") = fresh_cancel.clone();
        let (tx, rx) = mpsc::channel(1);
        *self.ack.lock().expect("ack lock poisoned") = (tx.clone(), rx);

        // (5) dial the new upstream.
        let dial_result = dial_upstream(&new_shard, &self.identity).await;
        let (sink, stream) = match dial_result {
            Ok(pair) => pair,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };
        *self.upstream_sink.write().await = Some(sink);

        // (6) restart the upstream-to-downstream pump.
        self.spawn_upstream_to_downstream_pump(stream, fresh_cancel, tx);

        Ok(())
    }

    /// Closes both sockets. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        self.upstream_cancel.lock().expect("cancel lock poisoned").cancel();
        if let Some(mut sink) = self.upstream_sink.write().await.take() {
            let _ = sink.close().await;
        }
        let _ = self.downstream_sink.lock().await.close().await;
    }

    fn spawn_downstream_to_upstream_pump(self: &std::sync::Arc<Self>, mut stream: BoxedStream) {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = conn.shutdown.cancelled() => {
                        debug!(identity = %conn.identity, "downstream pump: connection closed, exiting");
                        break;
                    }
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(msg)) => {
                                let is_close = msg.is_close();
                                let mut guard = conn.upstream_sink.write().await;
                                if let Some(sink) = guard.as_mut() {
                                    if let Err(e) = sink.send(msg).await {
                                        warn!(identity = %conn.identity, error = %e, "downstream pump: upstream write failed");
                                        drop(guard);
                                        break;
                                    }
                                }
                                drop(guard);
                                if is_close {
                                    debug!(identity = %conn.identity, "downstream pump: close frame");
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(identity = %conn.identity, error = %e, "downstream pump: read error");
                                break;
                            }
                            None => {
                                debug!(identity = %conn.identity, "downstream pump: stream ended");
                                break;
                            }
                        }
                    }
                }
            }
            // The downstream pump never restarts: its exit always ends the Connection.
            conn.close().await;
        });
    }

    fn spawn_upstream_to_downstream_pump(
        self: &std::sync::Arc<Self>,
        mut stream: BoxedStream,
        cancel: CancellationToken,
        ack_tx: mpsc::Sender<()>,
    ) {
        let conn = self.clone();
        tokio::spawn(async move {
            let mut cancelled = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        if let Some(mut sink) = conn.upstream_sink.write().await.take() {
                            let _ = sink.close().await;
                        }
                        break;
                    }
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(msg)) => {
                                let is_close = msg.is_close();
                                let mut sink = conn.downstream_sink.lock().await;
                                if let Err(e) = sink.send(msg).await {
                                    warn!(identity = %conn.identity, error = %e, "upstream pump: downstream write failed");
                                    drop(sink);
                                    break;
                                }
                                drop(sink);
                                if is_close {
                                    debug!(identity = %conn.identity, "upstream pump: close frame");
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                error!(identity = %conn.identity, error = %e, "upstream pump: read error");
                                break;
                            }
                            None => {
                                debug!(identity = %conn.identity, "upstream pump: stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            // Non-blocking: silently dropped if switch() is not waiting.
            let _ = ack_tx.try_send(());

            if cancelled {
                // switch() owns the transition; nothing further to do here.
                return;
            }

            // Natural exit (error, EOF, or peer close) — the whole Connection dies.
            conn.close().await;
        });
    }
}

async fn dial_upstream(shard: &str, identity: &str) -> Result<(BoxedSink, BoxedStream), LbError> {
    let url = format!("ws://{shard}");
    let mut request = url
        .into_client_request()
        .map_err(|e| LbError::UpstreamDial(e.to_string()))?;
    request
        .headers_mut()
        .insert("ws-user-id", identity.parse().map_err(|_| LbError::UpstreamDial("invalid identity header".into()))?);

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| LbError::UpstreamDial(e.to_string()))?;

    let (sink, stream) = ws_stream.split();
    Ok((Box::pin(sink), Box::pin(stream)))
}
