//! `WebSocket` session lifecycle: one connected client from upgrade through
//! teardown.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use blitz_core::ServerMessage;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::broadcast::BroadcastHub;
use super::connection::{ClientSession, Delivery, SessionState};
use crate::dispatch::CommandDispatcher;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// How long teardown waits for the writer to flush queued messages.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Registry the session joins.
    pub hub: Arc<BroadcastHub>,
    /// Handles inbound command frames.
    pub dispatcher: Arc<CommandDispatcher>,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Silence after which the client is dropped.
    pub pong_timeout: Duration,
    /// Process-wide stop signal.
    pub shutdown: CancellationToken,
}

/// Why the writer task stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterExit {
    /// Queue closed and drained.
    QueueClosed,
    /// The transport rejected a frame.
    SendFailed,
    /// No pong or other traffic within the timeout.
    Unresponsive,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a Close frame.
    ClientClosed,
    /// Stream ended without a Close frame.
    Disconnected,
    /// Transport read error.
    TransportError,
    /// Server is shutting down.
    Shutdown,
    /// Writer stopped first.
    Writer(WriterExit),
}

impl CloseReason {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Disconnected => "disconnected",
            Self::TransportError => "transport_error",
            Self::Shutdown => "shutdown",
            Self::Writer(WriterExit::QueueClosed) => "queue_closed",
            Self::Writer(WriterExit::SendFailed) => "send_failed",
            Self::Writer(WriterExit::Unresponsive) => "unresponsive",
        }
    }
}

/// Run a `WebSocket` session for a connected client.
pub async fn run_ws_session(ws: WebSocket, session_id: String, ctx: SessionContext) {
    let (ws_tx, ws_rx) = ws.split();
    drive_session(ws_tx, ws_rx, session_id, ctx).await;
}

/// Drive one session over a split transport.
///
/// 1. Registers the session and writes the welcome frame directly
/// 2. Spawns the writer, which drains the queue and sends heartbeat Pings
/// 3. Dispatches inbound text frames and queues each reply for this client
/// 4. Tears down exactly once: unregister, drain the writer, release
///
/// Shutdown and writer exit are observed while a command runs, so a client
/// whose transport died is released without waiting for the command.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn drive_session<S, R, E>(
    mut ws_tx: S,
    mut ws_rx: R,
    session_id: String,
    ctx: SessionContext,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let (session, queue) = ClientSession::channel(session_id.clone(), ctx.queue_capacity);
    let session = Arc::new(session);

    let started = Instant::now();
    ctx.hub.register(Arc::clone(&session)).await;
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(session_id, "client connected");

    match ServerMessage::welcome(&session_id).to_json() {
        Ok(json) => {
            if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                debug!(session_id, error = %e, "failed to send welcome");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize welcome"),
    }
    session.set_state(SessionState::Open);

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        queue,
        Arc::clone(&session),
        ctx.ping_interval,
        ctx.pong_timeout,
    ));
    let mut writer_exit = None;

    let reason = loop {
        let text = tokio::select! {
            () = ctx.shutdown.cancelled() => break CloseReason::Shutdown,
            exit = &mut writer => {
                let exit = exit.unwrap_or(WriterExit::SendFailed);
                writer_exit = Some(exit);
                break CloseReason::Writer(exit);
            }
            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(session_id, error = %e, "transport error");
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::Disconnected,
                };
                session.mark_alive();

                match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(data) => {
                        if let Ok(s) = std::str::from_utf8(&data) {
                            s.to_owned()
                        } else {
                            info!(session_id, len = data.len(), "received non-UTF8 binary frame");
                            continue;
                        }
                    }
                    Message::Close(_) => break CloseReason::ClientClosed,
                    Message::Ping(_) | Message::Pong(_) => continue,
                }
            }
        };

        let reply = tokio::select! {
            () = ctx.shutdown.cancelled() => break CloseReason::Shutdown,
            exit = &mut writer => {
                let exit = exit.unwrap_or(WriterExit::SendFailed);
                writer_exit = Some(exit);
                break CloseReason::Writer(exit);
            }
            reply = ctx.dispatcher.handle_message(&text) => reply,
        };
        match session.send(Arc::new(reply)) {
            Delivery::Queued => {}
            Delivery::Full => warn!(session_id, "outbound queue full, reply dropped"),
            Delivery::Closed => debug!(session_id, "queue closed, reply discarded"),
        }
    };

    // Teardown
    let _ = ctx.hub.unregister_session(&session).await;
    let writer_exit = match writer_exit {
        Some(exit) => exit,
        None => match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
            Ok(exit) => exit.unwrap_or(WriterExit::SendFailed),
            Err(_elapsed) => {
                warn!(session_id, "writer did not drain in time, aborting");
                writer.abort();
                WriterExit::SendFailed
            }
        },
    };
    session.set_state(SessionState::Closed);

    info!(
        session_id,
        reason = reason.as_str(),
        writer = ?writer_exit,
        dropped = session.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Drain `queue` onto `sink`, sending a Ping every `ping_interval`.
///
/// Stops when the queue is closed and empty, a send fails, or the client has
/// been silent longer than `pong_timeout`. The sink is closed on exit.
pub async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<ServerMessage>>,
    session: Arc<ClientSession>,
    ping_interval: Duration,
    pong_timeout: Duration,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    let exit = loop {
        tokio::select! {
            msg = queue.recv() => {
                let Some(msg) = msg else { break WriterExit::QueueClosed };
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break WriterExit::SendFailed;
                }
            }
            _ = ping.tick() => {
                if !session.check_alive() && session.last_pong_elapsed() > pong_timeout {
                    warn!(session_id = %session.id, ?pong_timeout, "client unresponsive, disconnecting");
                    break WriterExit::Unresponsive;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break WriterExit::SendFailed;
                }
            }
        }
    };
    let _ = sink.close().await;
    exit
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::dispatch::CommandTable;
    use async_trait::async_trait;
    use blitz_core::{CommandExecutor, ExecutionError, Invocation, Status};
    use futures::channel::mpsc as fmpsc;
    use tokio::sync::Notify;
    use tokio::task::JoinHandle;

    fn session(capacity: usize) -> (Arc<ClientSession>, mpsc::Receiver<Arc<ServerMessage>>) {
        let (session, rx) = ClientSession::channel("test".into(), capacity);
        (Arc::new(session), rx)
    }

    fn text_of(msg: &Message) -> serde_json::Value {
        match msg {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::Shutdown.as_str(), "shutdown");
        assert_eq!(
            CloseReason::Writer(WriterExit::Unresponsive).as_str(),
            "unresponsive"
        );
    }

    #[tokio::test]
    async fn writer_drains_queue_in_order_then_closes() {
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let (session, queue) = session(8);

        for name in ["a", "b", "c"] {
            assert_eq!(
                session.send(Arc::new(ServerMessage::success(name))),
                Delivery::Queued
            );
        }
        assert!(session.close());

        let exit = write_loop(
            sink,
            queue,
            Arc::clone(&session),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(exit, WriterExit::QueueClosed);

        let mut commands = Vec::new();
        while let Some(frame) = frames.next().await {
            commands.push(text_of(&frame)["command"].as_str().unwrap().to_owned());
        }
        assert_eq!(commands, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn writer_stops_on_send_failure() {
        let (sink, frames) = fmpsc::unbounded::<Message>();
        drop(frames);
        let (session, queue) = session(8);
        let _ = session.send(Arc::new(ServerMessage::success("play")));

        let exit = write_loop(
            sink,
            queue,
            session,
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(exit, WriterExit::SendFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn writer_pings_and_drops_silent_client() {
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let (session, queue) = session(8);

        let exit = write_loop(
            sink,
            queue,
            Arc::clone(&session),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(exit, WriterExit::Unresponsive);

        let mut pings = 0;
        while let Some(frame) = frames.next().await {
            assert!(matches!(frame, Message::Ping(_)));
            pings += 1;
        }
        assert!(pings >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn active_client_is_kept() {
        let (sink, _frames) = fmpsc::unbounded::<Message>();
        let (session, queue) = session(8);

        let writer = tokio::spawn(write_loop(
            sink,
            queue,
            Arc::clone(&session),
            Duration::from_secs(30),
            Duration::from_secs(60),
        ));

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            session.mark_alive();
        }
        assert!(!writer.is_finished());

        assert!(session.close());
        assert_eq!(writer.await.unwrap(), WriterExit::QueueClosed);
    }

    // ── Session driver ──

    /// Executor whose commands never finish on their own.
    #[derive(Default)]
    struct StallingExecutor {
        started: Notify,
    }

    #[async_trait]
    impl CommandExecutor for StallingExecutor {
        async fn execute(&self, _invocation: &Invocation) -> Result<(), ExecutionError> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn context(executor: Arc<dyn CommandExecutor>) -> SessionContext {
        SessionContext {
            hub: Arc::new(BroadcastHub::new()),
            dispatcher: Arc::new(CommandDispatcher::new(
                CommandTable::new(&BTreeMap::new()),
                executor,
                Duration::from_secs(600),
            )),
            queue_capacity: 8,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
            shutdown: CancellationToken::new(),
        }
    }

    struct Client {
        inbound: fmpsc::UnboundedSender<Result<Message, axum::Error>>,
        outbound: fmpsc::UnboundedReceiver<Message>,
        task: JoinHandle<()>,
    }

    impl Client {
        async fn connect(ctx: &SessionContext) -> Self {
            let (sink, mut outbound) = fmpsc::unbounded::<Message>();
            let (inbound, stream) = fmpsc::unbounded::<Result<Message, axum::Error>>();
            let task = tokio::spawn(drive_session(sink, stream, "c1".into(), ctx.clone()));

            let welcome = text_of(&outbound.next().await.unwrap());
            assert_eq!(welcome["data"]["clientId"], "c1");
            Self {
                inbound,
                outbound,
                task,
            }
        }

        fn send_text(&self, text: &'static str) {
            self.inbound
                .unbounded_send(Ok(Message::Text(text.into())))
                .unwrap();
        }
    }

    async fn finished(task: JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("session should end promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn replies_then_ends_on_close_frame() {
        let ctx = context(Arc::new(StallingExecutor::default()));
        let mut client = Client::connect(&ctx).await;
        assert_eq!(ctx.hub.count().await, 1);

        client.send_text(r#"{"command":"ping"}"#);
        let reply = text_of(&client.outbound.next().await.unwrap());
        assert_eq!(reply["message"], "pong");

        client.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        finished(client.task).await;
        assert_eq!(ctx.hub.count().await, 0);
    }

    #[tokio::test]
    async fn dead_transport_is_released_while_command_runs() {
        let exec = Arc::new(StallingExecutor::default());
        let ctx = context(Arc::clone(&exec) as Arc<dyn CommandExecutor>);
        let client = Client::connect(&ctx).await;

        client.send_text(r#"{"command":"play"}"#);
        exec.started.notified().await;

        // The next write fails and ends the writer.
        drop(client.outbound);
        let _ = ctx.hub.broadcast(ServerMessage::new(Status::Player)).await;

        finished(client.task).await;
        assert_eq!(ctx.hub.count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_running_command() {
        let exec = Arc::new(StallingExecutor::default());
        let ctx = context(Arc::clone(&exec) as Arc<dyn CommandExecutor>);
        let client = Client::connect(&ctx).await;

        client.send_text(r#"{"command":"play"}"#);
        exec.started.notified().await;
        ctx.shutdown.cancel();

        finished(client.task).await;
        assert_eq!(ctx.hub.count().await, 0);
    }
}
