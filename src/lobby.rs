//! Async connection to a game server ("lobby").
//!
//! [`LobbyClient`] is a thin handle that talks to a background transport loop
//! task via an unbounded MPSC channel. Everything the server tells the client
//! is folded into shared state that the tick-driven state machine polls; no
//! callback ever runs on the tick thread.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = connect_somehow().await;
//! let client = LobbyClient::start(transport, LobbyConfig::new());
//!
//! // later, from a state's update():
//! if let Some(connection_id) = client.connection_id() {
//!     client.send(ClientMessage::OpenMatchAck { connection_id })?;
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{HandoffError, Result};
use crate::protocol::{ClientMessage, ConnectionId, Envelope, ServerMessage};
use crate::transport::Transport;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Sentinel stored while the server has not reported a value yet.
/// Wire values are `u32`, so they can never collide with it.
const UNKNOWN: u64 = u64::MAX;

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`LobbyClient`] connection.
///
/// # Example
///
/// ```
/// use match_handoff::lobby::LobbyConfig;
/// use std::time::Duration;
///
/// let config = LobbyConfig::new().with_shutdown_timeout(Duration::from_secs(5));
/// assert!(config.sdk_version.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// SDK version string sent in the `Hello` message.
    /// Defaults to the crate version at compile time.
    pub sdk_version: Option<String>,
    /// Timeout for [`LobbyClient::shutdown`].
    ///
    /// Defaults to **1 second**. A zero timeout aborts the transport loop
    /// immediately.
    pub shutdown_timeout: Duration,
}

impl LobbyConfig {
    pub fn new() -> Self {
        Self {
            sdk_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the transport loop.
struct LobbyState {
    connected: AtomicBool,
    connection_id: AtomicU64,
    num_players: AtomicU64,
    ack_confirmed: AtomicBool,
}

impl LobbyState {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            connection_id: AtomicU64::new(UNKNOWN),
            num_players: AtomicU64::new(UNKNOWN),
            ack_confirmed: AtomicBool::new(false),
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Handle to one connection to a game server.
///
/// Created via [`LobbyClient::start`]. All methods take `&self` so the handle
/// can sit behind an `Arc` shared by several states.
pub struct LobbyClient {
    /// Sender half of the command channel to the transport loop.
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    /// Shared state updated by the transport loop.
    state: Arc<LobbyState>,
    /// Handle to the background transport loop task.
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
    /// Signals the transport loop to flush and close.
    shutdown_tx: StdMutex<Option<oneshot::Sender<()>>>,
    shutdown_timeout: Duration,
}

impl LobbyClient {
    /// Start the transport loop for an already-connected transport.
    ///
    /// The loop sends a [`ClientMessage::Hello`] before anything else.
    /// Must be called from within a tokio runtime.
    pub fn start(transport: impl Transport, config: LobbyConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(LobbyState::new());
        let loop_state = Arc::clone(&state);

        // Cannot fail: the receiver is alive until the loop is spawned.
        let _ = cmd_tx.send(ClientMessage::Hello {
            sdk_version: config.sdk_version,
        });

        let task = tokio::spawn(transport_loop(transport, cmd_rx, loop_state, shutdown_rx));

        Self {
            cmd_tx,
            state,
            task: StdMutex::new(Some(task)),
            shutdown_tx: StdMutex::new(Some(shutdown_tx)),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Queue a message for the server.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotConnected`] if the connection has closed.
    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        if !self.state.connected.load(Ordering::Acquire) {
            return Err(HandoffError::NotConnected);
        }
        self.cmd_tx
            .send(msg)
            .map_err(|_| HandoffError::NotConnected)
    }

    /// Close the connection without waiting.
    ///
    /// Messages queued before this call are still written before the
    /// transport is closed. Calling `close` more than once is a no-op.
    pub fn close(&self) {
        let tx = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            debug!("LobbyClient: close requested");
            let _ = tx.send(());
        }
        self.state.connected.store(false, Ordering::Release);
    }

    /// Close the connection and wait for the transport loop to exit.
    ///
    /// If the loop does not exit within the configured timeout it is aborted.
    pub async fn shutdown(&self) {
        self.close();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("lobby transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("lobby transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("lobby transport loop aborted: {join_err}");
                    }
                }
            }
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the connection is believed to be open.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    /// Connection id assigned by the server, once `Welcome` has arrived.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self.state.connection_id.load(Ordering::Acquire) {
            UNKNOWN => None,
            id => ConnectionId::try_from(id).ok(),
        }
    }

    /// Player count most recently reported by the server.
    pub fn num_players(&self) -> Option<usize> {
        match self.state.num_players.load(Ordering::Acquire) {
            UNKNOWN => None,
            n => usize::try_from(n).ok(),
        }
    }

    /// Returns `true` once the server confirmed receipt of our `OpenMatchAck`.
    pub fn ack_confirmed(&self) -> bool {
        self.state.ack_confirmed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for LobbyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyClient")
            .field("connected", &self.is_connected())
            .field("connection_id", &self.connection_id())
            .field("num_players", &self.num_players())
            .finish()
    }
}

impl Drop for LobbyClient {
    fn drop(&mut self) {
        // A requested close is left to flush and finish on its own. Otherwise
        // no executor is available here to drive a graceful close, so the
        // loop future is dropped by aborting its task.
        let closing = self
            .shutdown_tx
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none();
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if !closing {
                task.abort();
            }
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Background loop that multiplexes send/receive via `tokio::select!`.
///
/// Exits when the command channel closes, the close signal fires, the
/// transport reports a clean close, or a transport error occurs.
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    state: Arc<LobbyState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("lobby transport loop started");

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(msg) => {
                        if let Err(e) = send_message(&mut transport, msg).await {
                            error!("lobby transport send error: {e}");
                            break;
                        }
                    }
                    None => {
                        debug!("command channel closed, shutting down lobby transport loop");
                        let _ = transport.close().await;
                        break;
                    }
                }
            }

            _ = &mut shutdown_rx => {
                debug!("lobby close signal received; flushing queued messages");
                while let Ok(msg) = cmd_rx.try_recv() {
                    if let Err(e) = send_message(&mut transport, msg).await {
                        warn!("failed to flush queued message before close: {e}");
                        break;
                    }
                }
                let _ = transport.close().await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<Envelope<ServerMessage>>(&text) {
                            Ok(envelope) if envelope.is_consistent() => {
                                update_state(&state, &envelope.payload);
                            }
                            Ok(envelope) => {
                                warn!(
                                    "dropping server message with mismatched code {:?}",
                                    envelope.msg_type
                                );
                            }
                            Err(e) => {
                                warn!("failed to deserialize server message: {e}, raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("lobby transport receive error: {e}");
                        break;
                    }
                    None => {
                        debug!("lobby transport closed by server");
                        break;
                    }
                }
            }
        }
    }

    state.connected.store(false, Ordering::Release);
    debug!("lobby transport loop exited");
}

/// Serialize a message into its envelope and write it to the transport.
///
/// Serialization failures are logged and swallowed; only transport errors
/// end the loop.
async fn send_message(transport: &mut impl Transport, msg: ClientMessage) -> Result<()> {
    debug!("sending client message: {:?}", msg.msg_type());
    match serde_json::to_string(&Envelope::client(msg)) {
        Ok(json) => transport.send(json).await,
        Err(e) => {
            error!("failed to serialize ClientMessage: {e}");
            Ok(())
        }
    }
}

/// Fold a received [`ServerMessage`] into the shared state.
fn update_state(state: &LobbyState, msg: &ServerMessage) {
    match msg {
        ServerMessage::Welcome {
            connection_id,
            num_players,
        } => {
            state
                .connection_id
                .store(u64::from(*connection_id), Ordering::Release);
            state
                .num_players
                .store(u64::from(*num_players), Ordering::Release);
            debug!("lobby: welcomed as connection #{connection_id} ({num_players} player(s))");
        }
        ServerMessage::PlayerCount { num_players } => {
            state
                .num_players
                .store(u64::from(*num_players), Ordering::Release);
            debug!("lobby: {num_players} player(s)");
        }
        ServerMessage::OpenMatchPrompt => {
            debug!("lobby: server asked us to join matchmaking");
        }
        ServerMessage::OpenMatchAckBack { connection_id } => {
            state.ack_confirmed.store(true, Ordering::Release);
            debug!("lobby: server confirmed open-match ack for #{connection_id}");
        }
        ServerMessage::Error { message } => {
            warn!("lobby server error: {message}");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records sent messages and replays scripted responses.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, HandoffError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, HandoffError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), HandoffError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, HandoffError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), HandoffError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn server_json(msg: ServerMessage) -> String {
        serde_json::to_string(&Envelope::server(msg)).unwrap()
    }

    fn sent_messages(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientMessage> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|raw| {
                serde_json::from_str::<Envelope<ClientMessage>>(raw)
                    .unwrap()
                    .payload
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_sends_hello_first() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        let messages = sent_messages(&sent);
        assert!(matches!(messages[0], ClientMessage::Hello { sdk_version: Some(_) }));
        assert_eq!(client.num_players(), None);
        assert_eq!(client.connection_id(), None);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn welcome_sets_connection_id_and_player_count() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(server_json(
            ServerMessage::Welcome {
                connection_id: 3,
                num_players: 2,
            },
        )))]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        assert_eq!(client.connection_id(), Some(3));
        assert_eq!(client.num_players(), Some(2));
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn largest_wire_values_are_not_mistaken_for_unknown() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(server_json(
            ServerMessage::Welcome {
                connection_id: u32::MAX,
                num_players: u32::MAX,
            },
        )))]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        assert_eq!(client.connection_id(), Some(u32::MAX));
        assert_eq!(client.num_players(), usize::try_from(u32::MAX).ok());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn ack_back_is_tracked() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok(server_json(ServerMessage::OpenMatchPrompt))),
            Some(Ok(server_json(ServerMessage::OpenMatchAckBack { connection_id: 1 }))),
        ]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        assert!(client.ack_confirmed());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn mismatched_or_garbage_messages_are_ignored() {
        let (transport, _sent, _closed) = MockTransport::new(vec![
            Some(Ok(r#"{"msg_type":52,"payload":{"type":"OpenMatchAckBack","data":{"connection_id":1}}}"#.to_string())),
            Some(Ok("not json".to_string())),
            Some(Ok(server_json(ServerMessage::PlayerCount { num_players: 4 }))),
        ]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        assert!(!client.ack_confirmed());
        assert_eq!(client.num_players(), Some(4));
        assert!(client.is_connected());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn close_flushes_queued_messages_before_closing() {
        let (transport, sent, closed) = MockTransport::new(vec![]);
        let client = LobbyClient::start(transport, LobbyConfig::new());

        client
            .send(ClientMessage::OpenMatchAck { connection_id: 9 })
            .unwrap();
        client.close();
        settle().await;

        let messages = sent_messages(&sent);
        assert_eq!(
            messages.last(),
            Some(&ClientMessage::OpenMatchAck { connection_id: 9 })
        );
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn dropping_a_closing_client_still_flushes() {
        let (transport, sent, closed) = MockTransport::new(vec![]);
        let client = LobbyClient::start(transport, LobbyConfig::new());

        client
            .send(ClientMessage::OpenMatchAck { connection_id: 2 })
            .unwrap();
        client.close();
        drop(client);
        settle().await;

        let messages = sent_messages(&sent);
        assert!(messages.contains(&ClientMessage::OpenMatchAck { connection_id: 2 }));
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn send_after_close_is_not_connected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        client.close();
        client.close();

        let result = client.send(ClientMessage::Ping);
        assert!(matches!(result, Err(HandoffError::NotConnected)));
    }

    #[tokio::test]
    async fn server_close_marks_disconnected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        assert!(!client.is_connected());
        assert!(matches!(
            client.send(ClientMessage::Ping),
            Err(HandoffError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn receive_error_marks_disconnected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Err(
            HandoffError::TransportReceive("boom".into()),
        ))]);
        let client = LobbyClient::start(transport, LobbyConfig::new());
        settle().await;

        assert!(!client.is_connected());
    }

    /// Transport whose `close()` never completes.
    struct HangingCloseTransport {
        dropped: Arc<AtomicBool>,
    }

    impl Drop for HangingCloseTransport {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::Release);
        }
    }

    #[async_trait]
    impl Transport for HangingCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), HandoffError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, HandoffError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), HandoffError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shutdown_timeout_aborts_stuck_transport_task() {
        let dropped = Arc::new(AtomicBool::new(false));
        let transport = HangingCloseTransport {
            dropped: Arc::clone(&dropped),
        };
        let config = LobbyConfig::new().with_shutdown_timeout(Duration::from_millis(20));
        let client = LobbyClient::start(transport, config);

        client.shutdown().await;

        assert!(dropped.load(Ordering::Acquire));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let client = LobbyClient::start(transport, LobbyConfig::new());

        let debug_str = format!("{client:?}");
        assert!(debug_str.contains("LobbyClient"));
        assert!(debug_str.contains("connection_id"));

        client.shutdown().await;
    }
}
