//! The network-manager collaborator.
//!
//! States only ever call the coarse operations on [`NetworkManager`]:
//! connect, send, shut everything down, and a few read-only queries. Connection
//! internals stay behind the trait.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{HandoffError, Result};
use crate::lobby::{LobbyClient, LobbyConfig};
use crate::protocol::{ClientMessage, ConnectionId, Endpoint};
use crate::transport::{Connector, Transport};

/// Which side of a session this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkRole {
    Client,
    Server,
    /// Server with a local client attached.
    Host,
}

impl NetworkRole {
    pub fn is_client(self) -> bool {
        matches!(self, Self::Client | Self::Host)
    }

    pub fn is_server(self) -> bool {
        matches!(self, Self::Server | Self::Host)
    }
}

/// Coarse-grained access to the process' network connections.
pub trait NetworkManager: Send + Sync {
    fn role(&self) -> NetworkRole;

    /// Number of fully established player sessions, if known.
    fn num_players(&self) -> Option<usize>;

    /// Returns `true` while a client connection is open.
    fn is_client_active(&self) -> bool;

    /// Id the server assigned to the active client connection.
    fn connection_id(&self) -> Option<ConnectionId>;

    /// Send a message over the active client connection.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::NotConnected`] when no connection is open.
    fn send(&self, message: ClientMessage) -> Result<()>;

    /// Returns `true` once the origin server confirmed our
    /// [`ClientMessage::OpenMatchAck`].
    fn ack_confirmed(&self) -> bool {
        false
    }

    /// Close every client connection. Idempotent.
    fn shutdown_all(&self);

    /// Start connecting to `endpoint`. Completion is observed by polling
    /// [`is_client_active`](NetworkManager::is_client_active).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection attempt could not be started.
    fn connect(&self, endpoint: &Endpoint) -> Result<()>;
}

/// [`NetworkManager`] backed by at most one [`LobbyClient`] at a time.
pub struct SessionNetwork {
    role: NetworkRole,
    connector: Arc<dyn Connector>,
    config: LobbyConfig,
    current: Arc<StdMutex<Option<LobbyClient>>>,
}

impl SessionNetwork {
    pub fn new(role: NetworkRole, connector: Arc<dyn Connector>, config: LobbyConfig) -> Self {
        Self {
            role,
            connector,
            config,
            current: Arc::new(StdMutex::new(None)),
        }
    }

    /// Adopt an already-connected transport as the active connection,
    /// closing whatever connection was active before.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, transport: impl Transport) {
        let client = LobbyClient::start(transport, self.config.clone());
        install(&self.current, client);
    }

    fn with_client<R>(&self, f: impl FnOnce(&LobbyClient) -> R) -> Option<R> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(f)
    }
}

impl NetworkManager for SessionNetwork {
    fn role(&self) -> NetworkRole {
        self.role
    }

    fn num_players(&self) -> Option<usize> {
        self.with_client(LobbyClient::num_players).flatten()
    }

    fn is_client_active(&self) -> bool {
        self.with_client(LobbyClient::is_connected).unwrap_or(false)
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        self.with_client(LobbyClient::connection_id).flatten()
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.with_client(|client| client.send(message))
            .unwrap_or(Err(HandoffError::NotConnected))
    }

    fn ack_confirmed(&self) -> bool {
        self.with_client(LobbyClient::ack_confirmed)
            .unwrap_or(false)
    }

    fn shutdown_all(&self) {
        if let Some(client) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            info!("closing connection {:?}", client.connection_id());
            client.close();
        }
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HandoffError::NoRuntime)?;
        let connector = Arc::clone(&self.connector);
        let current = Arc::clone(&self.current);
        let config = self.config.clone();
        let endpoint = endpoint.clone();

        info!("connecting to {endpoint}");
        runtime.spawn(async move {
            match connector.connect(&endpoint).await {
                Ok(transport) => {
                    debug!("connected to {endpoint}");
                    install(&current, LobbyClient::start(transport, config));
                }
                Err(e) => warn!("could not connect to {endpoint}: {e}"),
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for SessionNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionNetwork")
            .field("role", &self.role)
            .field("client_active", &self.is_client_active())
            .finish()
    }
}

/// Make `client` the active connection, closing the previous one.
fn install(current: &StdMutex<Option<LobbyClient>>, client: LobbyClient) {
    let previous = current
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(client);
    if let Some(previous) = previous {
        debug!("replacing active connection {:?}", previous.connection_id());
        previous.close();
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::{Envelope, ServerMessage};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Transport fed by a channel; everything sent is forwarded to `out`.
    struct ChannelTransport {
        rx: mpsc::UnboundedReceiver<String>,
        out: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Transport for ChannelTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.out
                .send(message)
                .map_err(|e| HandoffError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.rx.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            Err(HandoffError::Connect(format!("{endpoint} refused")))
        }
    }

    /// Connector whose "server" greets with `Welcome` and then stays silent.
    struct LoopbackConnector {
        welcome_id: ConnectionId,
        server_ends: StdMutex<
            Vec<(
                mpsc::UnboundedSender<String>,
                mpsc::UnboundedReceiver<String>,
            )>,
        >,
    }

    impl LoopbackConnector {
        fn new(welcome_id: ConnectionId) -> Self {
            Self {
                welcome_id,
                server_ends: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            let (transport, tx, out_rx) = channel_transport();
            let welcome = Envelope::server(ServerMessage::Welcome {
                connection_id: self.welcome_id,
                num_players: 1,
            });
            tx.send(serde_json::to_string(&welcome)?)
                .map_err(|e| HandoffError::Connect(e.to_string()))?;
            self.server_ends.lock().unwrap().push((tx, out_rx));
            Ok(Box::new(transport))
        }
    }

    fn channel_transport() -> (
        ChannelTransport,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (out, out_rx) = mpsc::unbounded_channel();
        (ChannelTransport { rx, out }, tx, out_rx)
    }

    #[test]
    fn host_is_both_client_and_server() {
        assert!(NetworkRole::Host.is_client());
        assert!(NetworkRole::Host.is_server());
        assert!(NetworkRole::Client.is_client());
        assert!(!NetworkRole::Client.is_server());
        assert!(!NetworkRole::Server.is_client());
    }

    #[tokio::test]
    async fn without_connection_everything_degrades() {
        let network =
            SessionNetwork::new(NetworkRole::Client, Arc::new(RefusingConnector), LobbyConfig::new());

        assert!(!network.is_client_active());
        assert_eq!(network.num_players(), None);
        assert_eq!(network.connection_id(), None);
        assert!(matches!(
            network.send(ClientMessage::Ping),
            Err(HandoffError::NotConnected)
        ));
        network.shutdown_all();
    }

    #[tokio::test]
    async fn attached_transport_becomes_active_connection() {
        let network =
            SessionNetwork::new(NetworkRole::Client, Arc::new(RefusingConnector), LobbyConfig::new());
        let (transport, server_tx, _out) = channel_transport();
        let welcome = Envelope::server(ServerMessage::Welcome {
            connection_id: 5,
            num_players: 3,
        });
        server_tx.send(serde_json::to_string(&welcome).unwrap()).unwrap();

        network.attach(transport);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(network.is_client_active());
        assert_eq!(network.connection_id(), Some(5));
        assert_eq!(network.num_players(), Some(3));

        network.shutdown_all();
        assert!(!network.is_client_active());
        network.shutdown_all();
    }

    #[tokio::test]
    async fn ack_back_is_visible_until_the_connection_closes() {
        let network =
            SessionNetwork::new(NetworkRole::Client, Arc::new(RefusingConnector), LobbyConfig::new());
        let (transport, server_tx, _out) = channel_transport();
        network.attach(transport);
        assert!(!network.ack_confirmed());

        let ack_back = Envelope::server(ServerMessage::OpenMatchAckBack { connection_id: 5 });
        server_tx.send(serde_json::to_string(&ack_back).unwrap()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(network.ack_confirmed());

        network.shutdown_all();
        assert!(!network.ack_confirmed());
    }

    #[tokio::test]
    async fn connect_installs_new_connection() {
        let network = SessionNetwork::new(
            NetworkRole::Client,
            Arc::new(LoopbackConnector::new(11)),
            LobbyConfig::new(),
        );

        tokio_test::assert_ok!(network.connect(&Endpoint::new("10.0.0.9", 7777)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(network.is_client_active());
        assert_eq!(network.connection_id(), Some(11));
    }

    #[tokio::test]
    async fn refused_connect_leaves_no_connection() {
        let network =
            SessionNetwork::new(NetworkRole::Client, Arc::new(RefusingConnector), LobbyConfig::new());

        tokio_test::assert_ok!(network.connect(&Endpoint::new("10.0.0.9", 7777)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!network.is_client_active());
    }

    #[test]
    fn connect_outside_runtime_is_rejected() {
        let network =
            SessionNetwork::new(NetworkRole::Client, Arc::new(RefusingConnector), LobbyConfig::new());
        let result = network.connect(&Endpoint::new("10.0.0.9", 7777));
        assert!(matches!(result, Err(HandoffError::NoRuntime)));
    }
}
