//! # Loopback Handoff Example
//!
//! Drives a complete lobby-to-matchmaking handoff over in-process loopback
//! transports:
//!
//! - an origin lobby server that greets the client and waits for its ack
//! - a matchmaking frontend that assigns every ticket to `10.0.0.42:7777`
//! - the matched session, which greets the client with a new connection id
//!
//! ## Running
//!
//! ```sh
//! cargo run --example loopback_handoff
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use match_handoff::matchmaking::DEFAULT_FRONTEND_PORT;
use match_handoff::protocol::{ClientMessage, Envelope, FrontendRequest, FrontendResponse};
use match_handoff::{
    Connector, Endpoint, HandoffConfig, HandoffError, LobbyConfig, NetworkManager, NetworkRole,
    OpenMatchClient, OpenMatchConfig, OpenMatchStart, ServerMessage, Services, SessionNetwork,
    StateKind, StateManager, Transport,
};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of a loopback pair.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of a loopback pair.
pub struct LoopbackServer {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), HandoffError> {
        self.tx
            .send(message)
            .map_err(|e| HandoffError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, HandoffError>> {
        self.rx.recv().await.map(Ok)
    }

    /// Dropping the channels is enough.
    async fn close(&mut self) -> Result<(), HandoffError> {
        Ok(())
    }
}

fn welcome(connection_id: u32, num_players: u32) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope::server(ServerMessage::Welcome {
        connection_id,
        num_players,
    }))
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A connector that fakes the frontend and the matched session
// ─────────────────────────────────────────────────────────────────────

struct LoopbackConnector {
    assigned: Endpoint,
    sessions: StdMutex<Vec<LoopbackServer>>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, HandoffError> {
        let (transport, server) = loopback_pair();
        if endpoint.port == DEFAULT_FRONTEND_PORT {
            tracing::info!("frontend: ticket connection from client");
            tokio::spawn(serve_frontend(server, self.assigned.clone()));
        } else {
            tracing::info!("session {endpoint}: client joined");
            server
                .tx
                .send(welcome(42, 4)?)
                .map_err(|e| HandoffError::Connect(e.to_string()))?;
            self.sessions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(server);
        }
        Ok(Box::new(transport))
    }
}

async fn serve_frontend(mut server: LoopbackServer, assigned: Endpoint) {
    while let Some(text) = server.rx.recv().await {
        let replies = match serde_json::from_str::<FrontendRequest>(&text) {
            Ok(FrontendRequest::CreatePlayer { player }) => {
                tracing::info!("frontend: ticket {} created", player.id);
                vec![
                    FrontendResponse::PlayerCreated { success: true },
                    FrontendResponse::Assignment {
                        id: player.id,
                        endpoint: assigned.clone(),
                    },
                ]
            }
            Ok(FrontendRequest::DeletePlayer { id }) => {
                tracing::info!("frontend: ticket {id} deleted");
                vec![FrontendResponse::PlayerDeleted { success: true }]
            }
            Err(e) => vec![FrontendResponse::Error {
                message: e.to_string(),
            }],
        };
        for reply in replies {
            let Ok(json) = serde_json::to_string(&reply) else {
                return;
            };
            if server.tx.send(json).is_err() {
                return;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire the state machine to the collaborators and tick it
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let connector = Arc::new(LoopbackConnector {
        assigned: Endpoint::new("10.0.0.42", 7777),
        sessions: StdMutex::new(Vec::new()),
    });

    // ── Origin lobby connection ─────────────────────────────────────
    let network = Arc::new(SessionNetwork::new(
        NetworkRole::Client,
        connector.clone(),
        LobbyConfig::new(),
    ));
    let (origin, mut origin_server) = loopback_pair();
    origin_server.tx.send(welcome(7, 2)?)?;
    network.attach(origin);

    let services = Services::new();
    services.set_network(network.clone());
    services.set_matchmaking(Arc::new(OpenMatchClient::new(
        connector.clone(),
        OpenMatchConfig::new(),
    )));

    // Wait for the origin server's Welcome to land.
    while network.connection_id().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // ── Tick the state machine until the handoff completes ──────────
    let mut manager = StateManager::new();
    manager.push_state(Box::new(OpenMatchStart::new(
        Arc::clone(&services),
        HandoffConfig::new().with_frontend_host("frontend.local"),
    )));

    let mut ticks = 0;
    while manager.current_state().kind() != StateKind::OpenMatchFound {
        manager.update()?;
        ticks += 1;
        if ticks > 500 {
            return Err("handoff did not complete".into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tracing::info!("handoff completed after {ticks} ticks");

    // ── What the origin server saw ──────────────────────────────────
    while let Ok(text) = origin_server.rx.try_recv() {
        let envelope: Envelope<ClientMessage> = serde_json::from_str(&text)?;
        tracing::info!("origin received {:?}", envelope.payload);
    }

    while network.connection_id() != Some(42) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tracing::info!(
        "joined matched session as connection {:?} with {:?} players",
        network.connection_id(),
        network.num_players()
    );

    network.shutdown_all();
    Ok(())
}
