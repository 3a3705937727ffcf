#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! End-to-end handoff over loopback transports with the concrete network
//! manager and matchmaking client.

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{loopback_pair, LoopbackServer};
use match_handoff::matchmaking::DEFAULT_FRONTEND_PORT;
use match_handoff::protocol::{Envelope, FrontendRequest, FrontendResponse};
use match_handoff::{
    ClientMessage, Connector, Endpoint, HandoffConfig, LobbyConfig, NetworkManager, NetworkRole,
    OpenMatchClient, OpenMatchConfig, OpenMatchStart, ServerMessage, Services, SessionNetwork,
    StateKind, StateManager, Transport,
};

fn welcome(connection_id: u32, num_players: u32) -> String {
    serde_json::to_string(&Envelope::server(ServerMessage::Welcome {
        connection_id,
        num_players,
    }))
    .unwrap()
}

/// Serves the matchmaking frontend on its port and new sessions elsewhere.
struct FakeCluster {
    assigned: Endpoint,
    sessions: StdMutex<Vec<LoopbackServer>>,
    dialed: StdMutex<Vec<Endpoint>>,
}

impl FakeCluster {
    fn new(assigned: Endpoint) -> Arc<Self> {
        Arc::new(Self {
            assigned,
            sessions: StdMutex::new(Vec::new()),
            dialed: StdMutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Connector for FakeCluster {
    async fn connect(&self, endpoint: &Endpoint) -> match_handoff::Result<Box<dyn Transport>> {
        self.dialed.lock().unwrap().push(endpoint.clone());
        let (transport, server) = loopback_pair();
        if endpoint.port == DEFAULT_FRONTEND_PORT {
            tokio::spawn(serve_frontend(server, self.assigned.clone()));
        } else {
            server.tx.send(welcome(42, 4)).unwrap();
            self.sessions.lock().unwrap().push(server);
        }
        Ok(Box::new(transport))
    }
}

async fn serve_frontend(mut server: LoopbackServer, assigned: Endpoint) {
    while let Some(text) = server.rx.recv().await {
        let replies = match serde_json::from_str::<FrontendRequest>(&text).unwrap() {
            FrontendRequest::CreatePlayer { player } => vec![
                FrontendResponse::PlayerCreated { success: true },
                FrontendResponse::Assignment {
                    id: player.id,
                    endpoint: assigned.clone(),
                },
            ],
            FrontendRequest::DeletePlayer { .. } => {
                vec![FrontendResponse::PlayerDeleted { success: true }]
            }
        };
        for reply in replies {
            let _ = server.tx.send(serde_json::to_string(&reply).unwrap());
        }
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn client_hands_off_from_lobby_to_matched_session() {
    let cluster = FakeCluster::new(Endpoint::new("10.0.0.42", 7777));
    let network = Arc::new(SessionNetwork::new(
        NetworkRole::Client,
        cluster.clone(),
        LobbyConfig::new(),
    ));

    let (origin, mut origin_server) = loopback_pair();
    origin_server.tx.send(welcome(7, 2)).unwrap();
    network.attach(origin);
    wait_until(|| network.connection_id() == Some(7)).await;

    let services = Services::new();
    services.set_network(network.clone());
    services.set_matchmaking(Arc::new(OpenMatchClient::new(
        cluster.clone(),
        OpenMatchConfig::new(),
    )));

    let mut manager = StateManager::new();
    manager.push_state(Box::new(OpenMatchStart::new(
        Arc::clone(&services),
        HandoffConfig::new()
            .with_frontend_host("frontend.local")
            .with_disconnect_grace(Duration::from_millis(30)),
    )));

    for _ in 0..200 {
        manager.update().unwrap();
        if manager.current_state().kind() == StateKind::OpenMatchFound {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(manager.current_state().kind(), StateKind::OpenMatchFound);

    // The origin saw Hello, then the ack, then the close.
    wait_until(|| origin_server.closed.load(Ordering::SeqCst)).await;
    let mut received = Vec::new();
    while let Ok(text) = origin_server.rx.try_recv() {
        let envelope: Envelope<ClientMessage> = serde_json::from_str(&text).unwrap();
        received.push(envelope.payload);
    }
    assert!(matches!(received[0], ClientMessage::Hello { .. }));
    assert_eq!(
        received[1..],
        [ClientMessage::OpenMatchAck { connection_id: 7 }]
    );

    wait_until(|| network.connection_id() == Some(42)).await;
    assert_eq!(network.num_players(), Some(4));
    assert_eq!(
        *cluster.dialed.lock().unwrap(),
        vec![
            Endpoint::new("frontend.local", DEFAULT_FRONTEND_PORT),
            Endpoint::new("10.0.0.42", 7777),
        ]
    );
}
