#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the integration tests.
//!
//! Provides recording mocks for the network manager, the matchmaking client
//! and the debug display, plus a channel-based loopback transport.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use match_handoff::protocol::{ConnectionId, UNRESOLVED_PORT};
use match_handoff::{
    ClientMessage, DebugDisplay, Endpoint, HandoffError, MatchFilter, MatchmakingClient,
    NetworkManager, NetworkRole, Services, Transport,
};
use tokio::sync::mpsc;

// ── Call log ────────────────────────────────────────────────────────

/// Everything the state machine asked of its collaborators, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Send(ClientMessage),
    ShutdownAll,
    NetworkConnect(Endpoint),
    MatchmakingConnect { host: String, filter: MatchFilter },
    Cancel,
}

pub type CallLog = Arc<StdMutex<Vec<Call>>>;

pub fn calls(log: &CallLog) -> Vec<Call> {
    log.lock().unwrap().clone()
}

pub fn count(log: &CallLog, pred: impl Fn(&Call) -> bool) -> usize {
    log.lock().unwrap().iter().filter(|c| pred(c)).count()
}

// ── Network manager ─────────────────────────────────────────────────

/// Network manager whose connection is a pair of flags.
pub struct RecordingNetwork {
    pub role: NetworkRole,
    pub players: StdMutex<Option<usize>>,
    pub active: AtomicBool,
    pub ack_back: AtomicBool,
    pub connection_id: Option<ConnectionId>,
    pub log: CallLog,
}

impl RecordingNetwork {
    /// An active client connection with id 7 and two players.
    pub fn client(log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            role: NetworkRole::Client,
            players: StdMutex::new(Some(2)),
            active: AtomicBool::new(true),
            ack_back: AtomicBool::new(false),
            connection_id: Some(7),
            log: Arc::clone(log),
        })
    }

    pub fn with_role(role: NetworkRole, players: Option<usize>, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            role,
            players: StdMutex::new(players),
            active: AtomicBool::new(role.is_client()),
            ack_back: AtomicBool::new(false),
            connection_id: role.is_client().then_some(7),
            log: Arc::clone(log),
        })
    }

    pub fn set_players(&self, players: Option<usize>) {
        *self.players.lock().unwrap() = players;
    }
}

impl NetworkManager for RecordingNetwork {
    fn role(&self) -> NetworkRole {
        self.role
    }

    fn num_players(&self) -> Option<usize> {
        *self.players.lock().unwrap()
    }

    fn is_client_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    fn send(&self, message: ClientMessage) -> match_handoff::Result<()> {
        if !self.is_client_active() {
            return Err(HandoffError::NotConnected);
        }
        self.log.lock().unwrap().push(Call::Send(message));
        Ok(())
    }

    fn ack_confirmed(&self) -> bool {
        self.ack_back.load(Ordering::SeqCst)
    }

    fn shutdown_all(&self) {
        self.log.lock().unwrap().push(Call::ShutdownAll);
        self.active.store(false, Ordering::SeqCst);
    }

    fn connect(&self, endpoint: &Endpoint) -> match_handoff::Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Call::NetworkConnect(endpoint.clone()));
        Ok(())
    }
}

// ── Matchmaking client ──────────────────────────────────────────────

/// Matchmaking client resolved by hand from the test.
pub struct MockMatchmaking {
    pub accept: AtomicBool,
    pub address: StdMutex<Option<String>>,
    pub port: AtomicU16,
    pub failure: StdMutex<Option<String>>,
    pub connects: AtomicUsize,
    pub log: CallLog,
}

impl MockMatchmaking {
    pub fn accepting(log: &CallLog) -> Arc<Self> {
        Self::new(true, log)
    }

    pub fn refusing(log: &CallLog) -> Arc<Self> {
        Self::new(false, log)
    }

    fn new(accept: bool, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(accept),
            address: StdMutex::new(None),
            port: AtomicU16::new(UNRESOLVED_PORT),
            failure: StdMutex::new(None),
            connects: AtomicUsize::new(0),
            log: Arc::clone(log),
        })
    }

    pub fn resolve(&self, address: &str, port: u16) {
        *self.address.lock().unwrap() = Some(address.to_string());
        self.port.store(port, Ordering::SeqCst);
    }

    pub fn fail(&self, reason: &str) {
        *self.failure.lock().unwrap() = Some(reason.to_string());
    }
}

impl MatchmakingClient for MockMatchmaking {
    fn connect(&self, host: &str, filter: &MatchFilter) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Call::MatchmakingConnect {
            host: host.to_string(),
            filter: filter.clone(),
        });
        *self.failure.lock().unwrap() = None;
        self.accept.load(Ordering::SeqCst)
    }

    fn address(&self) -> Option<String> {
        self.address.lock().unwrap().clone()
    }

    fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().unwrap().clone()
    }

    fn cancel(&self) {
        self.log.lock().unwrap().push(Call::Cancel);
    }
}

// ── Debug display ───────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingDisplay {
    pub messages: StdMutex<Vec<String>>,
    pub text_boxes: StdMutex<Vec<String>>,
}

impl RecordingDisplay {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn last_text_box(&self) -> Option<String> {
        self.text_boxes.lock().unwrap().last().cloned()
    }
}

impl DebugDisplay for RecordingDisplay {
    fn show_message(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    fn show_text_box(&self, text: &str) {
        self.text_boxes.lock().unwrap().push(text.to_string());
    }
}

// ── Fixture ─────────────────────────────────────────────────────────

/// Services wired to fresh mocks that share one call log.
pub struct Fixture {
    pub services: Arc<Services>,
    pub network: Arc<RecordingNetwork>,
    pub matchmaking: Arc<MockMatchmaking>,
    pub display: Arc<RecordingDisplay>,
    pub log: CallLog,
}

impl Fixture {
    pub fn client() -> Self {
        let log = CallLog::default();
        Self::with(
            RecordingNetwork::client(&log),
            MockMatchmaking::accepting(&log),
            log,
        )
    }

    pub fn with(
        network: Arc<RecordingNetwork>,
        matchmaking: Arc<MockMatchmaking>,
        log: CallLog,
    ) -> Self {
        let services = Services::new();
        let display = Arc::new(RecordingDisplay::default());
        services.set_network(network.clone());
        services.set_matchmaking(matchmaking.clone());
        services.set_debug_display(display.clone());
        Self {
            services,
            network,
            matchmaking,
            display,
            log,
        }
    }
}

// ── Loopback transport ──────────────────────────────────────────────

/// Client half of an in-process channel pair.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<AtomicBool>,
}

/// Server half: read what the client sent, inject replies.
pub struct LoopbackServer {
    pub rx: mpsc::UnboundedReceiver<String>,
    pub tx: mpsc::UnboundedSender<String>,
    pub closed: Arc<AtomicBool>,
}

pub fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
            closed: Arc::clone(&closed),
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
            closed,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> match_handoff::Result<()> {
        self.tx
            .send(message)
            .map_err(|e| HandoffError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<match_handoff::Result<String>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> match_handoff::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
