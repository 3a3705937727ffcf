//! The matchmaking collaborator.
//!
//! [`MatchmakingClient`] is the opaque request/response surface the handoff
//! state consumes: `connect` submits a request, and the outcome is observed by
//! polling [`port`](MatchmakingClient::port) until it leaves the
//! [`UNRESOLVED_PORT`] sentinel.
//!
//! [`OpenMatchClient`] is the concrete implementation. It runs one ticket at a
//! time against a matchmaking frontend in a background task:
//!
//! 1. open a connection to `host:frontend_port`
//! 2. `CreatePlayer` with a fresh ticket id and the match filter
//! 3. wait (bounded by the failsafe timeout) for an `Assignment`
//! 4. `DeletePlayer`, then close

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{HandoffError, Result};
use crate::protocol::{
    Endpoint, FrontendRequest, FrontendResponse, MatchFilter, PlayerTicket, UNRESOLVED_PORT,
};
use crate::transport::{Connector, Transport};

/// Default port of the matchmaking frontend.
pub const DEFAULT_FRONTEND_PORT: u16 = 50504;

/// Default upper bound on how long a ticket may wait for an assignment.
const DEFAULT_FAILSAFE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default prefix of generated ticket ids.
const DEFAULT_PLAYER_ID_PREFIX: &str = "demov1-";

/// Opaque matchmaking request/response API.
pub trait MatchmakingClient: Send + Sync {
    /// Submit a match request to `host`. Returns `true` if it was accepted.
    fn connect(&self, host: &str, filter: &MatchFilter) -> bool;

    /// Resolved session address, once known.
    fn address(&self) -> Option<String>;

    /// Resolved session port, or [`UNRESOLVED_PORT`].
    fn port(&self) -> u16;

    /// Failure of the most recent request, if it failed after being accepted.
    fn failure(&self) -> Option<String> {
        None
    }

    /// Abandon the in-flight request. Any later resolution is discarded.
    fn cancel(&self) {}
}

/// One matchmaking attempt as seen by the requesting state.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchmakingRequest {
    pub host: String,
    pub filter: MatchFilter,
    pub resolved: Option<Endpoint>,
}

impl MatchmakingRequest {
    pub fn new(host: impl Into<String>, filter: MatchFilter) -> Self {
        Self {
            host: host.into(),
            filter,
            resolved: None,
        }
    }

    /// Returns `true` until a resolved endpoint has been recorded.
    pub fn is_pending(&self) -> bool {
        self.resolved.is_none()
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for an [`OpenMatchClient`].
///
/// # Example
///
/// ```
/// use match_handoff::matchmaking::OpenMatchConfig;
/// use std::time::Duration;
///
/// let config = OpenMatchConfig::new()
///     .with_frontend_port(6000)
///     .with_failsafe_timeout(Duration::from_secs(10));
/// assert_eq!(config.frontend_port, 6000);
/// assert_eq!(config.player_id_prefix, "demov1-");
/// ```
#[derive(Debug, Clone)]
pub struct OpenMatchConfig {
    /// Port of the frontend on the host passed to `connect`.
    ///
    /// Defaults to **50504**.
    pub frontend_port: u16,
    /// How long a ticket may wait for an assignment before it is failed.
    ///
    /// Defaults to **30 seconds**.
    pub failsafe_timeout: Duration,
    /// Prefix of generated ticket ids; a v4 UUID is appended.
    pub player_id_prefix: String,
}

impl OpenMatchConfig {
    pub fn new() -> Self {
        Self {
            frontend_port: DEFAULT_FRONTEND_PORT,
            failsafe_timeout: DEFAULT_FAILSAFE_TIMEOUT,
            player_id_prefix: DEFAULT_PLAYER_ID_PREFIX.to_string(),
        }
    }

    #[must_use]
    pub fn with_frontend_port(mut self, port: u16) -> Self {
        self.frontend_port = port;
        self
    }

    #[must_use]
    pub fn with_failsafe_timeout(mut self, timeout: Duration) -> Self {
        self.failsafe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_player_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.player_id_prefix = prefix.into();
        self
    }
}

impl Default for OpenMatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Ticket status ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TicketStatus {
    Idle,
    Searching,
    Assigned(Endpoint),
    Failed(String),
}

/// Status shared with the ticket task. The generation counter makes results
/// from a cancelled or superseded ticket land nowhere.
struct TicketState {
    generation: u64,
    status: TicketStatus,
}

type SharedTicket = Arc<StdMutex<TicketState>>;

fn settle(ticket: &SharedTicket, generation: u64, status: TicketStatus) {
    let mut state = ticket.lock().unwrap_or_else(PoisonError::into_inner);
    if state.generation == generation {
        state.status = status;
    } else {
        debug!("discarding result of superseded ticket generation {generation}");
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Matchmaking frontend client running one ticket at a time.
pub struct OpenMatchClient {
    connector: Arc<dyn Connector>,
    config: OpenMatchConfig,
    ticket: SharedTicket,
    task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl OpenMatchClient {
    pub fn new(connector: Arc<dyn Connector>, config: OpenMatchConfig) -> Self {
        Self {
            connector,
            config,
            ticket: Arc::new(StdMutex::new(TicketState {
                generation: 0,
                status: TicketStatus::Idle,
            })),
            task: StdMutex::new(None),
        }
    }

    /// Returns `true` while a ticket task is running.
    pub fn is_searching(&self) -> bool {
        matches!(self.status(), TicketStatus::Searching)
    }

    fn status(&self) -> TicketStatus {
        self.ticket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .clone()
    }
}

impl MatchmakingClient for OpenMatchClient {
    fn connect(&self, host: &str, filter: &MatchFilter) -> bool {
        if host.is_empty() {
            warn!("matchmaking request refused: empty frontend host");
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("matchmaking request refused: {}", HandoffError::NoRuntime);
            return false;
        };

        let generation = {
            let mut state = self.ticket.lock().unwrap_or_else(PoisonError::into_inner);
            if state.status == TicketStatus::Searching {
                debug!("matchmaking request refused: a ticket is already in flight");
                return false;
            }
            state.generation += 1;
            state.status = TicketStatus::Searching;
            state.generation
        };

        let ticket = PlayerTicket {
            id: format!("{}{}", self.config.player_id_prefix, uuid::Uuid::new_v4()),
            properties: filter.clone(),
        };
        let frontend = Endpoint::new(host, self.config.frontend_port);
        info!("submitting matchmaking ticket {} to {frontend}", ticket.id);

        let task = runtime.spawn(run_ticket(
            Arc::clone(&self.connector),
            frontend,
            ticket,
            self.config.failsafe_timeout,
            Arc::clone(&self.ticket),
            generation,
        ));
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        true
    }

    fn address(&self) -> Option<String> {
        match self.status() {
            TicketStatus::Assigned(endpoint) => Some(endpoint.address),
            _ => None,
        }
    }

    fn port(&self) -> u16 {
        match self.status() {
            TicketStatus::Assigned(endpoint) => endpoint.port,
            _ => UNRESOLVED_PORT,
        }
    }

    fn failure(&self) -> Option<String> {
        match self.status() {
            TicketStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn cancel(&self) {
        {
            let mut state = self.ticket.lock().unwrap_or_else(PoisonError::into_inner);
            state.generation += 1;
            state.status = TicketStatus::Idle;
        }
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            debug!("cancelling matchmaking ticket");
            task.abort();
        }
    }
}

impl std::fmt::Debug for OpenMatchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenMatchClient")
            .field("status", &self.status())
            .field("frontend_port", &self.config.frontend_port)
            .finish()
    }
}

impl Drop for OpenMatchClient {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

// ── Ticket task ─────────────────────────────────────────────────────

async fn run_ticket(
    connector: Arc<dyn Connector>,
    frontend: Endpoint,
    ticket: PlayerTicket,
    failsafe: Duration,
    shared: SharedTicket,
    generation: u64,
) {
    let status = match connector.connect(&frontend).await {
        Ok(mut transport) => {
            let status = match exchange(&mut transport, &ticket, failsafe).await {
                Ok(endpoint) => {
                    info!("ticket {} assigned to {endpoint}", ticket.id);
                    TicketStatus::Assigned(endpoint)
                }
                Err(e) => {
                    warn!("ticket {} failed: {e}", ticket.id);
                    TicketStatus::Failed(e.to_string())
                }
            };
            let _ = transport.close().await;
            status
        }
        Err(e) => {
            warn!("could not reach matchmaking frontend {frontend}: {e}");
            TicketStatus::Failed(e.to_string())
        }
    };
    settle(&shared, generation, status);
}

/// Create the ticket, wait for its assignment, then delete it.
async fn exchange(
    transport: &mut impl Transport,
    ticket: &PlayerTicket,
    failsafe: Duration,
) -> Result<Endpoint> {
    send_request(
        transport,
        &FrontendRequest::CreatePlayer {
            player: ticket.clone(),
        },
    )
    .await?;

    match next_response(transport).await? {
        FrontendResponse::PlayerCreated { success: true } => {
            debug!("ticket {} created", ticket.id);
        }
        FrontendResponse::PlayerCreated { success: false } => {
            return Err(HandoffError::Matchmaking("ticket rejected".into()));
        }
        FrontendResponse::Error { message } => return Err(HandoffError::Matchmaking(message)),
        other => {
            return Err(HandoffError::Matchmaking(format!(
                "unexpected frontend response: {other:?}"
            )))
        }
    }

    let endpoint = tokio::time::timeout(failsafe, wait_for_assignment(transport, &ticket.id))
        .await
        .map_err(|_| HandoffError::Timeout)??;

    send_request(
        transport,
        &FrontendRequest::DeletePlayer {
            id: ticket.id.clone(),
        },
    )
    .await?;
    Ok(endpoint)
}

async fn wait_for_assignment(transport: &mut impl Transport, id: &str) -> Result<Endpoint> {
    loop {
        match next_response(transport).await? {
            FrontendResponse::Assignment { id: assigned, endpoint } if assigned == id => {
                if endpoint.is_resolved() {
                    return Ok(endpoint);
                }
                debug!("ignoring assignment without a port for {id}");
            }
            FrontendResponse::Error { message } => return Err(HandoffError::Matchmaking(message)),
            other => debug!("ignoring frontend update while waiting: {other:?}"),
        }
    }
}

async fn send_request(transport: &mut impl Transport, request: &FrontendRequest) -> Result<()> {
    transport.send(serde_json::to_string(request)?).await
}

async fn next_response(transport: &mut impl Transport) -> Result<FrontendResponse> {
    match transport.recv().await {
        Some(Ok(text)) => Ok(serde_json::from_str(&text)?),
        Some(Err(e)) => Err(e),
        None => Err(HandoffError::TransportClosed),
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
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Frontend that replays scripted responses and records requests.
    struct ScriptedFrontend {
        responses: VecDeque<FrontendResponse>,
        requests: Arc<StdMutex<Vec<FrontendRequest>>>,
    }

    #[async_trait]
    impl Transport for ScriptedFrontend {
        async fn send(&mut self, message: String) -> Result<()> {
            self.requests
                .lock()
                .unwrap()
                .push(serde_json::from_str(&message)?);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.responses.pop_front() {
                Some(response) => Some(Ok(serde_json::to_string(&response).unwrap())),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct ScriptedConnector {
        responses: StdMutex<Option<Vec<FrontendResponse>>>,
        requests: Arc<StdMutex<Vec<FrontendRequest>>>,
        dialed: Arc<StdMutex<Vec<Endpoint>>>,
    }

    impl ScriptedConnector {
        fn new(responses: Vec<FrontendResponse>) -> Self {
            Self {
                responses: StdMutex::new(Some(responses)),
                requests: Arc::new(StdMutex::new(Vec::new())),
                dialed: Arc::new(StdMutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            self.dialed.lock().unwrap().push(endpoint.clone());
            let responses = self
                .responses
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| HandoffError::Connect("frontend down".into()))?;
            Ok(Box::new(ScriptedFrontend {
                responses: VecDeque::from(responses),
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    fn assignment_for(requests: &Arc<StdMutex<Vec<FrontendRequest>>>) -> Option<String> {
        requests.lock().unwrap().iter().find_map(|r| match r {
            FrontendRequest::CreatePlayer { player } => Some(player.id.clone()),
            _ => None,
        })
    }

    async fn settle_tasks() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn request_is_pending_until_resolved() {
        let mut request = MatchmakingRequest::new("10.0.0.1", MatchFilter::default());
        assert!(request.is_pending());
        request.resolved = Some(Endpoint::new("10.0.0.2", 7777));
        assert!(!request.is_pending());
    }

    #[test]
    fn connect_outside_runtime_is_refused() {
        let client = OpenMatchClient::new(
            Arc::new(ScriptedConnector::new(vec![])),
            OpenMatchConfig::new(),
        );
        assert!(!client.connect("10.0.0.1", &MatchFilter::default()));
        assert_eq!(client.port(), UNRESOLVED_PORT);
    }

    #[tokio::test]
    async fn empty_host_is_refused() {
        let client = OpenMatchClient::new(
            Arc::new(ScriptedConnector::new(vec![])),
            OpenMatchConfig::new(),
        );
        assert!(!client.connect("", &MatchFilter::default()));
    }

    #[tokio::test]
    async fn unreachable_frontend_reports_failure() {
        let connector = ScriptedConnector::new(vec![]);
        connector.responses.lock().unwrap().take();
        let client = OpenMatchClient::new(Arc::new(connector), OpenMatchConfig::new());

        assert!(client.connect("10.0.0.1", &MatchFilter::default()));
        settle_tasks().await;

        assert!(client.failure().unwrap().contains("frontend down"));
        assert_eq!(client.port(), UNRESOLVED_PORT);
    }

    #[tokio::test]
    async fn rejected_ticket_reports_failure() {
        let client = OpenMatchClient::new(
            Arc::new(ScriptedConnector::new(vec![FrontendResponse::PlayerCreated {
                success: false,
            }])),
            OpenMatchConfig::new(),
        );

        assert!(client.connect("10.0.0.1", &MatchFilter::default()));
        settle_tasks().await;

        assert!(client.failure().unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn second_connect_while_searching_is_refused() {
        let client = OpenMatchClient::new(
            Arc::new(ScriptedConnector::new(vec![FrontendResponse::PlayerCreated {
                success: true,
            }])),
            OpenMatchConfig::new(),
        );

        assert!(client.connect("10.0.0.1", &MatchFilter::default()));
        settle_tasks().await;
        assert!(client.is_searching());
        assert!(!client.connect("10.0.0.1", &MatchFilter::default()));

        client.cancel();
        assert!(!client.is_searching());
    }

    #[tokio::test(start_paused = true)]
    async fn failsafe_timeout_fails_the_ticket() {
        let client = OpenMatchClient::new(
            Arc::new(ScriptedConnector::new(vec![FrontendResponse::PlayerCreated {
                success: true,
            }])),
            OpenMatchConfig::new().with_failsafe_timeout(Duration::from_secs(5)),
        );

        assert!(client.connect("10.0.0.1", &MatchFilter::default()));
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(
            client.failure().as_deref(),
            Some(HandoffError::Timeout.to_string().as_str())
        );
    }

    /// Connector whose frontend assigns whatever ticket id it was given.
    struct AssigningConnector {
        requests: Arc<StdMutex<Vec<FrontendRequest>>>,
        dialed: Arc<StdMutex<Vec<Endpoint>>>,
    }

    struct AssigningFrontend {
        pending: VecDeque<FrontendResponse>,
        requests: Arc<StdMutex<Vec<FrontendRequest>>>,
    }

    #[async_trait]
    impl Transport for AssigningFrontend {
        async fn send(&mut self, message: String) -> Result<()> {
            let request: FrontendRequest = serde_json::from_str(&message)?;
            match &request {
                FrontendRequest::CreatePlayer { player } => {
                    self.pending
                        .push_back(FrontendResponse::PlayerCreated { success: true });
                    self.pending.push_back(FrontendResponse::Assignment {
                        id: "someone-else".into(),
                        endpoint: Endpoint::new("10.9.9.9", 1),
                    });
                    self.pending.push_back(FrontendResponse::Assignment {
                        id: player.id.clone(),
                        endpoint: Endpoint::new("10.0.0.42", 7777),
                    });
                }
                FrontendRequest::DeletePlayer { .. } => {
                    self.pending
                        .push_back(FrontendResponse::PlayerDeleted { success: true });
                }
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.pending.pop_front() {
                Some(response) => Some(Ok(serde_json::to_string(&response).unwrap())),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for AssigningConnector {
        async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
            self.dialed.lock().unwrap().push(endpoint.clone());
            Ok(Box::new(AssigningFrontend {
                pending: VecDeque::new(),
                requests: Arc::clone(&self.requests),
            }))
        }
    }

    #[tokio::test]
    async fn assignment_resolves_endpoint_and_deletes_ticket() {
        let requests = Arc::new(StdMutex::new(Vec::new()));
        let dialed = Arc::new(StdMutex::new(Vec::new()));
        let connector = AssigningConnector {
            requests: Arc::clone(&requests),
            dialed: Arc::clone(&dialed),
        };
        let client = OpenMatchClient::new(Arc::new(connector), OpenMatchConfig::new());

        assert!(client.connect("35.236.24.200", &MatchFilter::default()));
        settle_tasks().await;

        assert_eq!(client.address().as_deref(), Some("10.0.0.42"));
        assert_eq!(client.port(), 7777);
        assert_eq!(
            dialed.lock().unwrap().as_slice(),
            &[Endpoint::new("35.236.24.200", DEFAULT_FRONTEND_PORT)]
        );

        let id = assignment_for(&requests).unwrap();
        assert!(id.starts_with("demov1-"));
        let requests = requests.lock().unwrap();
        assert!(matches!(
            &requests[0],
            FrontendRequest::CreatePlayer { player } if player.properties == MatchFilter::default()
        ));
        assert_eq!(requests[1], FrontendRequest::DeletePlayer { id });
    }

    #[tokio::test]
    async fn cancel_discards_resolution() {
        let connector = AssigningConnector {
            requests: Arc::new(StdMutex::new(Vec::new())),
            dialed: Arc::new(StdMutex::new(Vec::new())),
        };
        let client = OpenMatchClient::new(Arc::new(connector), OpenMatchConfig::new());

        assert!(client.connect("10.0.0.1", &MatchFilter::default()));
        client.cancel();
        settle_tasks().await;

        assert_eq!(client.port(), UNRESOLVED_PORT);
        assert_eq!(client.address(), None);
    }

    #[test]
    fn stale_generation_is_discarded() {
        let ticket: SharedTicket = Arc::new(StdMutex::new(TicketState {
            generation: 2,
            status: TicketStatus::Searching,
        }));
        settle(&ticket, 1, TicketStatus::Assigned(Endpoint::new("10.0.0.1", 7777)));
        assert_eq!(ticket.lock().unwrap().status, TicketStatus::Searching);

        settle(&ticket, 2, TicketStatus::Failed("nope".into()));
        assert_eq!(
            ticket.lock().unwrap().status,
            TicketStatus::Failed("nope".into())
        );
    }
}
