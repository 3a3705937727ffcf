//! The lobby-to-matchmaking handoff.
//!
//! Entering [`OpenMatchStart`] requests a match. Once the request is
//! accepted the origin server gets an `OpenMatchAck` carrying our connection
//! id, and the origin connection is closed after a short grace period. When
//! the matchmaker reports an assigned port and the origin connection is gone,
//! the state swaps itself for [`OpenMatchFound`].
//!
//! ```text
//! Idle --initialize--> Requesting --accepted--> AwaitingAckWindow
//! Requesting --refused--> Idle
//! AwaitingAckWindow --deadline--> Disconnected
//! AwaitingAckWindow | Disconnected --resolved + torn down--> Done
//! any --zero players on the server--> Aborted
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{EndPreGameplay, OpenMatchFound};
use crate::matchmaking::MatchmakingRequest;
use crate::network::NetworkManager;
use crate::protocol::{ClientMessage, ConnectionId, Endpoint, MatchFilter, UNRESOLVED_PORT};
use crate::services::Services;
use crate::session::PlayerCount;
use crate::state::{State, StateExitValue, StateKind, Transition, UiEvent};

/// Default matchmaking frontend host.
pub const DEFAULT_FRONTEND_HOST: &str = "35.236.24.200";

/// Default delay between sending the ack and closing the origin connection.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(750);

/// Default number of players at which the threshold hook fires.
pub const DEFAULT_OPEN_MATCH_THRESHOLD: usize = 4;

/// UI event source that re-triggers the match request.
pub const RETRY_EVENT_SOURCE: &str = "open_match_retry";

/// Configuration for [`OpenMatchStart`].
///
/// # Example
///
/// ```
/// use match_handoff::states::HandoffConfig;
/// use std::time::Duration;
///
/// let config = HandoffConfig::new()
///     .with_frontend_host("10.0.0.1")
///     .with_disconnect_grace(Duration::from_millis(500));
/// assert_eq!(config.open_match_threshold, 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffConfig {
    /// Host the match request is sent to.
    ///
    /// Defaults to **35.236.24.200**.
    pub frontend_host: String,
    /// Criteria the match is filtered on. Defaults to
    /// [`MatchFilter::battle_royale`].
    pub match_filter: MatchFilter,
    /// Delay between the ack and the origin disconnect.
    ///
    /// Defaults to **750 ms**.
    pub disconnect_grace: Duration,
    /// Player count at which the threshold hook fires.
    ///
    /// Defaults to **4**.
    pub open_match_threshold: usize,
}

impl HandoffConfig {
    pub fn new() -> Self {
        Self {
            frontend_host: DEFAULT_FRONTEND_HOST.to_string(),
            match_filter: MatchFilter::default(),
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            open_match_threshold: DEFAULT_OPEN_MATCH_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_frontend_host(mut self, host: impl Into<String>) -> Self {
        self.frontend_host = host.into();
        self
    }

    #[must_use]
    pub fn with_match_filter(mut self, filter: MatchFilter) -> Self {
        self.match_filter = filter;
        self
    }

    #[must_use]
    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    #[must_use]
    pub fn with_open_match_threshold(mut self, threshold: usize) -> Self {
        self.open_match_threshold = threshold;
        self
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of the handoff within a single [`OpenMatchStart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandoffPhase {
    Idle,
    Requesting,
    /// Request accepted and ack sent; the origin connection is still open.
    AwaitingAckWindow,
    /// The origin connection was closed at the deadline.
    Disconnected,
    /// Swapped to the found state.
    Done,
    /// Swapped to the end-of-pregame state.
    Aborted,
}

impl HandoffPhase {
    /// Phases in which a resolved endpoint may be acted on.
    fn awaits_resolution(self) -> bool {
        matches!(self, Self::AwaitingAckWindow | Self::Disconnected)
    }
}

/// Ack sent to the origin server and the disconnect it schedules.
#[derive(Debug, Clone, PartialEq)]
pub struct AckHandshake {
    /// Origin connection the ack identified, if one was known.
    pub connection_id: Option<ConnectionId>,
    /// Whether the ack was handed to the connection.
    pub delivered: bool,
    /// When the origin connection is closed.
    pub disconnect_at: Instant,
    pub disconnected: bool,
}

impl AckHandshake {
    /// Returns `true` while a delivered ack is waiting for its disconnect.
    pub fn in_grace_window(&self) -> bool {
        self.delivered && !self.disconnected && Instant::now() < self.disconnect_at
    }
}

/// Requests a match and hands the client over to the matched session.
pub struct OpenMatchStart {
    services: Arc<Services>,
    config: HandoffConfig,
    phase: HandoffPhase,
    pending: bool,
    request: Option<MatchmakingRequest>,
    handshake: Option<AckHandshake>,
    players: PlayerCount,
    threshold_reported: bool,
}

impl OpenMatchStart {
    pub fn new(services: Arc<Services>, config: HandoffConfig) -> Self {
        Self {
            services,
            config,
            phase: HandoffPhase::Idle,
            pending: false,
            request: None,
            handshake: None,
            players: PlayerCount::Unknown,
            threshold_reported: false,
        }
    }

    pub fn phase(&self) -> HandoffPhase {
        self.phase
    }

    /// Returns `true` while a match request is in flight.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn handshake(&self) -> Option<&AckHandshake> {
        self.handshake.as_ref()
    }

    pub fn request(&self) -> Option<&MatchmakingRequest> {
        self.request.as_ref()
    }

    /// Player count as of the last tick.
    pub fn players(&self) -> PlayerCount {
        self.players
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Ask the matchmaker for a match.
    ///
    /// Ignored while a request is already pending. On acceptance the ack is
    /// sent and the disconnect deadline scheduled. Returns `true` if a new
    /// request was accepted.
    pub fn request_match(&mut self) -> bool {
        if self.pending {
            debug!("match request already pending, ignoring trigger");
            return false;
        }
        let Some(matchmaking) = self.services.matchmaking() else {
            self.report_request_failure("null");
            return false;
        };

        self.phase = HandoffPhase::Requesting;
        let host = self.config.frontend_host.clone();
        info!("requesting a match from {host}");
        if !matchmaking.connect(&host, &self.config.match_filter) {
            self.phase = HandoffPhase::Idle;
            let detail = if host.is_empty() { "null" } else { host.as_str() };
            self.report_request_failure(detail);
            return false;
        }

        debug!("match request accepted");
        self.pending = true;
        self.request = Some(MatchmakingRequest::new(
            host,
            self.config.match_filter.clone(),
        ));
        self.send_ack();
        self.phase = HandoffPhase::AwaitingAckWindow;
        true
    }

    /// Tell the origin server we are leaving for matchmaking, then schedule
    /// the origin disconnect.
    fn send_ack(&mut self) {
        if let Some(handshake) = self.handshake.as_ref().filter(|h| h.in_grace_window()) {
            debug!(
                "open-match ack already delivered, disconnect still due at {:?}",
                handshake.disconnect_at
            );
            return;
        }
        let network = self.services.network();
        let connection_id = network.as_ref().and_then(|n| n.connection_id());

        let delivered = match (network.as_deref(), connection_id) {
            (Some(network), Some(id)) => {
                match network.send(ClientMessage::OpenMatchAck { connection_id: id }) {
                    Ok(()) => {
                        info!("sent open-match ack for connection {id}");
                        true
                    }
                    Err(e) => {
                        warn!("could not send open-match ack: {e}");
                        false
                    }
                }
            }
            _ => {
                warn!("no origin connection to acknowledge");
                false
            }
        };

        self.handshake = Some(AckHandshake {
            connection_id,
            delivered,
            disconnect_at: Instant::now() + self.config.disconnect_grace,
            disconnected: false,
        });
        self.services.show_message("Client sent open match ack");
    }

    /// Close the active client connection, if there is one.
    fn disconnect_previous_connection(&self) {
        let Some(network) = self.services.network() else {
            return;
        };
        if network.is_client_active() {
            info!("disconnecting from origin server");
            network.shutdown_all();
        }
    }

    fn report_request_failure(&self, detail: &str) {
        let message = format!("Could not connect to Open Match: {detail}");
        warn!("{message}");
        self.services.show_message(&message);
    }

    /// Leave the origin once the grace period is over, or earlier if the
    /// origin already confirmed the ack. Only while a match is awaited.
    fn poll_disconnect_deadline(&mut self) {
        if !self.phase.awaits_resolution() {
            return;
        }
        let Some(handshake) = self.handshake.as_ref().filter(|h| !h.disconnected) else {
            return;
        };
        let confirmed = handshake.delivered
            && self
                .services
                .network()
                .is_some_and(|network| network.ack_confirmed());
        if confirmed {
            debug!("origin confirmed the open-match ack, leaving before the deadline");
        } else if Instant::now() < handshake.disconnect_at {
            return;
        }
        if let Some(handshake) = self.handshake.as_mut() {
            handshake.disconnected = true;
        }
        self.disconnect_previous_connection();
        if self.phase == HandoffPhase::AwaitingAckWindow {
            self.phase = HandoffPhase::Disconnected;
        }
    }

    fn poll_matchmaking_failure(&mut self) {
        if !self.pending {
            return;
        }
        let Some(reason) = self.services.matchmaking().and_then(|m| m.failure()) else {
            return;
        };
        let message = format!("Open Match request failed: {reason}");
        warn!("{message}");
        self.services.show_message(&message);
        self.pending = false;
        self.request = None;
        if self.phase.awaits_resolution() {
            self.phase = HandoffPhase::Idle;
        }
    }

    /// The assigned endpoint, once it can be joined.
    fn ready_endpoint(&self, network: Option<&dyn NetworkManager>) -> Option<Endpoint> {
        if !self.phase.awaits_resolution() {
            return None;
        }
        let matchmaking = self.services.matchmaking()?;
        let port = matchmaking.port();
        if port == UNRESOLVED_PORT {
            return None;
        }
        let network = network?;
        if !network.role().is_client() {
            return None;
        }
        if network.is_client_active() {
            trace!("match assigned, waiting for the origin connection to close");
            return None;
        }
        let address = matchmaking.address()?;
        Some(Endpoint::new(address, port))
    }
}

impl State for OpenMatchStart {
    fn kind(&self) -> StateKind {
        StateKind::OpenMatchStart
    }

    fn initialize(&mut self, previous: Option<&dyn State>) {
        match previous {
            Some(previous) => info!("open match start over {}", previous.kind()),
            None => info!("open match start"),
        }
        self.pending = false;
        self.phase = HandoffPhase::Idle;
        self.players = PlayerCount::observe(self.services.network().as_deref());
        self.request_match();
    }

    fn update(&mut self) -> Transition {
        let network = self.services.network();
        self.players = PlayerCount::observe(network.as_deref());

        self.poll_disconnect_deadline();
        self.poll_matchmaking_failure();

        if let Some(endpoint) = self.ready_endpoint(network.as_deref()) {
            info!("match found at {endpoint}, handing off");
            self.pending = false;
            self.phase = HandoffPhase::Done;
            if let Some(request) = self.request.as_mut() {
                request.resolved = Some(endpoint.clone());
            }
            return Transition::Swap(Box::new(OpenMatchFound::new(
                Arc::clone(&self.services),
                endpoint,
            )));
        }

        let is_server = network.as_ref().is_some_and(|n| n.role().is_server());
        if self.players.is_zero() && is_server {
            info!("no players left, ending pre-gameplay");
            self.phase = HandoffPhase::Aborted;
            return Transition::Swap(Box::new(EndPreGameplay::new(Arc::clone(
                &self.services,
            ))));
        }

        let threshold = self.config.open_match_threshold;
        if self.players.reached(threshold) && !self.threshold_reported {
            self.threshold_reported = true;
            debug!("open match threshold of {threshold} players reached");
        }
        Transition::None
    }

    fn cleanup(&mut self) -> StateExitValue {
        if self.pending {
            if let Some(matchmaking) = self.services.matchmaking() {
                debug!("abandoning pending match request");
                matchmaking.cancel();
            }
            self.pending = false;
        }
        match self.phase {
            HandoffPhase::Idle => StateExitValue::None,
            HandoffPhase::Done => self
                .request
                .as_ref()
                .and_then(|r| r.resolved.clone())
                .map_or(StateExitValue::None, StateExitValue::MatchFound),
            _ => StateExitValue::Aborted,
        }
    }

    fn on_gui(&mut self) {
        let Some(display) = self.services.debug_display() else {
            return;
        };
        let detail = match self.services.matchmaking() {
            Some(matchmaking) => format!(
                "open match ip={}, port={}",
                matchmaking.address().unwrap_or_default(),
                matchmaking.port()
            ),
            None => "open match not available".to_string(),
        };
        display.show_text_box(&format!(
            "OpenMatchStart players={} phase={:?}\n{detail}",
            self.players, self.phase
        ));
    }

    fn handle_ui_event(&mut self, event: &UiEvent) -> Transition {
        if event.source == RETRY_EVENT_SOURCE {
            self.request_match();
        }
        Transition::None
    }
}

impl std::fmt::Debug for OpenMatchStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenMatchStart")
            .field("phase", &self.phase)
            .field("pending", &self.pending)
            .field("handshake", &self.handshake)
            .field("players", &self.players)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = HandoffConfig::default();
        assert_eq!(config.frontend_host, "35.236.24.200");
        assert_eq!(config.disconnect_grace, Duration::from_millis(750));
        assert_eq!(config.open_match_threshold, 4);
        assert_eq!(config.match_filter, MatchFilter::battle_royale());
    }

    #[test]
    fn initialize_without_collaborators_stays_idle() {
        let mut state = OpenMatchStart::new(Services::new(), HandoffConfig::new());
        state.initialize(None);

        assert!(!state.is_pending());
        assert_eq!(state.phase(), HandoffPhase::Idle);
        assert!(state.handshake().is_none());
        assert!(state.update().is_none());
        assert_eq!(state.players(), PlayerCount::Unknown);
        assert_eq!(state.cleanup(), StateExitValue::None);
    }

    #[test]
    fn only_awaiting_phases_accept_resolution() {
        assert!(HandoffPhase::AwaitingAckWindow.awaits_resolution());
        assert!(HandoffPhase::Disconnected.awaits_resolution());
        assert!(!HandoffPhase::Idle.awaits_resolution());
        assert!(!HandoffPhase::Requesting.awaits_resolution());
        assert!(!HandoffPhase::Done.awaits_resolution());
    }
}
