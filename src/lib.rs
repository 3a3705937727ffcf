//! # Match Handoff
//!
//! Client-side session control for multiplayer games.
//!
//! The crate has two halves:
//!
//! - a stack-based state machine ([`StateManager`] driving [`State`]s) with
//!   strict suspend/resume/cleanup ordering, and
//! - the lobby-to-matchmaking handoff ([`OpenMatchStart`]): request a match,
//!   acknowledge to the origin server, close the origin connection after a
//!   grace period and swap to [`OpenMatchFound`] once the new session is known.
//!
//! Network traffic runs in background tokio tasks behind [`NetworkManager`]
//! and [`MatchmakingClient`]; the state machine itself is tick-driven and
//! only polls their state.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   backend
//! - **Never-empty stack**: [`StateManager::current_state`] always succeeds
//! - **Transitions as values**: states return a [`Transition`] instead of
//!   reaching back into the manager
//!
//! ## Quick Start
//!
//! ```
//! use match_handoff::{HandoffConfig, OpenMatchStart, Services, StateManager};
//!
//! let services = Services::new();
//! // services.set_network(...); services.set_matchmaking(...);
//!
//! let mut manager = StateManager::new();
//! manager.push_state(Box::new(OpenMatchStart::new(
//!     services.clone(),
//!     HandoffConfig::new(),
//! )));
//!
//! // once per frame:
//! manager.update().unwrap();
//! ```

pub mod error;
pub mod lobby;
pub mod manager;
pub mod matchmaking;
pub mod network;
pub mod presentation;
pub mod protocol;
pub mod services;
pub mod session;
pub mod state;
pub mod states;
pub mod transport;

// Re-export primary types for ergonomic imports.
pub use error::{HandoffError, Result};
pub use lobby::{LobbyClient, LobbyConfig};
pub use manager::StateManager;
pub use matchmaking::{MatchmakingClient, OpenMatchClient, OpenMatchConfig};
pub use network::{NetworkManager, NetworkRole, SessionNetwork};
pub use presentation::{DebugDisplay, StateObserver, StatusLabel};
pub use protocol::{ClientMessage, Endpoint, MatchFilter, ServerMessage};
pub use services::Services;
pub use session::PlayerCount;
pub use state::{State, StateExitValue, StateKind, Transition, UiEvent};
pub use states::{EndPreGameplay, HandoffConfig, OpenMatchFound, OpenMatchStart};
pub use transport::{Connector, Transport};
