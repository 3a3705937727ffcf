use std::sync::Arc;

use tracing::info;

use crate::services::Services;
use crate::state::{State, StateExitValue, StateKind};

/// Server-side end of the pre-game session after every player left.
///
/// Closes all connections and abandons any matchmaking ticket.
pub struct EndPreGameplay {
    services: Arc<Services>,
}

impl EndPreGameplay {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

impl State for EndPreGameplay {
    fn kind(&self) -> StateKind {
        StateKind::EndPreGameplay
    }

    fn initialize(&mut self, _previous: Option<&dyn State>) {
        info!("ending pre-gameplay session");
        if let Some(matchmaking) = self.services.matchmaking() {
            matchmaking.cancel();
        }
        if let Some(network) = self.services.network() {
            network.shutdown_all();
        }
    }

    fn cleanup(&mut self) -> StateExitValue {
        StateExitValue::Aborted
    }
}

impl std::fmt::Debug for EndPreGameplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndPreGameplay").finish_non_exhaustive()
    }
}
