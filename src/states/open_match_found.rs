use std::sync::Arc;

use tracing::{info, warn};

use crate::protocol::Endpoint;
use crate::services::Services;
use crate::state::{State, StateExitValue, StateKind};

/// Successor of [`OpenMatchStart`](super::OpenMatchStart) once a session was
/// assigned: joins the new session.
pub struct OpenMatchFound {
    services: Arc<Services>,
    endpoint: Endpoint,
}

impl OpenMatchFound {
    pub fn new(services: Arc<Services>, endpoint: Endpoint) -> Self {
        Self { services, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl State for OpenMatchFound {
    fn kind(&self) -> StateKind {
        StateKind::OpenMatchFound
    }

    fn initialize(&mut self, _previous: Option<&dyn State>) {
        let Some(network) = self.services.network() else {
            warn!("no network manager; cannot join {}", self.endpoint);
            return;
        };
        match network.connect(&self.endpoint) {
            Ok(()) => info!("joining matched session at {}", self.endpoint),
            Err(e) => {
                let message = format!("Could not join {}: {e}", self.endpoint);
                warn!("{message}");
                self.services.show_message(&message);
            }
        }
    }

    fn cleanup(&mut self) -> StateExitValue {
        StateExitValue::MatchFound(self.endpoint.clone())
    }

    fn on_gui(&mut self) {
        if let Some(display) = self.services.debug_display() {
            display.show_text_box(&format!("Found Open Match at {}", self.endpoint));
        }
    }
}

impl std::fmt::Debug for OpenMatchFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenMatchFound")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
