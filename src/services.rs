//! Registry of collaborators that states resolve lazily.
//!
//! Any collaborator may be missing. States look them up when they need them
//! and skip the action when the lookup comes back empty.

use std::sync::{Arc, PoisonError, RwLock};

use crate::matchmaking::MatchmakingClient;
use crate::network::NetworkManager;
use crate::presentation::DebugDisplay;

type Slot<T> = RwLock<Option<Arc<T>>>;

fn read<T: ?Sized>(slot: &Slot<T>) -> Option<Arc<T>> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn write<T: ?Sized>(slot: &Slot<T>, value: Option<Arc<T>>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Shared lookup table for the network manager, the matchmaking client and
/// the debug display.
#[derive(Default)]
pub struct Services {
    network: Slot<dyn NetworkManager>,
    matchmaking: Slot<dyn MatchmakingClient>,
    debug_display: Slot<dyn DebugDisplay>,
}

impl Services {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn network(&self) -> Option<Arc<dyn NetworkManager>> {
        read(&self.network)
    }

    pub fn set_network(&self, network: Arc<dyn NetworkManager>) {
        write(&self.network, Some(network));
    }

    pub fn clear_network(&self) {
        write(&self.network, None);
    }

    pub fn matchmaking(&self) -> Option<Arc<dyn MatchmakingClient>> {
        read(&self.matchmaking)
    }

    pub fn set_matchmaking(&self, client: Arc<dyn MatchmakingClient>) {
        write(&self.matchmaking, Some(client));
    }

    pub fn clear_matchmaking(&self) {
        write(&self.matchmaking, None);
    }

    pub fn debug_display(&self) -> Option<Arc<dyn DebugDisplay>> {
        read(&self.debug_display)
    }

    pub fn set_debug_display(&self, display: Arc<dyn DebugDisplay>) {
        write(&self.debug_display, Some(display));
    }

    /// Show `message` on the debug display, if there is one.
    pub fn show_message(&self, message: &str) {
        if let Some(display) = self.debug_display() {
            display.show_message(message);
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("network", &self.network().is_some())
            .field("matchmaking", &self.matchmaking().is_some())
            .field("debug_display", &self.debug_display().is_some())
            .finish()
    }
}
