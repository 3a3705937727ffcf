//! Live player-count derivation.

use std::fmt;

use crate::network::NetworkManager;

/// Number of connected players as last observed from the network manager.
///
/// The count is taken from [`NetworkManager::num_players`], the count of fully
/// established sessions. Without a network manager (or before it knows) the
/// count is [`Unknown`](PlayerCount::Unknown), which is neither zero nor above
/// any threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerCount {
    #[default]
    Unknown,
    Known(usize),
}

impl PlayerCount {
    /// Recompute the count from `network`.
    pub fn observe(network: Option<&dyn NetworkManager>) -> Self {
        network
            .and_then(|network| network.num_players())
            .map_or(Self::Unknown, Self::Known)
    }

    pub fn is_zero(self) -> bool {
        self == Self::Known(0)
    }

    /// Returns `true` once at least `threshold` players are known.
    pub fn reached(self, threshold: usize) -> bool {
        matches!(self, Self::Known(n) if n >= threshold)
    }

    pub fn get(self) -> Option<usize> {
        match self {
            Self::Known(n) => Some(n),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for PlayerCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(n) => write!(f, "{n}"),
            Self::Unknown => f.write_str("?"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::{HandoffError, Result};
    use crate::network::NetworkRole;
    use crate::protocol::{ClientMessage, ConnectionId, Endpoint};

    struct Fixed(Option<usize>);

    impl NetworkManager for Fixed {
        fn role(&self) -> NetworkRole {
            NetworkRole::Server
        }

        fn num_players(&self) -> Option<usize> {
            self.0
        }

        fn is_client_active(&self) -> bool {
            false
        }

        fn connection_id(&self) -> Option<ConnectionId> {
            None
        }

        fn send(&self, _message: ClientMessage) -> Result<()> {
            Err(HandoffError::NotConnected)
        }

        fn shutdown_all(&self) {}

        fn connect(&self, _endpoint: &Endpoint) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_network_is_unknown() {
        let count = PlayerCount::observe(None);
        assert_eq!(count, PlayerCount::Unknown);
        assert!(!count.is_zero());
        assert!(!count.reached(0));
        assert_eq!(count.to_string(), "?");
    }

    #[test]
    fn known_counts_compare_against_threshold() {
        let zero = PlayerCount::observe(Some(&Fixed(Some(0))));
        assert!(zero.is_zero());

        let four = PlayerCount::observe(Some(&Fixed(Some(4))));
        assert!(four.reached(4));
        assert!(!four.reached(5));
        assert_eq!(four.get(), Some(4));

        assert_eq!(PlayerCount::observe(Some(&Fixed(None))), PlayerCount::Unknown);
    }
}
