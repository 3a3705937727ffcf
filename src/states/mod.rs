//! Concrete states.

mod end_pregame;
mod idle;
mod open_match_found;
mod open_match_start;

pub use end_pregame::EndPreGameplay;
pub use idle::IdleState;
pub use open_match_found::OpenMatchFound;
pub use open_match_start::{
    AckHandshake, HandoffConfig, HandoffPhase, OpenMatchStart, DEFAULT_DISCONNECT_GRACE,
    DEFAULT_FRONTEND_HOST, DEFAULT_OPEN_MATCH_THRESHOLD, RETRY_EVENT_SOURCE,
};
