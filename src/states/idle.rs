use crate::state::{State, StateKind};

/// No-op state sitting at the bottom of a fresh stack.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleState;

impl State for IdleState {
    fn kind(&self) -> StateKind {
        StateKind::Idle
    }
}
