//! The state contract driven by [`StateManager`](crate::manager::StateManager).
//!
//! A state never touches the stack itself. Hooks that may want to change the
//! stack return a [`Transition`], which the manager applies after the hook has
//! returned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::Endpoint;

/// Tag identifying what a state is, used instead of runtime type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    /// The no-op base state placed at manager construction.
    Idle,
    Lobby,
    OpenMatchStart,
    OpenMatchFound,
    EndPreGameplay,
    LevelFinished,
    /// A game-defined state.
    Custom(&'static str),
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => f.write_str(name),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Result a state reports from [`State::cleanup`], handed to the state exposed
/// beneath it through [`State::resume`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StateExitValue {
    #[default]
    None,
    /// Matchmaking succeeded; the new session is reachable here.
    MatchFound(Endpoint),
    /// The state gave up before finishing its job.
    Aborted,
    Custom(serde_json::Value),
}

/// A stack change requested by a state.
#[derive(Default)]
pub enum Transition {
    #[default]
    None,
    Push(Box<dyn State>),
    Pop,
    Swap(Box<dyn State>),
    /// Pop down to the bottom state, then swap it.
    Clear(Box<dyn State>),
}

impl Transition {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Push(state) => f.debug_tuple("Push").field(&state.kind()).finish(),
            Self::Pop => f.write_str("Pop"),
            Self::Swap(state) => f.debug_tuple("Swap").field(&state.kind()).finish(),
            Self::Clear(state) => f.debug_tuple("Clear").field(&state.kind()).finish(),
        }
    }
}

/// An event raised by a UI widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEvent {
    /// Name of the widget that raised the event.
    pub source: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl UiEvent {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A unit of behavior with a stack lifecycle.
///
/// Only the top state of the stack receives `update`, `fixed_update`, `on_gui`
/// and UI events. Every hook except [`kind`](State::kind) has a no-op default.
pub trait State: Send {
    fn kind(&self) -> StateKind;

    /// Called once when the state enters the stack.
    ///
    /// `previous` is the state that was just suspended when this one was
    /// pushed, and `None` when this one replaced another through a swap.
    fn initialize(&mut self, previous: Option<&dyn State>) {
        let _ = previous;
    }

    /// Called once per logical tick while on top.
    fn update(&mut self) -> Transition {
        Transition::None
    }

    /// Called once per fixed-timestep tick while on top. The cadence is not
    /// guaranteed; it may not fire at all while paused.
    fn fixed_update(&mut self) -> Transition {
        Transition::None
    }

    /// Another state was pushed above this one.
    fn suspend(&mut self) {}

    /// The state above this one was popped and reported `exit`.
    fn resume(&mut self, exit: StateExitValue) {
        let _ = exit;
    }

    /// The state is about to leave the stack.
    fn cleanup(&mut self) -> StateExitValue {
        StateExitValue::None
    }

    fn on_gui(&mut self) {}

    fn handle_ui_event(&mut self, event: &UiEvent) -> Transition {
        let _ = event;
        Transition::None
    }
}
