//! Stack-based state machine.
//!
//! The stack is never empty: the bottom state lives in its own slot and the
//! remaining states sit above it, so the current state is always available.

use tracing::{debug, trace, warn};

use crate::error::{HandoffError, Result};
use crate::presentation::StateObserver;
use crate::state::{State, StateKind, Transition, UiEvent};
use crate::states::IdleState;

/// Owns the state stack and drives its top state.
///
/// # Example
///
/// ```
/// use match_handoff::manager::StateManager;
/// use match_handoff::state::{State, StateKind};
///
/// struct Lobby;
///
/// impl State for Lobby {
///     fn kind(&self) -> StateKind {
///         StateKind::Lobby
///     }
/// }
///
/// let mut manager = StateManager::new();
/// manager.push_state(Box::new(Lobby));
/// assert_eq!(manager.current_state().kind(), StateKind::Lobby);
/// assert_eq!(manager.depth(), 2);
///
/// manager.pop_state().unwrap();
/// assert!(manager.pop_state().is_err());
/// ```
pub struct StateManager {
    bottom: Box<dyn State>,
    stack: Vec<Box<dyn State>>,
    observer: Option<Box<dyn StateObserver>>,
}

impl StateManager {
    /// Create a manager whose stack holds a single [`IdleState`].
    pub fn new() -> Self {
        Self::with_base(Box::new(IdleState))
    }

    /// Create a manager with `base` as the bottom state. `base` is not
    /// initialized.
    pub fn with_base(base: Box<dyn State>) -> Self {
        Self {
            bottom: base,
            stack: Vec::new(),
            observer: None,
        }
    }

    /// Register an observer that is told the current state kind after every
    /// [`update`](Self::update).
    #[must_use]
    pub fn with_observer(mut self, observer: impl StateObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn current_state(&self) -> &dyn State {
        self.stack.last().unwrap_or(&self.bottom).as_ref()
    }

    pub fn current_state_mut(&mut self) -> &mut dyn State {
        self.stack.last_mut().unwrap_or(&mut self.bottom).as_mut()
    }

    /// Number of states on the stack, at least 1.
    pub fn depth(&self) -> usize {
        self.stack.len() + 1
    }

    /// Kinds of all states from bottom to top.
    pub fn kinds(&self) -> Vec<StateKind> {
        std::iter::once(&self.bottom)
            .chain(self.stack.iter())
            .map(|state| state.kind())
            .collect()
    }

    /// Suspend the current state and put `state` on top of it.
    pub fn push_state(&mut self, state: Box<dyn State>) {
        debug!(
            "push {} over {}",
            state.kind(),
            self.current_state().kind()
        );
        self.current_state_mut().suspend();
        self.stack.push(state);

        if let Some((top, below)) = self.stack.split_last_mut() {
            let previous: &dyn State = below.last().unwrap_or(&self.bottom).as_ref();
            top.initialize(Some(previous));
        }
    }

    /// Clean up and remove the top state, then resume the state beneath it
    /// with the exit value.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::StackUnderflow`] when only the bottom state is
    /// left. The stack is not modified in that case.
    pub fn pop_state(&mut self) -> Result<()> {
        let Some(top) = self.stack.last_mut() else {
            warn!("refusing to pop the bottom state {}", self.bottom.kind());
            return Err(HandoffError::StackUnderflow);
        };
        let exit = top.cleanup();
        let popped = self.stack.pop();
        if let Some(popped) = popped {
            debug!("pop {} with {exit:?}", popped.kind());
        }
        self.current_state_mut().resume(exit);
        Ok(())
    }

    /// Replace the top state. The state beneath it is neither suspended nor
    /// resumed.
    pub fn swap_state(&mut self, state: Box<dyn State>) {
        let slot = self.stack.last_mut().unwrap_or(&mut self.bottom);
        let exit = slot.cleanup();
        debug!("swap {} for {} (exit {exit:?})", slot.kind(), state.kind());
        *slot = state;
        slot.initialize(None);
    }

    /// Pop until only the bottom state remains, then swap it for `state`.
    /// Every popped state gets its cleanup and every exposed state its resume.
    pub fn clear_stack(&mut self, state: Box<dyn State>) {
        while !self.stack.is_empty() {
            if self.pop_state().is_err() {
                break;
            }
        }
        self.swap_state(state);
    }

    /// Apply a transition returned by a state hook.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::StackUnderflow`] for a pop of the bottom state.
    pub fn apply(&mut self, transition: Transition) -> Result<()> {
        match transition {
            Transition::None => {}
            Transition::Push(state) => self.push_state(state),
            Transition::Pop => self.pop_state()?,
            Transition::Swap(state) => self.swap_state(state),
            Transition::Clear(state) => self.clear_stack(state),
        }
        Ok(())
    }

    /// Run one logical tick of the current state and apply its transition.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`apply`](Self::apply).
    pub fn update(&mut self) -> Result<()> {
        let transition = self.current_state_mut().update();
        if !transition.is_none() {
            trace!("update requested {transition:?}");
        }
        let result = self.apply(transition);

        let kind = self.current_state().kind();
        if let Some(observer) = self.observer.as_mut() {
            observer.on_tick(kind);
        }
        result
    }

    /// Run one fixed-timestep tick of the current state.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`apply`](Self::apply).
    pub fn fixed_update(&mut self) -> Result<()> {
        let transition = self.current_state_mut().fixed_update();
        self.apply(transition)
    }

    pub fn on_gui(&mut self) {
        self.current_state_mut().on_gui();
    }

    /// Forward a UI event to the current state.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`apply`](Self::apply).
    pub fn handle_ui_event(&mut self, event: &UiEvent) -> Result<()> {
        trace!("ui event from {}", event.source);
        let transition = self.current_state_mut().handle_ui_event(event);
        self.apply(transition)
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("stack", &self.kinds())
            .field("observer", &self.observer.is_some())
            .finish()
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
    use crate::state::StateExitValue;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        exit: StateExitValue,
        on_update: Option<Transition>,
    }

    impl Recording {
        fn boxed(name: &'static str, log: &Log) -> Box<Self> {
            Box::new(Self {
                name,
                log: Arc::clone(log),
                exit: StateExitValue::None,
                on_update: None,
            })
        }

        fn record(&self, event: String) {
            self.log.lock().unwrap().push(format!("{}.{event}", self.name));
        }
    }

    impl State for Recording {
        fn kind(&self) -> StateKind {
            StateKind::Custom(self.name)
        }

        fn initialize(&mut self, previous: Option<&dyn State>) {
            let previous = previous.map_or("-".to_string(), |s| s.kind().to_string());
            self.record(format!("initialize({previous})"));
        }

        fn update(&mut self) -> Transition {
            self.record("update".into());
            self.on_update.take().unwrap_or_default()
        }

        fn suspend(&mut self) {
            self.record("suspend".into());
        }

        fn resume(&mut self, exit: StateExitValue) {
            self.record(format!("resume({exit:?})"));
        }

        fn cleanup(&mut self) -> StateExitValue {
            self.record("cleanup".into());
            self.exit.clone()
        }
    }

    fn drain(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn fresh_manager_has_idle_bottom() {
        let manager = StateManager::new();
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.current_state().kind(), StateKind::Idle);
    }

    #[test]
    fn popping_bottom_is_rejected() {
        let mut manager = StateManager::new();
        assert!(matches!(
            manager.pop_state(),
            Err(HandoffError::StackUnderflow)
        ));
        assert_eq!(manager.depth(), 1);
    }

    #[test]
    fn push_suspends_then_initializes_with_previous() {
        let log = Log::default();
        let mut manager = StateManager::with_base(Recording::boxed("a", &log));
        manager.push_state(Recording::boxed("b", &log));

        assert_eq!(drain(&log), vec!["a.suspend", "b.initialize(a)"]);
        assert_eq!(manager.current_state().kind(), StateKind::Custom("b"));
    }

    #[test]
    fn pop_resumes_with_exit_value() {
        let log = Log::default();
        let mut manager = StateManager::with_base(Recording::boxed("a", &log));
        let mut b = Recording::boxed("b", &log);
        b.exit = StateExitValue::Aborted;
        manager.push_state(b);
        drain(&log);

        manager.pop_state().unwrap();
        assert_eq!(drain(&log), vec!["b.cleanup", "a.resume(Aborted)"]);
    }

    #[test]
    fn swap_leaves_state_below_alone() {
        let log = Log::default();
        let mut manager = StateManager::with_base(Recording::boxed("a", &log));
        manager.push_state(Recording::boxed("b", &log));
        drain(&log);

        manager.swap_state(Recording::boxed("c", &log));
        assert_eq!(drain(&log), vec!["b.cleanup", "c.initialize(-)"]);
        assert_eq!(
            manager.kinds(),
            vec![StateKind::Custom("a"), StateKind::Custom("c")]
        );
    }

    #[test]
    fn swap_on_single_state_replaces_bottom() {
        let log = Log::default();
        let mut manager = StateManager::with_base(Recording::boxed("a", &log));
        manager.swap_state(Recording::boxed("b", &log));

        assert_eq!(drain(&log), vec!["a.cleanup", "b.initialize(-)"]);
        assert_eq!(manager.depth(), 1);
    }

    #[test]
    fn clear_pops_each_state_then_swaps() {
        let log = Log::default();
        let mut manager = StateManager::with_base(Recording::boxed("a", &log));
        manager.push_state(Recording::boxed("b", &log));
        manager.push_state(Recording::boxed("c", &log));
        drain(&log);

        manager.clear_stack(Recording::boxed("d", &log));
        assert_eq!(
            drain(&log),
            vec![
                "c.cleanup",
                "b.resume(None)",
                "b.cleanup",
                "a.resume(None)",
                "a.cleanup",
                "d.initialize(-)",
            ]
        );
        assert_eq!(manager.kinds(), vec![StateKind::Custom("d")]);
    }

    #[test]
    fn update_applies_returned_transition() {
        let log = Log::default();
        let mut a = Recording::boxed("a", &log);
        a.on_update = Some(Transition::Push(Recording::boxed("b", &log)));
        let mut manager = StateManager::with_base(a);

        manager.update().unwrap();
        assert_eq!(
            drain(&log),
            vec!["a.update", "a.suspend", "b.initialize(a)"]
        );

        manager.update().unwrap();
        assert_eq!(drain(&log), vec!["b.update"]);
    }

    #[test]
    fn update_reports_underflow_from_bottom_pop() {
        let log = Log::default();
        let mut a = Recording::boxed("a", &log);
        a.on_update = Some(Transition::Pop);
        let mut manager = StateManager::with_base(a);

        assert!(matches!(
            manager.update(),
            Err(HandoffError::StackUnderflow)
        ));
        assert_eq!(manager.depth(), 1);
    }

    #[test]
    fn observer_sees_kind_after_transition() {
        struct Kinds(Arc<Mutex<Vec<StateKind>>>);

        impl StateObserver for Kinds {
            fn on_tick(&mut self, kind: StateKind) {
                self.0.lock().unwrap().push(kind);
            }
        }

        let log = Log::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut a = Recording::boxed("a", &log);
        a.on_update = Some(Transition::Swap(Recording::boxed("b", &log)));
        let mut manager = StateManager::with_base(a).with_observer(Kinds(Arc::clone(&seen)));

        manager.update().unwrap();
        manager.update().unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![StateKind::Custom("b"), StateKind::Custom("b")]
        );
    }
}
