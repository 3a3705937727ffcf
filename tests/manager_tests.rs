#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the state stack's lifecycle guarantees.

use std::sync::{Arc, Mutex as StdMutex};

use match_handoff::{
    Endpoint, HandoffError, State, StateExitValue, StateKind, StateManager, Transition, UiEvent,
};

type Log = Arc<StdMutex<Vec<(&'static str, String)>>>;

/// Records every hook call as `(name, hook)`.
struct Tracer {
    name: &'static str,
    log: Log,
    exit: StateExitValue,
}

impl Tracer {
    fn new(name: &'static str, log: &Log) -> Box<Self> {
        Box::new(Self {
            name,
            log: Arc::clone(log),
            exit: StateExitValue::None,
        })
    }

    fn exiting(name: &'static str, log: &Log, exit: StateExitValue) -> Box<Self> {
        let mut tracer = Self::new(name, log);
        tracer.exit = exit;
        tracer
    }

    fn record(&self, hook: impl Into<String>) {
        self.log.lock().unwrap().push((self.name, hook.into()));
    }
}

impl State for Tracer {
    fn kind(&self) -> StateKind {
        StateKind::Custom(self.name)
    }

    fn initialize(&mut self, _previous: Option<&dyn State>) {
        self.record("initialize");
    }

    fn update(&mut self) -> Transition {
        self.record("update");
        Transition::None
    }

    fn fixed_update(&mut self) -> Transition {
        self.record("fixed_update");
        Transition::None
    }

    fn suspend(&mut self) {
        self.record("suspend");
    }

    fn resume(&mut self, exit: StateExitValue) {
        self.record(format!("resume {exit:?}"));
    }

    fn cleanup(&mut self) -> StateExitValue {
        self.record("cleanup");
        self.exit.clone()
    }

    fn on_gui(&mut self) {
        self.record("on_gui");
    }

    fn handle_ui_event(&mut self, event: &UiEvent) -> Transition {
        self.record(format!("ui {}", event.source));
        Transition::None
    }
}

fn hooks_of(log: &Log, name: &str) -> Vec<String> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(n, _)| *n == name)
        .map(|(_, hook)| hook.clone())
        .collect()
}

#[test]
fn stack_never_drops_below_one() {
    let log = Log::default();
    let mut manager = StateManager::new();

    let ops: [u8; 12] = [0, 1, 1, 0, 0, 2, 1, 1, 1, 2, 0, 1];
    for (i, op) in ops.iter().enumerate() {
        let before = manager.depth();
        match *op {
            0 => {
                manager.push_state(Tracer::new("p", &log));
                assert_eq!(manager.depth(), before + 1, "op {i}");
            }
            1 => {
                let result = manager.pop_state();
                if before == 1 {
                    assert!(matches!(result, Err(HandoffError::StackUnderflow)), "op {i}");
                    assert_eq!(manager.depth(), 1);
                } else {
                    assert!(result.is_ok(), "op {i}");
                    assert_eq!(manager.depth(), before - 1);
                }
            }
            _ => {
                manager.swap_state(Tracer::new("s", &log));
                assert_eq!(manager.depth(), before, "op {i}");
            }
        }
        assert!(manager.depth() >= 1);
        let _ = manager.current_state().kind();
    }
}

#[test]
fn suspend_and_resume_pair_up_with_exit_value() {
    let log = Log::default();
    let mut manager = StateManager::with_base(Tracer::new("a", &log));
    manager.push_state(Tracer::new("b", &log));
    manager.push_state(Tracer::exiting("c", &log, StateExitValue::Aborted));

    manager.pop_state().unwrap();
    manager.pop_state().unwrap();

    assert_eq!(hooks_of(&log, "a"), vec!["suspend", "resume None"]);
    assert_eq!(
        hooks_of(&log, "b"),
        vec!["initialize", "suspend", "resume Aborted", "cleanup"]
    );
    assert_eq!(hooks_of(&log, "c"), vec!["initialize", "cleanup"]);
}

#[test]
fn swap_only_touches_the_top() {
    let log = Log::default();
    let mut manager = StateManager::with_base(Tracer::new("a", &log));
    manager.push_state(Tracer::new("b", &log));
    log.lock().unwrap().clear();

    manager.swap_state(Tracer::new("c", &log));

    assert!(hooks_of(&log, "a").is_empty());
    assert_eq!(hooks_of(&log, "b"), vec!["cleanup"]);
    assert_eq!(hooks_of(&log, "c"), vec!["initialize"]);
}

#[test]
fn clear_stack_runs_full_pop_semantics() {
    let log = Log::default();
    let mut manager = StateManager::with_base(Tracer::new("a", &log));
    manager.push_state(Tracer::new("b", &log));
    manager.push_state(Tracer::exiting(
        "c",
        &log,
        StateExitValue::MatchFound(Endpoint::new("10.0.0.1", 7777)),
    ));
    log.lock().unwrap().clear();

    manager.clear_stack(Tracer::new("d", &log));

    assert_eq!(manager.depth(), 1);
    assert_eq!(manager.current_state().kind(), StateKind::Custom("d"));
    assert_eq!(
        hooks_of(&log, "b"),
        vec![
            r#"resume MatchFound(Endpoint { address: "10.0.0.1", port: 7777 })"#.to_string(),
            "cleanup".to_string()
        ]
    );
    assert_eq!(hooks_of(&log, "a"), vec!["resume None", "cleanup"]);
}

#[test]
fn only_the_top_state_is_driven() {
    let log = Log::default();
    let mut manager = StateManager::with_base(Tracer::new("a", &log));
    manager.push_state(Tracer::new("b", &log));
    log.lock().unwrap().clear();

    manager.update().unwrap();
    manager.fixed_update().unwrap();
    manager.on_gui();
    manager
        .handle_ui_event(&UiEvent::new("open_match_retry"))
        .unwrap();

    assert!(hooks_of(&log, "a").is_empty());
    assert_eq!(
        hooks_of(&log, "b"),
        vec!["update", "fixed_update", "on_gui", "ui open_match_retry"]
    );
}

#[test]
fn apply_clear_transition() {
    let log = Log::default();
    let mut manager = StateManager::new();
    manager.push_state(Tracer::new("a", &log));
    manager.push_state(Tracer::new("b", &log));

    manager.apply(Transition::Clear(Tracer::new("c", &log))).unwrap();
    assert_eq!(manager.kinds(), vec![StateKind::Custom("c")]);

    tokio_test::assert_err!(manager.apply(Transition::Pop));
    manager.apply(Transition::None).unwrap();
    assert_eq!(manager.depth(), 1);
}
