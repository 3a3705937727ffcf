//! Presentation-side collaborators.
//!
//! Nothing here affects the handoff protocol. A missing [`DebugDisplay`] drops
//! diagnostics, and the [`StatusLabel`] only mirrors which state is on top.

use tracing::info;

use crate::state::StateKind;

/// Sink for on-screen diagnostic text.
pub trait DebugDisplay: Send + Sync {
    /// Show a one-off diagnostic message.
    fn show_message(&self, message: &str);

    /// Replace the per-frame text box.
    fn show_text_box(&self, text: &str) {
        let _ = text;
    }
}

/// Told the kind of the current state after every manager tick.
pub trait StateObserver: Send {
    fn on_tick(&mut self, kind: StateKind);
}

/// A single line (or block) of label text.
pub trait LabelSink: Send {
    fn set_text(&mut self, text: &str);
}

impl LabelSink for String {
    fn set_text(&mut self, text: &str) {
        text.clone_into(self);
    }
}

const LOBBY_TEXT: &str = "Lobby";
const IN_OPEN_MATCH_TEXT: &str = "Go!\nIn Open Match";
const JOINING_TEXT: &str = "Starting Momentarily\nJoining Open Match";
const FOUND_TEXT: &str = "Found Open Match";

/// Status label derived from the current state.
///
/// Once an [`OpenMatchFound`](StateKind::OpenMatchFound) state has been seen,
/// the lobby reads "Go! In Open Match" until a level finishes.
#[derive(Debug)]
pub struct StatusLabel<S> {
    sink: S,
    text: Option<String>,
    found_open_match: bool,
}

impl<S: LabelSink> StatusLabel<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            text: None,
            found_open_match: false,
        }
    }

    /// Text last written to the sink.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn text_for(&mut self, kind: StateKind) -> &'static str {
        match kind {
            StateKind::Lobby if self.found_open_match => IN_OPEN_MATCH_TEXT,
            StateKind::Lobby => LOBBY_TEXT,
            StateKind::OpenMatchStart => JOINING_TEXT,
            StateKind::OpenMatchFound => {
                self.found_open_match = true;
                FOUND_TEXT
            }
            StateKind::LevelFinished => {
                self.found_open_match = false;
                ""
            }
            _ => "",
        }
    }
}

impl<S: LabelSink> StateObserver for StatusLabel<S> {
    fn on_tick(&mut self, kind: StateKind) {
        let next = self.text_for(kind);
        if self.text.as_deref() == Some(next) {
            return;
        }
        info!(
            "status label: {:?} -> {next:?}",
            self.text.as_deref().unwrap_or_default()
        );
        self.sink.set_text(next);
        self.text = Some(next.to_string());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    /// Counts writes so "only on change" is observable.
    #[derive(Default)]
    struct CountingSink {
        text: String,
        writes: usize,
    }

    impl LabelSink for CountingSink {
        fn set_text(&mut self, text: &str) {
            self.text = text.to_string();
            self.writes += 1;
        }
    }

    #[test]
    fn writes_only_on_change() {
        let mut label = StatusLabel::new(CountingSink::default());
        label.on_tick(StateKind::Lobby);
        label.on_tick(StateKind::Lobby);
        label.on_tick(StateKind::OpenMatchStart);

        assert_eq!(label.sink().writes, 2);
        assert_eq!(label.sink().text, JOINING_TEXT);
    }

    #[test]
    fn lobby_after_found_reads_in_open_match_until_level_finishes() {
        let mut label = StatusLabel::new(String::new());
        label.on_tick(StateKind::OpenMatchFound);
        assert_eq!(label.text(), Some("Found Open Match"));

        label.on_tick(StateKind::Lobby);
        assert_eq!(label.sink().as_str(), "Go!\nIn Open Match");

        label.on_tick(StateKind::LevelFinished);
        assert_eq!(label.text(), Some(""));

        label.on_tick(StateKind::Lobby);
        assert_eq!(label.text(), Some("Lobby"));
    }

    #[test]
    fn other_states_clear_the_label() {
        let mut label = StatusLabel::new(String::new());
        label.on_tick(StateKind::Lobby);
        label.on_tick(StateKind::Custom("gameplay"));
        assert_eq!(label.text(), Some(""));
        assert_eq!(label.sink().as_str(), "");
    }
}
