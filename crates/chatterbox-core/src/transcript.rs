//! The authoritative in-memory conversation.

use crate::state::ChatMessage;

/// Default number of turns kept after each append.
pub const DEFAULT_HISTORY_WINDOW: usize = 12;

/// Ordered list of turns with an optional trailing window.
///
/// Every append and every restore keeps at most `window` of the most recent
/// turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    window: Option<usize>,
}

impl Transcript {
    pub fn new(window: Option<usize>) -> Self {
        Self {
            messages: Vec::new(),
            window,
        }
    }

    pub fn window(&self) -> Option<usize> {
        self.window
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::user(text));
        self.truncate_to_window();
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(text));
        self.truncate_to_window();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Replace the conversation wholesale with a previously saved snapshot.
    ///
    /// A snapshot saved under a wider window (or mid-request) is cut down
    /// to the current one.
    pub fn restore(&mut self, snapshot: Vec<ChatMessage>) {
        self.messages = snapshot;
        self.truncate_to_window();
    }

    fn truncate_to_window(&mut self) {
        if let Some(window) = self.window {
            if self.messages.len() > window {
                let excess = self.messages.len() - window;
                self.messages.drain(..excess);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;

    #[test]
    fn test_append_keeps_order() {
        let mut t = Transcript::new(None);
        t.append_user("hi");
        t.append_assistant("hello");
        assert_eq!(
            t.messages(),
            &[ChatMessage::user("hi"), ChatMessage::assistant("hello")]
        );
    }

    #[test]
    fn test_window_keeps_most_recent_in_order() {
        for n in [0usize, 1, 5, 12, 13, 30] {
            let mut t = Transcript::new(Some(12));
            for i in 0..n {
                t.append_assistant(format!("m{}", i));
            }
            assert_eq!(t.len(), n.min(12));
            let expected: Vec<String> = (n.saturating_sub(12)..n).map(|i| format!("m{}", i)).collect();
            let got: Vec<String> = t.messages().iter().map(|m| m.content.clone()).collect();
            assert_eq!(got, expected, "n = {}", n);
        }
    }

    #[test]
    fn test_alternating_turns_respect_window() {
        let mut t = Transcript::new(Some(4));
        for i in 0..10 {
            t.append_user(format!("q{}", i));
            t.append_assistant(format!("a{}", i));
        }
        assert_eq!(t.len(), 4);
        assert_eq!(t.messages()[0], ChatMessage::user("q8"));
        assert_eq!(t.last().map(|m| m.role), Some(ChatRole::Assistant));
    }

    #[test]
    fn test_user_append_truncates() {
        let mut t = Transcript::new(Some(2));
        t.append_assistant("a");
        t.append_assistant("b");
        t.append_user("c");
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0], ChatMessage::assistant("b"));
        t.append_assistant("d");
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0], ChatMessage::user("c"));
    }

    #[test]
    fn test_user_only_appends_respect_window() {
        let mut t = Transcript::new(Some(12));
        for i in 0..20 {
            t.append_user(format!("q{}", i));
        }
        assert_eq!(t.len(), 12);
        assert_eq!(t.messages()[0], ChatMessage::user("q8"));
        assert_eq!(t.last(), Some(&ChatMessage::user("q19")));
    }

    #[test]
    fn test_restore_applies_window() {
        let snapshot: Vec<ChatMessage> = (0..30).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        let mut t = Transcript::new(Some(12));
        t.restore(snapshot.clone());
        assert_eq!(t.len(), 12);
        assert_eq!(t.messages(), &snapshot[18..]);

        let mut unbounded = Transcript::new(None);
        unbounded.restore(snapshot);
        assert_eq!(unbounded.len(), 30);
    }

    #[test]
    fn test_consecutive_assistant_turns_allowed() {
        let mut t = Transcript::new(None);
        t.append_assistant("first");
        t.append_assistant("second");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_clear_and_restore() {
        let mut t = Transcript::new(Some(12));
        t.append_user("x");
        t.clear();
        assert!(t.is_empty());
        t.restore(vec![ChatMessage::user("a"), ChatMessage::assistant("b")]);
        assert_eq!(t.len(), 2);
    }
}
