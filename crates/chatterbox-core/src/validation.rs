//! Submission gate: decides whether typed text may become a user turn.

use thiserror::Error;

/// Default cap on a single outgoing message, in characters.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 500;

/// Why a submission was refused. Shown inline, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("previous response still in progress.")]
    Busy,

    #[error("message is empty.")]
    Empty,

    #[error("message exceeds maximum length.")]
    TooLong { max: usize, actual: usize },
}

/// Check a candidate message before it touches the transcript.
///
/// Busy wins over everything else, then emptiness, then length. Length is
/// counted in characters of the raw text, before trimming.
pub fn validate(text: &str, busy: bool, max_chars: usize) -> Result<(), ValidationError> {
    if busy {
        return Err(ValidationError::Busy);
    }
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let actual = text.chars().count();
    if actual > max_chars {
        return Err(ValidationError::TooLong {
            max: max_chars,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ordinary_text() {
        assert_eq!(validate("hello", false, 500), Ok(()));
    }

    #[test]
    fn test_rejects_while_busy_even_if_text_is_fine() {
        assert_eq!(validate("hello", true, 500), Err(ValidationError::Busy));
        assert_eq!(validate("", true, 500), Err(ValidationError::Busy));
    }

    #[test]
    fn test_rejects_whitespace_only() {
        assert_eq!(validate("", false, 500), Err(ValidationError::Empty));
        assert_eq!(validate(" \n\t ", false, 500), Err(ValidationError::Empty));
    }

    #[test]
    fn test_length_limit_is_inclusive() {
        let at_limit = "a".repeat(500);
        let over = "a".repeat(501);
        assert_eq!(validate(&at_limit, false, 500), Ok(()));
        assert_eq!(
            validate(&over, false, 500),
            Err(ValidationError::TooLong {
                max: 500,
                actual: 501
            })
        );
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 4 characters, 16 bytes
        assert_eq!(validate("🦀🦀🦀🦀", false, 4), Ok(()));
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(
            ValidationError::Busy.to_string(),
            "previous response still in progress."
        );
        assert_eq!(ValidationError::Empty.to_string(), "message is empty.");
        assert_eq!(
            ValidationError::TooLong { max: 1, actual: 2 }.to_string(),
            "message exceeds maximum length."
        );
    }
}
