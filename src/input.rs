//! Gate for text typed into the composer or picked from a suggested prompt.

use std::fmt;

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Message cannot be empty.")]
    Empty,

    #[error("Message must be at most {max} characters (got {len}).")]
    TooLong { len: usize, max: usize },
}

/// User text that passed validation and may be handed to the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserText(String);

impl UserText {
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        Self::parse_with_limit(raw, MAX_MESSAGE_CHARS)
    }

    pub fn parse_with_limit(raw: &str, max: usize) -> Result<Self, InputError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(InputError::Empty);
        }
        let len = trimmed.chars().count();
        if len > max {
            return Err(InputError::TooLong { len, max });
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_input() {
        assert_eq!(UserText::parse(""), Err(InputError::Empty));
        assert_eq!(UserText::parse("   \n\t"), Err(InputError::Empty));
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let text = UserText::parse("  top customers?  ").unwrap();
        assert_eq!(text.as_str(), "top customers?");
    }

    #[test]
    fn enforces_character_limit() {
        let at_limit = "a".repeat(MAX_MESSAGE_CHARS);
        assert!(UserText::parse(&at_limit).is_ok());

        let over = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(
            UserText::parse(&over),
            Err(InputError::TooLong {
                len: MAX_MESSAGE_CHARS + 1,
                max: MAX_MESSAGE_CHARS
            })
        );
    }

    #[test]
    fn counts_characters_not_bytes() {
        let emoji = "📊".repeat(10);
        assert!(UserText::parse_with_limit(&emoji, 10).is_ok());
    }
}
