use shortcut_core::{LinkName, StoreError};
use std::fmt::Display;
use std::str::FromStr;

/// Position in the recency sorted set: the last entry a page returned.
///
/// Rendered as `"{score}:{name}"`. Names never contain `:`, so the first
/// colon splits the two parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisCursor {
    /// Score (milliseconds since the Unix epoch) of the last entry.
    pub score: i64,
    /// Member of the last entry.
    pub name: LinkName,
}

impl RedisCursor {
    pub fn new(score: i64, name: LinkName) -> Self {
        Self { score, name }
    }

    /// Whether `(score, name)` was already returned by the page this cursor
    /// ends.
    ///
    /// Entries are visited by descending score, and by descending member
    /// among equal scores.
    pub fn covers(&self, score: i64, name: &str) -> bool {
        score > self.score || (score == self.score && name >= self.name.as_str())
    }
}

impl Display for RedisCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.score, self.name)
    }
}

impl FromStr for RedisCursor {
    type Err = StoreError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidToken(token.to_string());

        let (score, name) = token.split_once(':').ok_or_else(invalid)?;
        let score = score.parse::<i64>().map_err(|_| invalid())?;
        let name = LinkName::new(name).map_err(|_| invalid())?;
        Ok(Self { score, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_what_it_renders() {
        let cursor = RedisCursor::new(1_700_000_000_000, LinkName::new("go/docs").unwrap());
        let token = cursor.to_string();
        assert_eq!(token, "1700000000000:go/docs");
        assert_eq!(token.parse::<RedisCursor>().unwrap(), cursor);
    }

    #[test]
    fn rejects_malformed_tokens() {
        for token in ["", "123", "abc:name", "123:", "123:bad name"] {
            assert!(
                matches!(token.parse::<RedisCursor>(), Err(StoreError::InvalidToken(_))),
                "{token}"
            );
        }
    }

    #[test]
    fn covers_higher_scores_and_earlier_ties() {
        let cursor = RedisCursor::new(100, LinkName::new("m").unwrap());

        assert!(cursor.covers(101, "a"));
        assert!(cursor.covers(100, "m"));
        assert!(cursor.covers(100, "z"));
        assert!(!cursor.covers(100, "a"));
        assert!(!cursor.covers(99, "z"));
    }
}
