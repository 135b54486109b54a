//! Channel name value object.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::Error;

/// Twitch logins: 3 to 25 characters of ASCII letters, digits and underscore.
static LOGIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{3,25}$").unwrap());

/// URL prefixes users paste instead of a bare login.
const URL_PREFIXES: &[&str] = &[
    "https://www.twitch.tv/",
    "http://www.twitch.tv/",
    "https://twitch.tv/",
    "http://twitch.tv/",
    "www.twitch.tv/",
    "twitch.tv/",
];

/// A validated, case-normalized channel login.
///
/// This is the join key between subscriptions, live sessions and
/// leaderboard rows, so every value that reaches storage goes through here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Normalize and validate user input.
    pub fn new(input: impl AsRef<str>) -> Result<Self, Error> {
        let normalized = Self::normalize(input.as_ref());
        if !LOGIN_REGEX.is_match(&normalized) {
            return Err(Error::validation(format!(
                "`{}` is not a valid Twitch username.",
                input.as_ref().trim()
            )));
        }
        Ok(Self(normalized))
    }

    /// Wrap a value read back from storage or the upstream API.
    pub fn from_trusted(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Public channel page.
    pub fn url(&self) -> String {
        format!("https://twitch.tv/{}", self.0)
    }

    fn normalize(input: &str) -> String {
        let mut s = input.trim();
        let lower = s.to_ascii_lowercase();
        for prefix in URL_PREFIXES {
            if lower.starts_with(prefix) {
                s = &s[prefix.len()..];
                break;
            }
        }
        s.trim_start_matches('@')
            .trim_end_matches('/')
            .to_ascii_lowercase()
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_case_and_whitespace() {
        let name = ChannelName::new("  Shroud ").unwrap();
        assert_eq!(name.as_str(), "shroud");
    }

    #[test]
    fn test_strips_url_and_at_sign() {
        assert_eq!(
            ChannelName::new("https://www.twitch.tv/Pokimane/").unwrap().as_str(),
            "pokimane"
        );
        assert_eq!(ChannelName::new("@xQc").unwrap().as_str(), "xqc");
        assert_eq!(ChannelName::new("twitch.tv/alpha_1").unwrap().as_str(), "alpha_1");
    }

    #[test]
    fn test_accepts_three_character_logins() {
        assert_eq!(ChannelName::new("xQc").unwrap().as_str(), "xqc");
        assert_eq!(ChannelName::new("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_rejects_invalid_logins() {
        assert!(ChannelName::new("ab").is_err());
        assert!(ChannelName::new("has space").is_err());
        assert!(ChannelName::new("dash-name").is_err());
        assert!(ChannelName::new("a".repeat(26)).is_err());
        assert!(ChannelName::new("").is_err());
    }

    #[test]
    fn test_validation_error_message() {
        let err = ChannelName::new("bad name!").unwrap_err();
        assert_eq!(err.user_message(), "`bad name!` is not a valid Twitch username.");
    }

    #[test]
    fn test_url() {
        let name = ChannelName::from_trusted("Alpha");
        assert_eq!(name.url(), "https://twitch.tv/alpha");
    }
}
