//! Name and article key normalization.
//!
//! Reading list names are compared by their NFC, lowercased form so that a
//! list typed with combining accents on one device matches the precomposed
//! spelling from another. Article keys identify an article across wikis and
//! split into the `(project, title)` pair the remote service expects.

use serde::{Deserialize, Serialize};
use std::fmt;
use unicode_normalization::UnicodeNormalization;

const WIKI_PATH: &str = "/wiki/";

/// Stored form of a list name: trimmed and NFC composed, case preserved.
pub fn canonical_name(name: &str) -> String {
    name.trim().nfc().collect()
}

/// Matching key of a list name. Two names collide when their keys are equal.
pub fn name_key(name: &str) -> String {
    canonical_name(name).to_lowercase().nfc().collect()
}

/// Stable cross-wiki article identifier.
///
/// Two textual forms are understood:
/// - `https://en.wikipedia.org/wiki/Giraffe` (project is the site URL)
/// - `enwiki:Giraffe` (project is a short site code, split at the first `:`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleKey(String);

impl ArticleKey {
    /// Build a key from a project and a title. Spaces in the title become
    /// underscores.
    pub fn new(project: &str, title: &str) -> Self {
        let project = project.trim().trim_end_matches('/');
        let title = db_title(title);
        if project.contains("://") {
            Self(format!("{project}{WIKI_PATH}{title}"))
        } else {
            Self(format!("{project}:{title}"))
        }
    }

    /// Wrap an existing key without validating it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parse and validate a key.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = Self(raw.trim().to_string());
        key.parts().map(|_| key.clone())
    }

    /// The raw key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(project, title)`, or `None` for a malformed key.
    pub fn parts(&self) -> Option<(&str, &str)> {
        let (project, title) = if self.0.contains("://") {
            let idx = self.0.find(WIKI_PATH)?;
            (&self.0[..idx], &self.0[idx + WIKI_PATH.len()..])
        } else {
            self.0.split_once(':')?
        };
        if project.is_empty() || title.is_empty() {
            return None;
        }
        Some((project, title))
    }

    /// Human readable title derived from the key.
    pub fn display_title(&self) -> Option<String> {
        self.parts().map(|(_, title)| title.replace('_', " "))
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn db_title(title: &str) -> String {
    title.trim().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_name_composes() {
        let decomposed = "Cafe\u{301}";
        assert_eq!(canonical_name(decomposed), "Caf\u{e9}");
        assert_eq!(canonical_name("  Travel "), "Travel");
    }

    #[test]
    fn name_key_ignores_case_and_composition() {
        assert_eq!(name_key("TRAVEL"), name_key("travel"));
        assert_eq!(name_key("Cafe\u{301}"), name_key("CAF\u{c9}"));
        assert_ne!(name_key("Travel"), name_key("Travels"));
    }

    #[test]
    fn short_form_key() {
        let key = ArticleKey::new("enwiki", "Giraffe");
        assert_eq!(key.as_str(), "enwiki:Giraffe");
        assert_eq!(key.parts(), Some(("enwiki", "Giraffe")));
    }

    #[test]
    fn url_form_key() {
        let key = ArticleKey::new("https://en.wikipedia.org/", "Red panda");
        assert_eq!(key.as_str(), "https://en.wikipedia.org/wiki/Red_panda");
        assert_eq!(key.parts(), Some(("https://en.wikipedia.org", "Red_panda")));
        assert_eq!(key.display_title().as_deref(), Some("Red panda"));
    }

    #[test]
    fn title_with_colon_splits_at_first() {
        let key = ArticleKey::from_raw("enwiki:Talk:Giraffe");
        assert_eq!(key.parts(), Some(("enwiki", "Talk:Giraffe")));
    }

    #[test]
    fn malformed_keys() {
        assert!(ArticleKey::parse("Giraffe").is_none());
        assert!(ArticleKey::parse(":Giraffe").is_none());
        assert!(ArticleKey::parse("enwiki:").is_none());
        assert!(ArticleKey::parse("https://en.wikipedia.org/Giraffe").is_none());
        assert!(ArticleKey::parse(" enwiki:Giraffe ").is_some());
    }

    proptest! {
        #[test]
        fn name_key_is_idempotent(name in "[A-Za-z\u{c0}-\u{ff} \u{300}-\u{36f}]{0,24}") {
            let once = name_key(&name);
            prop_assert_eq!(name_key(&once), once);
        }

        #[test]
        fn built_keys_round_trip(project in "[a-z]{2,8}wiki", title in "[A-Za-z][A-Za-z_]{0,20}") {
            let key = ArticleKey::new(&project, &title);
            let (p, t) = key.parts().unwrap();
            prop_assert_eq!(p, project.as_str());
            prop_assert_eq!(t, title.as_str());
        }
    }
}
