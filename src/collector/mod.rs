//! Text collection for discovering and filtering analyzable fragments.
//!
//! This module turns raw post records into an ordered list of cleaned
//! [`TextUnit`]s, respecting the configured filter thresholds. It is a pure
//! function of its input: no I/O and no randomness.

use crate::models::{Post, SourceKind, TextSource, TextUnit};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// Placeholder that replaces bare URLs.
pub const LINK_PLACEHOLDER: &str = "[link]";

/// Bodies the upstream substitutes for deleted or moderated content.
const DELETION_PLACEHOLDERS: &[&str] = &[
    "[deleted]",
    "[removed]",
    "[deleted by user]",
    "[removed by reddit]",
    "[removed by moderator]",
];

/// Exact-match phrases that carry no sentiment on their own.
const LOW_EFFORT_PHRASES: &[&str] = &[
    "lol", "lmao", "lmfao", "rofl", "haha", "hahaha", "this", "this.", "this!", "same", "+1",
    "ok", "okay", "k", "yes", "no", "yep", "nope", "ty", "thanks", "thank you", "thx", "nice",
    "cool", "wow", "agreed", "true", "bump", "first", "f", "^", "^^", "^this", "this ^",
];

/// Filter thresholds for candidate texts.
#[derive(Debug, Clone)]
pub struct FilterRules {
    /// Texts shorter than this are rejected.
    pub min_chars: usize,
    /// Texts shorter than this need a word or some popularity.
    pub short_text_chars: usize,
    /// Weight that lets a short, wordless text through.
    pub short_text_min_weight: i64,
    /// Weight that lets a low-effort phrase through.
    pub low_effort_min_weight: i64,
    /// Extra low-effort phrases on top of the built-in list.
    pub extra_low_effort: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            min_chars: 5,
            short_text_chars: 15,
            short_text_min_weight: 5,
            low_effort_min_weight: 10,
            extra_low_effort: Vec::new(),
        }
    }
}

impl From<&crate::config::FilterConfig> for FilterRules {
    fn from(config: &crate::config::FilterConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            short_text_chars: config.short_text_chars,
            short_text_min_weight: config.short_text_min_weight,
            low_effort_min_weight: config.low_effort_min_weight,
            extra_low_effort: config
                .extra_low_effort
                .iter()
                .map(|p| p.trim().to_lowercase())
                .collect(),
        }
    }
}

/// Why a candidate text was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    Empty,
    Deleted,
    LowEffort,
    TooShort,
    ShortWithoutWords,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "empty"),
            RejectReason::Deleted => write!(f, "deleted"),
            RejectReason::LowEffort => write!(f, "low-effort"),
            RejectReason::TooShort => write!(f, "too short"),
            RejectReason::ShortWithoutWords => write!(f, "short without words"),
        }
    }
}

/// Counters describing one collection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectStats {
    /// Candidate texts seen (titles, bodies, comments).
    pub raw: usize,
    /// Texts that became units.
    pub kept: usize,
    pub rejected: BTreeMap<RejectReason, usize>,
}

/// Output of [`TextCollector::collect`].
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub units: Vec<TextUnit>,
    pub stats: CollectStats,
}

/// Collector for turning posts into text units.
#[derive(Debug, Clone, Default)]
pub struct TextCollector {
    rules: FilterRules,
}

impl TextCollector {
    /// Create a new collector.
    pub fn new(rules: FilterRules) -> Self {
        Self { rules }
    }

    /// Collect units from posts in order: title, body, then comments.
    pub fn collect(&self, posts: &[Post]) -> Collection {
        let mut collection = Collection::default();

        for post in posts {
            let post_date = post.created_date();
            let source = |kind, comment_id: Option<&str>, weight| TextSource {
                kind,
                post_id: post.id.clone(),
                comment_id: comment_id.map(String::from),
                group_key: post.group_key.clone(),
                original_weight: weight,
                post_date,
            };

            self.push(
                &mut collection,
                &post.title,
                source(SourceKind::PostTitle, None, post.weight),
            );

            if let Some(ref body) = post.body {
                self.push(
                    &mut collection,
                    body,
                    source(SourceKind::PostBody, None, post.weight),
                );
            }

            for comment in &post.comments {
                self.push(
                    &mut collection,
                    &comment.body,
                    source(SourceKind::Comment, Some(comment.id.as_str()), comment.weight),
                );
            }
        }

        debug!(
            "Collected {} of {} texts ({:?} rejected)",
            collection.stats.kept, collection.stats.raw, collection.stats.rejected
        );

        collection
    }

    fn push(&self, collection: &mut Collection, raw: &str, source: TextSource) {
        collection.stats.raw += 1;

        let content = clean(raw);
        match self.evaluate(&content, source.original_weight) {
            Ok(()) => {
                collection.stats.kept += 1;
                collection.units.push(TextUnit { content, source });
            }
            Err(reason) => {
                *collection.stats.rejected.entry(reason).or_insert(0) += 1;
            }
        }
    }

    /// Check whether a cleaned text should be analyzed.
    pub fn should_include(&self, text: &str, weight: i64) -> bool {
        self.evaluate(text, weight).is_ok()
    }

    /// Apply the filter rules in order, returning the first rejection.
    pub fn evaluate(&self, text: &str, weight: i64) -> Result<(), RejectReason> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RejectReason::Empty);
        }

        let lowered = text.to_lowercase();
        if DELETION_PLACEHOLDERS.contains(&lowered.as_str()) {
            return Err(RejectReason::Deleted);
        }

        if self.is_low_effort(&lowered) {
            return if weight >= self.rules.low_effort_min_weight {
                Ok(())
            } else {
                Err(RejectReason::LowEffort)
            };
        }

        let chars = text.chars().count();
        if chars < self.rules.min_chars {
            return Err(RejectReason::TooShort);
        }

        if chars < self.rules.short_text_chars
            && !has_letter_run(text, 3)
            && weight < self.rules.short_text_min_weight
        {
            return Err(RejectReason::ShortWithoutWords);
        }

        Ok(())
    }

    fn is_low_effort(&self, lowered: &str) -> bool {
        LOW_EFFORT_PHRASES.contains(&lowered)
            || self.rules.extra_low_effort.iter().any(|p| p == lowered)
            || is_punctuation_or_numeric(lowered)
    }
}

/// Check whether a text should be analyzed under the default rules.
pub fn should_include(text: &str, weight: i64) -> bool {
    TextCollector::default().should_include(text, weight)
}

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\((?:[^()\s]+|\([^()\s]*\))+(?:\s+[^)]*)?\)").expect("valid regex"))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>()\[\]]*[^\s<>()\[\].,;:!?'"]"#).expect("valid regex"))
}

fn emphasis_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*{1,3}|_{2,3}|~~").expect("valid regex"))
}

fn quote_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*(?:>[ \t]?)+").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Normalize a raw post or comment body for analysis.
///
/// Markdown links are unwrapped before URL replacement so the anchor text
/// survives and only the target is dropped.
pub fn clean(text: &str) -> String {
    let text = text
        .replace("&amp;", "&")
        .replace("&gt;", ">")
        .replace("&lt;", "<");
    let text = markdown_link_re().replace_all(&text, "$1");
    let text = url_re().replace_all(&text, LINK_PLACEHOLDER);
    let text = emphasis_re().replace_all(&text, "");
    let text = quote_re().replace_all(&text, "");
    let text = whitespace_re().replace_all(&text, " ");
    text.trim().to_string()
}

fn has_letter_run(text: &str, run: usize) -> bool {
    let mut current = 0;
    for c in text.chars() {
        if c.is_alphabetic() {
            current += 1;
            if current >= run {
                return true;
            }
        } else {
            current = 0;
        }
    }
    false
}

fn is_punctuation_or_numeric(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_punctuation() || c.is_numeric() || c.is_whitespace())
}
