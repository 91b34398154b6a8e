//! Data models for the sentiment pipeline.
//!
//! This module contains the core data structures used throughout the
//! pipeline: the input records, the text units and batches derived from
//! them, per-item scores, and the aggregate result handed to the caller.

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A forum post as delivered by the upstream fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Upstream post identifier.
    pub id: String,
    /// Post title.
    pub title: String,
    /// Optional self-text body.
    #[serde(default)]
    pub body: Option<String>,
    /// Community the post belongs to (e.g. subreddit name).
    pub group_key: String,
    /// Creation time, in the offset the upstream recorded it with.
    pub created_at: DateTime<FixedOffset>,
    /// Popularity weight of the post itself (upvotes).
    #[serde(default)]
    pub weight: i64,
    /// Comments in thread order.
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Post {
    /// Calendar day of creation in the post's own offset.
    pub fn created_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// A comment on a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Upstream comment identifier.
    pub id: String,
    /// Comment text.
    pub body: String,
    /// Popularity weight (upvotes).
    #[serde(default)]
    pub weight: i64,
    /// Comment timestamp. Accepted, but timeline bucketing uses the post date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<FixedOffset>>,
}

/// Where a text unit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    PostTitle,
    PostBody,
    Comment,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::PostTitle => write!(f, "title"),
            SourceKind::PostBody => write!(f, "post"),
            SourceKind::Comment => write!(f, "comment"),
        }
    }
}

/// Provenance of a text unit, copied onto every score derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSource {
    pub kind: SourceKind,
    pub post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    pub group_key: String,
    pub original_weight: i64,
    /// Creation date of the originating post (timeline bucket key).
    pub post_date: NaiveDate,
}

/// One cleaned, filtered text fragment plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextUnit {
    pub content: String,
    pub source: TextSource,
}

/// A contiguous slice of text units submitted in one provider call.
///
/// Item order is the contract for correlating response indices: response
/// index `i` (1-based) maps to `items[i - 1]`, which is global unit
/// `offset + i - 1`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based batch number within the run.
    pub ordinal: usize,
    /// Global position of the first unit.
    pub offset: usize,
    pub items: Vec<TextUnit>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Resolve a 1-based response index to the unit it refers to.
    pub fn unit(&self, index: usize) -> Option<&TextUnit> {
        index.checked_sub(1).and_then(|i| self.items.get(i))
    }
}

/// Sentiment label of a scored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Positive,
    Neutral,
    Negative,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Positive => write!(f, "Positive"),
            Label::Neutral => write!(f, "Neutral"),
            Label::Negative => write!(f, "Negative"),
        }
    }
}

impl Label {
    /// Returns an emoji representation of the label.
    pub fn emoji(&self) -> &'static str {
        match self {
            Label::Positive => "🟢",
            Label::Neutral => "⚪",
            Label::Negative => "🔴",
        }
    }

    /// Parse a model-provided label, tolerating case and common synonyms.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" | "pos" => Some(Label::Positive),
            "neutral" | "mixed" | "neu" => Some(Label::Neutral),
            "negative" | "neg" => Some(Label::Negative),
            _ => None,
        }
    }

    /// Score assumed for a label that arrived without one.
    pub fn nominal_score(self) -> f64 {
        match self {
            Label::Positive => 0.5,
            Label::Neutral => 0.0,
            Label::Negative => -0.5,
        }
    }

    /// Derive a label from a numeric score when the model gave none.
    pub fn from_score(score: f64) -> Self {
        if score > 0.1 {
            Label::Positive
        } else if score < -0.1 {
            Label::Negative
        } else {
            Label::Neutral
        }
    }
}

/// The per-text-unit result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemScore {
    /// 1-based index within the originating batch.
    pub index: usize,
    /// Ordinal of the originating batch.
    pub batch: usize,
    /// Sentiment score in [-1, 1].
    pub score: f64,
    pub label: Label,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub emotions: Vec<String>,
    pub source: TextSource,
}

/// Label percentages. Each is rounded on its own, so they may not sum to 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub positive: u32,
    pub neutral: u32,
    pub negative: u32,
}

impl Distribution {
    pub fn sum(&self) -> u32 {
        self.positive + self.neutral + self.negative
    }
}

/// Per-community statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub average_score: f64,
    pub total: usize,
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

/// One calendar-day bucket of the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePoint {
    pub date: NaiveDate,
    pub average_score: f64,
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
    pub total: usize,
}

/// Final statistics over every scored item of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub average_score: f64,
    pub distribution: Distribution,
    /// Up to five most frequent themes.
    pub dominant_themes: Vec<String>,
    /// Up to five most frequent emotions.
    pub key_emotions: Vec<String>,
    pub summary: String,
    pub items: Vec<ItemScore>,
    pub by_group: BTreeMap<String, GroupStats>,
    /// Buckets in ascending date order.
    pub timeline: Vec<TimelinePoint>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every planned batch was attempted.
    Completed,
    /// The cancellation gate closed before all batches ran.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A batch that produced no scores after exhausting retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub ordinal: usize,
    /// Number of units in the batch (all missing from the result).
    pub size: usize,
    /// Failure class that ended the batch.
    pub class: String,
    pub attempts: usize,
    pub message: String,
}

/// Everything a caller gets back from one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Provider variant that served the run.
    pub provider: String,
    pub model: String,
    /// Text units submitted for analysis.
    pub submitted: usize,
    pub batches_planned: usize,
    /// Batches attempted, including ones that failed.
    pub batches_completed: usize,
    pub failed_batches: Vec<BatchFailure>,
    /// Batches whose response could not be parsed.
    pub unparsed_batches: Vec<usize>,
    pub duration_seconds: f64,
    pub result: AggregateResult,
}

impl RunReport {
    /// Units submitted but absent from the result.
    pub fn coverage_gap(&self) -> usize {
        self.submitted.saturating_sub(self.result.items.len())
    }
}
