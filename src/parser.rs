//! Recovery-oriented parsing of model output.
//!
//! Model output is not contractually well-formed, so parsing is an ordered
//! chain of strategies. The first one that yields an object containing
//! `items` or `overall` wins:
//!
//! 1. [`Strategy::Direct`] - the raw text is the JSON object
//! 2. [`Strategy::BraceTrim`] - drop everything outside the outermost braces
//! 3. [`Strategy::BalancedScan`] - try every balanced `{...}` span, largest first
//! 4. [`Strategy::Placeholder`] - neutral stand-in flagged `parsing_error`
//!
//! Parsing never fails; a batch with unusable output simply scores nothing.

use crate::models::{Batch, Distribution, ItemScore, Label};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Theme reported when no strategy could recover the response.
pub const PARSING_ERROR_THEME: &str = "parsing_error";

/// Which recovery step produced a [`ParsedResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    BraceTrim,
    BalancedScan,
    Placeholder,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => write!(f, "direct"),
            Strategy::BraceTrim => write!(f, "brace-trim"),
            Strategy::BalancedScan => write!(f, "balanced-scan"),
            Strategy::Placeholder => write!(f, "placeholder"),
        }
    }
}

/// Extraction strategies in the order they are tried.
pub const STRATEGIES: &[(Strategy, fn(&str) -> Option<Value>)] = &[
    (Strategy::Direct, parse_direct),
    (Strategy::BraceTrim, parse_brace_trim),
    (Strategy::BalancedScan, parse_balanced_scan),
];

/// One entry of the model's `items` array, leniently read.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub index: usize,
    pub score: f64,
    pub label: Label,
    pub confidence: f64,
    pub themes: Vec<String>,
    pub emotions: Vec<String>,
}

/// The model's own `overall` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overall {
    pub average_score: f64,
    pub distribution: Distribution,
    pub dominant_themes: Vec<String>,
    pub key_emotions: Vec<String>,
    pub summary: String,
}

/// A recovered response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub items: Vec<RawItem>,
    pub overall: Overall,
    pub strategy: Strategy,
}

impl ParsedResponse {
    /// Stand-in for a response nothing could be recovered from.
    pub fn placeholder() -> Self {
        Self {
            items: Vec::new(),
            overall: Overall {
                dominant_themes: vec![PARSING_ERROR_THEME.to_string()],
                summary: "Unable to parse model response".to_string(),
                ..Overall::default()
            },
            strategy: Strategy::Placeholder,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.strategy == Strategy::Placeholder
    }

    /// Convert raw items into scores for the batch they answer.
    ///
    /// Items pointing outside the batch or repeating an earlier index are
    /// dropped, so every returned index is unique and within `1..=batch.len()`.
    pub fn into_scores(self, batch: &Batch) -> Vec<ItemScore> {
        let mut seen = HashSet::new();
        let mut scores = Vec::with_capacity(self.items.len());

        for item in self.items {
            let Some(unit) = batch.unit(item.index) else {
                debug!(
                    "Batch {}: dropping out-of-range index {}",
                    batch.ordinal, item.index
                );
                continue;
            };
            if !seen.insert(item.index) {
                debug!(
                    "Batch {}: dropping duplicate index {}",
                    batch.ordinal, item.index
                );
                continue;
            }

            scores.push(ItemScore {
                index: item.index,
                batch: batch.ordinal,
                score: item.score,
                label: item.label,
                confidence: item.confidence,
                themes: item.themes,
                emotions: item.emotions,
                source: unit.source.clone(),
            });
        }

        scores
    }
}

/// Run the recovery chain over raw model text.
pub fn parse_response(raw: &str) -> ParsedResponse {
    for (strategy, extract) in STRATEGIES {
        if let Some(value) = extract(raw) {
            debug!("Response recovered with {} strategy", strategy);
            return from_value(&value, *strategy);
        }
    }

    debug!(
        "No strategy recovered the response ({} chars); using placeholder",
        raw.len()
    );
    ParsedResponse::placeholder()
}

/// Strategy 1: the whole text is the object.
pub fn parse_direct(raw: &str) -> Option<Value> {
    parse_expected(raw.trim())
}

/// Strategy 2: cut to the first `{` and the last `}`.
pub fn parse_brace_trim(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_expected(&raw[start..=end])
}

/// Strategy 3: try balanced brace spans, largest first.
pub fn parse_balanced_scan(raw: &str) -> Option<Value> {
    let mut spans = balanced_spans(raw);
    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));

    spans
        .into_iter()
        .find_map(|(start, end)| parse_expected(&raw[start..=end]))
}

/// Parse text and accept it only if it looks like a batch response.
fn parse_expected(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    if object.contains_key("items") || object.contains_key("overall") {
        Some(value)
    } else {
        None
    }
}

/// Byte ranges (inclusive) of every balanced `{...}` span.
///
/// Braces inside JSON string literals do not count toward nesting.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();

    for (start, _) in bytes.iter().enumerate().filter(|&(_, &b)| b == b'{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        spans.push((start, start + offset));
                        break;
                    }
                }
                _ => {}
            }
        }
    }

    spans
}

fn from_value(value: &Value, strategy: Strategy) -> ParsedResponse {
    let items = value["items"]
        .as_array()
        .map(|items| items.iter().filter_map(json_to_item).collect())
        .unwrap_or_default();

    ParsedResponse {
        items,
        overall: json_to_overall(&value["overall"]),
        strategy,
    }
}

fn json_to_item(json: &Value) -> Option<RawItem> {
    let index = json_usize(&json["index"])?;
    let score = json_f64(&json["score"]).map(|s| s.clamp(-1.0, 1.0));
    let label = json["label"].as_str().and_then(Label::parse);

    // Either field stands in for the other; an item with neither is dropped
    let (score, label) = match (score, label) {
        (Some(score), Some(label)) => (score, label),
        (Some(score), None) => (score, Label::from_score(score)),
        (None, Some(label)) => (label.nominal_score(), label),
        (None, None) => return None,
    };

    Some(RawItem {
        index,
        score,
        label,
        confidence: json_f64(&json["confidence"])
            .unwrap_or(0.5)
            .clamp(0.0, 1.0),
        themes: json_strings(&json["themes"]),
        emotions: json_strings(&json["emotions"]),
    })
}

fn json_to_overall(json: &Value) -> Overall {
    let percent = |key: &str| {
        json_f64(&json["distribution"][key])
            .map(|v| v.clamp(0.0, 100.0).round() as u32)
            .unwrap_or(0)
    };

    Overall {
        average_score: json_f64(&json["averageScore"])
            .unwrap_or(0.0)
            .clamp(-1.0, 1.0),
        distribution: Distribution {
            positive: percent("positive"),
            neutral: percent("neutral"),
            negative: percent("negative"),
        },
        dominant_themes: json_strings(&json["dominantThemes"]),
        key_emotions: json_strings(&json["keyEmotions"]),
        summary: json["summary"].as_str().unwrap_or("").trim().to_string(),
    }
}

/// Number or numeric string, finite only.
fn json_f64(json: &Value) -> Option<f64> {
    let value = match json {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn json_usize(json: &Value) -> Option<usize> {
    match json {
        Value::Number(n) => n.as_u64().map(|v| v as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-empty trimmed strings from an array; a lone string counts as one.
fn json_strings(json: &Value) -> Vec<String> {
    let keep = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_string())
    };

    match json {
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(keep)
            .collect(),
        Value::String(s) => keep(s).into_iter().collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceKind, TextSource, TextUnit};
    use chrono::NaiveDate;

    fn batch(n: usize) -> Batch {
        Batch {
            ordinal: 3,
            offset: 40,
            items: (0..n)
                .map(|i| TextUnit {
                    content: format!("text {}", i),
                    source: TextSource {
                        kind: SourceKind::Comment,
                        post_id: "p".to_string(),
                        comment_id: Some(format!("c{}", i)),
                        group_key: "rust".to_string(),
                        original_weight: 0,
                        post_date: NaiveDate::from_ymd_opt(2024, 2, 2).unwrap(),
                    },
                })
                .collect(),
        }
    }

    fn well_formed(n: usize) -> String {
        let items: Vec<String> = (1..=n)
            .map(|i| {
                format!(
                    r#"{{"index": {}, "score": 0.5, "label": "positive", "confidence": 0.9, "themes": ["speed"], "emotions": ["joy"]}}"#,
                    i
                )
            })
            .collect();
        format!(
            r#"{{"items": [{}], "overall": {{"averageScore": 0.5, "distribution": {{"positive": 100, "neutral": 0, "negative": 0}}, "dominantThemes": ["speed"], "keyEmotions": ["joy"], "summary": "Upbeat."}}}}"#,
            items.join(", ")
        )
    }

    #[test]
    fn test_well_formed_response_covers_every_index() {
        let batch = batch(4);
        let parsed = parse_response(&well_formed(4));
        assert_eq!(parsed.strategy, Strategy::Direct);
        assert_eq!(parsed.overall.summary, "Upbeat.");

        let scores = parsed.into_scores(&batch);
        assert_eq!(scores.len(), batch.len());
        let indices: Vec<usize> = scores.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert!(scores.iter().all(|s| s.batch == 3));
        assert_eq!(scores[2].source.comment_id.as_deref(), Some("c2"));
    }

    #[test]
    fn test_prose_around_json_uses_brace_trim() {
        let raw = format!("Sure! Here is the analysis:\n```json\n{}\n```\nHope this helps.", well_formed(2));
        let parsed = parse_response(&raw);
        assert_eq!(parsed.strategy, Strategy::BraceTrim);
        assert_eq!(parsed.items.len(), 2);
    }

    #[test]
    fn test_stray_braces_fall_through_to_balanced_scan() {
        let raw = format!("Note {{x}} first. {} trailing }}", well_formed(2));
        assert!(parse_direct(&raw).is_none());
        assert!(parse_brace_trim(&raw).is_none());

        let parsed = parse_response(&raw);
        assert_eq!(parsed.strategy, Strategy::BalancedScan);
        assert_eq!(parsed.items.len(), 2);
    }

    #[test]
    fn test_balanced_scan_prefers_largest_candidate() {
        let raw = r#"{"overall": {"summary": "small"}} and {"items": [{"index": 1, "score": 0.1}], "overall": {"summary": "large one"}} {"#;
        let value = parse_balanced_scan(raw).unwrap();
        assert_eq!(value["overall"]["summary"], "large one");
    }

    #[test]
    fn test_balanced_scan_ignores_braces_in_strings() {
        let raw = r#"junk {"items": [{"index": 1, "score": -0.2, "themes": ["{weird}"]}]} junk"#;
        let spans = balanced_spans(raw);
        assert!(spans.iter().any(|(s, e)| raw[*s..=*e].starts_with(r#"{"items""#) && raw[*s..=*e].ends_with("]}")));
        assert!(parse_balanced_scan(raw).is_some());
    }

    #[test]
    fn test_balanced_scan_rejects_objects_without_expected_keys() {
        assert!(parse_balanced_scan(r#"{"foo": 1} {"bar": {"baz": 2}}"#).is_none());
    }

    #[test]
    fn test_no_json_yields_placeholder() {
        let parsed = parse_response("I'm sorry, I cannot help with that.");
        assert!(parsed.is_placeholder());
        assert!(parsed.items.is_empty());
        assert_eq!(parsed.overall.dominant_themes, vec![PARSING_ERROR_THEME]);
        assert!(parsed.into_scores(&batch(3)).is_empty());
    }

    #[test]
    fn test_truncated_json_yields_placeholder() {
        let raw = &well_formed(3)[..60];
        assert!(parse_response(raw).is_placeholder());
    }

    #[test]
    fn test_lenient_item_fields() {
        let raw = r#"{"items": [
            {"index": "1", "score": "0.7"},
            {"index": 2, "score": -3, "label": "NEGATIVE", "confidence": 7, "themes": "pricing"},
            {"index": 3, "label": "positive"},
            {"index": 4, "label": "unsure", "confidence": 0.9},
            {"score": 0.2}
        ]}"#;
        let parsed = parse_response(raw);

        assert_eq!(parsed.items.len(), 3);
        assert_eq!(parsed.items[0].index, 1);
        assert_eq!(parsed.items[0].label, Label::Positive);
        assert_eq!(parsed.items[0].confidence, 0.5);
        assert_eq!(parsed.items[1].score, -1.0);
        assert_eq!(parsed.items[1].label, Label::Negative);
        assert_eq!(parsed.items[1].confidence, 1.0);
        assert_eq!(parsed.items[1].themes, vec!["pricing"]);
        assert_eq!(parsed.items[2].index, 3);
        assert_eq!(parsed.items[2].score, 0.5);
        assert_eq!(parsed.items[2].label, Label::Positive);
        assert_eq!(parsed.overall, Overall::default());
    }

    #[test]
    fn test_label_without_score_is_kept() {
        let raw = r#"{"items": [
            {"index": 1, "score": 0.5, "label": "positive", "confidence": 0.8},
            {"index": 2, "label": "negative", "confidence": 0.9}
        ]}"#;
        let scores = parse_response(raw).into_scores(&batch(2));

        assert_eq!(scores.len(), 2);
        assert_eq!(scores[1].label, Label::Negative);
        assert_eq!(scores[1].score, -0.5);
        assert_eq!(scores[1].confidence, 0.9);
    }

    #[test]
    fn test_out_of_range_and_duplicate_indices_dropped() {
        let raw = r#"{"items": [
            {"index": 0, "score": 0.1},
            {"index": 1, "score": 0.1},
            {"index": 1, "score": 0.9},
            {"index": 2, "score": 0.1},
            {"index": 5, "score": 0.1}
        ]}"#;
        let scores = parse_response(raw).into_scores(&batch(2));

        let indices: Vec<usize> = scores.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(scores[0].score, 0.1);
    }

    #[test]
    fn test_partial_response_keeps_only_returned_items() {
        let raw = r#"{"items": [{"index": 1, "score": 0.3}, {"index": 3, "score": -0.3}]}"#;
        let scores = parse_response(raw).into_scores(&batch(3));
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[1].source.comment_id.as_deref(), Some("c2"));
    }
}
