//! Sentiment aggregation and statistics.
//!
//! Turns the scored items of a run (or of the batches finished so far) into
//! an [`AggregateResult`]. Aggregation is pure: the same items always give
//! the same result, down to the serialized bytes.

use crate::models::{AggregateResult, Distribution, GroupStats, ItemScore, Label, TimelinePoint};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// Summary used when there is nothing to aggregate.
pub const EMPTY_SUMMARY: &str = "No content available for analysis";

/// How many themes and emotions are reported.
pub const TOP_TERMS: usize = 5;

/// Aggregate scored items into run statistics.
pub fn aggregate(items: &[ItemScore]) -> AggregateResult {
    if items.is_empty() {
        return AggregateResult {
            summary: EMPTY_SUMMARY.to_string(),
            ..AggregateResult::default()
        };
    }

    // Statistics fold the emitted values so re-aggregating `items` is stable
    let items: Vec<ItemScore> = items.iter().map(rounded_item).collect();

    let mut overall = Bucket::default();
    for item in &items {
        overall.add(item);
    }

    let distribution = overall.distribution();
    let dominant_themes = top_terms(items.iter().map(|i| &i.themes), TOP_TERMS);
    let key_emotions = top_terms(items.iter().map(|i| &i.emotions), TOP_TERMS);
    let by_group = group_by_community(&items);
    let timeline = timeline_by_post_date(&items);
    let summary = summarize(&overall, &distribution, by_group.len(), &dominant_themes);

    AggregateResult {
        average_score: round3(overall.average()),
        distribution,
        dominant_themes,
        key_emotions,
        summary,
        items,
        by_group,
        timeline,
    }
}

/// Per-community statistics keyed by group.
pub fn group_by_community(items: &[ItemScore]) -> BTreeMap<String, GroupStats> {
    let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

    for item in items {
        buckets
            .entry(item.source.group_key.clone())
            .or_default()
            .add(item);
    }

    buckets
        .into_iter()
        .map(|(key, bucket)| {
            let stats = GroupStats {
                average_score: round3(bucket.average()),
                total: bucket.total(),
                positive: bucket.positive,
                neutral: bucket.neutral,
                negative: bucket.negative,
            };
            (key, stats)
        })
        .collect()
}

/// Daily buckets keyed by the parent post's creation date.
pub fn timeline_by_post_date(items: &[ItemScore]) -> Vec<TimelinePoint> {
    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();

    for item in items {
        buckets.entry(item.source.post_date).or_default().add(item);
    }

    buckets
        .into_iter()
        .map(|(date, bucket)| TimelinePoint {
            date,
            average_score: round3(bucket.average()),
            positive: bucket.positive,
            neutral: bucket.neutral,
            negative: bucket.negative,
            total: bucket.total(),
        })
        .collect()
}

/// Most frequent terms, matched case-insensitively.
///
/// The first spelling seen is the one reported; ties keep first-seen order.
pub fn top_terms<'a, I>(lists: I, n: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a Vec<String>>,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut counted: Vec<(String, usize)> = Vec::new();

    for term in lists.into_iter().flatten() {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }

        let key = term.to_lowercase();
        match positions.get(&key) {
            Some(&pos) => counted[pos].1 += 1,
            None => {
                positions.insert(key, counted.len());
                counted.push((term.to_string(), 1));
            }
        }
    }

    // Stable sort keeps first-seen order among equal counts
    counted.sort_by_key(|(_, count)| std::cmp::Reverse(*count));
    counted.into_iter().take(n).map(|(term, _)| term).collect()
}

/// Round to 3 decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn rounded_item(item: &ItemScore) -> ItemScore {
    ItemScore {
        score: round3(item.score),
        confidence: round3(item.confidence),
        ..item.clone()
    }
}

/// Running sum and label counts.
#[derive(Debug, Default)]
struct Bucket {
    sum: f64,
    positive: usize,
    neutral: usize,
    negative: usize,
}

impl Bucket {
    fn add(&mut self, item: &ItemScore) {
        self.sum += item.score;
        match item.label {
            Label::Positive => self.positive += 1,
            Label::Neutral => self.neutral += 1,
            Label::Negative => self.negative += 1,
        }
    }

    fn total(&self) -> usize {
        self.positive + self.neutral + self.negative
    }

    fn average(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => self.sum / n as f64,
        }
    }

    fn count(&self, label: Label) -> usize {
        match label {
            Label::Positive => self.positive,
            Label::Neutral => self.neutral,
            Label::Negative => self.negative,
        }
    }

    /// Each percentage is rounded independently.
    fn distribution(&self) -> Distribution {
        let total = self.total().max(1) as f64;
        let percent = |count: usize| (100.0 * count as f64 / total).round() as u32;
        Distribution {
            positive: percent(self.positive),
            neutral: percent(self.neutral),
            negative: percent(self.negative),
        }
    }

    /// Label with the most items; ties go to neutral, then positive.
    fn leading_label(&self) -> Label {
        [Label::Neutral, Label::Positive, Label::Negative]
            .into_iter()
            .fold(Label::Neutral, |best, label| {
                if self.count(label) > self.count(best) {
                    label
                } else {
                    best
                }
            })
    }
}

fn summarize(
    overall: &Bucket,
    distribution: &Distribution,
    groups: usize,
    themes: &[String],
) -> String {
    let total = overall.total();
    let leading = overall.leading_label();
    let share = match leading {
        Label::Positive => distribution.positive,
        Label::Neutral => distribution.neutral,
        Label::Negative => distribution.negative,
    };

    let mut summary = format!(
        "Analyzed {} {} across {} {}. Sentiment is mostly {} ({}%) with an average score of {:+.2}.",
        total,
        if total == 1 { "text" } else { "texts" },
        groups,
        if groups == 1 { "community" } else { "communities" },
        leading.to_string().to_lowercase(),
        share,
        round3(overall.average())
    );

    if !themes.is_empty() {
        let top: Vec<&str> = themes.iter().take(3).map(String::as_str).collect();
        summary.push_str(&format!(" Top themes: {}.", top.join(", ")));
    }

    summary
}
