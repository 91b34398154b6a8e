//! Batch planning for provider calls.
//!
//! Text units are sliced into contiguous, fixed-size batches so that a
//! batch-local response index maps back to a global unit with a plain offset.

use crate::models::{Batch, TextUnit};
use std::time::Duration;
use tracing::debug;

/// Size and pacing limits of one provider variant.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProfile {
    /// Texts per provider call.
    pub batch_size: usize,
    /// Per-text character limit inside the prompt.
    pub max_text_chars: usize,
    /// Pause after a successful batch before the next one starts.
    pub pacing: Duration,
}

impl BatchProfile {
    /// Defaults for the high-context primary provider.
    pub fn primary() -> Self {
        Self {
            batch_size: 50,
            max_text_chars: 1000,
            pacing: Duration::from_millis(1000),
        }
    }

    /// Defaults for the constrained fallback provider.
    pub fn fallback() -> Self {
        Self {
            batch_size: 20,
            max_text_chars: 500,
            pacing: Duration::from_millis(3000),
        }
    }

    /// Cut a text to `max_text_chars`, marking the cut with an ellipsis.
    pub fn truncate<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        match text.char_indices().nth(self.max_text_chars) {
            Some((byte_idx, _)) => format!("{}…", &text[..byte_idx]).into(),
            None => text.into(),
        }
    }
}

/// Splits text units into batches for one provider profile.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    batch_size: usize,
}

impl BatchPlanner {
    pub fn new(profile: &BatchProfile) -> Self {
        Self {
            batch_size: profile.batch_size.max(1),
        }
    }

    /// Number of batches `unit_count` units will produce.
    pub fn batch_count(&self, unit_count: usize) -> usize {
        unit_count.div_ceil(self.batch_size)
    }

    /// Slice units into contiguous batches, numbered from 1.
    pub fn plan(&self, units: &[TextUnit]) -> Vec<Batch> {
        let batches: Vec<Batch> = units
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, chunk)| Batch {
                ordinal: i + 1,
                offset: i * self.batch_size,
                items: chunk.to_vec(),
            })
            .collect();

        debug!(
            "Planned {} batches of up to {} units",
            batches.len(),
            self.batch_size
        );

        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceKind, TextSource};
    use chrono::NaiveDate;

    fn units(n: usize) -> Vec<TextUnit> {
        (0..n)
            .map(|i| TextUnit {
                content: format!("text number {}", i),
                source: TextSource {
                    kind: SourceKind::Comment,
                    post_id: "p".to_string(),
                    comment_id: Some(i.to_string()),
                    group_key: "g".to_string(),
                    original_weight: 1,
                    post_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                },
            })
            .collect()
    }

    fn profile(batch_size: usize) -> BatchProfile {
        BatchProfile {
            batch_size,
            ..BatchProfile::primary()
        }
    }

    #[test]
    fn test_plan_contiguous_slices() {
        let units = units(7);
        let batches = BatchPlanner::new(&profile(3)).plan(&units);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[2].len(), 1);
        assert_eq!(batches[1].ordinal, 2);
        assert_eq!(batches[1].offset, 3);

        // Batch-local index i maps to global unit offset + i - 1.
        for batch in &batches {
            for i in 1..=batch.len() {
                assert_eq!(batch.unit(i), Some(&units[batch.offset + i - 1]));
            }
        }
    }

    #[test]
    fn test_plan_empty_and_zero_size() {
        let planner = BatchPlanner::new(&profile(0));
        assert!(planner.plan(&[]).is_empty());
        assert_eq!(planner.plan(&units(2)).len(), 2);
        assert_eq!(planner.batch_count(5), 5);
    }

    #[test]
    fn test_batch_count() {
        let planner = BatchPlanner::new(&profile(10));
        assert_eq!(planner.batch_count(0), 0);
        assert_eq!(planner.batch_count(10), 1);
        assert_eq!(planner.batch_count(11), 2);
    }

    #[test]
    fn test_profiles_differ_by_provider() {
        let primary = BatchProfile::primary();
        let fallback = BatchProfile::fallback();
        assert!(primary.batch_size > fallback.batch_size);
        assert!(primary.max_text_chars > fallback.max_text_chars);
        assert!(primary.pacing < fallback.pacing);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let profile = BatchProfile {
            max_text_chars: 3,
            ..BatchProfile::fallback()
        };
        assert_eq!(profile.truncate("héllo"), "hél…");
        assert_eq!(profile.truncate("hé"), "hé");
        assert_eq!(profile.truncate("abc"), "abc");
    }
}
