//! Instruction payload shared by both provider variants.

use crate::batching::BatchProfile;
use crate::models::Batch;

/// Fixed preamble describing the required output schema.
pub const PROMPT_PREAMBLE: &str = r#"You are a sentiment analysis engine for online community discussions.
Classify the sentiment of every numbered text below.

Return ONLY a JSON object with this exact structure:
{
  "items": [
    {"index": 1, "score": 0.6, "label": "positive", "confidence": 0.85, "themes": ["performance"], "emotions": ["excitement"]}
  ],
  "overall": {
    "averageScore": 0.2,
    "distribution": {"positive": 40, "neutral": 40, "negative": 20},
    "dominantThemes": ["performance"],
    "keyEmotions": ["excitement"],
    "summary": "One or two sentences describing the overall mood."
  }
}

Rules:
- Include exactly one entry in "items" per numbered text, using the same index.
- "score" is a number from -1 (very negative) to 1 (very positive).
- "label" is one of "positive", "neutral", "negative".
- "confidence" is a number from 0 to 1.
- "themes" lists at most 3 short lowercase topics; "emotions" at most 3 lowercase emotion words.
- Do not add commentary, markdown or code fences."#;

/// Render the full prompt for one batch.
///
/// Texts are numbered from 1 in batch order and cut to the profile's
/// per-text limit.
pub fn build_prompt(batch: &Batch, profile: &BatchProfile) -> String {
    let mut prompt = String::with_capacity(PROMPT_PREAMBLE.len() + batch.len() * 128);
    prompt.push_str(PROMPT_PREAMBLE);
    prompt.push_str(&format!("\n\n=== TEXTS ({}) ===\n\n", batch.len()));

    for (i, unit) in batch.items.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] ({} in {}) {}\n",
            i + 1,
            unit.source.kind,
            unit.source.group_key,
            profile.truncate(&unit.content)
        ));
    }

    prompt.push_str("\n=== END OF TEXTS ===\n\n");
    prompt.push_str("Now output the JSON object:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceKind, TextSource, TextUnit};
    use chrono::NaiveDate;

    fn batch(texts: &[&str]) -> Batch {
        Batch {
            ordinal: 1,
            offset: 0,
            items: texts
                .iter()
                .map(|t| TextUnit {
                    content: t.to_string(),
                    source: TextSource {
                        kind: SourceKind::Comment,
                        post_id: "p".to_string(),
                        comment_id: None,
                        group_key: "rust".to_string(),
                        original_weight: 0,
                        post_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn test_prompt_numbers_texts_from_one() {
        let prompt = build_prompt(&batch(&["first text", "second text"]), &BatchProfile::primary());

        assert!(prompt.starts_with(PROMPT_PREAMBLE));
        assert!(prompt.contains("=== TEXTS (2) ==="));
        assert!(prompt.contains("[1] (comment in rust) first text\n"));
        assert!(prompt.contains("[2] (comment in rust) second text\n"));
        assert!(!prompt.contains("[3]"));
    }

    #[test]
    fn test_prompt_truncates_long_texts() {
        let profile = BatchProfile {
            max_text_chars: 5,
            ..BatchProfile::fallback()
        };
        let prompt = build_prompt(&batch(&["abcdefghij"]), &profile);

        assert!(prompt.contains("[1] (comment in rust) abcde…\n"));
        assert!(!prompt.contains("abcdefghij"));
    }

    #[test]
    fn test_preamble_describes_schema() {
        for field in ["items", "index", "score", "label", "confidence", "themes", "overall", "summary"] {
            assert!(PROMPT_PREAMBLE.contains(field), "missing {}", field);
        }
    }
}
