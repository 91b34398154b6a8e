//! Report generation.
//!
//! This module renders a [`RunReport`] as Markdown or JSON.

use crate::models::{GroupStats, Label, RunOutcome, RunReport, TimelinePoint};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# ThreadPulse Sentiment Report\n\n");

    output.push_str(&generate_metadata_section(report, generated_at));
    output.push_str(&generate_coverage_section(report));
    output.push_str(&generate_overview_section(report));
    output.push_str(&generate_community_section(report));
    output.push_str(&generate_timeline_section(&report.result.timeline));
    output.push_str(&generate_failures_section(report));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &RunReport, generated_at: DateTime<Utc>) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Generated:** {}\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Provider:** {} (`{}`)\n",
        report.provider, report.model
    ));
    section.push_str(&format!("- **Outcome:** {}\n", report.outcome));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        report.duration_seconds
    ));
    section.push('\n');

    if report.outcome == RunOutcome::Cancelled {
        section.push_str("> ⚠️ The run was cancelled; results cover completed batches only.\n\n");
    }

    section
}

/// Generate the coverage section.
fn generate_coverage_section(report: &RunReport) -> String {
    let mut section = String::new();

    section.push_str("## Coverage\n\n");
    section.push_str("| Submitted | Scored | Missing | Batches Planned | Batches Run | Failed |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} |\n\n",
        report.submitted,
        report.result.items.len(),
        report.coverage_gap(),
        report.batches_planned,
        report.batches_completed,
        report.failed_batches.len()
    ));

    section
}

/// Generate the overall sentiment section.
fn generate_overview_section(report: &RunReport) -> String {
    let result = &report.result;
    let mut section = String::new();

    section.push_str("## Overall Sentiment\n\n");
    section.push_str(&format!("{}\n\n", result.summary));
    section.push_str(&format!(
        "**Average score:** {:+.3}\n\n",
        result.average_score
    ));

    section.push_str(&format!(
        "| {} Positive | {} Neutral | {} Negative |\n",
        Label::Positive.emoji(),
        Label::Neutral.emoji(),
        Label::Negative.emoji()
    ));
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {}% | {}% | {}% |\n\n",
        result.distribution.positive, result.distribution.neutral, result.distribution.negative
    ));

    if !result.dominant_themes.is_empty() {
        section.push_str(&format!(
            "**Dominant themes:** {}\n\n",
            result.dominant_themes.join(", ")
        ));
    }
    if !result.key_emotions.is_empty() {
        section.push_str(&format!(
            "**Key emotions:** {}\n\n",
            result.key_emotions.join(", ")
        ));
    }

    section
}

/// Generate the per-community table.
fn generate_community_section(report: &RunReport) -> String {
    let groups = &report.result.by_group;
    if groups.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## By Community\n\n");
    section.push_str("| Community | Texts | Average | Positive | Neutral | Negative |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|\n");

    // Busiest communities first; BTreeMap order breaks ties
    let mut rows: Vec<(&String, &GroupStats)> = groups.iter().collect();
    rows.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.total));

    for (group, stats) in rows {
        section.push_str(&format!(
            "| {} | {} | {:+.3} | {} | {} | {} |\n",
            group, stats.total, stats.average_score, stats.positive, stats.neutral, stats.negative
        ));
    }
    section.push('\n');

    section
}

/// Generate the daily timeline table.
fn generate_timeline_section(timeline: &[TimelinePoint]) -> String {
    if timeline.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Timeline\n\n");
    section.push_str("| Date | Texts | Average | Positive | Neutral | Negative |\n");
    section.push_str("|:---|:---:|:---:|:---:|:---:|:---:|\n");

    for point in timeline {
        section.push_str(&format!(
            "| {} | {} | {:+.3} | {} | {} | {} |\n",
            point.date.format("%Y-%m-%d"),
            point.total,
            point.average_score,
            point.positive,
            point.neutral,
            point.negative
        ));
    }
    section.push('\n');

    section
}

/// Generate the failed and unparsed batch listing.
fn generate_failures_section(report: &RunReport) -> String {
    if report.failed_batches.is_empty() && report.unparsed_batches.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Failed Batches\n\n");

    for failure in &report.failed_batches {
        section.push_str(&format!(
            "- **Batch {}** ({} texts, {} after {} attempt(s)): {}\n",
            failure.ordinal, failure.size, failure.class, failure.attempts, failure.message
        ));
    }

    if !report.unparsed_batches.is_empty() {
        let ordinals: Vec<String> = report
            .unparsed_batches
            .iter()
            .map(|o| o.to_string())
            .collect();
        section.push_str(&format!(
            "- Unparseable responses from batch(es): {}\n",
            ordinals.join(", ")
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by ThreadPulse*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
