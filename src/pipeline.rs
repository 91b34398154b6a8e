//! Run orchestration.
//!
//! A run collects text units from posts, slices them into batches for the
//! selected provider and sends the batches one at a time. Each batch is
//! retried per the [`RetryPolicy`], parsed with the recovery chain and folded
//! into the running result. Failures stay local to their batch.

use crate::analysis::aggregate;
use crate::batching::{BatchPlanner, BatchProfile};
use crate::collector::{Collection, FilterRules, TextCollector};
use crate::config::Config;
use crate::error::ConfigurationError;
use crate::models::{Batch, BatchFailure, ItemScore, Post, RunOutcome, RunReport};
use crate::parser::parse_response;
use crate::progress::{BatchStatus, CancellationGate, ProgressEvent, ProgressReporter};
use crate::provider::{select_provider, AnalysisProvider, Credentials};
use crate::retry::RetryPolicy;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Units and batches prepared for one run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub collection: Collection,
    pub batches: Vec<Batch>,
}

/// Collect units and slice them for a provider profile.
pub fn plan(collector: &TextCollector, profile: &BatchProfile, posts: &[Post]) -> Plan {
    let collection = collector.collect(posts);
    let batches = BatchPlanner::new(profile).plan(&collection.units);
    Plan {
        collection,
        batches,
    }
}

/// Batch sentiment pipeline bound to one provider.
pub struct SentimentPipeline {
    provider: Box<dyn AnalysisProvider>,
    collector: TextCollector,
    retry: RetryPolicy,
}

impl SentimentPipeline {
    pub fn new(
        provider: Box<dyn AnalysisProvider>,
        collector: TextCollector,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            collector,
            retry,
        }
    }

    /// Pick a provider and build the pipeline from configuration.
    ///
    /// Fails before any batch is sent when no provider can be set up.
    pub fn from_config(
        config: &Config,
        credentials: &Credentials,
    ) -> Result<Self, ConfigurationError> {
        let provider = select_provider(config.provider.preference, credentials, |kind| {
            config.provider.settings(kind)
        })?;

        Ok(Self::new(
            provider,
            TextCollector::new(FilterRules::from(&config.filter)),
            RetryPolicy::from(&config.retry),
        ))
    }

    pub fn provider(&self) -> &dyn AnalysisProvider {
        self.provider.as_ref()
    }

    /// Collect and batch without calling the provider.
    pub fn plan(&self, posts: &[Post]) -> Plan {
        plan(&self.collector, self.provider.profile(), posts)
    }

    /// Analyze posts batch by batch.
    ///
    /// Never fails: batches that exhaust their retries are listed in
    /// `failedBatches`, and a closed gate ends the run early with outcome
    /// `cancelled` and whatever was scored so far.
    pub async fn run(
        &self,
        posts: &[Post],
        progress: &ProgressReporter,
        gate: &CancellationGate,
    ) -> RunReport {
        let started = Instant::now();
        let Plan {
            collection,
            batches,
        } = self.plan(posts);
        let total = batches.len();
        let pacing = self.provider.profile().pacing;

        info!(
            "Analyzing {} texts from {} posts in {} batches with {} ({})",
            collection.stats.kept,
            posts.len(),
            total,
            self.provider.kind(),
            self.provider.model()
        );

        let mut items: Vec<ItemScore> = Vec::with_capacity(collection.units.len());
        let mut failed_batches = Vec::new();
        let mut unparsed_batches = Vec::new();
        let mut batches_completed = 0;
        let mut outcome = RunOutcome::Completed;

        for batch in &batches {
            if gate.is_cancelled() {
                info!(
                    "Cancelled before batch {}/{}; returning partial results",
                    batch.ordinal, total
                );
                outcome = RunOutcome::Cancelled;
                break;
            }

            let what = format!("Batch {}/{}", batch.ordinal, total);
            let status = match self
                .retry
                .run(&what, || self.provider.analyze(batch))
                .await
            {
                Ok((raw, attempts)) => {
                    let parsed = parse_response(&raw);
                    let strategy = parsed.strategy;
                    if parsed.is_placeholder() {
                        warn!("{}: response could not be parsed", what);
                        unparsed_batches.push(batch.ordinal);
                    } else if !parsed.overall.summary.is_empty() {
                        debug!("{} model summary: {}", what, parsed.overall.summary);
                    }

                    let scores = parsed.into_scores(batch);
                    info!(
                        "{}: scored {} of {} texts ({} attempt(s), {} parse)",
                        what,
                        scores.len(),
                        batch.len(),
                        attempts,
                        strategy
                    );
                    items.extend(scores);
                    BatchStatus::Succeeded
                }
                Err(exhausted) => {
                    warn!(
                        "{} failed after {} attempt(s) ({}): {}",
                        what, exhausted.attempts, exhausted.class, exhausted.error
                    );
                    failed_batches.push(BatchFailure {
                        ordinal: batch.ordinal,
                        size: batch.len(),
                        class: exhausted.class.to_string(),
                        attempts: exhausted.attempts,
                        message: exhausted.error.to_string(),
                    });
                    BatchStatus::Failed
                }
            };

            batches_completed += 1;
            progress.report(ProgressEvent {
                batch_ordinal: batch.ordinal,
                batches_total: total,
                percent_complete: ProgressEvent::percent(batch.ordinal, total),
                items_processed: items.len(),
                status,
                partial: aggregate(&items),
            });

            if status == BatchStatus::Succeeded && batch.ordinal < total && !pacing.is_zero() {
                tokio::time::sleep(pacing).await;
            }
        }

        let result = aggregate(&items);
        let duration = started.elapsed().as_secs_f64();

        info!(
            "Run {}: {} of {} texts scored, {} failed batch(es), {:.1}s",
            outcome,
            result.items.len(),
            collection.stats.kept,
            failed_batches.len(),
            duration
        );

        RunReport {
            outcome,
            provider: self.provider.kind().to_string(),
            model: self.provider.model().to_string(),
            submitted: collection.stats.kept,
            batches_planned: total,
            batches_completed,
            failed_batches,
            unparsed_batches,
            duration_seconds: (duration * 1000.0).round() / 1000.0,
            result,
        }
    }
}
