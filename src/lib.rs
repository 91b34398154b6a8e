//! ThreadPulse - batch sentiment analysis of community discussion threads.
//!
//! Posts and their comments are flattened into text units, filtered, sliced
//! into batches and scored by a hosted language model (Gemini or Anthropic).
//! Scores are aggregated into overall, per-community and daily statistics.
//!
//! ```no_run
//! # async fn demo(posts: Vec<threadpulse::Post>) -> anyhow::Result<()> {
//! use threadpulse::{CancellationGate, Config, ProgressReporter, SentimentPipeline};
//!
//! let credentials = threadpulse::Credentials::new(std::env::var("GEMINI_API_KEY").ok(), None);
//! let pipeline = SentimentPipeline::from_config(&Config::default(), &credentials)?;
//! let report = pipeline
//!     .run(&posts, &ProgressReporter::new(), &CancellationGate::new())
//!     .await;
//! println!("{}", report.result.summary);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod batching;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod report;
pub mod retry;

pub use analysis::aggregate;
pub use collector::{should_include, TextCollector};
pub use config::Config;
pub use error::ConfigurationError;
pub use models::{AggregateResult, ItemScore, Post, RunOutcome, RunReport};
pub use pipeline::SentimentPipeline;
pub use progress::{CancellationGate, ProgressEvent, ProgressReporter, StatusHandle};
pub use provider::{AnalysisProvider, Credentials, ProviderError, ProviderKind, ProviderPreference};
