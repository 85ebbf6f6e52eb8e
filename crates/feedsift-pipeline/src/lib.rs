//! Classification pipeline for feedsift.
//!
//! The [`Coordinator`] is the entry point: it takes content items, consults
//! the [`ResultCache`], calls the [`Classifier`] at most once per fingerprint,
//! and turns the result into a verdict under the current [`PolicyStore`]
//! snapshot.

pub mod cache;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod policy_store;
pub mod retry;

pub use cache::{ResultCache, Settlement};
pub use classifier::{Classifier, LlmClassifier};
pub use config::FeedsiftConfig;
pub use coordinator::Coordinator;
pub use error::PipelineError;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use policy_store::PolicyStore;
pub use retry::RetryPolicy;
