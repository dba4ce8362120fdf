//! NOTARY Runtime
//!
//! Turns logged facts into executed work. The evaluator reads a document's
//! log, asks the rules what is required and queues jobs for decisions the
//! pipeline owns; the engine claims those jobs, calls the providers and
//! writes the results back as events; the wake loop sweeps every document
//! so missed evaluations heal on the next pass.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod handler;
pub mod http;
pub mod monitor;
pub mod pipeline;
pub mod provider;
pub mod sim;
pub mod wake;

pub use config::{EngineConfig, EvaluatorConfig, PipelineConfig, ProviderConfig};
pub use engine::{ExecutionEngine, RunOnce, WorkerStats};
pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::{DecisionEvaluator, EvaluationReport, SkipReason, SweepReport};
pub use handler::JobHandler;
pub use http::HttpProviders;
pub use monitor::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Accepted, EntityStatus, LegacyRun, Pipeline};
pub use provider::{
    AnchorReceipt, AnchorRequest, AnchorStatus, AnchorSubmitter, ArtifactBuilder, ArtifactRef,
    ArtifactRequest, ProviderError, ProviderResult, Providers, TimestampAuthority,
    TimestampRequest, TimestampToken,
};
pub use sim::SimulatedProviders;
pub use wake::Wake;
