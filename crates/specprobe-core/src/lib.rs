//! # specprobe-core
//!
//! Turns an OpenAPI description into a categorized, executable test suite,
//! runs it against a live target and reduces the outcomes into a report.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ Normalizer  │────▶│  Synthesizer  │────▶│   Compiler   │
//! └─────────────┘     └───────────────┘     └──────────────┘
//!                       │           │               │
//!                       ▼           ▼               ▼
//!                ┌──────────┐ ┌──────────┐   ┌──────────────┐
//!                │  Oracle  │ │ Fallback │   │   Harness    │──▶ HttpTransport
//!                └──────────┘ └──────────┘   └──────────────┘
//!                                                   │
//!                                                   ▼
//!                                            ┌──────────────┐
//!                                            │  Aggregator  │──▶ ReportModel
//!                                            └──────────────┘
//! ```
//!
//! Each stage consumes an immutable snapshot and produces a new one.
//! [`ProbePipeline`] wires them together around a [`RunContext`].
//!
//! ## Modules
//!
//! - `normalizer`: description → [`ApiModel`]
//! - `oracle`, `synthesizer`, `fallback`: endpoints → validated [`TestScenario`]s
//! - `compiler`: scenarios → [`CompiledTestUnit`]s
//! - `harness`, `transport`: units → [`TestOutcome`]s
//! - `aggregator`: outcomes → [`ReportModel`]
//! - `testing`: scripted oracle and transport doubles

pub mod aggregator;
pub mod assertions;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod harness;
pub mod model;
pub mod normalizer;
pub mod oracle;
pub mod pipeline;
pub mod synthesizer;
pub mod testing;
pub mod transport;

pub use aggregator::{
    Coverage, EndpointBreakdown, FailureCluster, LatencyStats, ReportModel, RunMetadata, SlowUnit,
    SynthesisMetadata, Totals, aggregate,
};
pub use assertions::{Assertion, AssertionFailure};
pub use compiler::{CompileDefect, CompiledSuite, TestArtifactCompiler};
pub use config::{
    AuthConfig, ConfigError, ExecutionConfig, OracleConfig, ProbeConfig, ReportConfig,
    ReportFormat, SynthesisConfig, TargetConfig,
};
pub use context::{DEFAULT_BASE_URL, RunContext};
pub use error::{CompilationError, OracleUnavailableError, PipelineError, SpecInvalidError};
pub use fallback::fallback_scenarios;
pub use harness::{ExecutionHarness, HarnessSettings};
pub use model::{
    ApiInfo, ApiModel, AuthRequirement, Category, CompiledTestUnit, EndpointDescriptor,
    EndpointId, ExpectedStatus, FailureDetail, HttpMethod, OutcomeStatus, ScenarioOrigin,
    TestOutcome, TestScenario,
};
pub use normalizer::normalize;
pub use oracle::{AnthropicOracle, OracleRequest, ScenarioOracle};
pub use pipeline::{GeneratedSuite, ProbePipeline, oracle_from_config};
pub use synthesizer::{
    DropReason, DroppedCandidate, EndpointSynthesis, ScenarioSynthesizer, SynthesisSettings,
    SynthesisState,
};
pub use transport::{
    ExecutionTransportError, HttpTransport, ObservedResponse, PreparedRequest, ReqwestTransport,
    TransportErrorKind,
};
