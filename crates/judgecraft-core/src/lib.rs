//! judgecraft-core: declarative evaluation of AI agents.
//! Define cases, run them against an agent sequentially or in batches, and
//! validate outputs by field rules, structural equality, or an LLM judge.
//! See `examples/simple.rs` for a quickstart.

pub mod agent;
pub mod backend;
pub mod case;
pub mod config;
pub mod error;
pub mod judge;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod sink;
pub mod source;
pub mod testing;
pub mod validation;
pub mod validator;

pub use agent::{from_async_fn, Agent, AgentResponse, HttpAgent};
pub use backend::{Backend, GenerateRequest, Generation, OpenAiBackend};
pub use case::{CaseDefinition, Directive, EvaluationCase, ExpectedOutput, FieldValidations};
pub use config::RunConfig;
pub use error::{AgentError, BackendError, CaseDefinitionError};
pub use judge::{JudgeConfig, JudgeResult, SemanticJudge};
pub use registry::CaseRegistry;
pub use retry::RetryPolicy;
pub use runner::{Pacing, Runner, RunnerBuilder, Schedule};
#[cfg(feature = "persistence")]
pub use sink::StoreSink;
pub use sink::{JsonlSink, MemorySink, MultiSink, ResultSink};
pub use source::{CaseSource, FilteredSource, JsonlCaseSource, VecCaseSource, YamlSuiteSource};
pub use validation::{ValidationEngine, Verdict};
pub use validator::{FieldValidator, ItemRule, ItemSpec};

pub use judgecraft_types::{
    strip_debug_fields, CallMetrics, EvaluationResult, FailedCase, RunMetadata, RunMode,
    RunReport, RunSummary, TokenUsage, ValidationMethod,
};
