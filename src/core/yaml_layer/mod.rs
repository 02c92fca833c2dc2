//! YAML test-definition layer: three authoring dialects compiled into one
//! ordered instruction stream and dispatched to the step API.

pub mod actions;
pub mod client;
pub mod compiler;
pub mod convert;
pub mod detector;
pub mod dialect;
pub mod document;
pub mod executor;
pub mod expression;
pub mod files;
pub mod generate;
pub mod normalizer;
pub mod report;
pub mod service;
pub mod session;
pub mod template;
pub mod validate;

pub use actions::{ActionKind, ActionRegistry, RetryPolicy};
pub use client::{DryRunClient, HttpStepClient, StepApiClient, StepApiError, StepCreated, StepRequest};
pub use compiler::{compile, CheckpointRef, CompileContext, CompiledInstruction, CompiledProgram};
pub use convert::{convert, Conversion};
pub use detector::{detect, Detection, DetectorConfig, FormatDetector};
pub use document::{ArgValue, Dialect, NormalizedDocument, TestDocument};
pub use executor::{ExecutionReport, Executor, ExecutorOptions, RetrySettings, StepOutcome};
pub use files::expand_patterns;
pub use generate::{generate, Generated, TemplateLibrary};
pub use report::{ReportFormat, RunReport};
pub use service::{LoadedDocument, YamlLayer};
pub use session::{SessionContext, SessionStore};
pub use validate::{ValidationReport, Validator};
