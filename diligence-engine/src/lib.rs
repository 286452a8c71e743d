//! Diligence Engine - section dependency, scheduling and resume engine
//!
//! A due-diligence report is a set of sections, some of which consume the
//! output of others. This crate decides which sections must be (re)computed
//! for a request and in what order, drives an injected generation provider
//! through that plan one section at a time, and persists each result so an
//! interrupted run can be resumed exactly where it stopped.
//!
//! ## Architecture
//!
//! - **Registry** ([`registry`]): static, validated section definitions
//! - **State** ([`state`], [`store`]): per-run record of completed sections
//! - **Scheduler** ([`scheduler`]): dependency-closed, stale-only execution plans
//! - **Executor** ([`executor`]): sequential execution with atomic recording
//! - **Facade** ([`engine`]): plan/run/report entry points for the CLI

pub mod engine;
pub mod error;
pub mod executor;
pub mod progress;
pub mod providers;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod state;
pub mod store;

pub use engine::{new_run_id, ReportEngine, RunRequest};
pub use error::{EngineError, EngineResult};
pub use executor::{Executor, RunOutcome, CONTEXT_SEPARATOR};
pub use progress::{ProgressReporter, ProgressUpdate, RunProgress};
pub use providers::{
    build_provider, clean_markdown_output, CancellableProvider, CommandProvider, HttpProvider,
    RetryingProvider, TimeoutProvider,
};
pub use registry::{diligence_registry, SectionRegistry, SectionSpec};
pub use report::{compile_report, CompiledReport, ExportFormat, ReportExporter, ReportSection};
pub use scheduler::{ExecutionPlan, Force, Scheduler};
pub use state::{RunState, RunSummary, SectionResult};
pub use store::{FileRunStateStore, MemoryRunStateStore, RunStateStore};
