//! Engine facade
//!
//! Ties the registry, a run state store and the executor together behind the
//! three operations the CLI needs: plan, run and report.

use crate::error::EngineResult;
use crate::executor::{Executor, RunOutcome};
use crate::progress::ProgressReporter;
use crate::registry::SectionRegistry;
use crate::report::{compile_report, CompiledReport, ExportFormat, ReportExporter};
use crate::scheduler::{ExecutionPlan, Force, Scheduler};
use crate::state::{RunState, RunSummary};
use crate::store::RunStateStore;
use diligence_core::GenerationProvider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// A fresh opaque run id
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// What to plan or run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: String,
    pub company_id: String,
    /// Requested section ids; empty means every section
    pub sections: Vec<String>,
    pub force: Force,
}

impl RunRequest {
    pub fn new(run_id: impl Into<String>, company_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            company_id: company_id.into(),
            sections: Vec::new(),
            force: Force::None,
        }
    }

    pub fn sections<I, S>(mut self, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections = sections.into_iter().map(Into::into).collect();
        self
    }

    pub fn force(mut self, force: Force) -> Self {
        self.force = force;
        self
    }
}

/// Section dependency and resume engine
pub struct ReportEngine {
    registry: SectionRegistry,
    store: Arc<dyn RunStateStore>,
    progress: ProgressReporter,
}

impl ReportEngine {
    /// Fails with a configuration or unknown-section error if the registry is invalid
    pub fn new(registry: SectionRegistry, store: Arc<dyn RunStateStore>) -> EngineResult<Self> {
        registry.validate()?;
        info!(sections = registry.len(), "Report engine initialized");
        Ok(Self {
            registry,
            store,
            progress: ProgressReporter::default(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub async fn plan(&self, request: &RunRequest) -> EngineResult<ExecutionPlan> {
        let state = self.store.load(&request.run_id).await?;
        state.ensure_company(&request.company_id)?;
        Scheduler::new(&self.registry).plan(&request.sections, &state, &request.force)
    }

    /// Plan the request, then execute the plan against the stored state
    pub async fn run<P>(&self, request: &RunRequest, provider: &P) -> EngineResult<RunOutcome>
    where
        P: GenerationProvider + ?Sized,
    {
        let mut state = self.store.load(&request.run_id).await?;
        state.ensure_company(&request.company_id)?;

        let plan =
            Scheduler::new(&self.registry).plan(&request.sections, &state, &request.force)?;
        if plan.is_empty() {
            info!(run_id = %request.run_id, "Nothing to do, all requested sections are current");
        }

        Executor::new(&self.registry, self.store.as_ref())
            .with_progress(self.progress.clone())
            .run(&plan, provider, &mut state, &request.company_id)
            .await
    }

    pub async fn state(&self, run_id: &str) -> EngineResult<RunState> {
        self.store.load(run_id).await
    }

    /// Completed sections of a run in registry order
    pub async fn report(&self, run_id: &str) -> EngineResult<CompiledReport> {
        let state = self.store.load(run_id).await?;
        Ok(compile_report(&self.registry, &state))
    }

    /// Export a run under its bound company id, or the run id if nothing is recorded
    pub async fn export(
        &self,
        run_id: &str,
        exporter: &ReportExporter,
        format: ExportFormat,
    ) -> EngineResult<PathBuf> {
        let state = self.store.load(run_id).await?;
        let company = state.company_id.as_deref().unwrap_or(run_id);
        exporter.export(&self.registry, &state, company, format).await
    }

    pub async fn runs(&self) -> EngineResult<Vec<RunSummary>> {
        self.store.list_runs().await
    }
}
