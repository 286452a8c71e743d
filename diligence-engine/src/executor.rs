//! Plan execution
//!
//! Runs a plan strictly in order: a section starts only after the previous
//! section's result has been persisted. The first provider failure stops the
//! invocation; everything recorded up to that point stays in the store and a
//! later invocation with the same run id resumes from there.

use crate::error::{EngineError, EngineResult};
use crate::progress::ProgressReporter;
use crate::registry::SectionRegistry;
use crate::scheduler::ExecutionPlan;
use crate::state::{RunState, SectionResult};
use crate::store::RunStateStore;
use diligence_core::{timed, GenerationProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Separator between dependency contents in a section's context
pub const CONTEXT_SEPARATOR: &str = "\n\n";

/// Result of one successful invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    /// Sections generated by this invocation, in execution order
    pub executed: Vec<String>,
    pub elapsed_ms: u64,
}

/// Drives a generation provider through an execution plan
pub struct Executor<'a> {
    registry: &'a SectionRegistry,
    store: &'a dyn RunStateStore,
    progress: ProgressReporter,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a SectionRegistry, store: &'a dyn RunStateStore) -> Self {
        Self {
            registry,
            store,
            progress: ProgressReporter::default(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Execute `plan` for `company_id`, keeping `state` in step with the store
    pub async fn run<P>(
        &self,
        plan: &ExecutionPlan,
        provider: &P,
        state: &mut RunState,
        company_id: &str,
    ) -> EngineResult<RunOutcome>
    where
        P: GenerationProvider + ?Sized,
    {
        state.ensure_company(company_id)?;

        info!(
            run_id = %state.run_id,
            plan_len = plan.len(),
            provider = provider.name(),
            "Executing plan"
        );

        let mut progress = self.progress.begin(&state.run_id, plan.len());
        let mut executed: Vec<String> = Vec::with_capacity(plan.len());

        for section_id in plan.iter() {
            let spec = self.registry.get(section_id)?;
            progress.section_started(section_id, &spec.display_name);

            let context = match self.build_context(section_id, state) {
                Ok(context) => context,
                Err(message) => {
                    progress.section_failed(section_id, &message);
                    return Err(EngineError::SectionExecution {
                        section_id: section_id.to_string(),
                        completed: executed,
                        message,
                        source: None,
                    });
                }
            };

            debug!(
                section_id = section_id,
                context_len = context.len(),
                "Invoking generation provider"
            );

            let generation = match timed(section_id, provider.generate(section_id, &context)).await {
                Ok(generation) => generation,
                Err(error) => {
                    let message = error.to_string();
                    progress.section_failed(section_id, &message);
                    error.log();
                    warn!(
                        run_id = %state.run_id,
                        section_id = section_id,
                        completed = executed.len(),
                        "Stopping run, recorded sections are kept"
                    );
                    return Err(EngineError::SectionExecution {
                        section_id: section_id.to_string(),
                        completed: executed,
                        message,
                        source: Some(Box::new(error)),
                    });
                }
            };

            // Recorded dependents would now be older than this section
            let invalidated: Vec<String> = self
                .registry
                .transitive_dependents(section_id)
                .into_iter()
                .filter(|id| state.is_complete(id))
                .map(str::to_string)
                .collect();

            let result = SectionResult::new(generation.content, generation.source_refs);
            *state = self
                .store
                .record_completion(&state.run_id, company_id, section_id, result, &invalidated)
                .await?;

            if !invalidated.is_empty() {
                debug!(
                    section_id = section_id,
                    invalidated = ?invalidated,
                    "Dropped stale dependents"
                );
            }

            progress.section_completed(section_id);
            executed.push(section_id.to_string());
        }

        let elapsed_ms = progress.finish();

        info!(
            run_id = %state.run_id,
            executed = executed.len(),
            elapsed_ms = elapsed_ms,
            "Plan executed"
        );

        Ok(RunOutcome {
            run_id: state.run_id.clone(),
            executed,
            elapsed_ms,
        })
    }

    /// Dependency contents in declared order, joined by a blank line
    fn build_context(&self, section_id: &str, state: &RunState) -> Result<String, String> {
        let spec = self
            .registry
            .get(section_id)
            .map_err(|e| e.to_string())?;

        let mut parts = Vec::with_capacity(spec.depends_on.len());
        for dep in &spec.depends_on {
            match state.content(dep) {
                Some(content) => parts.push(content),
                None => {
                    return Err(format!(
                        "Dependency '{}' of '{}' has no recorded result",
                        dep, section_id
                    ))
                }
            }
        }
        Ok(parts.join(CONTEXT_SEPARATOR))
    }
}
