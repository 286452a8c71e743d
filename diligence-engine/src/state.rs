//! Run state model
//!
//! A [`RunState`] records which sections of one run have completed, with their
//! content and completion time. It is persisted after every section.

use crate::error::{EngineError, EngineResult};
use crate::registry::SectionRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result recorded for one completed section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionResult {
    pub content: String,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub source_refs: Vec<String>,
}

impl SectionResult {
    /// Result completed now
    pub fn new(content: impl Into<String>, source_refs: Vec<String>) -> Self {
        Self {
            content: content.into(),
            completed_at: Utc::now(),
            source_refs,
        }
    }
}

/// Persisted record of one analysis run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PersistedRun", into = "PersistedRun")]
pub struct RunState {
    pub run_id: String,
    /// Subject of the run, bound by the first recorded section
    pub company_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_sections: BTreeMap<String, SectionResult>,
}

impl RunState {
    /// Fresh state with nothing completed
    pub fn new(run_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            company_id: None,
            created_at: now,
            updated_at: now,
            completed_sections: BTreeMap::new(),
        }
    }

    pub fn is_complete(&self, section_id: &str) -> bool {
        self.completed_sections.contains_key(section_id)
    }

    pub fn result(&self, section_id: &str) -> Option<&SectionResult> {
        self.completed_sections.get(section_id)
    }

    pub fn content(&self, section_id: &str) -> Option<&str> {
        self.completed_sections
            .get(section_id)
            .map(|r| r.content.as_str())
    }

    /// Completed ids, sorted
    pub fn completed_ids(&self) -> Vec<&str> {
        self.completed_sections.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.completed_sections.is_empty()
    }

    /// Fail with `RunMismatch` if the run already belongs to another company
    pub fn ensure_company(&self, company_id: &str) -> EngineResult<()> {
        match &self.company_id {
            Some(expected) if expected != company_id => Err(EngineError::RunMismatch {
                run_id: self.run_id.clone(),
                expected: expected.clone(),
                actual: company_id.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Record a section and drop the dependents its new content makes stale
    pub fn apply_completion(
        &mut self,
        company_id: &str,
        section_id: &str,
        mut result: SectionResult,
        invalidated: &[String],
    ) -> EngineResult<()> {
        self.ensure_company(company_id)?;

        // Never older than anything already recorded, even if the clock stepped back
        if let Some(latest) = self.completed_sections.values().map(|r| r.completed_at).max() {
            result.completed_at = result.completed_at.max(latest);
        }
        if self.company_id.is_none() {
            self.company_id = Some(company_id.to_string());
        }

        for dependent in invalidated.iter().filter(|id| id.as_str() != section_id) {
            self.completed_sections.remove(dependent);
        }

        self.updated_at = result.completed_at.max(self.updated_at);
        self.completed_sections
            .insert(section_id.to_string(), result);
        Ok(())
    }

    /// Completed sections whose dependencies are missing or completed later
    ///
    /// Returns the offending ids, sorted. Ids unknown to the registry are skipped.
    pub fn check_invariant(&self, registry: &SectionRegistry) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();

        for (id, result) in &self.completed_sections {
            let Ok(spec) = registry.get(id) else {
                continue;
            };
            let consistent = spec.depends_on.iter().all(|dep| {
                self.result(dep)
                    .is_some_and(|dep_result| dep_result.completed_at <= result.completed_at)
            });
            if !consistent {
                violations.push(id.clone());
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            company_id: self.company_id.clone(),
            completed: self.completed_sections.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Listing entry for a stored run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub company_id: Option<String>,
    pub completed: usize,
    pub updated_at: DateTime<Utc>,
}

/// On-disk layout of a run
#[derive(Serialize, Deserialize)]
struct PersistedRun {
    run_id: String,
    #[serde(default)]
    company_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    sections: Vec<PersistedSection>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSection {
    id: String,
    content: String,
    completed_at: DateTime<Utc>,
    #[serde(default)]
    source_refs: Vec<String>,
}

impl From<PersistedRun> for RunState {
    fn from(run: PersistedRun) -> Self {
        let completed_sections = run
            .sections
            .into_iter()
            .map(|s| {
                (
                    s.id,
                    SectionResult {
                        content: s.content,
                        completed_at: s.completed_at,
                        source_refs: s.source_refs,
                    },
                )
            })
            .collect();

        Self {
            run_id: run.run_id,
            company_id: run.company_id,
            created_at: run.created_at,
            updated_at: run.updated_at,
            completed_sections,
        }
    }
}

impl From<RunState> for PersistedRun {
    fn from(state: RunState) -> Self {
        let mut sections: Vec<PersistedSection> = state
            .completed_sections
            .into_iter()
            .map(|(id, r)| PersistedSection {
                id,
                content: r.content,
                completed_at: r.completed_at,
                source_refs: r.source_refs,
            })
            .collect();
        sections.sort_by(|a, b| a.completed_at.cmp(&b.completed_at).then(a.id.cmp(&b.id)));

        Self {
            run_id: state.run_id,
            company_id: state.company_id,
            created_at: state.created_at,
            updated_at: state.updated_at,
            sections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SectionSpec;
    use chrono::Duration;

    fn result_at(content: &str, offset_secs: i64) -> SectionResult {
        SectionResult {
            content: content.to_string(),
            completed_at: DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs),
            source_refs: Vec::new(),
        }
    }

    fn registry() -> SectionRegistry {
        SectionRegistry::from_specs([
            SectionSpec::new("overview", "Overview"),
            SectionSpec::new("report", "Report").depends_on(["overview"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_apply_completion_binds_company() {
        let mut state = RunState::new("run-1");
        state
            .apply_completion("acme", "overview", result_at("o", 1), &[])
            .unwrap();

        assert_eq!(state.company_id.as_deref(), Some("acme"));
        assert_eq!(state.content("overview"), Some("o"));

        let err = state
            .apply_completion("globex", "report", result_at("r", 2), &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::RunMismatch { .. }));
        assert!(!state.is_complete("report"));
    }

    #[test]
    fn test_apply_completion_drops_invalidated() {
        let mut state = RunState::new("run-1");
        state
            .apply_completion("acme", "overview", result_at("o1", 1), &[])
            .unwrap();
        state
            .apply_completion("acme", "report", result_at("r1", 2), &[])
            .unwrap();

        state
            .apply_completion(
                "acme",
                "overview",
                result_at("o2", 3),
                &["report".to_string()],
            )
            .unwrap();

        assert_eq!(state.completed_ids(), vec!["overview"]);
        assert_eq!(state.content("overview"), Some("o2"));
    }

    #[test]
    fn test_apply_completion_clamps_clock_step_back() {
        let registry = registry();
        let mut state = RunState::new("run-1");
        state
            .apply_completion("acme", "overview", result_at("o", 100), &[])
            .unwrap();

        // Wall clock went backwards between the two sections
        state
            .apply_completion("acme", "report", result_at("r", 40), &[])
            .unwrap();

        let overview = state.result("overview").unwrap().completed_at;
        let report = state.result("report").unwrap().completed_at;
        assert!(report >= overview);
        assert!(state.check_invariant(&registry).is_ok());
    }

    #[test]
    fn test_check_invariant() {
        let registry = registry();
        let mut state = RunState::new("run-1");
        state
            .completed_sections
            .insert("overview".to_string(), result_at("o", 5));
        state
            .completed_sections
            .insert("report".to_string(), result_at("r", 5));
        assert!(state.check_invariant(&registry).is_ok());

        state
            .completed_sections
            .insert("overview".to_string(), result_at("o", 9));
        assert_eq!(
            state.check_invariant(&registry),
            Err(vec!["report".to_string()])
        );

        state.completed_sections.remove("overview");
        assert!(state.check_invariant(&registry).is_err());
    }

    #[test]
    fn test_persisted_layout() {
        let mut state = RunState::new("run-1");
        state
            .apply_completion(
                "acme",
                "overview",
                SectionResult {
                    source_refs: vec!["https://acme.example".to_string()],
                    ..result_at("Acme builds robots.", 1)
                },
                &[],
            )
            .unwrap();

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["run_id"], "run-1");
        assert_eq!(value["company_id"], "acme");
        assert_eq!(value["sections"][0]["id"], "overview");
        assert_eq!(value["sections"][0]["content"], "Acme builds robots.");
        assert_eq!(value["sections"][0]["source_refs"][0], "https://acme.example");
        assert!(value.get("completed_sections").is_none());

        let restored: RunState = serde_json::from_value(value).unwrap();
        assert_eq!(restored, state);
    }
}
