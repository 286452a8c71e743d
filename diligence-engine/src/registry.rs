//! Section registry
//!
//! Static definition of every report section and its dependencies. The
//! registry is built and validated once at startup and is immutable while
//! runs are planned and executed.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Definition of one report section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Unique, stable identifier
    pub id: String,
    /// Human-readable label, not used for scheduling
    pub display_name: String,
    /// Sections whose output this section consumes, in context order
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Whether a previously recorded result may be reused on resume
    #[serde(default = "default_resumable")]
    pub resumable: bool,
}

fn default_resumable() -> bool {
    true
}

impl SectionSpec {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            depends_on: Vec::new(),
            resumable: true,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Always recompute this section when it is part of a plan's closure
    pub fn not_resumable(mut self) -> Self {
        self.resumable = false;
        self
    }
}

/// Registry of section specs in registration order
#[derive(Debug, Clone, Default)]
pub struct SectionRegistry {
    specs: Vec<SectionSpec>,
    index: HashMap<String, usize>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry by registering each spec in turn
    pub fn from_specs<I>(specs: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = SectionSpec>,
    {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Add a section
    ///
    /// Dependencies may name sections registered later; [`validate`](Self::validate)
    /// checks that every one of them exists once registration is finished.
    pub fn register(&mut self, spec: SectionSpec) -> EngineResult<()> {
        if spec.id.trim().is_empty() {
            return Err(EngineError::configuration("Section id cannot be empty"));
        }

        if self.index.contains_key(&spec.id) {
            return Err(EngineError::configuration(format!(
                "Duplicate section id '{}'",
                spec.id
            )));
        }

        let mut seen = HashSet::new();
        for dep in &spec.depends_on {
            if !seen.insert(dep.as_str()) {
                return Err(EngineError::configuration(format!(
                    "Section '{}' lists dependency '{}' more than once",
                    spec.id, dep
                )));
            }
        }

        if let Some(cycle) = self.find_cycle_through(&spec) {
            return Err(EngineError::Configuration {
                message: format!("Dependency cycle: {}", cycle.join(" -> ")),
                cycle,
            });
        }

        debug!(
            section_id = %spec.id,
            depends_on = ?spec.depends_on,
            "Registered section"
        );

        self.index.insert(spec.id.clone(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    /// Depth-first search from the candidate, tracking the current path
    ///
    /// The registered graph is acyclic, so any new cycle passes through the
    /// candidate. Ids that are not registered yet are leaves.
    fn find_cycle_through(&self, candidate: &SectionSpec) -> Option<Vec<String>> {
        let mut stack: Vec<&str> = Vec::new();
        let mut finished: HashSet<&str> = HashSet::new();
        self.visit(candidate, &candidate.id, &mut stack, &mut finished)
    }

    fn visit<'a>(
        &'a self,
        candidate: &'a SectionSpec,
        id: &'a str,
        stack: &mut Vec<&'a str>,
        finished: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(start) = stack.iter().position(|on_stack| *on_stack == id) {
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        if finished.contains(id) {
            return None;
        }

        let deps: &'a [String] = if id == candidate.id {
            &candidate.depends_on
        } else {
            match self.index.get(id) {
                Some(&i) => &self.specs[i].depends_on,
                None => &[],
            }
        };

        stack.push(id);
        for dep in deps {
            if let Some(cycle) = self.visit(candidate, dep, stack, finished) {
                return Some(cycle);
            }
        }
        stack.pop();
        finished.insert(id);
        None
    }

    /// Check that every declared dependency is registered
    pub fn validate(&self) -> EngineResult<()> {
        for spec in &self.specs {
            for dep in &spec.depends_on {
                if !self.index.contains_key(dep) {
                    return Err(EngineError::unknown_section(dep.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> EngineResult<&SectionSpec> {
        self.index
            .get(id)
            .map(|&i| &self.specs[i])
            .ok_or_else(|| EngineError::unknown_section(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Registration index, used to break scheduling ties
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// All ids in registration order
    pub fn all_ids(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Sections that list `id` directly, in registration order
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.specs
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == id))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Every section that depends on `id` directly or indirectly, in registration order
    pub fn transitive_dependents(&self, id: &str) -> Vec<&str> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for dependent in self.dependents_of(current) {
                if reached.insert(dependent) {
                    frontier.push(dependent);
                }
            }
        }
        self.specs
            .iter()
            .map(|s| s.id.as_str())
            .filter(|s| reached.contains(s))
            .collect()
    }
}

/// Section writers that feed the compiled report, in report order
const SECTION_WRITERS: [(&str, &str); 6] = [
    ("overview", "Overview"),
    ("why_interesting", "Why Interesting"),
    ("product", "Product"),
    ("market", "Market"),
    ("competitive_landscape", "Competitive Landscape"),
    ("team", "Team"),
];

/// The standard investment due-diligence report
///
/// Organised company data feeds every section writer; the founder assessment
/// also reads the team section; the compiled report reads all of them and
/// the executive summary carries the GO/NO-GO recommendation.
pub fn diligence_registry() -> EngineResult<SectionRegistry> {
    let mut registry = SectionRegistry::new();

    registry.register(SectionSpec::new(
        "data_organizer",
        "Data Validation & Organization",
    ))?;

    for (id, name) in SECTION_WRITERS {
        registry.register(SectionSpec::new(id, name).depends_on(["data_organizer"]))?;
    }

    registry.register(
        SectionSpec::new("founder_assessment", "Founder Assessment")
            .depends_on(["data_organizer", "team"]),
    )?;

    let report_inputs = SECTION_WRITERS
        .iter()
        .map(|(id, _)| *id)
        .chain(["founder_assessment"]);
    registry.register(SectionSpec::new("report", "Full Report").depends_on(report_inputs))?;

    registry.register(
        SectionSpec::new("executive_summary", "Executive Summary & Recommendation")
            .depends_on(["report"]),
    )?;

    registry.validate()?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = SectionRegistry::from_specs([
            SectionSpec::new("overview", "Overview"),
            SectionSpec::new("market", "Market"),
            SectionSpec::new("report", "Report").depends_on(["overview", "market"]),
        ])
        .unwrap();

        assert_eq!(registry.all_ids(), vec!["overview", "market", "report"]);
        assert_eq!(registry.get("report").unwrap().depends_on.len(), 2);
        assert_eq!(registry.position("market"), Some(1));
        assert!(matches!(
            registry.get("team"),
            Err(EngineError::UnknownSection { ref section_id }) if section_id == "team"
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = SectionRegistry::new();
        registry.register(SectionSpec::new("market", "Market")).unwrap();

        let err = registry
            .register(SectionSpec::new("market", "Market again"))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_dependency_rejected() {
        let mut registry = SectionRegistry::new();
        let err = registry
            .register(SectionSpec::new("report", "Report").depends_on(["a", "a"]))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut registry = SectionRegistry::new();
        match registry.register(SectionSpec::new("loop", "Loop").depends_on(["loop"])) {
            Err(EngineError::Configuration { cycle, .. }) => {
                assert_eq!(cycle, vec!["loop".to_string(), "loop".to_string()]);
            }
            other => panic!("Expected cycle error, got {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cycle_through_forward_references() {
        let mut registry = SectionRegistry::new();
        registry
            .register(SectionSpec::new("a", "A").depends_on(["b"]))
            .unwrap();
        registry
            .register(SectionSpec::new("b", "B").depends_on(["c"]))
            .unwrap();

        match registry.register(SectionSpec::new("c", "C").depends_on(["a"])) {
            Err(EngineError::Configuration { cycle, .. }) => {
                assert_eq!(cycle, vec!["c", "a", "b", "c"]);
            }
            other => panic!("Expected cycle error, got {:?}", other),
        }
        assert!(!registry.contains("c"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let registry = SectionRegistry::from_specs([
            SectionSpec::new("base", "Base"),
            SectionSpec::new("left", "Left").depends_on(["base"]),
            SectionSpec::new("right", "Right").depends_on(["base"]),
            SectionSpec::new("top", "Top").depends_on(["left", "right"]),
        ]);
        assert!(registry.is_ok());
    }

    #[test]
    fn test_validate_reports_undeclared_dependency() {
        let registry = SectionRegistry::from_specs([
            SectionSpec::new("report", "Report").depends_on(["overview"]),
        ])
        .unwrap();

        assert!(matches!(
            registry.validate(),
            Err(EngineError::UnknownSection { ref section_id }) if section_id == "overview"
        ));
    }

    #[test]
    fn test_transitive_dependents() {
        let registry = diligence_registry().unwrap();

        assert_eq!(
            registry.transitive_dependents("team"),
            vec!["founder_assessment", "report", "executive_summary"]
        );
        assert!(registry.transitive_dependents("executive_summary").is_empty());
        assert_eq!(registry.dependents_of("report"), vec!["executive_summary"]);
    }

    #[test]
    fn test_diligence_registry_shape() {
        let registry = diligence_registry().unwrap();

        assert_eq!(registry.len(), 10);
        assert_eq!(registry.all_ids()[0], "data_organizer");
        assert_eq!(registry.all_ids()[9], "executive_summary");

        let report = registry.get("report").unwrap();
        assert_eq!(report.depends_on.len(), 7);
        assert_eq!(report.depends_on.last().map(String::as_str), Some("founder_assessment"));
        assert!(registry.iter().all(|s| s.resumable));
    }
}
