//! Execution planning
//!
//! Turns a request for sections into the ordered list of sections that must be
//! generated, given what a run has already recorded.

use crate::error::{EngineError, EngineResult};
use crate::registry::SectionRegistry;
use crate::state::RunState;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use tracing::{debug, info};

/// Which recorded sections to ignore when planning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Force {
    #[default]
    None,
    /// Recompute every section in the request's closure
    All,
    /// Recompute these sections and everything that depends on them
    Sections(BTreeSet<String>),
}

impl Force {
    pub fn sections<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            Force::None
        } else {
            Force::Sections(ids)
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Force::None)
    }

    fn explicit_ids(&self) -> impl Iterator<Item = &str> {
        let ids = match self {
            Force::Sections(ids) => Some(ids),
            _ => None,
        };
        ids.into_iter().flatten().map(String::as_str)
    }
}

/// Ordered section ids to execute in one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    sections: Vec<String>,
}

impl ExecutionPlan {
    pub fn new(sections: Vec<String>) -> Self {
        Self { sections }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(String::as_str)
    }

    pub fn contains(&self, section_id: &str) -> bool {
        self.sections.iter().any(|s| s == section_id)
    }

    pub fn position(&self, section_id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s == section_id)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.sections
    }
}

impl IntoIterator for ExecutionPlan {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.sections.into_iter()
    }
}

/// Plans runs over a validated registry
#[derive(Debug, Clone, Copy)]
pub struct Scheduler<'a> {
    registry: &'a SectionRegistry,
}

impl<'a> Scheduler<'a> {
    pub fn new(registry: &'a SectionRegistry) -> Self {
        Self { registry }
    }

    /// Compute the minimal dependency-ordered plan for `requested`
    ///
    /// An empty request means every registered section. Forced ids join the
    /// request. Previously completed sections outside the request that depend
    /// on a section being recomputed are re-planned as well.
    pub fn plan<S: AsRef<str>>(
        &self,
        requested: &[S],
        state: &RunState,
        force: &Force,
    ) -> EngineResult<ExecutionPlan> {
        let mut roots: Vec<&'a str> = Vec::new();
        if requested.is_empty() {
            roots.extend(self.registry.all_ids());
        } else {
            for id in requested {
                roots.push(self.registry.get(id.as_ref())?.id.as_str());
            }
        }
        for id in force.explicit_ids() {
            roots.push(self.registry.get(id)?.id.as_str());
        }

        let mut closure = self.dependency_closure(roots)?;

        // Sections pulled in later by cascading are never forced themselves
        let forced: HashSet<&'a str> = match force {
            Force::None => HashSet::new(),
            Force::All => closure.clone(),
            Force::Sections(ids) => ids
                .iter()
                .map(|id| self.registry.get(id).map(|spec| spec.id.as_str()))
                .collect::<EngineResult<_>>()?,
        };

        let (order, stale) = loop {
            let order = self.topological_order(&closure)?;
            let stale = self.stale_sections(&order, state, &forced);

            let cascaded: Vec<&'a str> = stale
                .iter()
                .flat_map(|id| self.registry.transitive_dependents(id))
                .filter(|id| !closure.contains(id) && state.is_complete(id))
                .collect();

            if cascaded.is_empty() {
                break (order, stale);
            }

            debug!(cascaded = ?cascaded, "Re-planning completed dependents of stale sections");
            closure = self.dependency_closure(closure.iter().copied().chain(cascaded))?;
        };

        let sections: Vec<String> = order
            .into_iter()
            .filter(|id| stale.contains(id))
            .map(str::to_string)
            .collect();

        info!(
            run_id = %state.run_id,
            plan_len = sections.len(),
            sections = ?sections,
            "Computed execution plan"
        );

        Ok(ExecutionPlan::new(sections))
    }

    /// Roots plus everything they transitively depend on
    fn dependency_closure<I>(&self, roots: I) -> EngineResult<HashSet<&'a str>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut closure = HashSet::new();
        let mut pending: Vec<&'a str> = roots.into_iter().collect();

        while let Some(id) = pending.pop() {
            if !closure.insert(id) {
                continue;
            }
            for dep in &self.registry.get(id)?.depends_on {
                let dep = self.registry.get(dep)?.id.as_str();
                if !closure.contains(dep) {
                    pending.push(dep);
                }
            }
        }

        Ok(closure)
    }

    /// Kahn's algorithm, always taking the ready section registered first
    fn topological_order(&self, closure: &HashSet<&'a str>) -> EngineResult<Vec<&'a str>> {
        let mut in_degree: HashMap<&'a str, usize> = HashMap::new();
        let mut dependents: HashMap<&'a str, Vec<&'a str>> = HashMap::new();

        for &id in closure {
            let spec = self.registry.get(id)?;
            in_degree.insert(id, spec.depends_on.len());
            for dep in &spec.depends_on {
                let dep = self.registry.get(dep)?.id.as_str();
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: BinaryHeap<Reverse<(usize, &'a str)>> = BinaryHeap::new();
        for (&id, &degree) in &in_degree {
            if degree == 0 {
                ready.push(Reverse((self.rank(id), id)));
            }
        }

        let mut order = Vec::with_capacity(closure.len());
        while let Some(Reverse((_, id))) = ready.pop() {
            order.push(id);
            for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.rank(dependent), dependent)));
                    }
                }
            }
        }

        if order.len() != closure.len() {
            let mut blocked: Vec<String> = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            blocked.sort();
            return Err(EngineError::Configuration {
                message: format!("Dependency cycle among: {}", blocked.join(", ")),
                cycle: blocked,
            });
        }

        Ok(order)
    }

    fn rank(&self, id: &str) -> usize {
        self.registry.position(id).unwrap_or(usize::MAX)
    }

    /// Sections of `order` that must be (re)generated
    fn stale_sections(
        &self,
        order: &[&'a str],
        state: &RunState,
        forced: &HashSet<&'a str>,
    ) -> HashSet<&'a str> {
        let mut stale = HashSet::new();

        for &id in order {
            let Ok(spec) = self.registry.get(id) else {
                continue;
            };

            let reason = match state.result(id) {
                _ if forced.contains(id) => Some("forced"),
                None => Some("not completed"),
                Some(_) if !spec.resumable => Some("not resumable"),
                Some(_) if spec.depends_on.iter().any(|d| stale.contains(d.as_str())) => {
                    Some("dependency re-planned")
                }
                Some(result) => spec
                    .depends_on
                    .iter()
                    .filter_map(|d| state.result(d))
                    .any(|dep| dep.completed_at > result.completed_at)
                    .then_some("dependency newer"),
            };

            if let Some(reason) = reason {
                debug!(section_id = id, reason = reason, "Section is stale");
                stale.insert(id);
            }
        }

        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{diligence_registry, SectionSpec};
    use crate::state::SectionResult;
    use chrono::{DateTime, Duration, Utc};

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(offset_secs)
    }

    fn complete(state: &mut RunState, id: &str, offset_secs: i64) {
        state.completed_sections.insert(
            id.to_string(),
            SectionResult {
                content: format!("{id} content"),
                completed_at: at(offset_secs),
                source_refs: Vec::new(),
            },
        );
    }

    fn example_registry() -> SectionRegistry {
        SectionRegistry::from_specs([
            SectionSpec::new("overview", "Overview"),
            SectionSpec::new("market", "Market"),
            SectionSpec::new("report", "Report").depends_on(["overview", "market"]),
        ])
        .unwrap()
    }

    fn ids(plan: &ExecutionPlan) -> Vec<&str> {
        plan.iter().collect()
    }

    #[test]
    fn test_plan_report_on_empty_state() {
        let registry = example_registry();
        let scheduler = Scheduler::new(&registry);
        let state = RunState::new("run-1");

        let plan = scheduler.plan(&["report"], &state, &Force::None).unwrap();
        assert_eq!(ids(&plan), vec!["overview", "market", "report"]);
    }

    #[test]
    fn test_tie_order_follows_registration() {
        let registry = SectionRegistry::from_specs([
            SectionSpec::new("market", "Market"),
            SectionSpec::new("overview", "Overview"),
            SectionSpec::new("report", "Report").depends_on(["overview", "market"]),
        ])
        .unwrap();
        let scheduler = Scheduler::new(&registry);
        let state = RunState::new("run-1");

        for _ in 0..5 {
            let plan = scheduler.plan(&["report"], &state, &Force::None).unwrap();
            assert_eq!(ids(&plan), vec!["market", "overview", "report"]);
        }
    }

    #[test]
    fn test_forward_registered_dependency_is_ordered_first() {
        let registry = SectionRegistry::from_specs([
            SectionSpec::new("report", "Report").depends_on(["overview"]),
            SectionSpec::new("overview", "Overview"),
        ])
        .unwrap();
        let plan = Scheduler::new(&registry)
            .plan(&["report"], &RunState::new("r"), &Force::None)
            .unwrap();
        assert_eq!(ids(&plan), vec!["overview", "report"]);
    }

    #[test]
    fn test_completed_run_plans_nothing() {
        let registry = example_registry();
        let mut state = RunState::new("run-1");
        complete(&mut state, "overview", 1);
        complete(&mut state, "market", 2);
        complete(&mut state, "report", 3);

        let plan = Scheduler::new(&registry)
            .plan(&["report"], &state, &Force::None)
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_partial_state_plans_remainder() {
        let registry = example_registry();
        let mut state = RunState::new("run-1");
        complete(&mut state, "overview", 1);

        let plan = Scheduler::new(&registry)
            .plan(&["report"], &state, &Force::None)
            .unwrap();
        assert_eq!(ids(&plan), vec!["market", "report"]);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let registry = example_registry();
        let state = RunState::new("run-1");
        let scheduler = Scheduler::new(&registry);

        assert!(matches!(
            scheduler.plan(&["team"], &state, &Force::None),
            Err(EngineError::UnknownSection { ref section_id }) if section_id == "team"
        ));
        assert!(matches!(
            scheduler.plan(&["report"], &state, &Force::sections(["team"])),
            Err(EngineError::UnknownSection { .. })
        ));
    }

    #[test]
    fn test_empty_request_means_everything() {
        let registry = diligence_registry().unwrap();
        let plan = Scheduler::new(&registry)
            .plan::<&str>(&[], &RunState::new("run-1"), &Force::None)
            .unwrap();

        assert_eq!(plan.len(), registry.len());
        assert_eq!(plan.position("data_organizer"), Some(0));
        assert_eq!(plan.position("executive_summary"), Some(registry.len() - 1));
        assert!(plan.position("team") < plan.position("founder_assessment"));
    }

    #[test]
    fn test_partial_force_cascades_outside_request() {
        let registry = example_registry();
        let mut state = RunState::new("run-1");
        complete(&mut state, "overview", 1);
        complete(&mut state, "market", 2);
        complete(&mut state, "report", 3);

        let plan = Scheduler::new(&registry)
            .plan(&["overview"], &state, &Force::sections(["overview"]))
            .unwrap();
        assert_eq!(ids(&plan), vec!["overview", "report"]);
    }

    #[test]
    fn test_forced_id_joins_request() {
        let registry = example_registry();
        let mut state = RunState::new("run-1");
        complete(&mut state, "overview", 1);
        complete(&mut state, "market", 2);
        complete(&mut state, "report", 3);

        let plan = Scheduler::new(&registry)
            .plan(&["overview"], &state, &Force::sections(["market"]))
            .unwrap();
        assert_eq!(ids(&plan), vec!["market", "report"]);
    }

    #[test]
    fn test_force_all_replans_closure_only() {
        let registry = example_registry();
        let mut state = RunState::new("run-1");
        complete(&mut state, "overview", 1);
        complete(&mut state, "market", 2);
        complete(&mut state, "report", 3);

        let plan = Scheduler::new(&registry)
            .plan(&["market"], &state, &Force::All)
            .unwrap();
        assert_eq!(ids(&plan), vec!["market", "report"]);

        let plan = Scheduler::new(&registry)
            .plan(&["report"], &state, &Force::All)
            .unwrap();
        assert_eq!(ids(&plan), vec!["overview", "market", "report"]);
    }

    #[test]
    fn test_dependency_newer_than_dependent_is_stale() {
        let registry = example_registry();
        let mut state = RunState::new("run-1");
        complete(&mut state, "overview", 10);
        complete(&mut state, "market", 2);
        complete(&mut state, "report", 3);

        let plan = Scheduler::new(&registry)
            .plan(&["report"], &state, &Force::None)
            .unwrap();
        assert_eq!(ids(&plan), vec!["report"]);
    }

    #[test]
    fn test_non_resumable_section_always_replanned() {
        let registry = SectionRegistry::from_specs([
            SectionSpec::new("data_organizer", "Data").not_resumable(),
            SectionSpec::new("overview", "Overview").depends_on(["data_organizer"]),
            SectionSpec::new("market", "Market"),
        ])
        .unwrap();
        let mut state = RunState::new("run-1");
        complete(&mut state, "data_organizer", 1);
        complete(&mut state, "overview", 2);
        complete(&mut state, "market", 3);

        let plan = Scheduler::new(&registry)
            .plan(&["market", "data_organizer"], &state, &Force::None)
            .unwrap();
        assert_eq!(ids(&plan), vec!["data_organizer", "overview"]);
    }

    #[test]
    fn test_cascade_reaches_transitive_dependents() {
        let registry = diligence_registry().unwrap();
        let mut state = RunState::new("run-1");
        for (i, id) in registry.all_ids().into_iter().enumerate() {
            complete(&mut state, id, i as i64);
        }

        let plan = Scheduler::new(&registry)
            .plan(&["team"], &state, &Force::sections(["team"]))
            .unwrap();
        assert_eq!(
            ids(&plan),
            vec!["team", "founder_assessment", "report", "executive_summary"]
        );
    }
}
