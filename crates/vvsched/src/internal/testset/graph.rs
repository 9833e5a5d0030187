use crate::internal::common::Map;
use crate::internal::common::error::SchedError;
use crate::internal::common::ids::{GroupId, TestId};
use crate::internal::testset::dependency::{
    DependencyPolicy, FAILED_MATCH_REASON, TestDependency,
};
use crate::internal::testset::test_case::TestCase;

/// The full set of tests of a run together with their dependency relation.
#[derive(Default, Debug)]
pub struct TestGraph {
    tests: Map<TestId, TestCase>,
    order: Vec<TestId>,
    names: Map<String, TestId>,
    groups: Map<GroupId, Vec<TestId>>,
}

impl TestGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, test: TestCase) -> crate::Result<()> {
        if self.tests.contains_key(&test.id) {
            return Err(SchedError::TestSetError(format!(
                "Duplicate test id {}",
                test.id
            )));
        }
        if self.names.contains_key(&test.name) {
            return Err(SchedError::TestSetError(format!(
                "Duplicate test name '{}'",
                test.name
            )));
        }
        if let Some(group) = test.group {
            self.groups.entry(group).or_default().push(test.id);
        }
        self.names.insert(test.name.clone(), test.id);
        self.order.push(test.id);
        self.tests.insert(test.id, test);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[inline]
    pub fn get(&self, id: TestId) -> Option<&TestCase> {
        self.tests.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: TestId) -> Option<&mut TestCase> {
        self.tests.get_mut(&id)
    }

    #[inline]
    pub fn test(&self, id: TestId) -> &TestCase {
        self.tests
            .get(&id)
            .unwrap_or_else(|| panic!("Asking for invalid test id={id}"))
    }

    #[inline]
    pub fn test_mut(&mut self, id: TestId) -> &mut TestCase {
        self.tests
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Asking for invalid test id={id}"))
    }

    /// Tests in the order in which they were added.
    pub fn tests(&self) -> impl Iterator<Item = &TestCase> {
        self.order.iter().map(|id| &self.tests[id])
    }

    pub fn find_by_name(&self, name: &str) -> Option<TestId> {
        self.names.get(name).copied()
    }

    pub fn group_members(&self, group: GroupId) -> &[TestId] {
        self.groups.get(&group).map(|g| g.as_slice()).unwrap_or_default()
    }

    pub fn num_dependencies(&self, id: TestId) -> usize {
        self.test(id).num_dependencies()
    }

    /// The first dependency of the test that currently prevents it from running.
    pub fn blocking_dependency(&self, id: TestId) -> Option<&TestDependency> {
        self.test(id)
            .dependencies
            .iter()
            .find(|dep| dep.is_blocking(self))
    }

    #[inline]
    pub fn is_blocked(&self, id: TestId) -> bool {
        self.blocking_dependency(id).is_some()
    }

    pub fn blocked_reason(&self, id: TestId) -> Option<String> {
        self.blocking_dependency(id)
            .map(|dep| dep.blocked_reason(self))
    }

    pub fn will_never_run(&self, id: TestId) -> bool {
        self.test(id)
            .dependencies
            .iter()
            .any(|dep| dep.will_never_run(self))
    }

    /// Resolves declared dependencies and analyze groups into dependency edges.
    ///
    /// An analyze test depends on every other member of its group. Declared dependencies
    /// are resolved by name; a name that does not match any test turns into a dependency
    /// that blocks forever.
    pub(crate) fn connect_dependencies(&mut self) {
        let mut edges: Vec<(TestId, Vec<TestDependency>)> = Vec::with_capacity(self.order.len());
        for &id in &self.order {
            let test = &self.tests[&id];
            if test.is_skipped() {
                continue;
            }
            let mut deps: Vec<TestDependency> = Vec::new();
            if test.analyze {
                if let Some(group) = test.group {
                    for &member in self.group_members(group) {
                        if member != id && !self.tests[&member].analyze {
                            add_edge(&mut deps, member, DependencyPolicy::Hard);
                        }
                    }
                }
            }
            for spec in &test.depends_on {
                match self.names.get(&spec.target) {
                    Some(&target) if target != id => add_edge(&mut deps, target, spec.policy),
                    _ => {
                        log::warn!(
                            "Test '{}' depends on '{}' that does not match any test",
                            test.name,
                            spec.target
                        );
                        deps.push(TestDependency::Failed {
                            reason: FAILED_MATCH_REASON.to_string(),
                        });
                    }
                }
            }
            edges.push((id, deps));
        }

        for (id, deps) in edges {
            for target in deps.iter().filter_map(|d| d.target()) {
                self.test_mut(target).has_dependent = true;
            }
            self.test_mut(id).dependencies = deps;
        }
    }
}

fn add_edge(deps: &mut Vec<TestDependency>, target: TestId, policy: DependencyPolicy) {
    if !deps.iter().any(|d| d.target() == Some(target)) {
        deps.push(TestDependency::Test { target, policy });
    }
}
