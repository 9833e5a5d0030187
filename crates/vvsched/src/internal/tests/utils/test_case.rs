use crate::internal::testset::{DependencyPolicy, DependencySpec, TestCase, TestSize};
use crate::{GroupId, TestId};
use std::time::Duration;

pub struct TestBuilder {
    id: TestId,
    name: String,
    size: TestSize,
    runtime: Option<Duration>,
    timeout: Option<Duration>,
    analyze: bool,
    group: Option<GroupId>,
    depends_on: Vec<DependencySpec>,
    skip: Option<String>,
}

impl TestBuilder {
    pub fn new<T: Into<TestId>>(id: T) -> TestBuilder {
        let id = id.into();
        TestBuilder {
            id,
            name: format!("t{id}"),
            size: TestSize::procs(1),
            runtime: None,
            timeout: None,
            analyze: false,
            group: None,
            depends_on: Vec::new(),
            skip: None,
        }
    }

    pub fn name(mut self, name: &str) -> TestBuilder {
        self.name = name.to_string();
        self
    }

    pub fn np(mut self, np: u32) -> TestBuilder {
        self.size.np = np;
        self
    }

    pub fn devices(mut self, count: u32) -> TestBuilder {
        self.size.ndevice = Some(count);
        self
    }

    pub fn runtime_secs(mut self, secs: u64) -> TestBuilder {
        self.runtime = Some(Duration::from_secs(secs));
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> TestBuilder {
        self.timeout = Some(Duration::from_secs(secs));
        self
    }

    pub fn member_of(mut self, group: u32) -> TestBuilder {
        self.group = Some(GroupId::new(group));
        self
    }

    pub fn analyze(mut self, group: u32) -> TestBuilder {
        self.analyze = true;
        self.member_of(group)
    }

    pub fn depends_on(mut self, name: &str) -> TestBuilder {
        self.depends_on
            .push(DependencySpec::new(name, DependencyPolicy::Hard));
        self
    }

    pub fn soft_depends_on(mut self, name: &str) -> TestBuilder {
        self.depends_on
            .push(DependencySpec::new(name, DependencyPolicy::Soft));
        self
    }

    pub fn skip(mut self, reason: &str) -> TestBuilder {
        self.skip = Some(reason.to_string());
        self
    }

    pub fn build(self) -> TestCase {
        let mut test = TestCase::new(
            self.id,
            self.name,
            self.size,
            vec!["true".to_string()],
        );
        test.runtime = self.runtime;
        test.timeout = self.timeout;
        test.analyze = self.analyze;
        test.group = self.group;
        test.depends_on = self.depends_on;
        test.skip = self.skip;
        test
    }
}
