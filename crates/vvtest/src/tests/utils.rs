use std::time::Duration;

use derive_builder::Builder;
use vvsched::TestId;
use vvsched::testset::{DependencyPolicy, DependencySpec, TestCase, TestGraph, TestSize};

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct TestDef {
    #[builder(setter(into))]
    name: String,
    #[builder(default = "1")]
    np: u32,
    #[builder(default, setter(strip_option))]
    ndevice: Option<u32>,
    #[builder(default, setter(strip_option))]
    timeout_secs: Option<u64>,
    #[builder(default)]
    depends_on: Vec<&'static str>,
    #[builder(default = r#"vec!["true".to_string()]"#)]
    command: Vec<String>,
}

pub fn test_def(name: &str) -> TestDefBuilder {
    TestDefBuilder::default().name(name)
}

/// Creates a graph with ids assigned from 1 in the given order.
pub fn create_graph(tests: Vec<TestDefBuilder>) -> TestGraph {
    let mut graph = TestGraph::new();
    for (i, builder) in tests.into_iter().enumerate() {
        let def = builder.finish().unwrap();
        let mut test = TestCase::new(
            TestId::new(i as u32 + 1),
            def.name,
            TestSize::new(def.np, def.ndevice),
            def.command,
        );
        test.timeout = def.timeout_secs.map(Duration::from_secs);
        test.depends_on = def
            .depends_on
            .into_iter()
            .map(|name| DependencySpec::new(name, DependencyPolicy::Hard))
            .collect();
        graph.add(test).unwrap();
    }
    graph
}

pub fn test_names(graph: &TestGraph, ids: &[TestId]) -> Vec<String> {
    ids.iter().map(|id| graph.test(*id).name.clone()).collect()
}
