use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use vvsched::testset::{DependencyPolicy, DependencySpec, TestCase, TestGraph, TestSize};
use vvsched::{GroupId, Map, TestId};

use crate::common::error::error;
use crate::common::utils::time::deserialize_human_duration_opt;

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TestListDef {
    #[serde(default, rename = "test")]
    tests: Vec<TestDef>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct TestDef {
    name: String,
    command: Vec<String>,
    #[serde(default = "default_np")]
    np: u32,
    #[serde(default)]
    ndevice: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    timeout: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    runtime: Option<Duration>,
    #[serde(default)]
    analyze: bool,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    skip: Option<String>,
    #[serde(default)]
    depends_on: Vec<DependencyDef>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum DependencyDef {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        policy: DependencyPolicy,
    },
}

fn default_np() -> u32 {
    1
}

/// Loads a test list; relative program paths are resolved against the directory of the file.
pub fn load_test_list(path: &Path) -> crate::Result<TestGraph> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read test list {}: {e}", path.display()))?;
    let base_dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    parse_test_list(&content, &base_dir)
}

pub fn parse_test_list(content: &str, base_dir: &Path) -> crate::Result<TestGraph> {
    let definition: TestListDef = toml::from_str(content)?;

    let mut graph = TestGraph::new();
    let mut groups: Map<String, GroupId> = Map::new();
    for (index, def) in definition.tests.into_iter().enumerate() {
        if def.command.is_empty() {
            return error(format!("Test '{}' has an empty command", def.name));
        }
        let id = TestId::new(index as u32 + 1);
        let mut command = def.command;
        command[0] = resolve_program(&command[0], base_dir);

        let mut test = TestCase::new(id, def.name, TestSize::new(def.np, def.ndevice), command);
        test.timeout = def.timeout;
        test.runtime = def.runtime;
        test.analyze = def.analyze;
        test.skip = def.skip;
        test.group = def.group.map(|name| {
            let next = GroupId::new(groups.len() as u32);
            *groups.entry(name).or_insert(next)
        });
        test.depends_on = def
            .depends_on
            .into_iter()
            .map(|dep| match dep {
                DependencyDef::Name(name) => DependencySpec::new(name, DependencyPolicy::Hard),
                DependencyDef::Full { name, policy } => DependencySpec::new(name, policy),
            })
            .collect();
        graph.add(test)?;
    }
    Ok(graph)
}

fn resolve_program(program: &str, base_dir: &Path) -> String {
    let path = PathBuf::from(program);
    if path.is_relative() && program.contains('/') {
        base_dir.join(path).display().to_string()
    } else {
        program.to_string()
    }
}
