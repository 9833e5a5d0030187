use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vvsched::testset::{ResultStatus, TestCase, TestGraph, TestState};
use vvsched::{ResultsSink, TestId};

/// One line of a results file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultsRecord {
    Header {
        version: String,
        hostname: String,
        started_at: DateTime<Utc>,
        num_tests: usize,
    },
    Start {
        id: TestId,
        name: String,
        state: TestState,
    },
    Result {
        id: TestId,
        name: String,
        state: TestState,
    },
    Finished {
        finished_at: DateTime<Utc>,
        summary: ResultsSummary,
    },
}

/// Number of tests per result status.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsSummary {
    pub notrun: usize,
    pub notdone: usize,
    pub pass: usize,
    pub diff: usize,
    pub fail: usize,
    pub timeout: usize,
    pub skip: usize,
}

impl ResultsSummary {
    pub fn from_graph(graph: &TestGraph) -> Self {
        let mut summary = ResultsSummary::default();
        for test in graph.tests() {
            if test.is_skipped() {
                summary.skip += 1;
                continue;
            }
            match test.result_status() {
                ResultStatus::NotRun => summary.notrun += 1,
                ResultStatus::NotDone => summary.notdone += 1,
                ResultStatus::Pass => summary.pass += 1,
                ResultStatus::Diff => summary.diff += 1,
                ResultStatus::Fail => summary.fail += 1,
                ResultStatus::Timeout => summary.timeout += 1,
            }
        }
        summary
    }

    /// Exit code bitmask of a run: diff 2, fail 4, timeout 8, notdone 16, notrun 32.
    pub fn exit_code(&self) -> i32 {
        let mut code = 0;
        for (count, bit) in [
            (self.diff, 2),
            (self.fail, 4),
            (self.timeout, 8),
            (self.notdone, 16),
            (self.notrun, 32),
        ] {
            if count > 0 {
                code |= bit;
            }
        }
        code
    }
}

/// Results file in the JSON lines format.
///
/// The file starts with a header record and ends with a `finished` record once the run
/// is over, so a reader can tell a completed file from one that is still being written.
pub struct ResultsFile {
    path: PathBuf,
    writer: BufWriter<File>,
    finished: bool,
}

impl ResultsFile {
    pub fn create(path: &Path, num_tests: usize) -> crate::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)
            .map_err(|e| format!("Cannot create results file {}: {e}", path.display()))?;
        let mut results = ResultsFile {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            finished: false,
        };
        results.write_record(&ResultsRecord::Header {
            version: crate::VVTEST_VERSION.to_string(),
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            started_at: Utc::now(),
            num_tests,
        })?;
        Ok(results)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, record: &ResultsRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn write_or_warn(&mut self, record: ResultsRecord) {
        if let Err(error) = self.write_record(&record) {
            log::warn!(
                "Cannot write into results file {}: {error}",
                self.path.display()
            );
        }
    }
}

impl ResultsSink for ResultsFile {
    fn test_started(&mut self, test: &TestCase) {
        self.write_or_warn(ResultsRecord::Start {
            id: test.id,
            name: test.name.clone(),
            state: test.state.clone(),
        });
    }

    fn append_result(&mut self, test: &TestCase) {
        self.write_or_warn(ResultsRecord::Result {
            id: test.id,
            name: test.name.clone(),
            state: test.state.clone(),
        });
    }

    fn postrun(&mut self, graph: &TestGraph) -> vvsched::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.write_record(&ResultsRecord::Finished {
            finished_at: Utc::now(),
            summary: ResultsSummary::from_graph(graph),
        })?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ResultsFileContent {
    /// Test states in the order in which they were written.
    pub states: Vec<(TestId, TestState)>,
    pub finished: bool,
}

/// Reads a (possibly still growing) results file. Lines that cannot be parsed are skipped.
pub fn read_results_file(path: &Path) -> crate::Result<ResultsFileContent> {
    let content = std::fs::read_to_string(path)?;
    let mut result = ResultsFileContent::default();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<ResultsRecord>(line) {
            Ok(ResultsRecord::Start { id, state, .. } | ResultsRecord::Result { id, state, .. }) => {
                result.states.push((id, state))
            }
            Ok(ResultsRecord::Finished { .. }) => result.finished = true,
            Ok(ResultsRecord::Header { .. }) => {}
            Err(error) => {
                log::debug!(
                    "Skipping invalid line in results file {}: {error}",
                    path.display()
                );
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::{ResultsFile, ResultsSummary, read_results_file};
    use std::io::Write;
    use std::time::{Duration, SystemTime};
    use vvsched::ResultsSink;
    use vvsched::testset::{TestCase, TestGraph, TestResult, TestSize, TestState};
    use vvsched::TestId;

    fn create_graph() -> TestGraph {
        let mut graph = TestGraph::new();
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            graph
                .add(TestCase::new(
                    TestId::new(id),
                    name,
                    TestSize::procs(1),
                    vec!["true".to_string()],
                ))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_results_file_roundtrip() {
        let dir = tempfile::TempDir::with_prefix("vvtest").unwrap();
        let path = dir.path().join("sub").join("results.jsonl");
        let mut graph = create_graph();

        let mut results = ResultsFile::create(&path, graph.len()).unwrap();
        let a = TestId::new(1);
        graph.test_mut(a).set_running(SystemTime::now());
        results.test_started(graph.test(a));
        graph
            .test_mut(a)
            .set_done(TestResult::Pass, Duration::from_secs(3), Some(0));
        results.append_result(graph.test(a));

        let content = read_results_file(&path).unwrap();
        assert_eq!(content.states.len(), 2);
        assert!(content.states[0].1.is_running());
        assert_eq!(content.states[1], (a, graph.test(a).state.clone()));
        assert!(!content.finished);

        results.postrun(&graph).unwrap();
        results.postrun(&graph).unwrap();
        let content = read_results_file(&path).unwrap();
        assert!(content.finished);
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("\"finished\"").count(), 1);
    }

    #[test]
    fn test_read_results_skips_partial_line() {
        let dir = tempfile::TempDir::with_prefix("vvtest").unwrap();
        let path = dir.path().join("results.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"type":"result","id":4,"name":"x","state":{{"state":"not_run"}}}}"#
        )
        .unwrap();
        write!(file, r#"{{"type":"result","id":5,"na"#).unwrap();
        drop(file);

        let content = read_results_file(&path).unwrap();
        assert_eq!(content.states, vec![(TestId::new(4), TestState::NotRun)]);
        assert!(!content.finished);
    }

    #[test]
    fn test_summary_exit_code() {
        let mut graph = create_graph();
        graph
            .test_mut(TestId::new(1))
            .set_done(TestResult::Diff, Duration::ZERO, Some(64));
        graph
            .test_mut(TestId::new(2))
            .set_done(TestResult::Pass, Duration::ZERO, Some(0));
        graph.test_mut(TestId::new(3)).skip = Some("x".to_string());
        let summary = ResultsSummary::from_graph(&graph);
        assert_eq!(
            summary,
            ResultsSummary {
                diff: 1,
                pass: 1,
                skip: 1,
                ..Default::default()
            }
        );
        assert_eq!(summary.exit_code(), 2);
        assert_eq!(ResultsSummary::default().exit_code(), 0);
    }
}
