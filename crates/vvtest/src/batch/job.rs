use std::fmt::{Display, Formatter};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bstr::ByteSlice;
use vvsched::TestId;
use vvsched::testset::TestSize;

use crate::batch::common::CLEAN_EXIT_MARKER;
use crate::batch::script::BatchFileNamer;
use crate::batch::{JobId, QueueState};

vvsched::define_id_type!(BatchId);

/// Only the end of a job output file is searched for the clean exit marker.
const OUTPUT_TAIL_SIZE: u64 = 512;

/// How a batch job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobResult {
    Clean,
    NotRun,
    NotDone,
    Fail,
}

impl Display for JobResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobResult::Clean => "clean",
            JobResult::NotRun => "notrun",
            JobResult::NotDone => "notdone",
            JobResult::Fail => "fail",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Todo,
    /// Submitted and possibly still in the queue
    Submitted,
    /// Left the queue, its results were not fully read yet
    Stopped,
    Done(JobResult),
}

#[derive(Debug, Clone)]
pub struct JobFiles {
    pub script: PathBuf,
    pub outfile: PathBuf,
    pub job_file: PathBuf,
    pub results_file: PathBuf,
}

#[derive(Debug)]
pub struct BatchJob {
    pub id: BatchId,
    pub tests: Vec<TestId>,
    /// Largest test size of the job
    pub size: TestSize,
    pub files: JobFiles,
    job_id: Option<JobId>,
    state: JobState,
    submit_time: Option<Instant>,
    stop_time: Option<Instant>,
    check_time: Option<Instant>,
    outfile_seen: bool,
}

impl BatchJob {
    #[inline]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[inline]
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    pub fn outfile_seen(&self) -> bool {
        self.outfile_seen
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, JobState::Submitted | JobState::Stopped)
    }
}

/// Tracks batch jobs through todo -> submitted -> stopped -> done.
pub struct BatchJobHandler {
    check_interval: Duration,
    check_timeout: Duration,
    settle_time: Duration,
    jobs: Vec<BatchJob>,
}

impl BatchJobHandler {
    pub fn new(check_interval: Duration, check_timeout: Duration, settle_time: Duration) -> Self {
        BatchJobHandler {
            check_interval,
            check_timeout,
            settle_time,
            jobs: Vec::new(),
        }
    }

    pub fn create_job(&mut self, tests: Vec<TestId>, size: TestSize, namer: &BatchFileNamer) -> BatchId {
        let id = BatchId::new(self.jobs.len() as u32);
        self.jobs.push(BatchJob {
            id,
            tests,
            size,
            files: namer.job_files(id),
            job_id: None,
            state: JobState::Todo,
            submit_time: None,
            stop_time: None,
            check_time: None,
            outfile_seen: false,
        });
        id
    }

    pub fn job(&self, id: BatchId) -> &BatchJob {
        self.jobs
            .get(id.as_num() as usize)
            .unwrap_or_else(|| panic!("Asking for invalid batch id={id}"))
    }

    fn job_mut(&mut self, id: BatchId) -> &mut BatchJob {
        self.jobs
            .get_mut(id.as_num() as usize)
            .unwrap_or_else(|| panic!("Asking for invalid batch id={id}"))
    }

    pub fn jobs(&self) -> impl Iterator<Item = &BatchJob> {
        self.jobs.iter()
    }

    fn ids_in_state<F: Fn(JobState) -> bool>(&self, filter: F) -> Vec<BatchId> {
        self.jobs
            .iter()
            .filter(|job| filter(job.state))
            .map(|job| job.id)
            .collect()
    }

    pub fn not_started(&self) -> Vec<BatchId> {
        self.ids_in_state(|state| state == JobState::Todo)
    }

    pub fn submitted(&self) -> Vec<BatchId> {
        self.ids_in_state(|state| state == JobState::Submitted)
    }

    pub fn stopped(&self) -> Vec<BatchId> {
        self.ids_in_state(|state| state == JobState::Stopped)
    }

    pub fn num_submitted(&self) -> usize {
        self.submitted().len()
    }

    /// Jobs in the queue plus jobs whose results are still being read.
    pub fn num_in_progress(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_in_progress()).count()
    }

    pub fn num_done(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| matches!(job.state, JobState::Done(_)))
            .count()
    }

    pub fn mark_submitted(&mut self, id: BatchId, job_id: JobId, now: Instant) {
        let job = self.job_mut(id);
        job.job_id = Some(job_id);
        job.state = JobState::Submitted;
        job.submit_time = Some(now);
        job.check_time = Some(now);
    }

    pub fn mark_stopped(&mut self, id: BatchId, now: Instant) {
        let job = self.job_mut(id);
        job.state = JobState::Stopped;
        job.stop_time = Some(now);
        job.check_time = Some(now);
    }

    pub fn mark_done(&mut self, id: BatchId, result: JobResult) {
        self.job_mut(id).state = JobState::Done(result);
    }

    pub fn check_outfile(&mut self, id: BatchId) {
        let job = self.job_mut(id);
        if !job.outfile_seen && job.files.outfile.exists() {
            job.outfile_seen = true;
        }
    }

    /// Moves a submitted job to stopped when the queue no longer lists it and the job
    /// had enough time to appear in the queue (or its output file was already seen).
    pub fn check_stopped(&mut self, id: BatchId, queue_state: QueueState, now: Instant) -> bool {
        let job = self.job(id);
        if job.state != JobState::Submitted || queue_state != QueueState::Absent {
            return false;
        }
        let elapsed = job
            .submit_time
            .map(|time| now.saturating_duration_since(time))
            .unwrap_or_default();
        if elapsed > self.settle_time || job.outfile_seen {
            self.mark_stopped(id, now);
            true
        } else {
            false
        }
    }

    pub fn is_time_to_check(&self, id: BatchId, now: Instant) -> bool {
        match self.job(id).check_time {
            Some(time) => now >= time + self.check_interval,
            None => true,
        }
    }

    pub fn reset_check_time(&mut self, id: BatchId, now: Instant) {
        self.job_mut(id).check_time = Some(now);
    }

    /// Postpones the next finish check of a stopped job.
    ///
    /// Returns false once the check timeout since the job stopped has passed.
    pub fn extend_finish_check(&mut self, id: BatchId, now: Instant) -> bool {
        let timeout = self.check_timeout;
        let job = self.job_mut(id);
        let stop_time = job.stop_time.unwrap_or(now);
        if now < stop_time + timeout {
            job.check_time = Some(now);
            true
        } else {
            false
        }
    }

    /// Marks every job that was never submitted as not run and returns them.
    pub fn mark_not_started_done(&mut self) -> Vec<BatchId> {
        let ids = self.not_started();
        for id in &ids {
            self.mark_done(*id, JobResult::NotRun);
        }
        ids
    }

    /// Jobs that did not start and jobs that did not finish.
    pub fn unfinished(&self) -> (Vec<BatchId>, Vec<BatchId>) {
        let not_run = self.ids_in_state(|state| state == JobState::Done(JobResult::NotRun));
        let not_done = self.ids_in_state(|state| state == JobState::Done(JobResult::NotDone));
        (not_run, not_done)
    }
}

/// Checks whether the end of a job output file contains the clean exit marker.
pub fn scan_batch_output(path: &Path) -> bool {
    let read_tail = || -> std::io::Result<Vec<u8>> {
        let mut file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        file.seek(SeekFrom::Start(size.saturating_sub(OUTPUT_TAIL_SIZE)))?;
        let mut buffer = Vec::with_capacity(OUTPUT_TAIL_SIZE as usize);
        file.take(OUTPUT_TAIL_SIZE).read_to_end(&mut buffer)?;
        Ok(buffer)
    };
    match read_tail() {
        Ok(tail) => tail.contains_str(CLEAN_EXIT_MARKER),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchJobHandler, JobResult, JobState, scan_batch_output};
    use crate::batch::QueueState;
    use crate::batch::script::BatchFileNamer;
    use std::io::Write;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use vvsched::TestId;
    use vvsched::testset::TestSize;

    fn create_handler() -> BatchJobHandler {
        BatchJobHandler::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
            Duration::from_secs(30),
        )
    }

    fn add_job(handler: &mut BatchJobHandler) -> super::BatchId {
        let namer = BatchFileNamer::new(Path::new("/nonexistent/TestResults"));
        handler.create_job(vec![TestId::new(1)], TestSize::procs(1), &namer)
    }

    #[test]
    fn test_job_stops_after_settle_time() {
        let mut handler = create_handler();
        let id = add_job(&mut handler);
        let start = Instant::now();
        handler.mark_submitted(id, 42, start);
        assert_eq!(handler.num_submitted(), 1);

        assert!(!handler.check_stopped(id, QueueState::Pending, start + Duration::from_secs(60)));
        assert!(!handler.check_stopped(id, QueueState::Absent, start + Duration::from_secs(10)));
        assert_eq!(handler.job(id).state(), JobState::Submitted);
        assert!(handler.check_stopped(id, QueueState::Absent, start + Duration::from_secs(31)));
        assert_eq!(handler.job(id).state(), JobState::Stopped);
        assert_eq!(handler.num_in_progress(), 1);
        assert_eq!(handler.num_submitted(), 0);
    }

    #[test]
    fn test_job_stops_when_outfile_seen() {
        let dir = tempfile::TempDir::with_prefix("vvtest").unwrap();
        let namer = BatchFileNamer::new(dir.path());
        let mut handler = create_handler();
        let id = handler.create_job(vec![TestId::new(1)], TestSize::procs(1), &namer);
        let start = Instant::now();
        handler.mark_submitted(id, 7, start);

        std::fs::create_dir_all(handler.job(id).files.outfile.parent().unwrap()).unwrap();
        std::fs::write(&handler.job(id).files.outfile, "").unwrap();
        handler.check_outfile(id);
        assert!(handler.job(id).outfile_seen());
        assert!(handler.check_stopped(id, QueueState::Absent, start));
    }

    #[test]
    fn test_finish_check_timeout() {
        let mut handler = create_handler();
        let id = add_job(&mut handler);
        let start = Instant::now();
        handler.mark_submitted(id, 1, start);
        handler.mark_stopped(id, start);

        assert!(!handler.is_time_to_check(id, start + Duration::from_secs(4)));
        assert!(handler.is_time_to_check(id, start + Duration::from_secs(5)));
        assert!(handler.extend_finish_check(id, start + Duration::from_secs(100)));
        assert!(!handler.is_time_to_check(id, start + Duration::from_secs(102)));
        assert!(!handler.extend_finish_check(id, start + Duration::from_secs(300)));
    }

    #[test]
    fn test_unfinished_jobs() {
        let mut handler = create_handler();
        let a = add_job(&mut handler);
        let b = add_job(&mut handler);
        let c = add_job(&mut handler);
        let now = Instant::now();
        handler.mark_submitted(b, 1, now);
        handler.mark_submitted(c, 2, now);
        handler.mark_done(c, JobResult::NotDone);

        assert_eq!(handler.mark_not_started_done(), vec![a]);
        handler.mark_done(b, JobResult::Clean);
        assert_eq!(handler.unfinished(), (vec![a], vec![c]));
        assert_eq!(handler.num_done(), 3);
        assert_eq!(handler.num_in_progress(), 0);
    }

    #[test]
    fn test_scan_batch_output() {
        let dir = tempfile::TempDir::with_prefix("vvtest").unwrap();
        let path = dir.path().join("qbat-out.0");
        assert!(!scan_batch_output(&path));

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "queue job finished cleanly").unwrap();
        file.write_all(&[b'x'; 600]).unwrap();
        file.flush().unwrap();
        // the marker is too far from the end
        assert!(!scan_batch_output(&path));

        writeln!(file, "\nqueue job finished cleanly").unwrap();
        file.flush().unwrap();
        assert!(scan_batch_output(&path));
    }
}
