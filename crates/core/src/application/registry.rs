// Job Registry - authoritative in-memory owner of job state and log buffers

use crate::domain::error::Result;
use crate::domain::{DomainError, Job, JobId, JobLogBuffer, JobStatus, JobUpdate, LogSlice};
use crate::port::TimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, warn};

/// One registry entry: the job's state and its exclusively owned buffer
struct JobEntry {
    job: Mutex<Job>,
    logs: JobLogBuffer,
}

impl JobEntry {
    fn lock(&self) -> MutexGuard<'_, Job> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Job {
        let mut job = self.lock().clone();
        job.log_count = self.logs.len();
        job
    }
}

/// Number of jobs per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub complete: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.complete + self.error + self.cancelled
    }

    fn bump(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Complete => self.complete += 1,
            JobStatus::Error => self.error += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Job Registry
///
/// The map lock only guards insert/remove/lookup; it is never held while a
/// job's state or buffer is touched. Each entry carries its own state mutex
/// (so updates to one job are linearizable) and its own buffer lock (so job A's
/// appends never wait on job B's).
///
/// Nothing here emits tracing events while holding a lock: the job routing
/// layer appends back into the registry from inside event dispatch.
pub struct JobRegistry {
    entries: RwLock<HashMap<JobId, Arc<JobEntry>>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl JobRegistry {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            time_provider,
        }
    }

    fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(job_id)
            .cloned()
            .ok_or_else(|| DomainError::JobNotFound(job_id.to_string()))
    }

    fn all_entries(&self) -> Vec<Arc<JobEntry>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().cloned().collect()
    }

    /// Register a new pending job. Fails if the id is already present.
    pub fn create(&self, job_id: impl Into<JobId>) -> Result<Job> {
        let job_id = job_id.into();
        let job = Job::new(job_id.clone(), self.time_provider.now_millis());

        let created = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            match entries.entry(job_id.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(JobEntry {
                        job: Mutex::new(job.clone()),
                        logs: JobLogBuffer::new(),
                    }));
                    true
                }
            }
        };

        if !created {
            warn!(job_id = %job_id, "Rejected duplicate job id");
            return Err(DomainError::DuplicateJob(job_id));
        }

        debug!(job_id = %job_id, "Job registered");
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Job> {
        Ok(self.entry(job_id)?.snapshot())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entry(job_id).is_ok()
    }

    /// Merge `update` into the job and return the new snapshot.
    ///
    /// Rejected updates (terminal state, invalid transition) leave the job as it was.
    pub fn update(&self, job_id: &str, update: JobUpdate) -> Result<Job> {
        let entry = self.entry(job_id)?;
        let now = self.time_provider.now_millis();

        let outcome = {
            let mut job = entry.lock();
            job.apply(update, now).map(|_| job.clone())
        };

        match outcome {
            Ok(mut job) => {
                job.log_count = entry.logs.len();
                debug!(job_id = %job_id, status = %job.status, "Job updated");
                Ok(job)
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Job update rejected");
                Err(e)
            }
        }
    }

    /// Remove the job and discard its buffer. Returns whether it was present.
    pub fn remove(&self, job_id: &str) -> bool {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.remove(job_id).is_some()
        };
        if removed {
            debug!(job_id = %job_id, "Job removed");
        }
        removed
    }

    /// Jobs with the given status, oldest first
    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.list_where(|job| job.status == status)
    }

    /// Jobs that have not reached a terminal status, oldest first
    pub fn list_active(&self) -> Vec<Job> {
        self.list_where(|job| !job.is_terminal())
    }

    pub fn list_all(&self) -> Vec<Job> {
        self.list_where(|_| true)
    }

    fn list_where(&self, keep: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .all_entries()
            .iter()
            .map(|entry| entry.snapshot())
            .filter(|job| keep(job))
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.all_entries() {
            counts.bump(entry.lock().status);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a line to the job's buffer, regardless of its status
    pub fn append(&self, job_id: &str, text: impl Into<String>) -> Result<u64> {
        Ok(self.entry(job_id)?.logs.append(text))
    }

    pub fn read_from(&self, job_id: &str, cursor: u64) -> Result<LogSlice> {
        Ok(self.entry(job_id)?.logs.read_from(cursor))
    }

    /// Job snapshot plus at most `max_lines` lines from `cursor`.
    ///
    /// The status is read before the lines, so once a caller sees a terminal
    /// status every line appended before that transition is in this slice or
    /// a later one.
    pub fn read_with_status(
        &self,
        job_id: &str,
        cursor: u64,
        max_lines: usize,
    ) -> Result<(Job, LogSlice)> {
        let entry = self.entry(job_id)?;
        let mut job = entry.lock().clone();
        let slice = entry.logs.read_from_limited(cursor, max_lines);
        job.log_count = entry.logs.len();
        Ok((job, slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::ManualTimeProvider;
    use serde_json::json;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(ManualTimeProvider::new(1_000)))
    }

    #[test]
    fn test_create_rejects_duplicate() {
        let registry = registry();
        registry.create("j1").unwrap();
        let err = registry.create("j1").unwrap_err();
        assert_eq!(err, DomainError::DuplicateJob("j1".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.get("nope"),
            Err(DomainError::JobNotFound(_))
        ));
        assert!(matches!(
            registry.update("nope", JobUpdate::status(JobStatus::Running)),
            Err(DomainError::JobNotFound(_))
        ));
        assert!(matches!(
            registry.read_from("nope", 0),
            Err(DomainError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_read_from_scenario() {
        let registry = registry();
        registry.create("j1").unwrap();
        registry.append("j1", "a").unwrap();
        registry.append("j1", "b").unwrap();

        let first = registry.read_from("j1", 0).unwrap();
        assert_eq!(first.next_cursor, 2);
        assert_eq!(first.lines[0].sequence_number, 0);
        assert_eq!(first.lines[0].text, "a");
        assert_eq!(first.lines[1].sequence_number, 1);
        assert_eq!(first.lines[1].text, "b");

        registry.append("j1", "c").unwrap();
        let second = registry.read_from("j1", 2).unwrap();
        assert_eq!(second.lines.len(), 1);
        assert_eq!(second.lines[0].sequence_number, 2);
        assert_eq!(second.lines[0].text, "c");
        assert_eq!(second.next_cursor, 3);
    }

    #[test]
    fn test_buffers_are_isolated_per_job() {
        let registry = registry();
        registry.create("a").unwrap();
        registry.create("b").unwrap();
        registry.append("a", "from a").unwrap();
        registry.append("b", "from b").unwrap();

        let a = registry.read_from("a", 0).unwrap();
        let b = registry.read_from("b", 0).unwrap();
        assert_eq!(a.lines.len(), 1);
        assert_eq!(a.lines[0].text, "from a");
        assert_eq!(b.lines.len(), 1);
        assert_eq!(b.lines[0].text, "from b");
    }

    #[test]
    fn test_remove_is_idempotent_and_discards_buffer() {
        let registry = registry();
        registry.create("j1").unwrap();
        registry.append("j1", "line").unwrap();

        assert!(registry.remove("j1"));
        assert!(!registry.remove("j1"));
        assert!(registry.read_from("j1", 0).is_err());

        // A recreated id starts with a fresh buffer
        registry.create("j1").unwrap();
        assert!(registry.read_from("j1", 0).unwrap().lines.is_empty());
    }

    #[test]
    fn test_terminal_write_once() {
        let registry = registry();
        registry.create("j1").unwrap();
        registry
            .update("j1", JobUpdate::status(JobStatus::Running))
            .unwrap();
        registry
            .update(
                "j1",
                JobUpdate::complete(Some(json!({"passed": 3})), Some("eval-1".into())),
            )
            .unwrap();

        let err = registry
            .update("j1", JobUpdate::status(JobStatus::Error))
            .unwrap_err();
        assert!(matches!(err, DomainError::TerminalStateViolation { .. }));

        let job = registry.get("j1").unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.eval_id.as_deref(), Some("eval-1"));
        assert_eq!(job.result, Some(json!({"passed": 3})));
    }

    #[test]
    fn test_error_then_complete_is_rejected() {
        let registry = registry();
        registry.create("j").unwrap();
        registry
            .update("j", JobUpdate::status(JobStatus::Running))
            .unwrap();
        registry.update("j", JobUpdate::failed("boom")).unwrap();

        assert!(registry
            .update("j", JobUpdate::status(JobStatus::Complete))
            .is_err());
        assert_eq!(registry.get("j").unwrap().status, JobStatus::Error);
    }

    #[test]
    fn test_list_by_status_and_counts() {
        let registry = registry();
        for id in ["a", "b", "c"] {
            registry.create(id).unwrap();
        }
        registry
            .update("a", JobUpdate::status(JobStatus::Running))
            .unwrap();
        registry.update("c", JobUpdate::cancelled()).unwrap();

        let running: Vec<_> = registry
            .list_by_status(JobStatus::Running)
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(running, vec!["a"]);

        let active: Vec<_> = registry.list_active().into_iter().map(|j| j.id).collect();
        assert_eq!(active, vec!["a", "b"]);

        let counts = registry.status_counts();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.cancelled, 1);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_appends_after_terminal_are_kept() {
        let registry = registry();
        registry.create("j").unwrap();
        registry.update("j", JobUpdate::cancelled()).unwrap();
        assert_eq!(registry.append("j", "late line").unwrap(), 0);
        assert_eq!(registry.get("j").unwrap().log_count, 1);
    }

    #[test]
    fn test_concurrent_updates_are_linearizable() {
        let registry = Arc::new(registry());
        registry.create("j").unwrap();
        registry
            .update("j", JobUpdate::status(JobStatus::Running))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let update = if i % 2 == 0 {
                        JobUpdate::complete(Some(json!(i)), Some(format!("eval-{}", i)))
                    } else {
                        JobUpdate::failed(format!("fail-{}", i))
                    };
                    registry.update("j", update).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);

        let job = registry.get("j").unwrap();
        match job.status {
            JobStatus::Complete => {
                assert!(job.eval_id.is_some());
                assert!(job.error.is_none());
            }
            JobStatus::Error => {
                assert!(job.eval_id.is_none());
                assert!(job.error.is_some());
            }
            other => panic!("unexpected status {}", other),
        }
    }
}
