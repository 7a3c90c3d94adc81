use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Job lifecycle: queued → processing → {complete, failed}. Terminal states
/// never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Failed,
}

/// Immutable job snapshot. Transitions replace the whole value under the
/// store lock, so readers never observe a torn state.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// In-memory job store. Ephemeral by design: a process restart loses all
/// in-flight jobs, and entries are never evicted.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, Arc<Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queued job, returning its generated id.
    pub fn create(&self, webhook_url: Option<String>) -> Uuid {
        let job_id = Uuid::new_v4();
        let job = Arc::new(Job {
            status: JobStatus::Queued,
            result: None,
            error: None,
            webhook_url,
        });
        self.jobs.write().unwrap().insert(job_id, job);
        job_id
    }

    /// Fetch the current snapshot of a job.
    pub fn get(&self, job_id: &Uuid) -> Option<Arc<Job>> {
        self.jobs.read().unwrap().get(job_id).cloned()
    }

    /// Replace a job's snapshot with a new status, keeping the webhook URL.
    fn swap(
        &self,
        job_id: &Uuid,
        status: JobStatus,
        result: Option<Map<String, Value>>,
        error: Option<String>,
    ) {
        let mut jobs = self.jobs.write().unwrap();
        if let Some(existing) = jobs.get(job_id) {
            let replacement = Arc::new(Job {
                status,
                result,
                error,
                webhook_url: existing.webhook_url.clone(),
            });
            jobs.insert(*job_id, replacement);
        }
    }

    pub fn mark_processing(&self, job_id: &Uuid) {
        self.swap(job_id, JobStatus::Processing, None, None);
    }

    pub fn mark_complete(&self, job_id: &Uuid, result: Map<String, Value>) {
        self.swap(job_id, JobStatus::Complete, Some(result), None);
    }

    pub fn mark_failed(&self, job_id: &Uuid, error: String) {
        self.swap(job_id, JobStatus::Failed, None, Some(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_starts_queued() {
        let store = JobStore::new();
        let id = store.create(None);
        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn test_unknown_job_is_none() {
        let store = JobStore::new();
        assert!(store.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_transitions_to_complete() {
        let store = JobStore::new();
        let id = store.create(Some("http://cb.example/hook".to_string()));
        store.mark_processing(&id);
        assert_eq!(store.get(&id).unwrap().status, JobStatus::Processing);

        let mut result = Map::new();
        result.insert("transcription".into(), Value::from("Speaker 1: hi."));
        store.mark_complete(&id, result);

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert!(job.result.is_some());
        // Webhook URL survives every transition.
        assert_eq!(job.webhook_url.as_deref(), Some("http://cb.example/hook"));
    }

    #[test]
    fn test_transition_to_failed_records_error() {
        let store = JobStore::new();
        let id = store.create(None);
        store.mark_processing(&id);
        store.mark_failed(&id, "speech backend 500".to_string());

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("speech backend 500"));
    }

    #[test]
    fn test_old_snapshot_stays_consistent() {
        // A reader holding a snapshot across a transition sees the old,
        // internally consistent value.
        let store = JobStore::new();
        let id = store.create(None);
        let before = store.get(&id).unwrap();
        store.mark_failed(&id, "boom".to_string());
        assert_eq!(before.status, JobStatus::Queued);
        assert!(before.error.is_none());
    }
}
