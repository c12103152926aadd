//! In-process [`JobRepository`] for the Cadence scheduler.
//!
//! Backed by a concurrent map; suitable for tests, embedding, and as the
//! reference implementation of the repository contract. Durable backends
//! implement the same trait.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use cadence_scheduler::{Job, JobRepository, RepositoryError};

/// Job repository backed by an in-memory concurrent map.
///
/// `save` and `update` stamp `last_updated` on the way in, so the stored
/// record always reflects when its state last changed.
#[derive(Default)]
pub struct MemoryRepository {
    jobs: DashMap<String, Job>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored job records.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the repository holds no records.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Clone out every stored record, in no particular order.
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn get(&self, id: &str) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut job = job.clone();
        job.last_updated = Utc::now();
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut job = job.clone();
        job.last_updated = Utc::now();
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.jobs.remove(id).is_some())
    }
}
