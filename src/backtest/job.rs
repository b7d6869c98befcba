//! Backtest job tracking: submitted config, status/progress, and the final
//! result, held in a process-lifetime store.

use crate::config::EngineConfig;
use crate::models::{BacktestResult, BacktestStatus, Granularity, Interpolation};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Submitted backtest parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub granularity: Granularity,
    pub engine_config: EngineConfig,
    /// If absent, the current watchlist is used at submission time.
    #[serde(default)]
    pub securities: Option<Vec<String>>,
    pub interpolation: Interpolation,
}

/// A tracked backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestJob {
    pub job_id: Uuid,
    pub status: BacktestStatus,
    pub progress: f64,
    pub message: String,
    pub config: BacktestConfig,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<BacktestResult>,
    pub error: Option<String>,
}

impl BacktestJob {
    fn queued(job_id: Uuid, config: BacktestConfig) -> Self {
        Self {
            job_id,
            status: BacktestStatus::Queued,
            progress: 0.0,
            message: "queued".to_string(),
            config,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// Pagination/status filter for [`JobStore::list`].
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub status: Option<BacktestStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// In-memory, process-lifetime registry of backtest jobs, paired
/// with one `CancellationToken` per queued/running job so `cancel` can reach
/// its worker task.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<Uuid, BacktestJob>>,
    cancel_tokens: RwLock<HashMap<Uuid, CancellationToken>>,
    order: RwLock<Vec<Uuid>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new queued job and its cancellation token.
    pub fn submit(&self, config: BacktestConfig) -> (Uuid, CancellationToken) {
        let job_id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.jobs
            .write()
            .insert(job_id, BacktestJob::queued(job_id, config));
        self.cancel_tokens.write().insert(job_id, token.clone());
        self.order.write().push(job_id);
        (job_id, token)
    }

    pub fn get(&self, job_id: Uuid) -> Option<BacktestJob> {
        self.jobs.read().get(&job_id).cloned()
    }

    /// Newest-first listing, filtered by `status` and paginated.
    pub fn list(&self, query: &JobQuery) -> Vec<BacktestJob> {
        let order = self.order.read();
        let jobs = self.jobs.read();
        let mut matched: Vec<BacktestJob> = order
            .iter()
            .rev()
            .filter_map(|id| jobs.get(id))
            .filter(|j| query.status.map(|s| s == j.status).unwrap_or(true))
            .cloned()
            .collect();
        let offset = query.offset.min(matched.len());
        let end = query
            .limit
            .map(|l| (offset + l).min(matched.len()))
            .unwrap_or(matched.len());
        matched.drain(end..);
        matched.drain(..offset);
        matched
    }

    pub fn mark_running(&self, job_id: Uuid) {
        if let Some(job) = self.jobs.write().get_mut(&job_id) {
            job.status = BacktestStatus::Running;
            job.message = "running".to_string();
            job.started_at = Some(Utc::now());
        }
    }

    pub fn set_progress(&self, job_id: Uuid, progress: f64) {
        if let Some(job) = self.jobs.write().get_mut(&job_id) {
            job.progress = progress.clamp(0.0, 1.0);
        }
    }

    pub fn complete(&self, job_id: Uuid, result: BacktestResult) {
        if let Some(job) = self.jobs.write().get_mut(&job_id) {
            job.status = BacktestStatus::Completed;
            job.progress = 1.0;
            job.message = "completed".to_string();
            job.result = Some(result);
            job.finished_at = Some(Utc::now());
        }
        self.cancel_tokens.write().remove(&job_id);
    }

    pub fn fail(&self, job_id: Uuid, error: String) {
        if let Some(job) = self.jobs.write().get_mut(&job_id) {
            job.status = BacktestStatus::Failed;
            job.message = "failed".to_string();
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        }
        self.cancel_tokens.write().remove(&job_id);
    }

    /// Cooperative cancel:
    /// fires the job's token so the worker stops at its next date boundary,
    /// and immediately marks a queued/running job cancelled. Returns `false`
    /// only if `job_id` is unknown.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let mut jobs = self.jobs.write();
        let Some(job) = jobs.get_mut(&job_id) else {
            return false;
        };
        if let Some(token) = self.cancel_tokens.write().remove(&job_id) {
            token.cancel();
        }
        if matches!(job.status, BacktestStatus::Queued | BacktestStatus::Running) {
            job.status = BacktestStatus::Cancelled;
            job.message = "cancelled".to_string();
            job.result = None;
            job.finished_at = Some(Utc::now());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Granularity;

    fn config() -> BacktestConfig {
        BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            granularity: Granularity::Daily,
            engine_config: EngineConfig::balanced(),
            securities: None,
            interpolation: Interpolation::Linear,
        }
    }

    #[test]
    fn submit_then_get_returns_queued_job() {
        let store = JobStore::new();
        let (job_id, _token) = store.submit(config());
        let job = store.get(job_id).unwrap();
        assert_eq!(job.status, BacktestStatus::Queued);
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn lifecycle_transitions_to_completed() {
        let store = JobStore::new();
        let (job_id, _token) = store.submit(config());
        store.mark_running(job_id);
        assert_eq!(store.get(job_id).unwrap().status, BacktestStatus::Running);

        store.set_progress(job_id, 0.5);
        assert_eq!(store.get(job_id).unwrap().progress, 0.5);

        store.complete(job_id, BacktestResult {
            statistics: Default::default(),
            signals: Vec::new(),
            config_echo: config(),
        });
        let job = store.get(job_id).unwrap();
        assert_eq!(job.status, BacktestStatus::Completed);
        assert_eq!(job.progress, 1.0);
        assert!(job.result.is_some());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn cancel_unknown_job_returns_false() {
        let store = JobStore::new();
        assert!(!store.cancel(Uuid::new_v4()));
    }

    #[test]
    fn cancel_running_job_marks_cancelled_and_fires_token() {
        let store = JobStore::new();
        let (job_id, token) = store.submit(config());
        store.mark_running(job_id);
        assert!(store.cancel(job_id));
        assert!(token.is_cancelled());
        assert_eq!(store.get(job_id).unwrap().status, BacktestStatus::Cancelled);
    }

    #[test]
    fn list_filters_by_status_and_is_newest_first() {
        let store = JobStore::new();
        let (a, _) = store.submit(config());
        let (b, _) = store.submit(config());
        store.mark_running(a);

        let all = store.list(&JobQuery::default());
        assert_eq!(all[0].job_id, b);
        assert_eq!(all[1].job_id, a);

        let running = store.list(&JobQuery {
            status: Some(BacktestStatus::Running),
            ..Default::default()
        });
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].job_id, a);
    }

    #[test]
    fn list_respects_limit_and_offset() {
        let store = JobStore::new();
        for _ in 0..5 {
            store.submit(config());
        }
        let page = store.list(&JobQuery {
            limit: Some(2),
            offset: 1,
            ..Default::default()
        });
        assert_eq!(page.len(), 2);
    }
}
